//! E2E Test: Governance Engine
//!
//! Drives full reviews through scripted workers: panel sizing, concurrent
//! dispatch with timeouts, contract checks on verdicts, aggregation, budget
//! escalation, caching and audit.

use arbiter_core::aggregate::NonContribution;
use arbiter_core::budget::BudgetResource;
use arbiter_core::{
    AuditSink, BlastRadius, Category, Consensus, Decision, Domain, GovernanceConfig,
    GovernanceEngine, Impact, JsonlAuditSink, MemoryAuditSink, QuorumPolicy, ReviewRequest,
    RiskFactors, RoleRoster, Severity, Worker, WorkerPool, WorkerRequest,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Worker that answers with a fixed output after an optional delay and
/// remembers the payload digest of every request it saw
struct Scripted {
    output: Value,
    delay: Duration,
    seen: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(output: Value) -> Arc<Self> {
        Self::delayed(output, Duration::ZERO)
    }

    fn delayed(output: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            output,
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Worker for Scripted {
    async fn invoke(&self, request: &WorkerRequest) -> anyhow::Result<Value> {
        self.seen.lock().push(request.payload.digest());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.output.clone())
    }
}

fn verdict(category: &str) -> Value {
    json!({"score": 4, "category": category, "findings": []})
}

fn low_risk() -> RiskFactors {
    RiskFactors {
        reversible: true,
        blast_radius: BlastRadius::Internal,
        domain: Domain::Software,
        impact: Impact::Low,
    }
}

fn high_risk() -> RiskFactors {
    RiskFactors {
        reversible: false,
        blast_radius: BlastRadius::External,
        domain: Domain::Mixed,
        impact: Impact::Critical,
    }
}

/// E2E test: seven-judge panel with mixed verdicts
///
/// Validates:
/// 1. Maximum-risk factors size the panel at 7
/// 2. Every worker receives the identical payload
/// 3. PASS + CONDITIONAL majority with one FAIL yields CONDITIONAL_APPROVAL
/// 4. A finding raised by two workers becomes a critical issue
#[tokio::test]
async fn e2e_high_risk_panel_conditional_approval() {
    let injection_a = json!({
        "score": 2,
        "category": "CONDITIONAL",
        "findings": [{"title": "SQL injection in login", "severity": "high"}]
    });
    let injection_b = json!({
        "score": 1,
        "category": "FAIL",
        "findings": [{"title": "  sql injection in LOGIN! ", "severity": "critical"}]
    });

    let workers = vec![
        ("technical", Scripted::new(verdict("PASS"))),
        ("completeness", Scripted::new(verdict("PASS"))),
        ("practicality", Scripted::new(verdict("PASS"))),
        ("adversarial", Scripted::new(injection_b)),
        ("user", Scripted::new(verdict("PASS"))),
        ("domain-expert", Scripted::new(injection_a)),
        ("risk", Scripted::new(verdict("CONDITIONAL"))),
    ];
    let mut pool = WorkerPool::new();
    for (role, worker) in &workers {
        pool.register(*role, worker.clone());
    }

    let engine = GovernanceEngine::new(
        GovernanceConfig::default(),
        RoleRoster::standard().unwrap(),
        pool,
    )
    .expect("engine should build");

    let request = ReviewRequest::new("Migrate billing", "move customer invoices to the new ledger")
        .with_factors(high_risk());
    let outcome = engine.review(&request).await.expect("review should succeed");
    let report = &outcome.report;

    assert_eq!(report.plan.score, 13);
    assert_eq!(report.plan.size, 7);
    assert_eq!(report.verdicts.len(), 7);
    assert_eq!(report.respondents(), 7);
    assert_eq!(report.decision, Decision::ConditionalApproval);
    assert_eq!(report.decision_rule, 2);
    assert_eq!(report.consensus, Consensus::Split);

    // (4 * 4 + 4 + 2 + 1) / 7
    let mean = report.mean_score.unwrap();
    assert!((mean - 23.0 / 7.0).abs() < 1e-9);

    assert_eq!(report.critical_issues.len(), 1);
    assert_eq!(report.critical_issues[0].supporting_worker_count, 2);
    assert_eq!(report.critical_issues[0].severity, Severity::Critical);

    let digests: Vec<String> = workers
        .iter()
        .flat_map(|(_, w)| w.seen.lock().clone())
        .collect();
    assert_eq!(digests.len(), 7);
    assert!(digests.windows(2).all(|pair| pair[0] == pair[1]));
}

/// E2E test: a slow worker is cut off at its role timeout
#[tokio::test]
async fn e2e_timeout_becomes_no_response() {
    let mut roles = RoleRoster::standard().unwrap().roles().to_vec();
    for role in roles.iter_mut().filter(|s| s.id == "practicality") {
        role.timeout = Some(Duration::from_millis(50));
    }
    let roster = RoleRoster::new(roles).unwrap();

    let pool = WorkerPool::new()
        .with_worker("technical", Scripted::new(verdict("PASS")))
        .with_worker("completeness", Scripted::new(verdict("PASS")))
        .with_worker(
            "practicality",
            Scripted::delayed(verdict("FAIL"), Duration::from_secs(5)),
        );

    let engine = GovernanceEngine::new(GovernanceConfig::default(), roster, pool).unwrap();

    let started = Instant::now();
    let outcome = engine
        .review(&ReviewRequest::new("Tweak log line", "reword a debug message").with_factors(low_risk()))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));

    let report = &outcome.report;
    assert_eq!(report.rounds, 1);
    assert_eq!(report.verdicts[2].category, Category::NoResponse);
    assert_eq!(report.non_contributors.len(), 1);
    assert_eq!(report.non_contributors[0].worker_id, "practicality");
    assert_eq!(report.non_contributors[0].reason, NonContribution::Timeout);
    // The late FAIL never counts
    assert_eq!(report.decision, Decision::Approved);
}

/// E2E test: a verdict that breaks the judge contract does not count
#[tokio::test]
async fn e2e_contract_violation_is_excluded() {
    let out_of_range = json!({"score": 9, "category": "FAIL", "findings": []});
    let pool = WorkerPool::new()
        .with_worker("technical", Scripted::new(verdict("CONDITIONAL")))
        .with_worker("completeness", Scripted::new(verdict("CONDITIONAL")))
        .with_worker("practicality", Scripted::new(out_of_range));
    let config = GovernanceConfig::default().with_quorum(QuorumPolicy::SingleRound);
    let engine = GovernanceEngine::new(config, RoleRoster::standard().unwrap(), pool).unwrap();

    let outcome = engine
        .review(&ReviewRequest::new("s", "c").with_factors(low_risk()))
        .await
        .unwrap();

    let report = &outcome.report;
    assert_eq!(report.respondents(), 2);
    assert!(matches!(
        &report.non_contributors[0].reason,
        NonContribution::Violation { report } if !report.passed
    ));
    assert_eq!(report.decision, Decision::ConditionalApproval);
    assert_eq!(report.consensus, Consensus::Unanimous);
}

/// E2E test: the call limit refuses a follow-up round
///
/// Only three of seven roles have workers, so the first round is below the
/// quorum of four. Re-dispatching the four silent roles would need 11 calls
/// against a limit of 10.
#[tokio::test]
async fn e2e_call_limit_escalates() {
    let pool = WorkerPool::new()
        .with_worker("technical", Scripted::new(verdict("PASS")))
        .with_worker("completeness", Scripted::new(verdict("PASS")))
        .with_worker("practicality", Scripted::new(verdict("PASS")));
    let config = GovernanceConfig::default().with_call_limit(10);
    let sink = Arc::new(MemoryAuditSink::new());
    let engine = GovernanceEngine::new(config, RoleRoster::standard().unwrap(), pool)
        .unwrap()
        .with_audit_sink(sink.clone());

    let outcome = engine
        .review(&ReviewRequest::new("s", "c").with_factors(high_risk()))
        .await
        .unwrap();

    let escalation = outcome.report.escalation.as_ref().expect("should escalate");
    assert_eq!(escalation.resource, BudgetResource::Calls);
    assert_eq!(escalation.requested_calls, 4);
    assert_eq!(escalation.usage.calls_used, 7);
    assert_eq!(outcome.report.rounds, 1);
    assert_eq!(outcome.report.respondents(), 3);
    assert_eq!(
        outcome
            .report
            .non_contributors
            .iter()
            .filter(|n| matches!(n.reason, NonContribution::Failed { .. }))
            .count(),
        4
    );

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].escalated);
    assert_eq!(records[0].calls_used, 7);
    assert_eq!(records[0].panel_size, 7);
}

/// E2E test: override escalates the panel and is audited
#[tokio::test]
async fn e2e_override_and_jsonl_audit() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonlAuditSink::new(dir.path().join("audit.jsonl")));

    let mut pool = WorkerPool::new();
    for role in ["technical", "completeness", "practicality", "adversarial", "user"] {
        pool.register(role, Scripted::new(verdict("PASS")));
    }
    let engine = GovernanceEngine::new(
        GovernanceConfig::default(),
        RoleRoster::standard().unwrap(),
        pool,
    )
    .unwrap()
    .with_audit_sink(sink.clone());

    let escalate = ReviewRequest::new("a", "b").with_factors(low_risk()).with_override(5);
    let shrink = ReviewRequest::new("c", "d").with_factors(low_risk()).with_override(3);
    let first = engine.review(&escalate).await.unwrap();
    let second = engine.review(&shrink).await.unwrap();

    assert_eq!(first.report.plan.size, 5);
    assert!(first.report.plan.override_applied);
    assert_eq!(second.report.plan.size, 3);
    assert!(!second.report.plan.override_applied);

    let records = sink.read_all().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records[0].override_attempted && records[0].override_applied);
    assert!(records[1].override_attempted && !records[1].override_applied);
    assert_eq!(records[0].task_id, first.task_id);
}

/// E2E test: requests without metadata are scored from their text
#[tokio::test]
async fn e2e_inferred_risk_sizes_panel() {
    let mut pool = WorkerPool::new();
    for role in arbiter_core::roster::PANEL_ROLES {
        pool.register(role, Scripted::new(verdict("PASS")));
    }
    let engine = GovernanceEngine::new(
        GovernanceConfig::default(),
        RoleRoster::standard().unwrap(),
        pool,
    )
    .unwrap();

    let quiet = ReviewRequest::new("Fix typo", "correct a spelling mistake in a comment");
    let loud = ReviewRequest::new(
        "Delete production database",
        "irreversible purge of all customer payment records, critical outage risk",
    );

    assert_eq!(engine.plan(&quiet).size, 3);
    assert_eq!(engine.plan(&loud).size, 7);

    let outcome = engine.review(&loud).await.unwrap();
    assert_eq!(outcome.report.verdicts.len(), 7);
    assert_eq!(outcome.report.decision, Decision::Approved);
}

/// A sink that always fails must not fail the review
#[tokio::test]
async fn e2e_failing_audit_sink_is_tolerated() {
    struct Broken;

    #[async_trait]
    impl AuditSink for Broken {
        async fn record(&self, _record: &arbiter_core::AuditRecord) -> arbiter_core::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }
    }

    let pool = WorkerPool::new()
        .with_worker("technical", Scripted::new(verdict("FAIL")))
        .with_worker("completeness", Scripted::new(verdict("FAIL")))
        .with_worker("practicality", Scripted::new(verdict("PASS")));
    let engine = GovernanceEngine::new(
        GovernanceConfig::default(),
        RoleRoster::standard().unwrap(),
        pool,
    )
    .unwrap()
    .with_audit_sink(Arc::new(Broken));

    let outcome = engine
        .review(&ReviewRequest::new("s", "c").with_factors(low_risk()))
        .await
        .unwrap();
    assert_eq!(outcome.report.decision, Decision::Rejected);
}
