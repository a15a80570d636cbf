//! Governance Engine
//!
//! Top-level orchestrator. Per request:
//!
//! ```text
//! request ─▶ RiskScorer ─▶ PanelPlan ─┬─▶ ResultCache hit ─────────────────────────┐
//!                                     └─▶ BudgetGuard ─▶ Dispatcher ─▶ Aggregator ─┴─▶ PanelReport ─▶ AuditSink
//!                                              ▲                │
//!                                              └── below quorum ┘
//! ```
//!
//! A round that produced fewer valid verdicts than the quorum re-dispatches
//! only the roles that did not contribute. Budget accounting is per request
//! and owned by this loop alone.

use crate::aggregate::{PanelReport, VerdictAggregator};
use crate::audit::{AuditRecord, AuditSink};
use crate::budget::{BudgetGuard, BudgetState};
use crate::cache::{self, CacheStats, ResultCache};
use crate::config::GovernanceConfig;
use crate::dispatch::{DispatchResult, Dispatcher, WorkerPayload, WorkerPool};
use crate::error::{GovernanceError, Result};
use crate::risk::{PanelPlan, RiskFactors, RiskScorer};
use crate::roster::{RoleRoster, WorkerRoleSpec};
use crate::types::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// Caller-supplied risk metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(flatten)]
    pub factors: RiskFactors,
    /// Requested panel size (3, 5 or 7); may only escalate
    #[serde(default)]
    pub user_override: Option<u8>,
}

/// Content submitted for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub subject: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<RequestMetadata>,
}

impl ReviewRequest {
    pub fn new(subject: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_factors(mut self, factors: RiskFactors) -> Self {
        self.metadata = Some(RequestMetadata {
            factors,
            user_override: self.metadata.and_then(|m| m.user_override),
        });
        self
    }

    /// Requires metadata; without it the override is ignored like any other
    /// metadata-free request
    pub fn with_override(mut self, size: u8) -> Self {
        if let Some(metadata) = self.metadata.as_mut() {
            metadata.user_override = Some(size);
        }
        self
    }
}

/// Everything a review produced
#[derive(Debug, Clone)]
pub struct GovernanceOutcome {
    pub task_id: Uuid,
    pub report: PanelReport,
    pub cache_hit: bool,
    pub budget_state: BudgetState,
    pub audit: AuditRecord,
}

/// Composes scoring, dispatch, aggregation, budget, cache and audit
pub struct GovernanceEngine {
    config: GovernanceConfig,
    roster: Arc<RoleRoster>,
    roster_digest: String,
    scorer: RiskScorer,
    dispatcher: Dispatcher,
    aggregator: VerdictAggregator,
    cache: ResultCache<PanelReport>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    clock: Arc<dyn Clock>,
}

impl GovernanceEngine {
    /// Create an engine over a roster and the workers that fill its roles
    pub fn new(config: GovernanceConfig, roster: RoleRoster, pool: WorkerPool) -> Result<Self> {
        config.validate()?;
        let roster = Arc::new(roster);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        tracing::info!(
            roles = roster.roles().len(),
            workers = pool.len(),
            "Initializing governance engine"
        );

        Ok(Self {
            roster_digest: roster.digest(),
            scorer: RiskScorer::new(),
            dispatcher: Dispatcher::new(pool, config.worker_timeout()),
            aggregator: VerdictAggregator::new(Arc::clone(&roster)),
            cache: ResultCache::new(Arc::clone(&clock)),
            audit_sink: None,
            roster,
            config,
            clock,
        })
    }

    /// Use a different clock for cache expiry and audit timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = ResultCache::new(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn roster(&self) -> &RoleRoster {
        &self.roster
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Plan a request without dispatching anything
    pub fn plan(&self, request: &ReviewRequest) -> PanelPlan {
        let (factors, requested) = match &request.metadata {
            Some(metadata) => (metadata.factors, metadata.user_override),
            None => (
                self.scorer.infer(&request.subject, &request.content),
                None,
            ),
        };
        self.scorer.score(&factors, requested)
    }

    fn fingerprint(&self, request: &ReviewRequest, plan: &PanelPlan) -> String {
        let roster = plan.roster.join(",");
        cache::fingerprint(
            &request.subject,
            &request.content,
            &[&self.roster_digest, &roster],
        )
    }

    /// Review one request end to end
    ///
    /// Only configuration problems are errors. Timeouts, worker failures and
    /// contract violations are recorded in the report; an exhausted budget
    /// finalizes the report with an escalation record.
    pub async fn review(&self, request: &ReviewRequest) -> Result<GovernanceOutcome> {
        if request.subject.trim().is_empty() && request.content.trim().is_empty() {
            return Err(GovernanceError::InvalidRequest(
                "subject and content are both empty".to_string(),
            ));
        }

        let task_id = Uuid::new_v4();
        let plan = self.plan(request);
        let roles = self.roster.resolve(&plan)?;

        tracing::info!(
            %task_id,
            score = plan.score,
            size = plan.size,
            inferred = request.metadata.is_none(),
            "Reviewing request"
        );

        let fingerprint = self.fingerprint(request, &plan);
        if self.config.cache_enabled {
            if let Some(entry) = self.cache.get(&fingerprint) {
                tracing::info!(%task_id, decision = %entry.value.decision, "Cache hit");
                // Reused verdict, but score and override belong to this request
                let mut report = entry.value;
                report.plan = plan.clone();
                let audit = AuditRecord::from_report(task_id, &report, true, 0, self.clock.now());
                self.emit(&audit).await;
                return Ok(GovernanceOutcome {
                    task_id,
                    report,
                    cache_hit: true,
                    budget_state: BudgetState::WithinLimits,
                    audit,
                });
            }
        }

        let mut guard = BudgetGuard::new(self.config.budget_limits());
        let payload = Arc::new(WorkerPayload::new(
            request.subject.clone(),
            request.content.clone(),
        ));
        let required = self.config.quorum.required(plan.size as usize);

        let mut latest: HashMap<String, DispatchResult> = HashMap::new();
        let mut contributed: HashSet<String> = HashSet::new();
        let mut pending: Vec<&WorkerRoleSpec> = roles;
        let mut escalation = None;

        while !pending.is_empty() {
            if let Err(record) = guard.try_begin_round(pending.len() as u32) {
                tracing::warn!(%task_id, "Escalating: {}", record.message);
                escalation = Some(record);
                break;
            }

            let round = guard.rounds_used();
            tracing::debug!(%task_id, round, workers = pending.len(), "Dispatching round");
            for result in self.dispatcher.dispatch(&pending, &payload).await {
                if self.aggregator.judge(&result).is_ok() {
                    contributed.insert(result.worker_id.clone());
                }
                latest.insert(result.worker_id.clone(), result);
            }

            if contributed.len() >= required {
                break;
            }

            pending.retain(|role| !contributed.contains(&role.id));
            tracing::info!(
                %task_id,
                round,
                respondents = contributed.len(),
                required,
                "Round inconclusive, re-dispatching non-contributors"
            );
        }

        let results: Vec<DispatchResult> = plan
            .roster
            .iter()
            .filter_map(|id| latest.remove(id))
            .collect();
        let report = self
            .aggregator
            .aggregate(&plan, &results)
            .with_rounds(guard.rounds_used())
            .with_escalation(escalation);

        if self.config.cache_enabled && !report.is_escalated() {
            self.cache
                .put(fingerprint, report.clone(), self.config.cache_ttl());
        }

        let audit = AuditRecord::from_report(
            task_id,
            &report,
            false,
            guard.calls_used(),
            self.clock.now(),
        );
        self.emit(&audit).await;

        tracing::info!(
            %task_id,
            decision = %report.decision,
            consensus = %report.consensus,
            rounds = report.rounds,
            escalated = report.is_escalated(),
            "Review complete"
        );

        Ok(GovernanceOutcome {
            task_id,
            report,
            cache_hit: false,
            budget_state: guard.state(),
            audit,
        })
    }

    async fn emit(&self, record: &AuditRecord) {
        if let Some(sink) = &self.audit_sink {
            if let Err(e) = sink.record(record).await {
                tracing::error!(task_id = %record.task_id, "Audit sink failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for GovernanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceEngine")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("cache", &self.cache)
            .finish()
    }
}
