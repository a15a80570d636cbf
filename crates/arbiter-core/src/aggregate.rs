//! Verdict aggregation
//!
//! Validates each raw worker output against its role's contract, turns valid
//! outputs into [`JudgeVerdict`]s and reduces them to one panel decision.
//!
//! Decision rules are evaluated in order and the first match wins:
//!
//! 1. every respondent `PASS` → `APPROVED`
//! 2. `PASS` + `CONDITIONAL` a strict majority and at most one `FAIL` → `CONDITIONAL_APPROVAL`
//! 3. `FAIL` a strict majority → `REJECTED`
//! 4. `CONDITIONAL` a strict majority, or two or more `FAIL` → `REVISION_REQUIRED`
//! 5. otherwise → `REVISION_REQUIRED`
//!
//! Majorities are taken over respondents. With no respondents the decision is
//! `REVISION_REQUIRED` and consensus is `split`.

use crate::budget::EscalationRecord;
use crate::contract::ValidationReport;
use crate::dispatch::{DispatchOutcome, DispatchResult};
use crate::risk::PanelPlan;
use crate::roster::RoleRoster;
use crate::types::{Category, Consensus, Decision, Finding, JudgeVerdict, Severity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Why a worker did not contribute a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NonContribution {
    Timeout,
    /// Budget ran out before the role was invoked
    NotDispatched,
    Failed { error: String },
    /// Output broke the role's contract
    Violation { report: ValidationReport },
    /// Output passed the contract but could not be read as a verdict
    Malformed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonContributor {
    pub worker_id: String,
    #[serde(flatten)]
    pub reason: NonContribution,
}

/// A finding raised independently by several workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalIssue {
    pub title: String,
    pub supporting_worker_count: usize,
    /// Highest severity any supporter gave
    pub severity: Severity,
}

/// Aggregated panel outcome for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelReport {
    pub plan: PanelPlan,
    /// One verdict per plan role, in roster order
    pub verdicts: Vec<JudgeVerdict>,
    pub mean_score: Option<f64>,
    pub consensus: Consensus,
    pub critical_issues: Vec<CriticalIssue>,
    pub decision: Decision,
    /// Which decision rule matched (1 to 5)
    pub decision_rule: u8,
    pub non_contributors: Vec<NonContributor>,
    pub rounds: u32,
    pub escalation: Option<EscalationRecord>,
}

impl PanelReport {
    pub fn respondents(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_response()).count()
    }

    pub fn is_escalated(&self) -> bool {
        self.escalation.is_some()
    }

    pub(crate) fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    pub(crate) fn with_escalation(mut self, escalation: Option<EscalationRecord>) -> Self {
        self.escalation = escalation;
        self
    }
}

/// Turns raw dispatch results into a panel report
#[derive(Debug, Clone)]
pub struct VerdictAggregator {
    roster: Arc<RoleRoster>,
}

impl VerdictAggregator {
    pub fn new(roster: Arc<RoleRoster>) -> Self {
        Self { roster }
    }

    /// Convert one raw result into a verdict, or the reason it does not count
    pub fn judge(&self, result: &DispatchResult) -> Result<JudgeVerdict, NonContribution> {
        let output = match &result.outcome {
            DispatchOutcome::Output(output) => output,
            DispatchOutcome::Timeout => return Err(NonContribution::Timeout),
            DispatchOutcome::Failed(error) => {
                return Err(NonContribution::Failed {
                    error: error.clone(),
                })
            }
        };

        let Some(role) = self.roster.get(&result.worker_id) else {
            return Err(NonContribution::Malformed {
                error: format!("unknown role `{}`", result.worker_id),
            });
        };

        let report = role.output_contract.validate(output);
        if !report.passed {
            tracing::debug!(
                worker = %result.worker_id,
                "Output rejected: {}",
                report.summary()
            );
            return Err(NonContribution::Violation { report });
        }

        read_verdict(&result.worker_id, output).map_err(|error| NonContribution::Malformed { error })
    }

    /// Aggregate the results for a plan. Roles without a result were never dispatched.
    pub fn aggregate(&self, plan: &PanelPlan, results: &[DispatchResult]) -> PanelReport {
        let mut verdicts = Vec::with_capacity(plan.roster.len());
        let mut non_contributors = Vec::new();

        for role_id in &plan.roster {
            let judged = match results.iter().find(|r| &r.worker_id == role_id) {
                Some(result) => self.judge(result),
                None => Err(NonContribution::NotDispatched),
            };
            match judged {
                Ok(verdict) => verdicts.push(verdict),
                Err(reason) => {
                    verdicts.push(JudgeVerdict::no_response(role_id.clone()));
                    non_contributors.push(NonContributor {
                        worker_id: role_id.clone(),
                        reason,
                    });
                }
            }
        }

        let respondents: Vec<&JudgeVerdict> = verdicts.iter().filter(|v| v.is_response()).collect();
        let (decision, decision_rule) = decide(&respondents);
        let consensus = consensus(&respondents);
        let mean_score = mean_score(&respondents);
        let critical_issues = critical_issues(&respondents);

        tracing::debug!(
            respondents = respondents.len(),
            size = plan.size,
            %decision,
            %consensus,
            "Aggregated panel"
        );

        PanelReport {
            plan: plan.clone(),
            verdicts,
            mean_score,
            consensus,
            critical_issues,
            decision,
            decision_rule,
            non_contributors,
            rounds: 1,
            escalation: None,
        }
    }
}

fn read_verdict(worker_id: &str, output: &Value) -> Result<JudgeVerdict, String> {
    let score = output
        .get("score")
        .and_then(Value::as_f64)
        .ok_or("score is not a number")?;
    let category = output
        .get("category")
        .and_then(Value::as_str)
        .and_then(Category::from_worker)
        .ok_or("category is not a verdict category")?;

    let mut findings = Vec::new();
    if let Some(items) = output.get("findings").and_then(Value::as_array) {
        for (index, item) in items.iter().enumerate() {
            let title = item
                .get("title")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("findings[{}].title is not a string", index))?;
            let severity = item
                .get("severity")
                .and_then(Value::as_str)
                .and_then(Severity::parse)
                .ok_or_else(|| format!("findings[{}].severity is not a severity", index))?;
            findings.push(Finding {
                title: title.to_string(),
                severity,
            });
        }
    }

    Ok(JudgeVerdict {
        worker_id: worker_id.to_string(),
        score: Some(score),
        category,
        findings,
    })
}

/// Strict majority of `n`
fn majority(count: usize, n: usize) -> bool {
    count * 2 > n
}

/// Decision plus the number of the rule that produced it
fn decide(respondents: &[&JudgeVerdict]) -> (Decision, u8) {
    let n = respondents.len();
    let count = |c: Category| respondents.iter().filter(|v| v.category == c).count();
    let (pass, conditional, fail) = (
        count(Category::Pass),
        count(Category::Conditional),
        count(Category::Fail),
    );

    if n > 0 && pass == n {
        (Decision::Approved, 1)
    } else if majority(pass + conditional, n) && fail <= 1 {
        (Decision::ConditionalApproval, 2)
    } else if majority(fail, n) {
        (Decision::Rejected, 3)
    } else if majority(conditional, n) || fail >= 2 {
        (Decision::RevisionRequired, 4)
    } else {
        (Decision::RevisionRequired, 5)
    }
}

fn consensus(respondents: &[&JudgeVerdict]) -> Consensus {
    if respondents.is_empty() {
        return Consensus::Split;
    }
    let largest = [Category::Pass, Category::Conditional, Category::Fail]
        .iter()
        .map(|c| respondents.iter().filter(|v| v.category == *c).count())
        .max()
        .unwrap_or(0);
    Consensus::from_fraction(largest as f64 / respondents.len() as f64)
}

fn mean_score(respondents: &[&JudgeVerdict]) -> Option<f64> {
    let scores: Vec<f64> = respondents.iter().filter_map(|v| v.score).collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    }
}

/// Case-folded, punctuation-free, whitespace-collapsed title
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn critical_issues(respondents: &[&JudgeVerdict]) -> Vec<CriticalIssue> {
    // normalized title -> (first seen title, supporters, highest severity)
    let mut groups: BTreeMap<String, (String, HashSet<&str>, Severity)> = BTreeMap::new();

    for verdict in respondents {
        for finding in &verdict.findings {
            let key = normalize_title(&finding.title);
            if key.is_empty() {
                continue;
            }
            let entry = groups
                .entry(key)
                .or_insert_with(|| (finding.title.trim().to_string(), HashSet::new(), finding.severity));
            entry.1.insert(verdict.worker_id.as_str());
            entry.2 = entry.2.min(finding.severity);
        }
    }

    let mut issues: Vec<CriticalIssue> = groups
        .into_values()
        .filter(|(_, supporters, _)| supporters.len() >= 2)
        .map(|(title, supporters, severity)| CriticalIssue {
            title,
            supporting_worker_count: supporters.len(),
            severity,
        })
        .collect();
    // BTreeMap order breaks ties by normalized title
    issues.sort_by(|a, b| b.supporting_worker_count.cmp(&a.supporting_worker_count));
    issues
}
