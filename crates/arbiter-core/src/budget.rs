//! Budget Guard
//!
//! Per-request circuit breaker over dispatch rounds and worker invocations.
//!
//! ```text
//! WITHIN_LIMITS ──(≥ approach %)──▶ APPROACHING_LIMIT ──(limit reached)──▶ ESCALATING
//! ```
//!
//! Transitions only move forward. Once escalating, no further round is
//! admitted; the engine finalizes with what it has and attaches the
//! [`EscalationRecord`] returned by the refused admission.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Budget states, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetState {
    WithinLimits,
    ApproachingLimit,
    Escalating,
}

impl fmt::Display for BudgetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BudgetState::WithinLimits => "WITHIN_LIMITS",
            BudgetState::ApproachingLimit => "APPROACHING_LIMIT",
            BudgetState::Escalating => "ESCALATING",
        };
        f.write_str(s)
    }
}

/// Resource whose ceiling stopped the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetResource {
    Rounds,
    Calls,
}

/// Ceilings for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub round_limit: u32,
    pub call_limit: u32,
    /// Percentage of a limit at which the guard reports `APPROACHING_LIMIT`
    pub approach_percent: u8,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            round_limit: 5,
            call_limit: 100,
            approach_percent: 90,
        }
    }
}

/// Counters at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub rounds_used: u32,
    pub round_limit: u32,
    pub calls_used: u32,
    pub call_limit: u32,
}

/// Why and where a request chain stopped (the budget-exhausted outcome)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub resource: BudgetResource,
    pub usage: BudgetUsage,
    /// Invocations the refused round would have needed
    pub requested_calls: u32,
    pub message: String,
}

/// Round and call accounting for a single request
#[derive(Debug, Clone)]
pub struct BudgetGuard {
    limits: BudgetLimits,
    rounds_used: u32,
    calls_used: u32,
    state: BudgetState,
}

impl BudgetGuard {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            rounds_used: 0,
            calls_used: 0,
            state: BudgetState::WithinLimits,
        }
    }

    pub fn state(&self) -> BudgetState {
        self.state
    }

    pub fn usage(&self) -> BudgetUsage {
        BudgetUsage {
            rounds_used: self.rounds_used,
            round_limit: self.limits.round_limit,
            calls_used: self.calls_used,
            call_limit: self.limits.call_limit,
        }
    }

    pub fn rounds_used(&self) -> u32 {
        self.rounds_used
    }

    pub fn calls_used(&self) -> u32 {
        self.calls_used
    }

    /// Admit a round of `calls` invocations, or refuse it with an escalation record
    pub fn try_begin_round(&mut self, calls: u32) -> Result<(), EscalationRecord> {
        let refused = if self.state == BudgetState::Escalating
            || self.rounds_used >= self.limits.round_limit
        {
            Some(self.exhausted_resource())
        } else if self.calls_used.saturating_add(calls) > self.limits.call_limit {
            Some(BudgetResource::Calls)
        } else {
            None
        };

        if let Some(resource) = refused {
            self.transition(BudgetState::Escalating);
            let usage = self.usage();
            let message = match resource {
                BudgetResource::Rounds => format!(
                    "round limit reached ({}/{})",
                    usage.rounds_used, usage.round_limit
                ),
                BudgetResource::Calls => format!(
                    "call limit reached ({} used, {} requested, limit {})",
                    usage.calls_used, calls, usage.call_limit
                ),
            };
            return Err(EscalationRecord {
                resource,
                usage,
                requested_calls: calls,
                message,
            });
        }

        self.rounds_used += 1;
        self.calls_used += calls;
        let next = self.evaluate();
        self.transition(next);
        Ok(())
    }

    fn exhausted_resource(&self) -> BudgetResource {
        if self.rounds_used >= self.limits.round_limit {
            BudgetResource::Rounds
        } else {
            BudgetResource::Calls
        }
    }

    fn evaluate(&self) -> BudgetState {
        let reached = |used: u32, limit: u32| used >= limit;
        let approaching = |used: u32, limit: u32| {
            u64::from(used) * 100 >= u64::from(limit) * u64::from(self.limits.approach_percent)
        };

        if reached(self.rounds_used, self.limits.round_limit)
            || reached(self.calls_used, self.limits.call_limit)
        {
            BudgetState::Escalating
        } else if approaching(self.rounds_used, self.limits.round_limit)
            || approaching(self.calls_used, self.limits.call_limit)
        {
            BudgetState::ApproachingLimit
        } else {
            BudgetState::WithinLimits
        }
    }

    fn transition(&mut self, next: BudgetState) {
        if next <= self.state {
            return;
        }
        match next {
            BudgetState::ApproachingLimit => tracing::warn!(
                rounds = self.rounds_used,
                calls = self.calls_used,
                "Budget approaching limit"
            ),
            BudgetState::Escalating => tracing::warn!(
                rounds = self.rounds_used,
                calls = self.calls_used,
                "Budget exhausted, escalating"
            ),
            BudgetState::WithinLimits => {}
        }
        self.state = next;
    }
}
