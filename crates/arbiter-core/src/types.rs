//! Shared types for the governance engine
//!
//! Verdict categories, panel decisions, consensus levels and the clock
//! abstraction used for cache expiry and audit timestamps.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category a judge assigns to the reviewed content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Pass,
    Conditional,
    Fail,
    /// Synthesized for timeouts, worker failures and contract violations
    NoResponse,
}

impl Category {
    /// Parse a category as emitted by a worker. `NO_RESPONSE` is never accepted
    /// from a worker.
    pub fn from_worker(raw: &str) -> Option<Self> {
        match raw {
            "PASS" => Some(Category::Pass),
            "CONDITIONAL" => Some(Category::Conditional),
            "FAIL" => Some(Category::Fail),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Pass => "PASS",
            Category::Conditional => "CONDITIONAL",
            Category::Fail => "FAIL",
            Category::NoResponse => "NO_RESPONSE",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final panel decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    ConditionalApproval,
    RevisionRequired,
    Rejected,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Approved => "APPROVED",
            Decision::ConditionalApproval => "CONDITIONAL_APPROVAL",
            Decision::RevisionRequired => "REVISION_REQUIRED",
            Decision::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

/// Agreement level among respondents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consensus {
    Unanimous,
    StrongMajority,
    Majority,
    Split,
}

impl Consensus {
    /// Map the share of respondents in the majority category to a level
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction >= 1.0 {
            Consensus::Unanimous
        } else if fraction >= 0.8 {
            Consensus::StrongMajority
        } else if fraction >= 0.6 {
            Consensus::Majority
        } else {
            Consensus::Split
        }
    }
}

impl fmt::Display for Consensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Consensus::Unanimous => "unanimous",
            Consensus::StrongMajority => "strong_majority",
            Consensus::Majority => "majority",
            Consensus::Split => "split",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

/// A single issue reported by a judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub severity: Severity,
}

/// One judge's contribution to a panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub worker_id: String,
    /// `None` for `NO_RESPONSE`
    pub score: Option<f64>,
    pub category: Category,
    pub findings: Vec<Finding>,
}

impl JudgeVerdict {
    pub fn no_response(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            score: None,
            category: Category::NoResponse,
            findings: Vec::new(),
        }
    }

    pub fn is_response(&self) -> bool {
        self.category != Category::NoResponse
    }
}

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests and replays
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at the Unix epoch
    pub fn at_epoch() -> Self {
        Self::new(Utc.timestamp_opt(0, 0).single().unwrap_or_default())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
