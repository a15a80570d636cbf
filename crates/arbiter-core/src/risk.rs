//! Risk Scoring
//!
//! Maps task metadata to an integer risk score in `0..=13` and the score to a
//! panel size (3, 5 or 7) and roster. The size is a pure table lookup and is
//! monotonic in every factor. A caller may ask for a larger panel; requests
//! that would shrink the panel are rejected and recorded.
//!
//! When a request carries no metadata, [`RiskScorer::infer`] derives every
//! factor from the subject and content with keyword heuristics.

use crate::roster;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Panel sizes the scorer can produce
pub const PANEL_SIZES: [u8; 3] = [3, 5, 7];

/// Highest possible score
pub const MAX_SCORE: u8 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlastRadius {
    Internal,
    Team,
    Org,
    External,
}

impl BlastRadius {
    pub fn weight(self) -> u8 {
        match self {
            BlastRadius::Internal => 0,
            BlastRadius::Team => 1,
            BlastRadius::Org => 2,
            BlastRadius::External => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Business,
    Software,
    Hardware,
    Mixed,
}

impl Domain {
    pub fn weight(self) -> u8 {
        match self {
            Domain::Business | Domain::Software => 1,
            Domain::Hardware | Domain::Mixed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

impl Impact {
    pub fn weight(self) -> u8 {
        match self {
            Impact::Low => 0,
            Impact::Medium => 1,
            Impact::High => 2,
            Impact::Critical => 4,
        }
    }
}

/// Task metadata that drives panel sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RiskFactors {
    pub reversible: bool,
    pub blast_radius: BlastRadius,
    pub domain: Domain,
    pub impact: Impact,
}

impl RiskFactors {
    pub fn breakdown(&self) -> ScoreBreakdown {
        ScoreBreakdown {
            reversible: if self.reversible { 0 } else { 4 },
            blast_radius: self.blast_radius.weight(),
            domain: self.domain.weight(),
            impact: self.impact.weight(),
        }
    }
}

/// Per-factor contributions to the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub reversible: u8,
    pub blast_radius: u8,
    pub domain: u8,
    pub impact: u8,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u8 {
        self.reversible + self.blast_radius + self.domain + self.impact
    }
}

/// A size override that was not applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRejection {
    pub requested: u8,
    pub computed: u8,
    pub reason: String,
}

/// How many workers to consult and which roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelPlan {
    pub score: u8,
    pub breakdown: ScoreBreakdown,
    pub size: u8,
    pub roster: Vec<String>,
    pub override_requested: Option<u8>,
    /// True only when an override escalated the panel
    pub override_applied: bool,
    pub override_rejected: Option<OverrideRejection>,
}

impl PanelPlan {
    /// Respondents needed for a conclusive round (strict majority)
    pub fn quorum(&self) -> usize {
        self.size as usize / 2 + 1
    }
}

/// Panel size for a score
pub fn size_for_score(score: u8) -> u8 {
    match score {
        0..=3 => 3,
        4..=7 => 5,
        _ => 7,
    }
}

lazy_static! {
    static ref IRREVERSIBLE: Regex = Regex::new(
        r"(?i)\b(irreversible|delet\w*|drop|destroy\w*|purge|wipe|migrat\w*|deploy\w*|production|release|publish\w*|payment|transfer)\b"
    )
    .unwrap();
    static ref EXTERNAL: Regex =
        Regex::new(r"(?i)\b(customers?|public|external|end[- ]users?|clients?|partners?)\b").unwrap();
    static ref ORG: Regex = Regex::new(
        r"(?i)\b(company|org|organi[sz]ation|enterprise|cross[- ]team|all teams)\b"
    )
    .unwrap();
    static ref TEAM: Regex =
        Regex::new(r"(?i)\b(team|shared|department|service)\b").unwrap();
    static ref SOFTWARE: Regex = Regex::new(
        r"(?i)\b(code|api|database|schema|deploy\w*|bug|refactor\w*|software|library|frontend|backend|service)\b"
    )
    .unwrap();
    static ref HARDWARE: Regex = Regex::new(
        r"(?i)\b(hardware|firmware|circuit|pcb|sensor|device|embedded|chip)\b"
    )
    .unwrap();
    static ref BUSINESS: Regex = Regex::new(
        r"(?i)\b(pricing|budget|revenue|marketing|sales|policy|hiring|legal|contract)\b"
    )
    .unwrap();
    static ref CRITICAL: Regex = Regex::new(
        r"(?i)\b(security|vulnerabilit\w*|breach|outage|data loss|compliance|safety|critical)\b"
    )
    .unwrap();
    static ref HIGH: Regex = Regex::new(
        r"(?i)\b(payments?|billing|auth\w*|migrat\w*|production|legal)\b"
    )
    .unwrap();
    static ref MEDIUM: Regex = Regex::new(
        r"(?i)\b(performance|refactor\w*|api|feature|integration)\b"
    )
    .unwrap();
}

/// Computes panel plans from risk factors
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskScorer;

impl RiskScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score the factors and apply an optional size override
    pub fn score(&self, factors: &RiskFactors, requested: Option<u8>) -> PanelPlan {
        let breakdown = factors.breakdown();
        let score = breakdown.total();
        let computed = size_for_score(score);

        let mut size = computed;
        let mut override_applied = false;
        let mut override_rejected = None;

        if let Some(requested) = requested {
            if !PANEL_SIZES.contains(&requested) {
                override_rejected = Some(OverrideRejection {
                    requested,
                    computed,
                    reason: format!("{} is not a panel size", requested),
                });
            } else if requested > computed {
                size = requested;
                override_applied = true;
            } else if requested < computed {
                override_rejected = Some(OverrideRejection {
                    requested,
                    computed,
                    reason: "override may only increase the panel".to_string(),
                });
            }
        }

        if let Some(rejection) = &override_rejected {
            tracing::warn!(
                requested = rejection.requested,
                computed = rejection.computed,
                "Panel size override rejected: {}",
                rejection.reason
            );
        }

        tracing::debug!(score, size, override_applied, "Computed panel plan");

        PanelPlan {
            score,
            breakdown,
            size,
            roster: roster::panel_roles(size),
            override_requested: requested,
            override_applied,
            override_rejected,
        }
    }

    /// Infer every factor from free text
    pub fn infer(&self, subject: &str, content: &str) -> RiskFactors {
        let text = format!("{}\n{}", subject, content);

        let reversible = !IRREVERSIBLE.is_match(&text);

        let blast_radius = if EXTERNAL.is_match(&text) {
            BlastRadius::External
        } else if ORG.is_match(&text) {
            BlastRadius::Org
        } else if TEAM.is_match(&text) {
            BlastRadius::Team
        } else {
            BlastRadius::Internal
        };

        let software = SOFTWARE.is_match(&text);
        let hardware = HARDWARE.is_match(&text);
        let business = BUSINESS.is_match(&text);
        let domain = match (software, hardware, business) {
            (_, true, true) | (true, true, _) | (true, false, true) => Domain::Mixed,
            (false, true, false) => Domain::Hardware,
            (false, false, true) => Domain::Business,
            _ => Domain::Software,
        };

        let impact = if CRITICAL.is_match(&text) {
            Impact::Critical
        } else if HIGH.is_match(&text) {
            Impact::High
        } else if MEDIUM.is_match(&text) {
            Impact::Medium
        } else {
            Impact::Low
        };

        let factors = RiskFactors {
            reversible,
            blast_radius,
            domain,
            impact,
        };
        tracing::debug!(?factors, "Inferred risk factors");
        factors
    }
}
