//! Worker role roster
//!
//! Roles are data: each [`WorkerRoleSpec`] names a judge role, the contract its
//! output must satisfy and its resource allowances. The standard roster holds
//! the seven judge roles; a roster can also be loaded from a TOML table:
//!
//! ```toml
//! [[role]]
//! id = "technical"
//! token_budget = 4000
//! timeout_seconds = 20
//! contract = "implies(category == \"FAIL\", count(findings) > 0)"
//! ```
//!
//! A role's `contract` is appended to the judge-output contract.

use crate::contract::{judge_contract, OutputContract};
use crate::error::{ConfigError, GovernanceError, Result, ResultExt};
use crate::risk::PanelPlan;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Judge roles in escalation order: a panel of size N uses the first N
pub const PANEL_ROLES: [&str; 7] = [
    "technical",
    "completeness",
    "practicality",
    "adversarial",
    "user",
    "domain-expert",
    "risk",
];

/// Default per-role token allowance
pub const DEFAULT_TOKEN_BUDGET: u32 = 4000;

/// Role ids for a panel of the given size
pub fn panel_roles(size: u8) -> Vec<String> {
    PANEL_ROLES
        .iter()
        .take(size as usize)
        .map(|r| r.to_string())
        .collect()
}

/// A judge role and its constraints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerRoleSpec {
    pub id: String,
    pub output_contract: OutputContract,
    pub token_budget: u32,
    /// Overrides the configured per-worker timeout
    pub timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    role: Vec<RoleEntry>,
}

#[derive(Debug, Deserialize)]
struct RoleEntry {
    id: String,
    #[serde(default = "default_token_budget")]
    token_budget: u32,
    timeout_seconds: Option<u64>,
    contract: Option<String>,
}

fn default_token_budget() -> u32 {
    DEFAULT_TOKEN_BUDGET
}

/// Ordered set of role specs
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRoster {
    roles: Vec<WorkerRoleSpec>,
}

impl RoleRoster {
    /// The seven judge roles, each bound to the judge-output contract
    pub fn standard() -> Result<Self> {
        let contract = judge_contract().context("Failed to load judge contract")?;
        let roles = PANEL_ROLES
            .iter()
            .map(|id| WorkerRoleSpec {
                id: id.to_string(),
                output_contract: contract.clone(),
                token_budget: DEFAULT_TOKEN_BUDGET,
                timeout: None,
            })
            .collect();
        Ok(Self { roles })
    }

    /// Build a roster from specs. Every panel role must be present exactly once.
    pub fn new(roles: Vec<WorkerRoleSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for role in &roles {
            if !seen.insert(role.id.as_str()) {
                return Err(ConfigError::DuplicateRole(role.id.clone()).into());
            }
        }
        if let Some(missing) = PANEL_ROLES.iter().find(|id| !seen.contains(**id)) {
            return Err(ConfigError::MissingRole(missing.to_string()).into());
        }
        Ok(Self { roles })
    }

    /// Parse a TOML roster table
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: RosterFile = toml::from_str(source)?;
        let judge = judge_contract().context("Failed to load judge contract")?;

        let mut roles = Vec::with_capacity(file.role.len());
        for entry in file.role {
            let output_contract = match &entry.contract {
                Some(text) => {
                    let extra = OutputContract::parse(text)
                        .with_context(|| format!("Invalid contract for role `{}`", entry.id))?;
                    judge
                        .merged(&extra)
                        .with_context(|| format!("Invalid contract for role `{}`", entry.id))?
                }
                None => judge.clone(),
            };
            if entry.timeout_seconds == Some(0) {
                return Err(ConfigError::ZeroLimit {
                    field: "timeout_seconds",
                }
                .into());
            }
            roles.push(WorkerRoleSpec {
                id: entry.id,
                output_contract,
                token_budget: entry.token_budget,
                timeout: entry.timeout_seconds.map(Duration::from_secs),
            });
        }
        Self::new(roles)
    }

    /// Load a TOML roster file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read roster {}", path.display()))?;
        Self::from_toml_str(&source)
    }

    pub fn get(&self, id: &str) -> Option<&WorkerRoleSpec> {
        self.roles.iter().find(|r| r.id == id)
    }

    pub fn roles(&self) -> &[WorkerRoleSpec] {
        &self.roles
    }

    /// Resolve every role a plan names
    pub fn resolve(&self, plan: &PanelPlan) -> Result<Vec<&WorkerRoleSpec>> {
        plan.roster
            .iter()
            .map(|id| {
                self.get(id)
                    .ok_or_else(|| GovernanceError::UnknownRole(id.clone()))
            })
            .collect()
    }

    /// Identity of the roster's contracts, used in request fingerprints
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for role in &self.roles {
            hasher.update(role.id.as_bytes());
            hasher.update(&[0]);
            hasher.update(role.output_contract.digest().as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{BlastRadius, Domain, Impact, RiskFactors, RiskScorer};

    fn full_roster_toml(extra: &str) -> String {
        let mut out = String::new();
        for id in PANEL_ROLES {
            out.push_str(&format!("[[role]]\nid = \"{}\"\n", id));
            if id == "technical" {
                out.push_str(extra);
            }
        }
        out
    }

    #[test]
    fn test_standard_roster_has_seven_roles() {
        let roster = RoleRoster::standard().unwrap();
        assert_eq!(roster.roles().len(), 7);
        assert!(roster.get("domain-expert").is_some());
        assert!(roster.get("janitor").is_none());
    }

    #[test]
    fn test_panel_roles_prefixes() {
        assert_eq!(panel_roles(3), vec!["technical", "completeness", "practicality"]);
        assert_eq!(&panel_roles(5)[3..], &["adversarial", "user"]);
        assert_eq!(&panel_roles(7)[5..], &["domain-expert", "risk"]);
    }

    #[test]
    fn test_roster_from_toml_with_role_contract() {
        let source = full_roster_toml(
            "token_budget = 8000\ntimeout_seconds = 5\ncontract = \"implies(category == \\\"FAIL\\\", count(findings) > 0)\"\n",
        );
        let roster = RoleRoster::from_toml_str(&source).unwrap();
        let technical = roster.get("technical").unwrap();
        assert_eq!(technical.token_budget, 8000);
        assert_eq!(technical.timeout, Some(Duration::from_secs(5)));
        assert_eq!(technical.output_contract.len(), 6);
        assert_eq!(roster.get("user").unwrap().output_contract.len(), 5);
        assert_ne!(roster.digest(), RoleRoster::standard().unwrap().digest());
    }

    #[test]
    fn test_role_contract_must_respect_judge_fields() {
        let source = full_roster_toml("contract = \"fields score\\nrange(score, 1, 5)\"\n");
        // Declared fields are unioned with the judge contract's declaration
        assert!(RoleRoster::from_toml_str(&source).is_ok());

        let source = full_roster_toml("contract = \"fields score\\nnot_empty(rationale)\"\n");
        let err = RoleRoster::from_toml_str(&source).unwrap_err();
        assert!(err.to_string().contains("technical"));
    }

    #[test]
    fn test_missing_and_duplicate_roles() {
        let err = RoleRoster::from_toml_str("[[role]]\nid = \"technical\"\n").unwrap_err();
        assert!(matches!(
            err,
            GovernanceError::Config(ConfigError::MissingRole(ref id)) if id == "completeness"
        ));

        let source = full_roster_toml("") + "[[role]]\nid = \"risk\"\n";
        let err = RoleRoster::from_toml_str(&source).unwrap_err();
        assert!(matches!(err, GovernanceError::Config(ConfigError::DuplicateRole(_))));
    }

    #[test]
    fn test_resolve_plan() {
        let roster = RoleRoster::standard().unwrap();
        let plan = RiskScorer::new().score(
            &RiskFactors {
                reversible: false,
                blast_radius: BlastRadius::Org,
                domain: Domain::Hardware,
                impact: Impact::High,
            },
            None,
        );
        let specs = roster.resolve(&plan).unwrap();
        assert_eq!(specs.len(), 7);
        assert_eq!(specs[6].id, "risk");
    }

    #[test]
    fn test_roster_file_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.toml");
        std::fs::write(&path, full_roster_toml("")).unwrap();
        let roster = RoleRoster::from_file(&path).unwrap();
        assert_eq!(roster.digest(), RoleRoster::standard().unwrap().digest());
    }
}
