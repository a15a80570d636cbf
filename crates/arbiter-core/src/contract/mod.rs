//! Output Contracts
//!
//! A contract is a declarative list of assertions that an agent's structured
//! output must satisfy: numeric ranges, non-emptiness, list shape, value
//! kinds, enumerations, quantified list predicates and implications.
//!
//! ```text
//! contract judge-output
//! range(score, 0, 5)
//! implies(confidence >= 0.8, count(sources) >= 3)
//! ```
//!
//! Contracts are parsed once into an AST ([`OutputContract`]) and evaluated by
//! [`ContractValidator`], which never short-circuits: every failed assertion is
//! reported.

pub mod ast;
pub mod parser;
pub mod validator;

pub use ast::{
    Assertion, CompareOp, Expr, FieldPath, Literal, OutputContract, Quantifier, Segment,
    ValueKind,
};
pub use parser::{MAX_CONTRACT_BYTES, MAX_NESTING};
pub use validator::{AssertionRef, ContractValidator, ValidationReport, Violation};

use crate::error::ContractError;

/// Contract every judge verdict must satisfy before it counts
pub const JUDGE_CONTRACT: &str = r#"
contract judge-output
fields score, category, findings
range(score, 0, 5)
one_of(category, ["PASS", "CONDITIONAL", "FAIL"])
is_list(findings)
forall(findings, count(item.title) > 0)
forall(findings, item.severity in ["critical", "high", "medium", "low"])
"#;

/// Parsed judge-output contract
pub fn judge_contract() -> Result<OutputContract, ContractError> {
    OutputContract::parse(JUDGE_CONTRACT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_judge_contract_parses() {
        let contract = judge_contract().unwrap();
        assert_eq!(contract.name(), Some("judge-output"));
        assert_eq!(contract.len(), 5);
    }

    #[test]
    fn test_judge_contract_accepts_well_formed_verdict() {
        let contract = judge_contract().unwrap();
        let verdict = json!({
            "score": 4.5,
            "category": "PASS",
            "findings": [{"title": "Missing index", "severity": "low"}]
        });
        assert!(contract.validate(&verdict).passed);
    }

    #[test]
    fn test_judge_contract_rejects_bad_severity_and_score() {
        let contract = judge_contract().unwrap();
        let verdict = json!({
            "score": 7,
            "category": "PASS",
            "findings": [{"title": "x", "severity": "urgent"}]
        });
        let report = contract.validate(&verdict);
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.violations[0].field_path, "score");
        assert_eq!(report.violations[1].field_path, "findings[0]");
    }

    #[test]
    fn test_rendered_judge_contract_reparses_equal() {
        let contract = judge_contract().unwrap();
        let reparsed = OutputContract::parse(&contract.to_string()).unwrap();
        assert_eq!(contract, reparsed);
        assert_eq!(contract.digest(), reparsed.digest());
    }
}
