//! Contract validation
//!
//! Evaluates every assertion of a contract against one agent output and
//! collects all failures. Validation never raises: authoring problems were
//! rejected when the contract was loaded, so anything left is a property of
//! the output.

use super::ast::{Assertion, Expr, FieldPath, Literal, OutputContract, Quantifier, ValueKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies the assertion a violation came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionRef {
    /// Zero-based position in the contract
    pub index: usize,
    /// Canonical rendering of the assertion
    pub rendered: String,
}

/// A single failed assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub assertion: AssertionRef,
    pub field_path: String,
    pub message: String,
}

/// Outcome of validating one output. `passed` is true iff there are no violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// One-line summary for logs and audit trails
    pub fn summary(&self) -> String {
        let Some(first) = self.violations.first() else {
            return "passed".to_string();
        };
        format!(
            "{} violation(s); first: {} ({}: {})",
            self.violations.len(),
            first.assertion.rendered,
            first.field_path,
            first.message
        )
    }
}

/// Stateless validator over parsed contracts
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractValidator;

impl ContractValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `output` against every assertion of `contract`
    pub fn validate(&self, contract: &OutputContract, output: &Value) -> ValidationReport {
        let mut violations = Vec::new();
        for (index, assertion) in contract.assertions().iter().enumerate() {
            if let Some((field_path, message)) = check(assertion, output) {
                violations.push(Violation {
                    assertion: AssertionRef {
                        index,
                        rendered: assertion.to_string(),
                    },
                    field_path,
                    message,
                });
            }
        }

        tracing::debug!(
            contract = contract.name().unwrap_or("unnamed"),
            violations = violations.len(),
            "Validated output"
        );
        ValidationReport::from_violations(violations)
    }
}

impl OutputContract {
    /// Validate an output against this contract
    pub fn validate(&self, output: &Value) -> ValidationReport {
        ContractValidator.validate(self, output)
    }
}

fn kind_name(value: &Value) -> &'static str {
    ValueKind::of(value).name()
}

fn absent(field: &FieldPath) -> Option<(String, String)> {
    Some((field.to_string(), "field absent".to_string()))
}

/// `None` when the assertion holds, otherwise `(field_path, message)`
fn check(assertion: &Assertion, output: &Value) -> Option<(String, String)> {
    match assertion {
        Assertion::Range { field, low, high } => {
            let Some(value) = field.resolve(output, None) else {
                return absent(field);
            };
            let Some(number) = value.as_f64() else {
                return Some((
                    field.to_string(),
                    format!("expected number, found {}", kind_name(value)),
                ));
            };
            if number < *low || number > *high {
                return Some((
                    field.to_string(),
                    format!("value {} outside [{}, {}]", value, low, high),
                ));
            }
            None
        }

        Assertion::NotEmpty { field } => {
            let Some(value) = field.resolve(output, None) else {
                return absent(field);
            };
            let empty = match value {
                Value::Null => true,
                Value::String(s) => s.trim().is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
                Value::Bool(_) | Value::Number(_) => false,
            };
            empty.then(|| (field.to_string(), format!("{} is empty", kind_name(value))))
        }

        Assertion::IsList { field } => {
            let Some(value) = field.resolve(output, None) else {
                return absent(field);
            };
            (!value.is_array()).then(|| {
                (
                    field.to_string(),
                    format!("expected list, found {}", kind_name(value)),
                )
            })
        }

        Assertion::Type { field, value_kind } => {
            let Some(value) = field.resolve(output, None) else {
                return absent(field);
            };
            (!value_kind.accepts(value)).then(|| {
                (
                    field.to_string(),
                    format!("expected {}, found {}", value_kind, kind_name(value)),
                )
            })
        }

        Assertion::OneOf { field, allowed } => {
            let Some(value) = field.resolve(output, None) else {
                return absent(field);
            };
            let matches = allowed
                .iter()
                .any(|candidate| super::ast::values_equal(value, &candidate.to_value()));
            (!matches).then(|| {
                (
                    field.to_string(),
                    format!(
                        "value {} not one of {}",
                        value,
                        Literal::List(allowed.clone())
                    ),
                )
            })
        }

        Assertion::Quantified {
            quantifier,
            list,
            predicate,
        } => {
            let Some(value) = list.resolve(output, None) else {
                return absent(list);
            };
            let Some(items) = value.as_array() else {
                return Some((
                    list.to_string(),
                    format!("expected list, found {}", kind_name(value)),
                ));
            };
            match quantifier {
                Quantifier::Forall => items
                    .iter()
                    .position(|item| !predicate.holds(output, Some(item)))
                    .map(|index| {
                        (
                            format!("{}[{}]", list, index),
                            format!("element {} does not satisfy `{}`", index, predicate),
                        )
                    }),
                Quantifier::Exists => {
                    let any = items.iter().any(|item| predicate.holds(output, Some(item)));
                    (!any).then(|| {
                        (
                            list.to_string(),
                            "no element satisfied predicate".to_string(),
                        )
                    })
                }
            }
        }

        Assertion::Implication {
            condition,
            consequent,
        } => {
            if condition.holds(output, None) && !consequent.holds(output, None) {
                Some((
                    joined_paths(condition, consequent),
                    format!("`{}` holds but `{}` does not", condition, consequent),
                ))
            } else {
                None
            }
        }
    }
}

fn joined_paths(condition: &Expr, consequent: &Expr) -> String {
    let mut seen: Vec<String> = Vec::new();
    for path in condition.paths().into_iter().chain(consequent.paths()) {
        let rendered = path.to_string();
        if !seen.contains(&rendered) {
            seen.push(rendered);
        }
    }
    seen.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contract(source: &str) -> OutputContract {
        OutputContract::parse(source).unwrap()
    }

    #[test]
    fn test_implication_violation_and_vacuous_pass() {
        let c = contract("implies(confidence >= 0.8, count(sources) >= 3)");

        let report = c.validate(&json!({"confidence": 0.85, "sources": ["a", "b"]}));
        assert!(!report.passed);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(
            report.violations[0].assertion.rendered,
            "implies(confidence >= 0.8, count(sources) >= 3)"
        );
        assert_eq!(report.violations[0].field_path, "confidence, sources");

        let report = c.validate(&json!({"confidence": 0.79, "sources": ["a", "b"]}));
        assert!(report.passed);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_no_short_circuit() {
        let c = contract("range(score, 0, 5)\nis_list(findings)\nnot_empty(title)");
        let report = c.validate(&json!({"score": 9, "findings": "none"}));
        assert_eq!(report.violations.len(), 3);
        assert_eq!(
            report.violations.iter().map(|v| v.assertion.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_range_messages() {
        let c = contract("range(score, 0, 5)");
        assert_eq!(c.validate(&json!({})).violations[0].message, "field absent");
        assert_eq!(
            c.validate(&json!({"score": "4"})).violations[0].message,
            "expected number, found string"
        );
        assert!(c.validate(&json!({"score": 5})).passed);
        assert!(c.validate(&json!({"score": 0.0})).passed);
        assert!(!c.validate(&json!({"score": 5.01})).passed);
    }

    #[test]
    fn test_not_empty_checks_cardinality() {
        let c = contract("not_empty(sources)");
        assert!(!c.validate(&json!({"sources": []})).passed);
        assert!(!c.validate(&json!({"sources": "  "})).passed);
        assert!(!c.validate(&json!({"sources": null})).passed);
        assert_eq!(c.validate(&json!({})).violations[0].message, "field absent");
        assert!(c.validate(&json!({"sources": ["a"]})).passed);
        assert!(c.validate(&json!({"sources": 0})).passed);
    }

    #[test]
    fn test_forall_reports_first_counterexample() {
        let c = contract(r#"forall(findings, item.severity in ["high", "low"])"#);
        let report = c.validate(&json!({"findings": [
            {"severity": "high"},
            {"severity": "low"},
            {"severity": "urgent"},
            {"severity": "bogus"}
        ]}));
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].field_path, "findings[2]");
        assert!(report.violations[0].message.starts_with("element 2"));
    }

    #[test]
    fn test_forall_over_empty_list_holds() {
        let c = contract("forall(findings, item.score > 1)");
        assert!(c.validate(&json!({"findings": []})).passed);
    }

    #[test]
    fn test_exists_failure_message() {
        let c = contract("exists(sources, item.url != null)");
        let report = c.validate(&json!({"sources": [{"title": "x"}]}));
        assert_eq!(report.violations[0].message, "no element satisfied predicate");
        assert!(c.validate(&json!({"sources": [{"url": "https://a"}]})).passed);
        assert!(!c.validate(&json!({"sources": []})).passed);
    }

    #[test]
    fn test_predicate_can_reference_root_inside_quantifier() {
        let c = contract("forall(scores, item <= max)");
        assert!(c.validate(&json!({"scores": [1, 2, 3], "max": 3})).passed);
        assert!(!c.validate(&json!({"scores": [1, 4], "max": 3})).passed);
    }

    #[test]
    fn test_type_and_one_of() {
        let c = contract("type(confidence, number)\none_of(category, [\"PASS\", \"FAIL\"])");
        let report = c.validate(&json!({"confidence": true, "category": "MAYBE"}));
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.violations[0].message, "expected number, found boolean");
        assert!(report.violations[1].message.contains("not one of"));
    }

    #[test]
    fn test_summary() {
        let c = contract("is_list(findings)");
        assert_eq!(c.validate(&json!({"findings": []})).summary(), "passed");
        assert!(c
            .validate(&json!({}))
            .summary()
            .starts_with("1 violation(s); first: is_list(findings)"));
    }
}
