//! Contract AST
//!
//! Assertions and predicate expressions are parsed once into these types and
//! evaluated by a small pure interpreter. The `Display` implementations render
//! the canonical contract text; parsing a rendering yields an equal AST.

use crate::error::ContractError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Name bound to the current element inside a quantifier predicate
pub const ITEM: &str = "item";

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Object key
    Key(String),
    /// Sequence index
    Index(usize),
}

/// Path into an agent output, e.g. `findings[0].title` or `item.severity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPath {
    /// Rooted at the current quantifier element instead of the output
    pub item: bool,
    pub segments: Vec<Segment>,
}

impl FieldPath {
    /// Path rooted at the output with plain keys (`a.b.c`)
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            item: false,
            segments: keys.into_iter().map(|k| Segment::Key(k.into())).collect(),
        }
    }

    /// Root key of an output-rooted path
    pub fn root_key(&self) -> Option<&str> {
        if self.item {
            return None;
        }
        match self.segments.first() {
            Some(Segment::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Resolve the path against the output (or the bound quantifier element)
    pub fn resolve<'a>(&self, output: &'a Value, item: Option<&'a Value>) -> Option<&'a Value> {
        let mut current = if self.item { item? } else { output };
        for segment in &self.segments {
            current = match segment {
                Segment::Key(key) => current.as_object()?.get(key)?,
                Segment::Index(index) => current.as_array()?.get(*index)?,
            };
        }
        Some(current)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if self.item {
            write!(f, "{}", ITEM)?;
            first = false;
        }
        for segment in &self.segments {
            match segment {
                Segment::Key(key) if first => write!(f, "{}", key)?,
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
            first = false;
        }
        Ok(())
    }
}

/// Literal value in a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Literal>),
}

impl Literal {
    /// Convert to a JSON value for comparison against outputs
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::String(s) => Value::String(s.clone()),
            Literal::List(items) => Value::Array(items.iter().map(Literal::to_value).collect()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "\"")
            }
            Literal::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Predicate expression over field paths and literals
///
/// Predicates are deterministic and side-effect free: the same output always
/// yields the same result. Missing fields resolve to `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Literal),
    Path(FieldPath),
    /// Length of a list, object or string; 0 when absent
    Count(FieldPath),
    /// Field present and not null
    Exists(FieldPath),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        left: Box<Expr>,
        op: CompareOp,
        right: Box<Expr>,
    },
    /// Membership against a list literal
    In {
        needle: Box<Expr>,
        haystack: Vec<Literal>,
    },
}

impl Expr {
    /// Evaluate as a boolean. Only `true` is truthy.
    pub fn holds(&self, output: &Value, item: Option<&Value>) -> bool {
        match self {
            Expr::Not(inner) => !inner.holds(output, item),
            Expr::And(parts) => parts.iter().all(|p| p.holds(output, item)),
            Expr::Or(parts) => parts.iter().any(|p| p.holds(output, item)),
            Expr::Exists(path) => path
                .resolve(output, item)
                .map(|v| !v.is_null())
                .unwrap_or(false),
            Expr::Compare { left, op, right } => {
                let l = left.value(output, item);
                let r = right.value(output, item);
                compare(&l, *op, &r)
            }
            Expr::In { needle, haystack } => {
                let value = needle.value(output, item);
                haystack
                    .iter()
                    .any(|candidate| values_equal(&value, &candidate.to_value()))
            }
            Expr::Literal(_) | Expr::Path(_) | Expr::Count(_) => {
                matches!(self.value(output, item), Value::Bool(true))
            }
        }
    }

    /// Evaluate as a value
    pub fn value(&self, output: &Value, item: Option<&Value>) -> Value {
        match self {
            Expr::Literal(literal) => literal.to_value(),
            Expr::Path(path) => path.resolve(output, item).cloned().unwrap_or(Value::Null),
            Expr::Count(path) => {
                let count = match path.resolve(output, item) {
                    Some(Value::Array(items)) => items.len(),
                    Some(Value::Object(map)) => map.len(),
                    Some(Value::String(s)) => s.chars().count(),
                    _ => 0,
                };
                Value::from(count as u64)
            }
            _ => Value::Bool(self.holds(output, item)),
        }
    }

    /// Every field path referenced by the expression, in source order
    pub fn paths(&self) -> Vec<&FieldPath> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a FieldPath>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Path(path) | Expr::Count(path) | Expr::Exists(path) => out.push(path),
            Expr::Not(inner) => inner.collect_paths(out),
            Expr::And(parts) | Expr::Or(parts) => {
                for part in parts {
                    part.collect_paths(out);
                }
            }
            Expr::Compare { left, right, .. } => {
                left.collect_paths(out);
                right.collect_paths(out);
            }
            Expr::In { needle, .. } => needle.collect_paths(out),
        }
    }

    /// Operand that renders without surrounding parentheses
    fn is_atom(&self) -> bool {
        matches!(
            self,
            Expr::Literal(_) | Expr::Path(_) | Expr::Count(_) | Expr::Exists(_)
        )
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_atom() {
            write!(f, "{}", self)
        } else {
            write!(f, "({})", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(literal) => write!(f, "{}", literal),
            Expr::Path(path) => write!(f, "{}", path),
            Expr::Count(path) => write!(f, "count({})", path),
            Expr::Exists(path) => write!(f, "exists({})", path),
            Expr::Not(inner) => {
                write!(f, "!")?;
                inner.fmt_operand(f)
            }
            Expr::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    match part {
                        Expr::And(_) | Expr::Or(_) => write!(f, "({})", part)?,
                        _ => write!(f, "{}", part)?,
                    }
                }
                Ok(())
            }
            Expr::Or(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    match part {
                        Expr::Or(_) => write!(f, "({})", part)?,
                        _ => write!(f, "{}", part)?,
                    }
                }
                Ok(())
            }
            Expr::Compare { left, op, right } => {
                left.fmt_operand(f)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_operand(f)
            }
            Expr::In { needle, haystack } => {
                needle.fmt_operand(f)?;
                write!(f, " in {}", Literal::List(haystack.clone()))
            }
        }
    }
}

/// Numeric-aware JSON equality (`1` equals `1.0`)
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        _ => {
            let ordering = match (left, right) {
                (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CompareOp::Lt => ordering.is_lt(),
                CompareOp::Le => ordering.is_le(),
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Eq | CompareOp::Ne => false,
            }
        }
    }
}

/// Kinds accepted by `type(field, kind)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Number,
    Integer,
    Boolean,
    List,
    Object,
    Null,
}

impl ValueKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "string" => ValueKind::String,
            "number" => ValueKind::Number,
            "integer" => ValueKind::Integer,
            "boolean" => ValueKind::Boolean,
            "list" => ValueKind::List,
            "object" => ValueKind::Object,
            "null" => ValueKind::Null,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::List => "list",
            ValueKind::Object => "object",
            ValueKind::Null => "null",
        }
    }

    /// Most specific kind of a JSON value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => ValueKind::Integer,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::List,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Whether `value` satisfies this kind (integers are numbers)
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueKind::Number => value.is_number(),
            ValueKind::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().map(|x| x.fract() == 0.0).unwrap_or(false)
                }
                _ => false,
            },
            kind => ValueKind::of(value) == kind,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// List quantifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantifier {
    Forall,
    Exists,
}

/// One checkable clause of a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assertion {
    Range {
        field: FieldPath,
        low: f64,
        high: f64,
    },
    NotEmpty {
        field: FieldPath,
    },
    IsList {
        field: FieldPath,
    },
    Type {
        field: FieldPath,
        value_kind: ValueKind,
    },
    OneOf {
        field: FieldPath,
        allowed: Vec<Literal>,
    },
    Quantified {
        quantifier: Quantifier,
        list: FieldPath,
        predicate: Expr,
    },
    Implication {
        condition: Expr,
        consequent: Expr,
    },
}

impl Assertion {
    /// Paths that must resolve against the output root
    fn root_paths(&self) -> Vec<&FieldPath> {
        match self {
            Assertion::Range { field, .. }
            | Assertion::NotEmpty { field }
            | Assertion::IsList { field }
            | Assertion::Type { field, .. }
            | Assertion::OneOf { field, .. } => vec![field],
            Assertion::Quantified {
                list, predicate, ..
            } => {
                let mut paths = vec![list];
                paths.extend(predicate.paths().into_iter().filter(|p| !p.item));
                paths
            }
            Assertion::Implication {
                condition,
                consequent,
            } => {
                let mut paths = condition.paths();
                paths.extend(consequent.paths());
                paths
            }
        }
    }

    /// Paths rooted at `item` that appear outside a quantifier predicate
    fn has_unbound_item(&self) -> bool {
        match self {
            Assertion::Quantified { list, .. } => list.item,
            other => other.root_paths().iter().any(|p| p.item),
        }
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assertion::Range { field, low, high } => {
                write!(f, "range({}, {}, {})", field, low, high)
            }
            Assertion::NotEmpty { field } => write!(f, "not_empty({})", field),
            Assertion::IsList { field } => write!(f, "is_list({})", field),
            Assertion::Type { field, value_kind } => {
                write!(f, "type({}, {})", field, value_kind)
            }
            Assertion::OneOf { field, allowed } => {
                write!(f, "one_of({}, {})", field, Literal::List(allowed.clone()))
            }
            Assertion::Quantified {
                quantifier,
                list,
                predicate,
            } => {
                let name = match quantifier {
                    Quantifier::Forall => "forall",
                    Quantifier::Exists => "exists",
                };
                write!(f, "{}({}, {})", name, list, predicate)
            }
            Assertion::Implication {
                condition,
                consequent,
            } => write!(f, "implies({}, {})", condition, consequent),
        }
    }
}

/// Declarative description of the properties a structured output must have
///
/// Contracts are immutable once loaded: construct them with
/// [`OutputContract::parse`] or [`OutputContract::new`], both of which run the
/// same authoring checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    name: Option<String>,
    fields: Option<Vec<String>>,
    assertions: Vec<Assertion>,
}

impl OutputContract {
    /// Build a contract from already-constructed assertions
    pub fn new(
        name: Option<String>,
        fields: Option<Vec<String>>,
        assertions: Vec<Assertion>,
    ) -> Result<Self, ContractError> {
        let contract = Self {
            name,
            fields,
            assertions,
        };
        for (index, assertion) in contract.assertions.iter().enumerate() {
            contract.check_assertion(assertion, index + 1)?;
        }
        Ok(contract)
    }

    /// Parse the textual contract form
    pub fn parse(source: &str) -> Result<Self, ContractError> {
        super::parser::parse_contract(source)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn fields(&self) -> Option<&[String]> {
        self.fields.as_deref()
    }

    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    pub fn len(&self) -> usize {
        self.assertions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }

    /// Contract identity: blake3 of the canonical rendering
    pub fn digest(&self) -> String {
        blake3::hash(self.to_string().as_bytes()).to_hex().to_string()
    }

    /// Append another contract's assertions (role-specific extensions)
    ///
    /// Field declarations are unioned when both sides declare them; if either
    /// side is undeclared the merged contract is undeclared too.
    pub fn merged(&self, extra: &OutputContract) -> Result<Self, ContractError> {
        let fields = match (&self.fields, &extra.fields) {
            (Some(a), Some(b)) => {
                let mut union: Vec<String> = a.clone();
                for field in b {
                    if !union.contains(field) {
                        union.push(field.clone());
                    }
                }
                Some(union)
            }
            _ => None,
        };
        let mut assertions = self.assertions.clone();
        assertions.extend(extra.assertions.iter().cloned());
        Self::new(self.name.clone(), fields, assertions)
    }

    /// Authoring checks shared by the parser and `new`
    pub(crate) fn check_assertion(
        &self,
        assertion: &Assertion,
        line: usize,
    ) -> Result<(), ContractError> {
        if let Assertion::Range { low, high, .. } = assertion {
            if low > high || low.is_nan() || high.is_nan() {
                return Err(ContractError::InvertedRange {
                    low: *low,
                    high: *high,
                    line,
                });
            }
        }

        if assertion.has_unbound_item() {
            return Err(ContractError::UnboundItem { line });
        }

        for path in assertion.root_paths() {
            if path.item {
                continue;
            }
            let Some(root) = path.root_key() else {
                return Err(ContractError::InvalidPath {
                    path: path.to_string(),
                    line,
                });
            };
            if let Some(fields) = &self.fields {
                if !fields.iter().any(|f| f == root) {
                    return Err(ContractError::UnknownField {
                        field: root.to_string(),
                        line,
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for OutputContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            writeln!(f, "contract {}", name)?;
        }
        if let Some(fields) = &self.fields {
            writeln!(f, "fields {}", fields.join(", "))?;
        }
        for assertion in &self.assertions {
            writeln!(f, "{}", assertion)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_resolution() {
        let output = json!({"findings": [{"title": "a"}, {"title": "b"}]});
        let path = FieldPath {
            item: false,
            segments: vec![
                Segment::Key("findings".into()),
                Segment::Index(1),
                Segment::Key("title".into()),
            ],
        };
        assert_eq!(path.resolve(&output, None), Some(&json!("b")));
        assert_eq!(path.to_string(), "findings[1].title");
    }

    #[test]
    fn test_item_path_requires_binding() {
        let path = FieldPath {
            item: true,
            segments: vec![Segment::Key("url".into())],
        };
        let element = json!({"url": "https://a"});
        assert!(path.resolve(&json!({}), None).is_none());
        assert_eq!(path.resolve(&json!({}), Some(&element)), Some(&json!("https://a")));
        assert_eq!(path.to_string(), "item.url");
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_compare_type_mismatch_is_false() {
        let expr = Expr::Compare {
            left: Box::new(Expr::Path(FieldPath::keys(["score"]))),
            op: CompareOp::Ge,
            right: Box::new(Expr::Literal(Literal::Number(3.0))),
        };
        assert!(expr.holds(&json!({"score": 4}), None));
        assert!(!expr.holds(&json!({"score": "4"}), None));
        assert!(!expr.holds(&json!({}), None));
    }

    #[test]
    fn test_count_of_absent_field_is_zero() {
        let expr = Expr::Count(FieldPath::keys(["sources"]));
        assert_eq!(expr.value(&json!({}), None), json!(0));
        assert_eq!(expr.value(&json!({"sources": [1, 2]}), None), json!(2));
    }

    #[test]
    fn test_integer_kind_accepts_whole_floats() {
        assert!(ValueKind::Integer.accepts(&json!(3)));
        assert!(ValueKind::Integer.accepts(&json!(3.0)));
        assert!(!ValueKind::Integer.accepts(&json!(3.5)));
        assert!(ValueKind::Number.accepts(&json!(3)));
    }

    #[test]
    fn test_new_rejects_undeclared_field() {
        let result = OutputContract::new(
            None,
            Some(vec!["score".into()]),
            vec![Assertion::NotEmpty {
                field: FieldPath::keys(["sources"]),
            }],
        );
        assert!(matches!(result, Err(ContractError::UnknownField { .. })));
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        let result = OutputContract::new(
            None,
            None,
            vec![Assertion::Range {
                field: FieldPath::keys(["score"]),
                low: 5.0,
                high: 0.0,
            }],
        );
        assert!(matches!(result, Err(ContractError::InvertedRange { .. })));
    }

    #[test]
    fn test_literal_string_rendering_escapes_quotes() {
        let literal = Literal::String("say \"hi\"".into());
        assert_eq!(literal.to_string(), "\"say \\\"hi\\\"\"");
    }
}
