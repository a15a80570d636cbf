//! Error types for Arbiter Core
//!
//! This module defines the error types used throughout the governance engine.
//! We use `thiserror` for ergonomic error definitions with automatic Display/Error implementations.
//!
//! Only contract-authoring and configuration problems are errors. Worker
//! timeouts, failures and output violations are recorded as data in the
//! panel report, and budget exhaustion finalizes a report with an escalation
//! record instead of failing the request.

use thiserror::Error;

/// Result type alias for Arbiter operations
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Main error type for Arbiter operations
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Malformed or inconsistent output contract
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    /// Invalid configuration or roster table
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plan references a role the roster does not define
    #[error("Unknown worker role: {0}")]
    UnknownRole(String),

    /// Invalid request payload
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML decoding errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML encoding errors
    #[error("TOML encoding error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        source: Box<GovernanceError>,
    },
}

/// Errors raised while parsing or loading an output contract
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractError {
    #[error("Contract is empty")]
    Empty,

    #[error("Contract input exceeds size limit: {actual} bytes (max {max})")]
    TooLarge { max: usize, actual: usize },

    #[error("Predicate nesting exceeds limit {max} at line {line}, column {column}")]
    NestingTooDeep {
        max: usize,
        line: usize,
        column: usize,
    },

    #[error("Unexpected `{found}` at line {line}, column {column}: expected {expected}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        line: usize,
        column: usize,
    },

    #[error("Unknown assertion `{name}` at line {line}")]
    UnknownAssertion { name: String, line: usize },

    #[error("Unknown function `{name}` at line {line}, column {column}")]
    UnknownFunction {
        name: String,
        line: usize,
        column: usize,
    },

    #[error("Unknown type kind `{kind}` at line {line}")]
    UnknownKind { kind: String, line: usize },

    #[error("Invalid number `{raw}` at line {line}, column {column}")]
    InvalidNumber {
        raw: String,
        line: usize,
        column: usize,
    },

    #[error("Unterminated string at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },

    #[error("Invalid field path `{path}` at line {line}")]
    InvalidPath { path: String, line: usize },

    #[error("Field `{field}` is not declared by the contract (line {line})")]
    UnknownField { field: String, line: usize },

    #[error("Invalid range at line {line}: low {low} is greater than high {high}")]
    InvertedRange { low: f64, high: f64, line: usize },

    #[error("`item` used outside a quantifier at line {line}")]
    UnboundItem { line: usize },

    #[error("Duplicate `{directive}` directive at line {line}")]
    DuplicateDirective { directive: &'static str, line: usize },
}

/// Errors raised while loading or validating configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("`{field}` must be greater than zero")]
    ZeroLimit { field: &'static str },

    #[error("`approach_percent` must be within 1..=100, got {0}")]
    InvalidApproachPercent(u8),

    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("Duplicate role `{0}` in roster")]
    DuplicateRole(String),

    #[error("Roster is missing required role `{0}`")]
    MissingRole(String),
}

impl GovernanceError {
    /// Add context to an error
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to a Result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add lazy context to a Result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<GovernanceError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
