//! Arbiter Core - Output governance for autonomous agents
//!
//! Arbiter decides whether content produced by an agent may proceed. It checks
//! structured output against declarative contracts, sizes a panel of judge
//! workers from a risk score, fans the content out to that panel in parallel
//! and reduces the validated verdicts to a single decision.
//!
//! # Architecture
//!
//! 1. **Contracts** (`contract`): Parsed output contracts and their validator
//! 2. **Risk** (`risk`): Additive risk score and panel sizing
//! 3. **Dispatch** (`dispatch`): Concurrent worker invocation with timeouts
//! 4. **Aggregation** (`aggregate`): Verdict validation, consensus and decision rules
//! 5. **Budget** (`budget`): Per-request round and call limits with escalation
//! 6. **Cache** (`cache`): TTL memoization of panel results
//! 7. **Engine** (`engine`): Orchestration of all of the above plus audit
//!
//! # Quick Start
//!
//! ```
//! use arbiter_core::contract::OutputContract;
//! use serde_json::json;
//!
//! let contract = OutputContract::parse(
//!     r#"
//!     contract answer
//!     range(confidence, 0, 1)
//!     not_empty(sources)
//!     implies(confidence >= 0.8, count(sources) >= 3)
//!     "#,
//! )
//! .unwrap();
//!
//! let report = contract.validate(&json!({"confidence": 0.9, "sources": ["a"]}));
//! assert!(!report.passed);
//! assert_eq!(report.violations.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod aggregate;
pub mod audit;
pub mod budget;
pub mod cache;
pub mod config;
pub mod contract;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod risk;
pub mod roster;
pub mod types;

// Re-export commonly used types
pub use aggregate::{CriticalIssue, NonContribution, PanelReport, VerdictAggregator};
pub use audit::{AuditRecord, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use budget::{BudgetGuard, BudgetLimits, BudgetState, EscalationRecord};
pub use cache::ResultCache;
pub use config::{GovernanceConfig, QuorumPolicy};
pub use contract::{ContractValidator, OutputContract, ValidationReport, Violation};
pub use dispatch::{DispatchOutcome, DispatchResult, Dispatcher, Worker, WorkerPool, WorkerRequest};
pub use engine::{GovernanceEngine, GovernanceOutcome, RequestMetadata, ReviewRequest};
pub use error::{ConfigError, ContractError, GovernanceError, Result};
pub use risk::{BlastRadius, Domain, Impact, PanelPlan, RiskFactors, RiskScorer};
pub use roster::{RoleRoster, WorkerRoleSpec};
pub use types::{Category, Clock, Consensus, Decision, JudgeVerdict, Severity};

/// Arbiter version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Arbiter name
pub const NAME: &str = "Arbiter";
