use anyhow::Context;
use arbiter_core::audit::JsonlAuditSink;
use arbiter_core::{
    BlastRadius, Domain, GovernanceConfig, GovernanceEngine, Impact, OutputContract,
    ReviewRequest, RiskFactors, RiskScorer, RoleRoster,
};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod workers;

/// Arbiter - output governance for autonomous agents
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a structured output against a contract
    Validate {
        /// Contract text file
        #[arg(long, value_name = "FILE")]
        contract: PathBuf,

        /// JSON output to check
        #[arg(long, value_name = "FILE")]
        output: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute the panel plan for a set of risk factors
    Score {
        /// The change can be undone
        #[arg(long)]
        reversible: bool,

        /// internal, team, org or external
        #[arg(long, value_parser = parse_enum::<BlastRadius>)]
        blast_radius: BlastRadius,

        /// business, software, hardware or mixed
        #[arg(long, value_parser = parse_enum::<Domain>)]
        domain: Domain,

        /// low, medium, high or critical
        #[arg(long, value_parser = parse_enum::<Impact>)]
        impact: Impact,

        /// Requested panel size (3, 5 or 7)
        #[arg(long = "override", value_name = "N")]
        size_override: Option<u8>,
    },

    /// Run a full review against scripted workers
    Review {
        /// Review request JSON (subject, content, optional metadata)
        #[arg(long, value_name = "FILE")]
        request: PathBuf,

        /// Canned worker responses keyed by role id
        #[arg(long, value_name = "FILE")]
        responses: PathBuf,

        /// Governance config TOML
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Role roster TOML
        #[arg(long, value_name = "FILE")]
        roster: Option<PathBuf>,

        /// Append audit records to this JSONL file
        #[arg(long, value_name = "FILE")]
        audit: Option<PathBuf>,
    },
}

/// Parse a lowercase enum through its serde representation
fn parse_enum<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase()))
        .map_err(|_| format!("unrecognized value `{}`", raw))
}

fn init_tracing(verbose: bool) {
    // Logs go to stderr so stdout stays machine readable
    if verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Print a validation report; violations fail the command
fn run_validate(contract_path: &Path, output_path: &Path, json: bool) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(contract_path)
        .with_context(|| format!("Failed to read {}", contract_path.display()))?;
    let contract = OutputContract::parse(&source)
        .with_context(|| format!("Invalid contract {}", contract_path.display()))?;
    let value: serde_json::Value = read_json(output_path)?;

    let report = contract.validate(&value);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.passed {
        println!("PASSED ({} assertions)", contract.len());
    } else {
        println!("FAILED: {} violation(s)", report.violations.len());
        for violation in &report.violations {
            println!(
                "  #{} {} [{}]: {}",
                violation.assertion.index,
                violation.assertion.rendered,
                violation.field_path,
                violation.message
            );
        }
    }

    if !report.passed {
        anyhow::bail!(
            "{} failed {} assertion(s)",
            output_path.display(),
            report.violations.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate {
            contract,
            output,
            json,
        } => run_validate(&contract, &output, json)?,
        Commands::Score {
            reversible,
            blast_radius,
            domain,
            impact,
            size_override,
        } => {
            let factors = RiskFactors {
                reversible,
                blast_radius,
                domain,
                impact,
            };
            let plan = RiskScorer::new().score(&factors, size_override);
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Review {
            request,
            responses,
            config,
            roster,
            audit,
        } => {
            let mut governance = match &config {
                Some(path) => GovernanceConfig::from_file(path)?,
                None => GovernanceConfig::default(),
            };
            governance.apply_env()?;

            let roster = match &roster {
                Some(path) => RoleRoster::from_file(path)?,
                None => RoleRoster::standard()?,
            };
            let pool = workers::load_pool(&responses)?;
            let request: ReviewRequest = read_json(&request)?;

            let mut engine = GovernanceEngine::new(governance, roster, pool)?;
            if let Some(path) = audit {
                engine = engine.with_audit_sink(Arc::new(JsonlAuditSink::new(path)));
            }

            let outcome = engine.review(&request).await?;
            tracing::info!(
                task_id = %outcome.task_id,
                decision = %outcome.report.decision,
                budget = %outcome.budget_state,
                "Review finished"
            );
            println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_enum() {
        assert_eq!(parse_enum::<BlastRadius>("External"), Ok(BlastRadius::External));
        assert_eq!(parse_enum::<Impact>("critical"), Ok(Impact::Critical));
        assert!(parse_enum::<Domain>("cloud").is_err());
    }

    #[test]
    fn test_cli_parses_score_command() {
        let cli = Cli::try_parse_from([
            "arbiter",
            "score",
            "--blast-radius",
            "team",
            "--domain",
            "software",
            "--impact",
            "high",
            "--override",
            "7",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Score {
                reversible: false,
                blast_radius: BlastRadius::Team,
                size_override: Some(7),
                ..
            }
        ));
    }

    #[test]
    fn test_validate_fails_on_violations() {
        let dir = tempfile::tempdir().unwrap();
        let contract = dir.path().join("contract.txt");
        std::fs::write(&contract, "fields confidence\nrange(confidence, 0, 1)\n").unwrap();

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"confidence": 0.4}"#).unwrap();
        assert!(run_validate(&contract, &good, false).is_ok());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"confidence": 3}"#).unwrap();
        let err = run_validate(&contract, &bad, true).unwrap_err();
        assert!(err.to_string().contains("1 assertion(s)"));
    }
}
