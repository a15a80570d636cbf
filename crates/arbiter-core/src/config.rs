//! Governance configuration

use crate::budget::BudgetLimits;
use crate::error::{ConfigError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variables read by [`GovernanceConfig::apply_env`]
pub const ENV_ROUND_LIMIT: &str = "ARBITER_ROUND_LIMIT";
pub const ENV_CALL_LIMIT: &str = "ARBITER_CALL_LIMIT";
pub const ENV_TIMEOUT_SECONDS: &str = "ARBITER_TIMEOUT_SECONDS";
pub const ENV_TTL_MINUTES: &str = "ARBITER_TTL_MINUTES";

/// How many valid verdicts make a round conclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumPolicy {
    /// Strict majority of the panel
    Majority,
    /// Every panel member
    All,
    /// Never re-dispatch; one round decides
    SingleRound,
}

impl QuorumPolicy {
    /// Respondents required for a panel of `size`
    pub fn required(self, size: usize) -> usize {
        match self {
            QuorumPolicy::Majority => size / 2 + 1,
            QuorumPolicy::All => size,
            QuorumPolicy::SingleRound => 0,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Maximum dispatch rounds per request
    pub round_limit: u32,

    /// Maximum worker invocations per request
    pub call_limit: u32,

    /// Per-worker timeout, unless the role sets its own
    pub timeout_seconds: u64,

    /// Result cache lifetime
    pub ttl_minutes: u64,

    /// Budget percentage that reports `APPROACHING_LIMIT`
    pub approach_percent: u8,

    /// Round conclusiveness rule
    pub quorum: QuorumPolicy,

    /// Enable the result cache
    pub cache_enabled: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            round_limit: 5,
            call_limit: 100,
            timeout_seconds: 30,
            ttl_minutes: 30,
            approach_percent: 90,
            quorum: QuorumPolicy::Majority,
            cache_enabled: true,
        }
    }
}

impl GovernanceConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_round_limit(mut self, limit: u32) -> Self {
        self.round_limit = limit;
        self
    }

    pub fn with_call_limit(mut self, limit: u32) -> Self {
        self.call_limit = limit;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_ttl_minutes(mut self, minutes: u64) -> Self {
        self.ttl_minutes = minutes;
        self
    }

    pub fn with_approach_percent(mut self, percent: u8) -> Self {
        self.approach_percent = percent;
        self
    }

    pub fn with_quorum(mut self, quorum: QuorumPolicy) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Reject zero limits and out-of-range percentages
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.round_limit == 0 {
            return Err(ConfigError::ZeroLimit { field: "round_limit" });
        }
        if self.call_limit == 0 {
            return Err(ConfigError::ZeroLimit { field: "call_limit" });
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "timeout_seconds",
            });
        }
        if self.ttl_minutes == 0 {
            return Err(ConfigError::ZeroLimit { field: "ttl_minutes" });
        }
        if self.approach_percent == 0 || self.approach_percent > 100 {
            return Err(ConfigError::InvalidApproachPercent(self.approach_percent));
        }
        Ok(())
    }

    pub fn budget_limits(&self) -> BudgetLimits {
        BudgetLimits {
            round_limit: self.round_limit,
            call_limit: self.call_limit,
            approach_percent: self.approach_percent,
        }
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        // chrono panics past i64::MAX milliseconds
        let minutes = i64::try_from(self.ttl_minutes)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 60_000);
        chrono::Duration::minutes(minutes)
    }

    /// Override fields from `ARBITER_*` environment variables
    pub fn apply_env(&mut self) -> std::result::Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Override fields from any variable source
    pub fn apply_env_from<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, raw: String) -> std::result::Result<T, ConfigError> {
            raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw.clone(),
            })
        }

        if let Some(raw) = lookup(ENV_ROUND_LIMIT) {
            self.round_limit = parse(ENV_ROUND_LIMIT, raw)?;
        }
        if let Some(raw) = lookup(ENV_CALL_LIMIT) {
            self.call_limit = parse(ENV_CALL_LIMIT, raw)?;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECONDS) {
            self.timeout_seconds = parse(ENV_TIMEOUT_SECONDS, raw)?;
        }
        if let Some(raw) = lookup(ENV_TTL_MINUTES) {
            self.ttl_minutes = parse(ENV_TTL_MINUTES, raw)?;
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = GovernanceConfig::default();
        assert_eq!(config.round_limit, 5);
        assert_eq!(config.call_limit, 100);
        assert_eq!(config.ttl_minutes, 30);
        assert_eq!(config.cache_ttl().num_seconds(), 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = GovernanceConfig::new()
            .with_round_limit(3)
            .with_call_limit(20)
            .with_quorum(QuorumPolicy::All)
            .with_cache_enabled(false);
        assert_eq!(config.budget_limits().round_limit, 3);
        assert_eq!(config.budget_limits().call_limit, 20);
        assert_eq!(config.quorum.required(5), 5);
        assert!(!config.cache_enabled);
    }

    #[test]
    fn test_validate_rejects_zero_and_bad_percent() {
        assert_eq!(
            GovernanceConfig::new().with_call_limit(0).validate(),
            Err(ConfigError::ZeroLimit { field: "call_limit" })
        );
        assert_eq!(
            GovernanceConfig::new().with_approach_percent(120).validate(),
            Err(ConfigError::InvalidApproachPercent(120))
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [(ENV_ROUND_LIMIT, "3"), (ENV_TTL_MINUTES, " 45 ")].into();
        let mut config = GovernanceConfig::default();
        config
            .apply_env_from(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.round_limit, 3);
        assert_eq!(config.ttl_minutes, 45);
        assert_eq!(config.call_limit, 100);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = GovernanceConfig::default();
        let err = config
            .apply_env_from(|name| (name == ENV_CALL_LIMIT).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref name, .. } if name == ENV_CALL_LIMIT));
    }

    #[test]
    fn test_file_roundtrip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbiter.toml");

        let config = GovernanceConfig::new().with_round_limit(2).with_quorum(QuorumPolicy::SingleRound);
        config.to_file(&path).unwrap();
        assert_eq!(GovernanceConfig::from_file(&path).unwrap(), config);

        std::fs::write(&path, "call_limit = 12\n").unwrap();
        let partial = GovernanceConfig::from_file(&path).unwrap();
        assert_eq!(partial.call_limit, 12);
        assert_eq!(partial.round_limit, 5);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbiter.toml");
        std::fs::write(&path, "round_limit = 0\n").unwrap();
        assert!(GovernanceConfig::from_file(&path).is_err());
    }
}
