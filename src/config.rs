use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Environment variable naming an optional TOML override file.
pub const CONFIG_ENV_VAR: &str = "SELFTUNE_CONFIG";

/// Runtime settings for the server (all fields have defaults)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub limits: LimitsConfig,
    pub sanitize: SanitizeConfig,
    pub optimization: OptimizationConfig,
}

/// Maximum sizes for the bounded state collections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_interactions: usize,
    pub max_feedback: usize,
    pub max_facts: usize,
    pub max_patterns: usize,
    pub max_goals: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_interactions: 1000,
            max_feedback: 500,
            max_facts: 200,
            max_patterns: 100,
            max_goals: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Maximum nesting depth accepted for tool arguments
    pub max_depth: usize,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self { max_depth: 10 }
    }
}

/// Auto-optimization timing and targets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Milliseconds between scheduled auto-optimization attempts
    pub interval_ms: u64,
    /// Milliseconds to wait before the startup kick-off attempt
    pub startup_delay_ms: u64,
    /// Consecutive failures tolerated before the breaker trips
    pub failure_threshold: u32,
    pub min_success_rate: f64,
    pub max_response_time_ms: f64,
    pub min_tool_usage: f64,
    pub target_productivity: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 300_000,
            startup_delay_ms: 10_000,
            failure_threshold: 5,
            min_success_rate: 0.8,
            max_response_time_ms: 1000.0,
            min_tool_usage: 5.0,
            target_productivity: 0.85,
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, overridden by the TOML file named in
    /// `SELFTUNE_CONFIG` when that variable is set.
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        info!("Loaded config overrides from {:?}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.limits.max_interactions, 1000);
        assert_eq!(config.limits.max_feedback, 500);
        assert_eq!(config.limits.max_facts, 200);
        assert_eq!(config.limits.max_patterns, 100);
        assert_eq!(config.limits.max_goals, 50);
        assert_eq!(config.sanitize.max_depth, 10);
        assert_eq!(config.optimization.interval_ms, 300_000);
        assert_eq!(config.optimization.failure_threshold, 5);
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("selftune.toml");
        std::fs::write(
            &path,
            r#"
[limits]
max_facts = 10

[optimization]
interval_ms = 60000
"#,
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.limits.max_facts, 10);
        assert_eq!(config.limits.max_interactions, 1000);
        assert_eq!(config.optimization.interval_ms, 60_000);
        assert_eq!(config.optimization.failure_threshold, 5);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("selftune.toml");
        std::fs::write(&path, "limits = 3").unwrap();

        assert!(ServerConfig::from_file(&path).is_err());
    }
}
