//! Engine configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! max_steps = 200000
//! predicate_timeout_ms = 30000
//!
//! [[rules]]
//! name = "replica"
//! path = "rules/ReplicaRules.rules"
//!
//! [repair]
//! dry_run = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::query::DEFAULT_MAX_STEPS;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Solver step limit per query.
    pub max_steps: u64,
    /// Upper bound on each external predicate call.
    pub predicate_timeout_ms: Option<u64>,
    /// Emit a trace event for every resolved goal.
    pub trace: bool,
    /// Rule files, one per repair policy.
    pub rules: Vec<RuleSetConfig>,
    /// Repair layer settings.
    pub repair: RepairConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            predicate_timeout_ms: None,
            trace: false,
            rules: Vec::new(),
            repair: RepairConfig::default(),
        }
    }
}

/// A named rule file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSetConfig {
    /// Policy name, used in logs.
    pub name: String,
    /// Path of the rule file.
    pub path: PathBuf,
}

/// Settings for the repair embedding layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Record repairs without executing them.
    pub dry_run: bool,
    /// Default execution bound for a scheduled repair.
    pub max_execution_ms: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_execution_ms: 60 * 60 * 1000,
        }
    }
}

impl RepairConfig {
    /// [`Self::max_execution_ms`] as a duration.
    #[must_use]
    pub const fn max_execution(&self) -> Duration {
        Duration::from_millis(self.max_execution_ms)
    }
}

impl EngineConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or invalid values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise
    /// see [`EngineConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// The rule file registered under `name`.
    #[must_use]
    pub fn rule_set(&self, name: &str) -> Option<&RuleSetConfig> {
        self.rules.iter().find(|r| r.name == name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps == 0 {
            return Err(ConfigError::Parse {
                message: "max_steps must be positive".to_string(),
            });
        }
        if self.predicate_timeout_ms == Some(0) {
            return Err(ConfigError::Parse {
                message: "predicate_timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryOptions;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_steps, 1_000_000);
        assert!(!config.repair.dry_run);
    }

    #[test]
    fn test_parse_full_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_steps = 5000
            predicate_timeout_ms = 250
            trace = true

            [[rules]]
            name = "replica"
            path = "rules/replica.rules"

            [repair]
            dry_run = true
            "#,
        )
        .unwrap();
        assert_eq!(config.max_steps, 5000);
        assert_eq!(config.rule_set("replica").unwrap().path, PathBuf::from("rules/replica.rules"));
        assert!(config.rule_set("disk").is_none());
        assert!(config.repair.dry_run);
        assert_eq!(config.repair.max_execution(), Duration::from_secs(3600));

        let options = QueryOptions::from(&config);
        assert_eq!(options.max_steps, 5000);
        assert_eq!(options.predicate_timeout, Some(Duration::from_millis(250)));
        assert!(options.trace);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_toml_str("max_steps = 0"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("max_steps = \"many\""),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/nonexistent/mendlog.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
