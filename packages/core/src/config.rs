//! Engine configuration
//!
//! `ArborConfig` is built once by the embedding process (from defaults, a
//! serialized file, or environment variables) and passed to
//! [`crate::Arbor::open`]. Nothing in the engine reads global state.

use crate::tree::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on the SQLite busy timeout; a writer waiting longer than
/// this is better reported as a conflict
const MAX_BUSY_TIMEOUT_MS: u64 = 60_000;

/// Configuration for the storage layer and the nested-set engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ArborConfig {
    /// Path to the database file
    pub database_path: PathBuf,

    /// How long a connection waits on a locked database before the
    /// operation fails with `Conflict`
    pub busy_timeout_ms: u64,

    /// Retries applied by [`crate::tree::with_retry`] on `Conflict`
    pub max_retries: usize,

    /// First backoff delay; doubled on every retry
    pub retry_base_delay_ms: u64,

    /// Cap on the number of gap/duplicate messages `validate()` emits for the
    /// boundary sequence of one namespace
    pub max_reported_gaps: usize,
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("arbor.db"),
            busy_timeout_ms: 5000,
            max_retries: 3,
            retry_base_delay_ms: 10,
            max_reported_gaps: 20,
        }
    }
}

impl ArborConfig {
    /// Default configuration pointing at `database_path`
    pub fn for_path(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    /// Build a configuration from `ARBOR_*` environment variables, falling
    /// back to defaults for anything unset
    ///
    /// - `ARBOR_DATABASE_PATH`
    /// - `ARBOR_BUSY_TIMEOUT_MS`
    /// - `ARBOR_MAX_RETRIES`
    /// - `ARBOR_RETRY_BASE_DELAY_MS`
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ARBOR_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(ms) = parse_env("ARBOR_BUSY_TIMEOUT_MS")? {
            config.busy_timeout_ms = ms;
        }
        if let Some(retries) = parse_env("ARBOR_MAX_RETRIES")? {
            config.max_retries = retries;
        }
        if let Some(ms) = parse_env("ARBOR_RETRY_BASE_DELAY_MS")? {
            config.retry_base_delay_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.database_path.as_os_str().is_empty() {
            return Err("database_path cannot be empty".to_string());
        }

        if self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(format!(
                "busy_timeout_ms cannot exceed {}",
                MAX_BUSY_TIMEOUT_MS
            ));
        }

        if self.max_retries > 10 {
            return Err("max_retries cannot exceed 10".to_string());
        }

        if self.max_reported_gaps == 0 {
            return Err("max_reported_gaps must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Retry policy derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| format!("{} is not a valid number: '{}'", key, raw)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ArborConfig::default();
        assert_eq!(config.database_path, PathBuf::from("arbor.db"));
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay_ms, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ArborConfig::for_path("/tmp/tree.db");
        assert!(config.validate().is_ok());

        config.busy_timeout_ms = MAX_BUSY_TIMEOUT_MS + 1;
        assert!(config.validate().is_err());

        config.busy_timeout_ms = 100;
        config.max_retries = 11;
        assert!(config.validate().is_err());

        config.max_retries = 2;
        config.max_reported_gaps = 0;
        assert!(config.validate().is_err());

        config.max_reported_gaps = 5;
        config.database_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ArborConfig =
            serde_json::from_str(r#"{"databasePath": "/var/lib/arbor/tree.db", "maxRetries": 5}"#)
                .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/arbor/tree.db"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_retry_policy() {
        let config = ArborConfig {
            max_retries: 4,
            retry_base_delay_ms: 25,
            ..ArborConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(25));
    }
}
