//! Runner configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RunnerError};

pub const ENV_MAX_WORKERS: &str = "GTKPASS_MAX_WORKERS";
pub const ENV_WORKER_PREFIX: &str = "GTKPASS_WORKER_PREFIX";
pub const ENV_JOIN_TIMEOUT_MS: &str = "GTKPASS_JOIN_TIMEOUT_MS";

/// Task runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Number of worker threads allocated on every arm. Must be > 0.
    pub max_workers: usize,
    /// Worker threads are named `{thread_name_prefix}-{index}`.
    pub thread_name_prefix: String,
    /// Upper bound on how long disarm waits for workers to exit.
    /// `None` waits for the drain to finish, however long the work takes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_timeout_ms: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            thread_name_prefix: "gtkpass-worker".to_string(),
            join_timeout_ms: None,
        }
    }
}

impl RunnerConfig {
    /// Defaults overridden by `GTKPASS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env()
    }

    /// Parse a JSON document; missing keys fall back to defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Apply environment overrides on top of `self`.
    pub fn merge_env(self) -> Result<Self, ConfigError> {
        self.merge_from(|key| std::env::var(key).ok())
    }

    fn merge_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(raw) = lookup(ENV_MAX_WORKERS) {
            self.max_workers = parse_number(ENV_MAX_WORKERS, &raw)?;
        }
        if let Some(prefix) = lookup(ENV_WORKER_PREFIX) {
            if prefix.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_WORKER_PREFIX.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            self.thread_name_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_JOIN_TIMEOUT_MS) {
            self.join_timeout_ms = Some(parse_number(ENV_JOIN_TIMEOUT_MS, &raw)?);
        }
        Ok(self)
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }

    /// Capacity must be positive. Checked at construction time.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.max_workers == 0 {
            return Err(RunnerError::InvalidConfiguration(
                "max_workers must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<N>(key: &str, raw: &str) -> Result<N, ConfigError>
where
    N: std::str::FromStr,
    N::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: N::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
