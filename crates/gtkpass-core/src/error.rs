use std::time::Duration;

use thiserror::Error;

/// Usage-contract and lifecycle errors of the task runner.
///
/// These are raised immediately to the caller of the violating operation.
/// Failures of a submitted unit of work never show up here; they travel on
/// that unit's handle as [`TaskError`].
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(
        "task runner not armed. Enter a scope first:\n    let armed = runner.enter()?;\n    armed.submit(...)"
    )]
    NotArmed,

    #[error("failed to spawn worker thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Teardown is not retried. The pool is discarded either way.
    #[error("worker pool teardown failed: {0}")]
    Teardown(String),

    /// Workers detached by a timed-out teardown are still running.
    #[error("task runner busy: {busy} worker(s) from the previous scope still running")]
    Busy { busy: usize },
}

/// Outcome of a unit of work that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError<E> {
    /// The error returned by the work itself, untouched.
    #[error("task failed: {0}")]
    Failed(E),

    #[error("task panicked: {0}")]
    Panicked(String),

    /// Only the wait timed out. The task keeps running and the handle stays usable.
    #[error("timed out after {0:?} waiting for task result")]
    Timeout(Duration),

    #[error("task was dropped before it could run")]
    Abandoned,
}

impl<E> TaskError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout(_))
    }

    /// The work's own error, if that is what this is.
    pub fn into_failure(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
