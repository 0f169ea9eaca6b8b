//! Result and error types for probar-async.

use crate::failure::Failure;
use thiserror::Error;

/// Result type for probar-async operations
pub type AsyncResult<T> = Result<T, AsyncError>;

/// Boxed error accepted from units of work
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced to the caller of a dispatch or wait
#[derive(Debug, Error)]
pub enum AsyncError {
    /// A unit of work failed on another thread
    #[error("Execution failed: {0}")]
    Execution(#[source] Failure),

    /// A wait's deadline elapsed
    #[error("Timed out after {ms}ms waiting for {waited_for}")]
    Timeout {
        /// Timeout budget in milliseconds
        ms: u64,
        /// What was being waited for
        waited_for: String,
    },

    /// The API was used in a way that can never succeed
    #[error("Programming error at {location}: {message}")]
    Programming {
        /// Error message
        message: String,
        /// Offending call site
        location: String,
    },

    /// The task was cancelled before it ran
    #[error("Task was cancelled before it ran")]
    Cancelled,

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl AsyncError {
    /// Build a programming error pointing at the caller of the current function
    #[must_use]
    #[track_caller]
    pub fn programming(message: impl Into<String>) -> Self {
        Self::Programming {
            message: message.into(),
            location: std::panic::Location::caller().to_string(),
        }
    }

    /// Build a timeout error
    #[must_use]
    pub fn timeout(ms: u64, waited_for: impl Into<String>) -> Self {
        Self::Timeout {
            ms,
            waited_for: waited_for.into(),
        }
    }

    /// The failure carried by an execution error
    #[must_use]
    pub const fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Execution(failure) => Some(failure),
            _ => None,
        }
    }

    /// Check if this is a timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a programming error
    #[must_use]
    pub const fn is_programming(&self) -> bool {
        matches!(self, Self::Programming { .. })
    }
}
