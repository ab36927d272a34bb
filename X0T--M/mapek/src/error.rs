//! Error type shared by every phase of the loop.

use thiserror::Error;

/// Errors surfaced by the MAPE-K loop and its collaborators.
#[derive(Debug, Error, Clone)]
pub enum MapekError {
    /// A mesh, security, or dispatch collaborator failed.
    #[error("collaborator `{component}` failed: {reason}")]
    Collaborator {
        /// Component name.
        component: &'static str,
        /// Failure description.
        reason: String,
    },
    /// The scoring engine could not produce a result.
    #[error("consciousness engine error: {0}")]
    Engine(String),
    /// A content store or knowledge store operation failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// A content identifier was not present in the store.
    #[error("content not found: {0}")]
    ContentNotFound(String),
    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MapekError {
    /// Shorthand for collaborator failures.
    #[must_use]
    pub fn collaborator(component: &'static str, reason: impl Into<String>) -> Self {
        Self::Collaborator {
            component,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for MapekError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result alias used across the crate.
pub type MapekResult<T> = Result<T, MapekError>;
