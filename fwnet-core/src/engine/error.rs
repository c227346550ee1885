//! Engine error types.

use thiserror::Error;

/// Errors reported by a provisioning engine. Surfaced to callers verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine refused to apply a resource.
    #[error("resource '{name}' rejected: {reason}")]
    Rejected { name: String, reason: String },

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
