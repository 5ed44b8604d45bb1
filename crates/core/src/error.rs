//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (malformed
/// identifiers, unknown codes). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A tracking number was invalid.
    #[error("invalid tracking number: {0}")]
    InvalidTrack(String),

    /// A status string could not be mapped to a known delivery status.
    #[error("unknown delivery status: {0}")]
    UnknownStatus(String),
}

impl DomainError {
    pub fn invalid_track(msg: impl Into<String>) -> Self {
        Self::InvalidTrack(msg.into())
    }
}
