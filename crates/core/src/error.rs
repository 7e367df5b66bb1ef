//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Only deterministic failures live here. Storage and provider failures have
/// their own error types in the crates that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was empty or not usable as a path segment.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
