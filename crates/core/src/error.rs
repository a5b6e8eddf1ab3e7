//! Core error model.

use thiserror::Error;

/// Result type used across the core data model.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core-level error.
///
/// Keep this focused on deterministic failures of the data model (validation,
/// reducer faults). Runtime concerns (persistence, transport) live in
/// `outbox-runtime`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The reducer refused or failed to apply an action.
    #[error("reducer fault on action '{kind}': {message}")]
    Reducer { kind: String, message: String },
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn reducer(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reducer {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
