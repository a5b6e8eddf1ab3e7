//! Runtime error model.
//!
//! Two families live here:
//!
//! - [`OutboxError`] is what the embedder sees (dispatch, start-up, adapters).
//! - [`EffectFailure`] and [`RollbackReason`] classify the outcome of a single
//!   effect execution. They never reach the embedder as errors; every failure
//!   ends in a commit or a rollback action.

use outbox_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::{FailureHint, TransportError};

/// Result type used across the runtime.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Runtime-level error.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// The snapshot could not be saved (after the configured retries) or loaded.
    /// In-memory state and outbox did not advance.
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    /// An internal invariant was violated (e.g. resolving an empty queue).
    #[error("state corruption: {0}")]
    StateCorruption(String),

    /// The reducer refused an action.
    #[error(transparent)]
    Reducer(#[from] CoreError),

    /// A snapshot could not be encoded or decoded.
    #[error("snapshot codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The runtime has been asked to shut down.
    #[error("runtime is shutting down")]
    ShuttingDown,
}

impl OutboxError {
    pub fn state_corruption(msg: impl Into<String>) -> Self {
        Self::StateCorruption(msg.into())
    }
}

/// Error reported by a [`PersistenceAdapter`](crate::persistence::PersistenceAdapter).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(String),

    /// Failure produced on purpose by a test adapter.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl From<anyhow::Error> for PersistenceError {
    fn from(err: anyhow::Error) -> Self {
        PersistenceError::Storage(format!("{err:#}"))
    }
}

/// Classified failure of one effect execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectFailure {
    /// Worth retrying: network error, timeout, server temporarily unavailable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The server rejected the request; retrying will not help.
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl EffectFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, EffectFailure::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            EffectFailure::Transient(m) | EffectFailure::Permanent(m) => m,
        }
    }
}

impl From<TransportError> for EffectFailure {
    fn from(err: TransportError) -> Self {
        match err.hint {
            FailureHint::Rejected => EffectFailure::Permanent(err.to_string()),
            FailureHint::Network | FailureHint::Timeout | FailureHint::ServerUnavailable => {
                EffectFailure::Transient(err.to_string())
            }
        }
    }
}

/// Why an effect ended in its rollback action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackReason {
    /// The effect failed permanently.
    Permanent,
    /// Transient failures used up the retry budget.
    RetryExhausted,
}

impl core::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RollbackReason::Permanent => f.write_str("permanent"),
            RollbackReason::RetryExhausted => f.write_str("retry_exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_transport_errors_are_permanent() {
        let failure = EffectFailure::from(TransportError::rejected(Some(422), "bad title"));
        assert!(!failure.is_transient());
        assert!(failure.message().contains("bad title"));
    }

    #[test]
    fn network_timeout_and_unavailable_are_transient() {
        for err in [
            TransportError::network("connection reset"),
            TransportError::timeout("no response"),
            TransportError::server_unavailable(Some(503), "maintenance"),
        ] {
            assert!(EffectFailure::from(err).is_transient());
        }
    }

    #[test]
    fn anyhow_context_is_kept_in_storage_errors() {
        let err = anyhow::anyhow!("disk full").context("failed to write snapshot");
        let PersistenceError::Storage(msg) = PersistenceError::from(err) else {
            panic!("expected storage error");
        };
        assert!(msg.contains("failed to write snapshot"));
        assert!(msg.contains("disk full"));
    }
}
