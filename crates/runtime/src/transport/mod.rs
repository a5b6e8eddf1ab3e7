//! Network transport abstraction.
//!
//! The outbox never speaks a wire protocol itself. A transport turns a
//! [`RequestSpec`] into a remote call and classifies failures with a
//! [`FailureHint`]; the executor maps hints to transient or permanent.

use std::sync::Arc;

use async_trait::async_trait;
use outbox_core::{IdempotencyKey, RequestSpec};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

#[cfg(feature = "http")]
mod http;
mod scripted;

#[cfg(feature = "http")]
pub use http::{HttpTransport, IDEMPOTENCY_KEY_HEADER};
pub use scripted::{RecordedCall, RemoteMode, ScriptedOutcome, ScriptedTransport};

/// Successful remote response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

impl TransportResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: None,
        }
    }

    pub fn with_body(status: u16, body: JsonValue) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }
}

/// What kind of failure a transport observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureHint {
    /// Could not reach the server (DNS, refused, reset).
    Network,
    /// No answer in time. The request may or may not have been applied.
    Timeout,
    /// Server answered that it cannot serve the request right now.
    ServerUnavailable,
    /// Server refused the request as such.
    Rejected,
}

impl FailureHint {
    pub fn is_transient(self) -> bool {
        !matches!(self, FailureHint::Rejected)
    }
}

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{hint:?} failure{}: {message}", status_suffix(.status))]
pub struct TransportError {
    pub hint: FailureHint,
    pub status: Option<u16>,
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl TransportError {
    pub fn new(hint: FailureHint, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            hint,
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureHint::Network, None, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureHint::Timeout, None, message)
    }

    pub fn server_unavailable(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(FailureHint::ServerUnavailable, status, message)
    }

    pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::new(FailureHint::Rejected, status, message)
    }
}

/// Executes effect requests against a remote system.
///
/// Implementations must forward the idempotency key so that the remote can
/// deduplicate repeated executions of the same logical operation.
#[async_trait]
pub trait NetworkTransport: Send + Sync {
    async fn execute(
        &self,
        request: &RequestSpec,
        idempotency_key: &IdempotencyKey,
    ) -> Result<TransportResponse, TransportError>;

    /// Whether dropping an in-flight `execute` future cancels the request.
    ///
    /// When `false`, the executor lets a started call run to completion
    /// (bounded by its timeout) even on shutdown or connectivity loss.
    fn supports_abort(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T> NetworkTransport for Arc<T>
where
    T: NetworkTransport + ?Sized,
{
    async fn execute(
        &self,
        request: &RequestSpec,
        idempotency_key: &IdempotencyKey,
    ) -> Result<TransportResponse, TransportError> {
        (**self).execute(request, idempotency_key).await
    }

    fn supports_abort(&self) -> bool {
        (**self).supports_abort()
    }
}
