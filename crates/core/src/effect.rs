//! Declarative effect descriptors.
//!
//! Effects are **data**, never closures: a descriptor names the request to
//! perform and the two actions that reconcile its outcome. Being plain serde
//! data is what lets the outbox persist pending effects across restarts.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::action::Action;
use crate::id::IdempotencyKey;
use crate::retry::RetryPolicyOverride;

/// Request verb, mirroring the usual HTTP semantics.
///
/// `Put`/`Patch`/`Delete` with a client-generated identifier are the easy way
/// to make an effect idempotent; a bare `Post` usually is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        }
    }
}

/// Transport-agnostic description of a side effect.
///
/// Opaque to the outbox; only the network transport interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSpec {
    pub target: String,
    pub verb: Verb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RequestSpec {
    pub fn new(verb: Verb, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            verb,
            body: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Verb::Get, target)
    }

    pub fn post(target: impl Into<String>, body: JsonValue) -> Self {
        Self::new(Verb::Post, target).with_body(body)
    }

    pub fn put(target: impl Into<String>, body: JsonValue) -> Self {
        Self::new(Verb::Put, target).with_body(body)
    }

    pub fn patch(target: impl Into<String>, body: JsonValue) -> Self {
        Self::new(Verb::Patch, target).with_body(body)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Verb::Delete, target)
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A side effect paired with the actions that reconcile its outcome.
///
/// ## Idempotency contract
///
/// The executor may run `request` more than once: after a transient failure,
/// after a timeout whose request actually reached the server, or after a
/// crash between the network call and the persisted resolution. The
/// `idempotency_key` must therefore make repeated execution safe on the
/// remote side. The outbox cannot verify this; it is the effect author's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDescriptor {
    pub idempotency_key: IdempotencyKey,
    pub request: RequestSpec,
    pub commit_action: Action,
    pub rollback_action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicyOverride>,
    /// Per-request timeout; falls back to the runtime's configured timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl EffectDescriptor {
    pub fn new(
        idempotency_key: IdempotencyKey,
        request: RequestSpec,
        commit_action: Action,
        rollback_action: Action,
    ) -> Self {
        Self {
            idempotency_key,
            request,
            commit_action,
            rollback_action,
            retry_policy: None,
            timeout: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicyOverride) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::MaxAttempts;
    use serde_json::json;

    #[test]
    fn verb_serializes_uppercase() {
        assert_eq!(serde_json::to_value(Verb::Patch).unwrap(), json!("PATCH"));
        assert_eq!(Verb::Delete.as_str(), "DELETE");
    }

    #[test]
    fn descriptor_survives_json_with_nested_actions() {
        let descriptor = EffectDescriptor::new(
            IdempotencyKey::new("todo-7").unwrap(),
            RequestSpec::put("/todos/7", json!({"done": true})).with_header("x-client", "desktop"),
            Action::new("todo/done/commit", json!({"id": 7})),
            Action::new("todo/done/rollback", json!({"id": 7})),
        )
        .with_retry_policy(RetryPolicyOverride::default().max_attempts(MaxAttempts::Limited(3)))
        .with_timeout(Duration::from_secs(5));

        let bytes = serde_json::to_vec(&descriptor).unwrap();
        let decoded: EffectDescriptor = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, descriptor);
    }
}
