use async_trait::async_trait;
use outbox_core::{IdempotencyKey, RequestSpec, Verb};
use reqwest::{Client, Method};
use serde_json::Value as JsonValue;

use super::{FailureHint, NetworkTransport, TransportError, TransportResponse};

/// Header carrying the effect's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// HTTP transport built on `reqwest`.
///
/// Targets starting with `http://` or `https://` are used as-is, anything
/// else is appended to the base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url_for(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else if target.starts_with('/') {
            format!("{}{}", self.base_url, target)
        } else {
            format!("{}/{}", self.base_url, target)
        }
    }
}

fn method(verb: Verb) -> Method {
    match verb {
        Verb::Get => Method::GET,
        Verb::Post => Method::POST,
        Verb::Put => Method::PUT,
        Verb::Patch => Method::PATCH,
        Verb::Delete => Method::DELETE,
    }
}

/// Failure class of a non-success status, `None` for 2xx/3xx.
pub(crate) fn classify_status(status: u16) -> Option<FailureHint> {
    match status {
        200..=399 => None,
        408 | 429 => Some(FailureHint::ServerUnavailable),
        500..=599 => Some(FailureHint::ServerUnavailable),
        _ => Some(FailureHint::Rejected),
    }
}

fn classify_error(err: &reqwest::Error) -> FailureHint {
    if err.is_timeout() {
        FailureHint::Timeout
    } else if err.is_builder() {
        FailureHint::Rejected
    } else {
        FailureHint::Network
    }
}

#[async_trait]
impl NetworkTransport for HttpTransport {
    async fn execute(
        &self,
        request: &RequestSpec,
        idempotency_key: &IdempotencyKey,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(method(request.verb), self.url_for(&request.target))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::new(classify_error(&e), None, e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::new(classify_error(&e), Some(status), e.to_string()))?;

        if let Some(hint) = classify_status(status) {
            return Err(TransportError::new(hint, Some(status), text));
        }

        Ok(TransportResponse {
            status,
            body: response_body(text),
        })
    }

    fn supports_abort(&self) -> bool {
        true
    }
}

/// JSON bodies are parsed; anything else is kept as a string.
fn response_body(text: String) -> Option<JsonValue> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(&text).unwrap_or(JsonValue::String(text)))
}
