//! Runtime configuration.

use std::time::Duration;

use outbox_core::{BackoffStrategy, MaxAttempts, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    /// Nothing was persisted yet and the builder was given no initial state.
    #[error("no persisted snapshot and no initial state was provided")]
    MissingInitialState,
}

/// Outbox runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Retry policy for effects that carry no override of their own.
    pub default_retry: RetryPolicy,
    /// Upper bound on one transport call unless the effect sets its own.
    pub request_timeout: Duration,
    /// Retry policy for snapshot saves. `Unbounded` blocks the mutation until
    /// storage comes back.
    pub persist_retry: RetryPolicy,
    /// Pause before retrying a resolution whose dispatch failed.
    pub resolution_retry_delay: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            default_retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            persist_retry: RetryPolicy {
                max_attempts: MaxAttempts::Limited(5),
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_secs(2),
                strategy: BackoffStrategy::Exponential,
                jitter: 0.0,
            },
            resolution_retry_delay: Duration::from_secs(1),
            name: "outbox".to_string(),
        }
    }
}

impl OutboxConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_persist_retry(mut self, policy: RetryPolicy) -> Self {
        self.persist_retry = policy;
        self
    }

    pub fn with_resolution_retry_delay(mut self, delay: Duration) -> Self {
        self.resolution_retry_delay = delay;
        self
    }

    /// Build from `OUTBOX_*` environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable lookup (e.g. a map in tests).
    ///
    /// Recognised variables: `OUTBOX_MAX_ATTEMPTS` (number or `unbounded`),
    /// `OUTBOX_BASE_DELAY_MS`, `OUTBOX_MAX_DELAY_MS`, `OUTBOX_BACKOFF`
    /// (`fixed`, `linear`, `exponential`), `OUTBOX_JITTER` (0.0 to 1.0),
    /// `OUTBOX_REQUEST_TIMEOUT_MS`, `OUTBOX_PERSIST_MAX_ATTEMPTS`,
    /// `OUTBOX_RESOLUTION_RETRY_MS`, `OUTBOX_NAME`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("OUTBOX_MAX_ATTEMPTS") {
            config.default_retry.max_attempts = parse_max_attempts("OUTBOX_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("OUTBOX_BASE_DELAY_MS") {
            config.default_retry.base_delay = parse_millis("OUTBOX_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("OUTBOX_MAX_DELAY_MS") {
            config.default_retry.max_delay = parse_millis("OUTBOX_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("OUTBOX_BACKOFF") {
            config.default_retry.strategy = parse_backoff("OUTBOX_BACKOFF", &v)?;
        }
        if let Some(v) = lookup("OUTBOX_JITTER") {
            config.default_retry.jitter = parse_jitter("OUTBOX_JITTER", &v)?;
        }
        if let Some(v) = lookup("OUTBOX_REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("OUTBOX_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("OUTBOX_PERSIST_MAX_ATTEMPTS") {
            config.persist_retry.max_attempts =
                parse_max_attempts("OUTBOX_PERSIST_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("OUTBOX_RESOLUTION_RETRY_MS") {
            config.resolution_retry_delay = parse_millis("OUTBOX_RESOLUTION_RETRY_MS", &v)?;
        }
        if let Some(v) = lookup("OUTBOX_NAME") {
            let name = v.trim();
            if name.is_empty() {
                return Err(invalid("OUTBOX_NAME", &v, "must not be empty"));
            }
            config.name = name.to_string();
        }

        if config.default_retry.base_delay > config.default_retry.max_delay {
            return Err(invalid(
                "OUTBOX_BASE_DELAY_MS",
                &config.default_retry.base_delay.as_millis().to_string(),
                "greater than OUTBOX_MAX_DELAY_MS",
            ));
        }

        Ok(config)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_millis(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|e| invalid(var, value, e.to_string()))
}

fn parse_max_attempts(var: &'static str, value: &str) -> Result<MaxAttempts, ConfigError> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("unbounded") {
        return Ok(MaxAttempts::Unbounded);
    }
    match v.parse::<u32>() {
        Ok(0) => Err(invalid(var, value, "must be at least 1")),
        Ok(n) => Ok(MaxAttempts::Limited(n)),
        Err(e) => Err(invalid(var, value, e.to_string())),
    }
}

fn parse_backoff(var: &'static str, value: &str) -> Result<BackoffStrategy, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fixed" => Ok(BackoffStrategy::Fixed),
        "linear" => Ok(BackoffStrategy::Linear),
        "exponential" => Ok(BackoffStrategy::Exponential),
        _ => Err(invalid(var, value, "expected fixed, linear or exponential")),
    }
}

fn parse_jitter(var: &'static str, value: &str) -> Result<f64, ConfigError> {
    let jitter = value
        .trim()
        .parse::<f64>()
        .map_err(|e| invalid(var, value, e.to_string()))?;
    if !(0.0..=1.0).contains(&jitter) {
        return Err(invalid(var, value, "must be between 0.0 and 1.0"));
    }
    Ok(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = OutboxConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, OutboxConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = OutboxConfig::from_lookup(lookup(&[
            ("OUTBOX_MAX_ATTEMPTS", "unbounded"),
            ("OUTBOX_BASE_DELAY_MS", "20"),
            ("OUTBOX_MAX_DELAY_MS", "1000"),
            ("OUTBOX_BACKOFF", "Linear"),
            ("OUTBOX_JITTER", "0.25"),
            ("OUTBOX_REQUEST_TIMEOUT_MS", "1500"),
            ("OUTBOX_PERSIST_MAX_ATTEMPTS", "2"),
            ("OUTBOX_RESOLUTION_RETRY_MS", "75"),
            ("OUTBOX_NAME", "todos"),
        ]))
        .unwrap();

        assert_eq!(config.default_retry.max_attempts, MaxAttempts::Unbounded);
        assert_eq!(config.default_retry.base_delay, Duration::from_millis(20));
        assert_eq!(config.default_retry.max_delay, Duration::from_secs(1));
        assert_eq!(config.default_retry.strategy, BackoffStrategy::Linear);
        assert_eq!(config.default_retry.jitter, 0.25);
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.persist_retry.max_attempts, MaxAttempts::Limited(2));
        assert_eq!(config.resolution_retry_delay, Duration::from_millis(75));
        assert_eq!(config.name, "todos");
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = OutboxConfig::from_lookup(lookup(&[("OUTBOX_BACKOFF", "random")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "OUTBOX_BACKOFF", .. }));

        let err = OutboxConfig::from_lookup(lookup(&[("OUTBOX_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "OUTBOX_MAX_ATTEMPTS", .. }));

        let err = OutboxConfig::from_lookup(lookup(&[("OUTBOX_JITTER", "1.5")])).unwrap_err();
        assert!(err.to_string().contains("OUTBOX_JITTER"));
    }

    #[test]
    fn base_delay_above_cap_is_rejected() {
        let err = OutboxConfig::from_lookup(lookup(&[
            ("OUTBOX_BASE_DELAY_MS", "5000"),
            ("OUTBOX_MAX_DELAY_MS", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "OUTBOX_BASE_DELAY_MS", .. }));
    }

    #[test]
    fn config_is_serializable() {
        let config = OutboxConfig::default().with_name("a");
        let json = serde_json::to_string(&config).unwrap();
        let decoded: OutboxConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, config);
    }
}
