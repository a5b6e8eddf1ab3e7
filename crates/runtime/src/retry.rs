//! Retry scheduling: decides what happens to the head after a failure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use outbox_core::{EffectDescriptor, RetryPolicy};

use crate::error::{EffectFailure, RollbackReason};
use crate::outbox::OutboxEntry;

/// Outcome of consulting the scheduler after a failed execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Keep the entry at the head and try again later.
    Retry {
        /// Executions performed so far, the failed one included.
        attempt: u32,
        delay: Duration,
        next_attempt_at: DateTime<Utc>,
    },
    /// Stop retrying and dispatch the rollback action.
    Rollback {
        reason: RollbackReason,
        /// Executions performed so far, the failed one included.
        attempt: u32,
    },
}

/// Pure retry decision logic. Never touches the network or the clock.
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    default_policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self { default_policy }
    }

    /// The configured default merged with the descriptor's override.
    pub fn effective_policy(&self, descriptor: &EffectDescriptor) -> RetryPolicy {
        match &descriptor.retry_policy {
            Some(over) => self.default_policy.merged(over),
            None => self.default_policy.clone(),
        }
    }

    /// Decide the fate of `entry` after `failure` observed at `now`.
    pub fn decide(&self, entry: &OutboxEntry, failure: &EffectFailure, now: DateTime<Utc>) -> RetryDecision {
        let attempt = entry.attempt.saturating_add(1);

        if !failure.is_transient() {
            return RetryDecision::Rollback {
                reason: RollbackReason::Permanent,
                attempt,
            };
        }

        let policy = self.effective_policy(&entry.descriptor);
        if policy.max_attempts.is_exhausted(attempt) {
            return RetryDecision::Rollback {
                reason: RollbackReason::RetryExhausted,
                attempt,
            };
        }

        let delay = policy.delay_for_attempt(attempt);
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        RetryDecision::Retry {
            attempt,
            delay,
            next_attempt_at,
        }
    }
}
