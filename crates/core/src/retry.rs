//! Retry policy data (the decision logic lives in `outbox-runtime::retry`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upper bound on executions of one effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxAttempts {
    /// At most this many executions (values below 1 behave as 1).
    Limited(u32),
    /// Keep retrying transient failures forever.
    Unbounded,
}

impl MaxAttempts {
    /// Whether `attempts_made` executions have used up the budget.
    pub fn is_exhausted(self, attempts_made: u32) -> bool {
        match self {
            MaxAttempts::Limited(max) => attempts_made >= max.max(1),
            MaxAttempts::Unbounded => false,
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of executions, first one included.
    pub max_attempts: MaxAttempts,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0): largest fraction a delay may be shortened by
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MaxAttempts::Limited(5),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that rolls back after the first transient failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: MaxAttempts::Limited(1),
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: MaxAttempts::Limited(max_attempts),
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: MaxAttempts, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay before the retry that follows `attempt` executions
    /// (1-indexed).
    ///
    /// Jitter only shortens a delay, by at most `jitter` of it, and never
    /// below the unjittered delay of the previous attempt. The result never
    /// decreases as `attempt` grows and never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.capped_delay_ms(attempt);
        let floor_ms = self.capped_delay_ms(attempt - 1);

        let jitter_range = (delay_ms * self.jitter.clamp(0.0, 1.0)).min(delay_ms - floor_ms);
        let jitter = if jitter_range > 0.0 {
            // Deterministic per attempt, in [0, 1).
            let sample = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * sample
        } else {
            0.0
        };

        Duration::from_millis((delay_ms - jitter).clamp(floor_ms, delay_ms) as u64)
    }

    /// Unjittered delay in milliseconds, capped at `max_delay`.
    fn capped_delay_ms(&self, attempt: u32) -> f64 {
        if attempt == 0 {
            return 0.0;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        match self.strategy {
            BackoffStrategy::Fixed => base_ms.min(max_ms),
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        }
    }

    /// Apply a per-effect override on top of this policy.
    pub fn merged(&self, over: &RetryPolicyOverride) -> RetryPolicy {
        RetryPolicy {
            max_attempts: over.max_attempts.unwrap_or(self.max_attempts),
            base_delay: over.base_delay.unwrap_or(self.base_delay),
            max_delay: over.max_delay.unwrap_or(self.max_delay),
            strategy: over.strategy.unwrap_or(self.strategy),
            jitter: over.jitter.unwrap_or(self.jitter),
        }
    }
}

/// Per-effect replacement for individual retry policy fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<MaxAttempts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<BackoffStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
}

impl RetryPolicyOverride {
    pub fn max_attempts(mut self, max_attempts: MaxAttempts) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    pub fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_attempts: MaxAttempts::Limited(5),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::exponential(
                MaxAttempts::Unbounded,
                Duration::from_millis(100),
                Duration::from_secs(1),
            )
        };

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(1));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy {
            max_attempts: MaxAttempts::Limited(5),
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn default_policy_does_not_shrink_after_reaching_cap() {
        let policy = RetryPolicy {
            max_attempts: MaxAttempts::Unbounded,
            ..RetryPolicy::default()
        };

        let delays: Vec<Duration> = (1..=20).map(|a| policy.delay_for_attempt(a)).collect();
        assert!(delays.windows(2).all(|w| w[1] >= w[0]), "{delays:?}");
        assert_eq!(delays[19], policy.max_delay);
        assert!(delays[0] <= policy.base_delay);
    }

    #[test]
    fn max_attempts_exhaustion() {
        assert!(!MaxAttempts::Limited(3).is_exhausted(2));
        assert!(MaxAttempts::Limited(3).is_exhausted(3));
        assert!(MaxAttempts::Limited(0).is_exhausted(1));
        assert!(!MaxAttempts::Unbounded.is_exhausted(u32::MAX));
    }

    #[test]
    fn override_replaces_only_given_fields() {
        let base = RetryPolicy::default();
        let merged = base.merged(
            &RetryPolicyOverride::default()
                .max_attempts(MaxAttempts::Limited(2))
                .strategy(BackoffStrategy::Linear),
        );

        assert_eq!(merged.max_attempts, MaxAttempts::Limited(2));
        assert_eq!(merged.strategy, BackoffStrategy::Linear);
        assert_eq!(merged.base_delay, base.base_delay);
        assert_eq!(merged.max_delay, base.max_delay);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: without jitter, delays never decrease and never exceed the cap.
        #[test]
        fn delays_are_monotonic_and_capped(
            base_ms in 1u64..5_000,
            max_ms in 1u64..600_000,
            attempt in 1u32..200,
            strategy in prop_oneof![
                Just(BackoffStrategy::Fixed),
                Just(BackoffStrategy::Linear),
                Just(BackoffStrategy::Exponential),
            ],
        ) {
            let policy = RetryPolicy {
                max_attempts: MaxAttempts::Unbounded,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                strategy,
                jitter: 0.0,
            };

            let current = policy.delay_for_attempt(attempt);
            let next = policy.delay_for_attempt(attempt + 1);
            prop_assert!(next >= current);
            prop_assert!(next <= Duration::from_millis(max_ms));
        }

        /// Property: jitter never pushes a delay past the cap.
        #[test]
        fn jittered_delays_stay_within_cap(
            attempt in 1u32..100,
            jitter in 0.0f64..1.0,
        ) {
            let policy = RetryPolicy {
                jitter,
                ..RetryPolicy::default()
            };
            prop_assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }

        /// Property: with jitter, delays still never decrease.
        #[test]
        fn jittered_delays_never_decrease(
            base_ms in 1u64..5_000,
            max_ms in 1u64..600_000,
            attempt in 1u32..200,
            jitter in 0.0f64..=1.0,
            strategy in prop_oneof![
                Just(BackoffStrategy::Fixed),
                Just(BackoffStrategy::Linear),
                Just(BackoffStrategy::Exponential),
            ],
        ) {
            let policy = RetryPolicy {
                max_attempts: MaxAttempts::Unbounded,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                strategy,
                jitter,
            };

            prop_assert!(policy.delay_for_attempt(attempt + 1) >= policy.delay_for_attempt(attempt));
        }
    }
}
