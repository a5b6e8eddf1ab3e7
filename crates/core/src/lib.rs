//! `outbox-core` : data model for the offline effect outbox.
//!
//! This crate contains **pure data** and the reducer contract (no IO, no
//! async). The runtime that executes effects lives in `outbox-runtime`.

pub mod action;
pub mod effect;
pub mod error;
pub mod id;
pub mod reducer;
pub mod retry;

pub use action::Action;
pub use effect::{EffectDescriptor, RequestSpec, Verb};
pub use error::{CoreError, CoreResult};
pub use id::{EntryId, IdempotencyKey};
pub use reducer::{FnReducer, Reducer, reduce_all, reducer_fn};
pub use retry::{BackoffStrategy, MaxAttempts, RetryPolicy, RetryPolicyOverride};
