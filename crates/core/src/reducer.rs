//! Reducer trait: the pure state transition the outbox drives.

use core::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::action::Action;
use crate::error::CoreResult;

/// Deterministic state transition (pure, synchronous).
///
/// - **No IO**: reducers describe how state changes, never perform effects.
///   Effects are attached to actions as data and run by the outbox.
/// - **Working copy**: `reduce` mutates the state it is given. The runtime
///   hands it a copy and only keeps the result when the surrounding mutation
///   (including persistence) succeeds, so a reducer may bail out halfway
///   with an error without corrupting anything.
/// - **Errors**: returning `Err` is a reducer fault. During `dispatch` it is
///   reported to the caller; during commit/rollback the resolution is retried
///   on the next executor tick and the entry is kept.
pub trait Reducer: Send + Sync + 'static {
    type State: Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Apply a single action to `state`.
    fn reduce(&self, state: &mut Self::State, action: &Action) -> CoreResult<()>;
}

/// Adapter turning a closure into a [`Reducer`].
pub struct FnReducer<S, F> {
    f: F,
    _state: PhantomData<fn() -> S>,
}

impl<S, F> FnReducer<S, F>
where
    F: Fn(&mut S, &Action) -> CoreResult<()>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _state: PhantomData,
        }
    }
}

impl<S, F> Reducer for FnReducer<S, F>
where
    S: Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    F: Fn(&mut S, &Action) -> CoreResult<()> + Send + Sync + 'static,
{
    type State = S;

    fn reduce(&self, state: &mut S, action: &Action) -> CoreResult<()> {
        (self.f)(state, action)
    }
}

/// Shorthand for [`FnReducer::new`].
pub fn reducer_fn<S, F>(f: F) -> FnReducer<S, F>
where
    F: Fn(&mut S, &Action) -> CoreResult<()>,
{
    FnReducer::new(f)
}

/// Fold a sequence of actions into `state`, stopping at the first fault.
///
/// Useful for tests and for replaying a known action log.
pub fn reduce_all<'a, R>(
    reducer: &R,
    state: &mut R::State,
    actions: impl IntoIterator<Item = &'a Action>,
) -> CoreResult<()>
where
    R: Reducer,
{
    for action in actions {
        reducer.reduce(state, action)?;
    }
    Ok(())
}
