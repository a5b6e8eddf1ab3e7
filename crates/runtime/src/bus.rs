//! Action bus: the single entry point for state changes.
//!
//! Every change to application state or to the outbox (a dispatched action,
//! a commit/rollback resolution, a requeued retry) goes through one
//! serialized critical section:
//!
//! 1. copy the committed state and outbox,
//! 2. apply the change to the copies,
//! 3. persist the combined snapshot (with retries),
//! 4. swap the copies in as the committed pair.
//!
//! A failure at any step leaves the committed pair untouched, so a restart
//! never observes a state update without its enqueued effect or vice versa.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use outbox_core::{Action, EntryId, Reducer};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, watch};
use tracing::{debug, error, warn};

use crate::config::OutboxConfig;
use crate::error::{OutboxError, OutboxResult};
use crate::outbox::{Outbox, OutboxEntry, QueueStatus, Resolution};
use crate::persistence::PersistenceAdapter;
use crate::snapshot;

/// Whether snapshot saves are currently going through.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PersistenceHealth {
    #[default]
    Healthy,
    /// Saves are failing; mutations are being retried or rejected.
    Degraded {
        consecutive_failures: u64,
        last_error: String,
    },
}

impl PersistenceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, PersistenceHealth::Healthy)
    }
}

struct Committed<S> {
    state: S,
    outbox: Outbox,
}

struct BusInner<R: Reducer> {
    reducer: R,
    persistence: Arc<dyn PersistenceAdapter>,
    config: OutboxConfig,
    write_lock: Mutex<()>,
    committed: RwLock<Committed<R::State>>,
    outbox_changed: Notify,
    health: watch::Sender<PersistenceHealth>,
    shutdown: watch::Receiver<bool>,
}

/// Serializes state changes and keeps them durable.
///
/// Cheap to clone; clones share the same state and outbox.
pub struct ActionBus<R: Reducer> {
    inner: Arc<BusInner<R>>,
}

impl<R: Reducer> Clone for ActionBus<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: Reducer> core::fmt::Debug for ActionBus<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ActionBus")
            .field("name", &self.inner.config.name)
            .field("queue", &self.queue_status())
            .finish()
    }
}

impl<R: Reducer> ActionBus<R> {
    pub(crate) fn new(
        reducer: R,
        persistence: Arc<dyn PersistenceAdapter>,
        config: OutboxConfig,
        state: R::State,
        outbox: Outbox,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (health, _) = watch::channel(PersistenceHealth::Healthy);
        Self {
            inner: Arc::new(BusInner {
                reducer,
                persistence,
                config,
                write_lock: Mutex::new(()),
                committed: RwLock::new(Committed { state, outbox }),
                outbox_changed: Notify::new(),
                health,
                shutdown,
            }),
        }
    }

    /// Apply `action` and, if it carries an effect, enqueue the effect.
    ///
    /// Returns the id of the enqueued outbox entry. The state change and the
    /// enqueue are persisted together before this returns; on error neither
    /// happened. Rejected with [`OutboxError::ShuttingDown`] once shutdown
    /// was requested.
    pub async fn dispatch(&self, action: Action) -> OutboxResult<Option<EntryId>> {
        if *self.inner.shutdown.borrow() {
            return Err(OutboxError::ShuttingDown);
        }
        let kind = action.kind().to_string();
        let entry_id = self
            .mutate(|reducer, state, outbox| {
                reducer.reduce(state, &action)?;
                Ok(action
                    .effect()
                    .map(|effect| outbox.enqueue(effect.clone(), Utc::now())))
            })
            .await?;

        match entry_id {
            Some(id) => {
                debug!(outbox = %self.inner.config.name, kind = %kind, entry_id = %id, "action dispatched with effect");
                self.inner.outbox_changed.notify_one();
            }
            None => debug!(outbox = %self.inner.config.name, kind = %kind, "action dispatched"),
        }
        Ok(entry_id)
    }

    /// Clone of the committed application state.
    pub fn state(&self) -> R::State {
        self.read().state.clone()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.read().outbox.status()
    }

    /// Committed outbox entries, oldest first.
    pub fn entries(&self) -> Vec<OutboxEntry> {
        self.read().outbox.entries().cloned().collect()
    }

    pub fn persistence_health(&self) -> watch::Receiver<PersistenceHealth> {
        self.inner.health.subscribe()
    }

    pub(crate) fn head(&self) -> Option<OutboxEntry> {
        self.read().outbox.peek_head().cloned()
    }

    pub(crate) fn outbox_changed(&self) -> &Notify {
        &self.inner.outbox_changed
    }

    /// Dispatch the resolving action of the head and remove it, as one
    /// persisted mutation. The resolving action's own effect, if any, is
    /// enqueued at the tail.
    pub(crate) async fn resolve(&self, entry_id: EntryId, resolution: Resolution) -> OutboxResult<()> {
        let enqueued = self
            .mutate(|reducer, state, outbox| {
                let head = outbox
                    .peek_head()
                    .filter(|h| h.id == entry_id)
                    .ok_or_else(|| {
                        OutboxError::state_corruption(format!("entry {entry_id} is not the head"))
                    })?;
                let action = match resolution {
                    Resolution::Commit => head.descriptor.commit_action.clone(),
                    Resolution::Rollback(_) => head.descriptor.rollback_action.clone(),
                };
                reducer.reduce(state, &action)?;
                outbox.resolve_head(entry_id)?;
                Ok(action
                    .effect()
                    .map(|effect| outbox.enqueue(effect.clone(), Utc::now())))
            })
            .await?;

        if enqueued.is_some() {
            self.inner.outbox_changed.notify_one();
        }
        Ok(())
    }

    pub(crate) async fn requeue(
        &self,
        entry_id: EntryId,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
        last_error: Option<String>,
    ) -> OutboxResult<()> {
        self.mutate(|_, _, outbox| outbox.requeue_head(entry_id, attempt, next_attempt_at, last_error))
            .await
    }

    pub(crate) async fn mark_pending_resolution(
        &self,
        entry_id: EntryId,
        resolution: Resolution,
        attempt: u32,
        last_error: Option<String>,
    ) -> OutboxResult<()> {
        self.mutate(|_, _, outbox| {
            outbox.mark_pending_resolution(entry_id, resolution, attempt, last_error)
        })
        .await
    }

    /// The persisted-mutation critical section.
    async fn mutate<T, F>(&self, f: F) -> OutboxResult<T>
    where
        F: FnOnce(&R, &mut R::State, &mut Outbox) -> OutboxResult<T>,
    {
        let _guard = self.inner.write_lock.lock().await;

        let (mut state, mut outbox) = {
            let committed = self.read();
            (committed.state.clone(), committed.outbox.clone())
        };

        let out = f(&self.inner.reducer, &mut state, &mut outbox)?;

        let bytes = snapshot::encode_parts(&state, &outbox)?;
        self.persist(&bytes).await?;

        let mut committed = self.inner.committed.write().unwrap_or_else(PoisonError::into_inner);
        committed.state = state;
        committed.outbox = outbox;
        Ok(out)
    }

    async fn persist(&self, bytes: &snapshot::SerializedSnapshot) -> OutboxResult<()> {
        let policy = &self.inner.config.persist_retry;
        let mut shutdown = self.inner.shutdown.clone();
        let mut failures: u32 = 0;

        loop {
            match self.inner.persistence.save(bytes).await {
                Ok(()) => {
                    self.inner.health.send_if_modified(|h| {
                        let was_degraded = !h.is_healthy();
                        *h = PersistenceHealth::Healthy;
                        was_degraded
                    });
                    return Ok(());
                }
                Err(err) => {
                    failures = failures.saturating_add(1);
                    let message = err.to_string();
                    self.inner.health.send_modify(|h| {
                        let consecutive_failures = match h {
                            PersistenceHealth::Degraded {
                                consecutive_failures,
                                ..
                            } => *consecutive_failures + 1,
                            PersistenceHealth::Healthy => 1,
                        };
                        *h = PersistenceHealth::Degraded {
                            consecutive_failures,
                            last_error: message.clone(),
                        };
                    });

                    if policy.max_attempts.is_exhausted(failures) {
                        error!(
                            outbox = %self.inner.config.name,
                            attempts = failures,
                            error = %err,
                            "snapshot save failed, mutation rejected"
                        );
                        return Err(OutboxError::Persistence(err));
                    }

                    let delay = policy.delay_for_attempt(failures);
                    warn!(
                        outbox = %self.inner.config.name,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "snapshot save failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = crate::executor::shutdown_requested(&mut shutdown) => {
                            return Err(OutboxError::ShuttingDown);
                        }
                    }
                }
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Committed<R::State>> {
        self.inner.committed.read().unwrap_or_else(PoisonError::into_inner)
    }
}
