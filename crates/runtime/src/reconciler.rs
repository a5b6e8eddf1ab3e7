//! Reconciler: turns a known effect outcome into its commit or rollback action.

use outbox_core::Reducer;
use tracing::{info, warn};

use crate::bus::ActionBus;
use crate::error::{OutboxResult, RollbackReason};
use crate::outbox::{OutboxEntry, Resolution};

/// Dispatches resolving actions through the action bus.
///
/// Dispatch and removal from the outbox form one persisted mutation. A
/// reducer fault or a persistence failure leaves the entry at the head; the
/// caller records the decided resolution and tries again later.
pub struct Reconciler<R: Reducer> {
    bus: ActionBus<R>,
}

impl<R: Reducer> Reconciler<R> {
    pub fn new(bus: ActionBus<R>) -> Self {
        Self { bus }
    }

    pub async fn commit(&self, entry: &OutboxEntry) -> OutboxResult<()> {
        self.apply(entry, Resolution::Commit).await
    }

    pub async fn rollback(&self, entry: &OutboxEntry, reason: RollbackReason) -> OutboxResult<()> {
        self.apply(entry, Resolution::Rollback(reason)).await
    }

    pub async fn apply(&self, entry: &OutboxEntry, resolution: Resolution) -> OutboxResult<()> {
        match self.bus.resolve(entry.id, resolution).await {
            Ok(()) => {
                match resolution {
                    Resolution::Commit => info!(
                        entry_id = %entry.id,
                        idempotency_key = %entry.idempotency_key(),
                        kind = %entry.descriptor.commit_action.kind(),
                        "effect committed"
                    ),
                    Resolution::Rollback(reason) => info!(
                        entry_id = %entry.id,
                        idempotency_key = %entry.idempotency_key(),
                        kind = %entry.descriptor.rollback_action.kind(),
                        reason = %reason,
                        "effect rolled back"
                    ),
                }
                Ok(())
            }
            Err(err) => {
                warn!(
                    entry_id = %entry.id,
                    idempotency_key = %entry.idempotency_key(),
                    resolution = ?resolution,
                    error = %err,
                    "resolution failed; entry kept"
                );
                Err(err)
            }
        }
    }
}
