//! Durable storage for outbox snapshots.
//!
//! The runtime writes one [`SerializedSnapshot`] per mutation (state and
//! outbox together) and reads it back once at start-up. Adapters only move
//! bytes; they never interpret them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PersistenceError;
use crate::snapshot::SerializedSnapshot;

mod file;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use file::FilePersistence;
pub use memory::InMemoryPersistence;
#[cfg(feature = "sqlite")]
pub use sqlite::SqlitePersistence;

/// Snapshot storage abstraction.
///
/// `save` must be atomic from the reader's point of view: after a crash,
/// `load` returns either the previous snapshot or the new one, never a mix.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Read the last saved snapshot, if any.
    async fn load(&self) -> Result<Option<SerializedSnapshot>, PersistenceError>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &SerializedSnapshot) -> Result<(), PersistenceError>;
}

#[async_trait]
impl<P> PersistenceAdapter for Arc<P>
where
    P: PersistenceAdapter + ?Sized,
{
    async fn load(&self) -> Result<Option<SerializedSnapshot>, PersistenceError> {
        (**self).load().await
    }

    async fn save(&self, snapshot: &SerializedSnapshot) -> Result<(), PersistenceError> {
        (**self).save(snapshot).await
    }
}
