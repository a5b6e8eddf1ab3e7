use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::PersistenceAdapter;
use crate::error::PersistenceError;
use crate::snapshot::SerializedSnapshot;

#[derive(Debug, Default)]
struct Inner {
    snapshot: Option<SerializedSnapshot>,
    fail_next: u32,
    failing: bool,
    saves: u64,
    failed_saves: u64,
}

/// In-memory snapshot store (for tests/dev).
///
/// Clones share the same storage, so a test can keep a handle and inspect
/// what the runtime wrote, or hand the same store to a second runtime to
/// simulate a restart. Saves can be made to fail on demand.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPersistence {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a previously saved snapshot.
    pub fn with_snapshot(snapshot: SerializedSnapshot) -> Self {
        let store = Self::new();
        store.lock().snapshot = Some(snapshot);
        store
    }

    /// Make the next `n` saves fail.
    pub fn fail_next_saves(&self, n: u32) {
        self.lock().fail_next = n;
    }

    /// Make every save fail until switched off again.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> u64 {
        self.lock().saves
    }

    pub fn failed_save_count(&self) -> u64 {
        self.lock().failed_saves
    }

    /// The currently stored snapshot.
    pub fn stored(&self) -> Option<SerializedSnapshot> {
        self.lock().snapshot.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistence {
    async fn load(&self) -> Result<Option<SerializedSnapshot>, PersistenceError> {
        Ok(self.lock().snapshot.clone())
    }

    async fn save(&self, snapshot: &SerializedSnapshot) -> Result<(), PersistenceError> {
        let mut inner = self.lock();
        if inner.failing || inner.fail_next > 0 {
            inner.fail_next = inner.fail_next.saturating_sub(1);
            inner.failed_saves += 1;
            return Err(PersistenceError::Injected("save refused".to_string()));
        }
        inner.snapshot = Some(snapshot.clone());
        inner.saves += 1;
        Ok(())
    }
}
