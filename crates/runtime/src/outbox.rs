//! The effect outbox: an ordered queue of pending effect descriptors.
//!
//! The queue itself is plain in-memory data. Persistence is not its concern:
//! every mutation is made on a copy inside the action bus critical section and
//! only becomes the live outbox once the snapshot containing it was saved.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use outbox_core::{EffectDescriptor, EntryId, IdempotencyKey};
use serde::{Deserialize, Serialize};

use crate::error::{OutboxError, OutboxResult, RollbackReason};

/// How an entry is (or will be) resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reason", rename_all = "snake_case")]
pub enum Resolution {
    Commit,
    Rollback(RollbackReason),
}

/// One enqueued effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: EntryId,
    pub descriptor: EffectDescriptor,
    /// Executions already performed.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// The executor leaves the entry alone until this instant.
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Outcome already decided whose resolving dispatch has not gone through.
    /// When set, the network call is not repeated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_resolution: Option<Resolution>,
}

impl OutboxEntry {
    pub fn new(descriptor: EffectDescriptor, now: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::new(),
            descriptor,
            attempt: 0,
            enqueued_at: now,
            next_attempt_at: now,
            last_error: None,
            pending_resolution: None,
        }
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        &self.descriptor.idempotency_key
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }
}

/// Summary of the queue for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub head: Option<EntryId>,
    pub head_attempt: Option<u32>,
    pub head_next_attempt_at: Option<DateTime<Utc>>,
    pub head_awaiting_resolution: bool,
}

/// FIFO queue of effect entries.
///
/// Entries are never reordered: the head is always the oldest unresolved
/// effect, and a failing head blocks the entries behind it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outbox {
    entries: VecDeque<OutboxEntry>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries, keeping their order.
    pub fn from_entries(entries: impl IntoIterator<Item = OutboxEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Append a descriptor to the tail.
    pub fn enqueue(&mut self, descriptor: EffectDescriptor, now: DateTime<Utc>) -> EntryId {
        let entry = OutboxEntry::new(descriptor, now);
        let id = entry.id;
        self.entries.push_back(entry);
        id
    }

    pub fn peek_head(&self) -> Option<&OutboxEntry> {
        self.entries.front()
    }

    /// Remove the head, which must be `expected`.
    pub fn resolve_head(&mut self, expected: EntryId) -> OutboxResult<OutboxEntry> {
        self.check_head(expected)?;
        self.entries
            .pop_front()
            .ok_or_else(|| OutboxError::state_corruption("resolve_head on an empty outbox"))
    }

    /// Push the head's next attempt into the future without moving it.
    pub fn requeue_head(
        &mut self,
        expected: EntryId,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
        last_error: Option<String>,
    ) -> OutboxResult<()> {
        let head = self.check_head(expected)?;
        head.attempt = attempt;
        head.next_attempt_at = next_attempt_at;
        head.last_error = last_error;
        Ok(())
    }

    /// Record a decided outcome on the head so it can be resolved later
    /// without executing the effect again.
    pub fn mark_pending_resolution(
        &mut self,
        expected: EntryId,
        resolution: Resolution,
        attempt: u32,
        last_error: Option<String>,
    ) -> OutboxResult<()> {
        let head = self.check_head(expected)?;
        head.pending_resolution = Some(resolution);
        head.attempt = attempt;
        if last_error.is_some() {
            head.last_error = last_error;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in queue order.
    pub fn entries(&self) -> impl ExactSizeIterator<Item = &OutboxEntry> {
        self.entries.iter()
    }

    pub fn status(&self) -> QueueStatus {
        let head = self.entries.front();
        QueueStatus {
            pending: self.entries.len(),
            head: head.map(|e| e.id),
            head_attempt: head.map(|e| e.attempt),
            head_next_attempt_at: head.map(|e| e.next_attempt_at),
            head_awaiting_resolution: head.is_some_and(|e| e.pending_resolution.is_some()),
        }
    }

    fn check_head(&mut self, expected: EntryId) -> OutboxResult<&mut OutboxEntry> {
        match self.entries.front_mut() {
            None => Err(OutboxError::state_corruption(format!(
                "expected head {expected} but the outbox is empty"
            ))),
            Some(head) if head.id != expected => Err(OutboxError::state_corruption(format!(
                "expected head {expected} but found {}",
                head.id
            ))),
            Some(head) => Ok(head),
        }
    }
}
