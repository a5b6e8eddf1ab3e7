//! Strongly-typed identifiers used across the outbox.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Identifier of a single outbox entry.
///
/// Time-ordered (UUIDv7), so sorting by id matches enqueue order within a
/// process. Queue order is still owned by the outbox itself, never by ids.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for EntryId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for EntryId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s).map_err(|e| CoreError::invalid_id(format!("EntryId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Caller-supplied key that makes re-executing an effect safe.
///
/// The key must be stable for one logical operation across every retry and
/// across restarts. Transports forward it to the remote side (for HTTP, as
/// the `Idempotency-Key` header); the outbox never inspects it beyond logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Build a key from caller data. Empty or whitespace-only keys are rejected.
    pub fn new(key: impl Into<String>) -> Result<Self, CoreError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(CoreError::validation("idempotency key must not be empty"));
        }
        Ok(Self(key))
    }

    /// Generate a fresh random key (UUIDv7). Generate once per logical
    /// operation and keep it; never regenerate on retry.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IdempotencyKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_parses_its_own_display() {
        let id = EntryId::new();
        let parsed: EntryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn entry_id_rejects_garbage() {
        let err = "not-a-uuid".parse::<EntryId>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidId(msg) if msg.starts_with("EntryId")));
    }

    #[test]
    fn idempotency_key_rejects_blank() {
        assert!(IdempotencyKey::new("   ").is_err());
        assert_eq!(IdempotencyKey::new("order-42").unwrap().as_str(), "order-42");
    }

    #[test]
    fn generated_keys_are_distinct() {
        assert_ne!(IdempotencyKey::generate(), IdempotencyKey::generate());
    }
}
