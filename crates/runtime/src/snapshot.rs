//! Snapshot codec: application state plus outbox entries as one JSON document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{OutboxError, OutboxResult};
use crate::outbox::{Outbox, OutboxEntry};

/// Current on-disk format. Bumped on incompatible layout changes.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Everything needed to resume after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<S> {
    pub format_version: u32,
    pub state: S,
    pub entries: Vec<OutboxEntry>,
}

impl<S> Snapshot<S> {
    pub fn new(state: S, entries: Vec<OutboxEntry>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            state,
            entries,
        }
    }

    pub fn into_parts(self) -> (S, Outbox) {
        (self.state, Outbox::from_entries(self.entries))
    }
}

/// Encoded snapshot as handed to a persistence adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedSnapshot(Vec<u8>);

impl SerializedSnapshot {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a, S> {
    format_version: u32,
    state: &'a S,
    entries: EntriesRef<'a>,
}

struct EntriesRef<'a>(&'a Outbox);

impl Serialize for EntriesRef<'_> {
    fn serialize<Ser: serde::Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.collect_seq(self.0.entries())
    }
}

pub fn encode<S: Serialize>(snapshot: &Snapshot<S>) -> OutboxResult<SerializedSnapshot> {
    serde_json::to_vec(snapshot)
        .map(SerializedSnapshot)
        .map_err(|e| OutboxError::Codec(format!("encode: {e}")))
}

/// Encode live state and outbox without cloning them into a [`Snapshot`].
pub(crate) fn encode_parts<S: Serialize>(state: &S, outbox: &Outbox) -> OutboxResult<SerializedSnapshot> {
    let view = SnapshotRef {
        format_version: SNAPSHOT_FORMAT_VERSION,
        state,
        entries: EntriesRef(outbox),
    };
    serde_json::to_vec(&view)
        .map(SerializedSnapshot)
        .map_err(|e| OutboxError::Codec(format!("encode: {e}")))
}

pub fn decode<S: DeserializeOwned>(bytes: &SerializedSnapshot) -> OutboxResult<Snapshot<S>> {
    let snapshot: Snapshot<S> =
        serde_json::from_slice(bytes.as_bytes()).map_err(|e| OutboxError::Codec(format!("decode: {e}")))?;
    if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
        return Err(OutboxError::Codec(format!(
            "snapshot format {} is newer than supported format {}",
            snapshot.format_version, SNAPSHOT_FORMAT_VERSION
        )));
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use outbox_core::{
        Action, BackoffStrategy, EffectDescriptor, IdempotencyKey, MaxAttempts, RequestSpec,
        RetryPolicyOverride,
    };
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use crate::error::RollbackReason;
    use crate::outbox::Resolution;

    #[test]
    fn newer_format_is_rejected() {
        let bytes = SerializedSnapshot::new(
            serde_json::to_vec(&json!({"format_version": 99, "state": 0, "entries": []})).unwrap(),
        );
        let err = decode::<i64>(&bytes).unwrap_err();
        assert!(matches!(err, OutboxError::Codec(_)));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = decode::<i64>(&SerializedSnapshot::new(b"not json".to_vec())).unwrap_err();
        assert!(matches!(err, OutboxError::Codec(_)));
    }

    #[test]
    fn encode_parts_matches_encode() {
        let mut outbox = Outbox::new();
        outbox.enqueue(
            EffectDescriptor::new(
                IdempotencyKey::new("k").unwrap(),
                RequestSpec::delete("/x/1"),
                Action::bare("c"),
                Action::bare("r"),
            ),
            Utc::now(),
        );
        let state = json!({"count": 3});

        let from_parts = encode_parts(&state, &outbox).unwrap();
        let owned = encode(&Snapshot::new(state.clone(), outbox.entries().cloned().collect())).unwrap();
        assert_eq!(from_parts, owned);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TodoState {
        todos: BTreeMap<u32, String>,
        synced: Vec<u32>,
    }

    fn arb_action() -> impl Strategy<Value = Action> {
        ("[a-z/]{1,12}", any::<i64>()).prop_map(|(kind, n)| Action::new(kind, json!({"n": n})))
    }

    fn arb_override() -> impl Strategy<Value = Option<RetryPolicyOverride>> {
        proptest::option::of(
            (
                proptest::option::of(prop_oneof![
                    (1u32..10).prop_map(MaxAttempts::Limited),
                    Just(MaxAttempts::Unbounded),
                ]),
                proptest::option::of(0u64..10_000),
                proptest::option::of(prop_oneof![
                    Just(BackoffStrategy::Fixed),
                    Just(BackoffStrategy::Linear),
                    Just(BackoffStrategy::Exponential),
                ]),
                proptest::option::of(0.0f64..=1.0),
            )
                .prop_map(|(max_attempts, base_ms, strategy, jitter)| RetryPolicyOverride {
                    max_attempts,
                    base_delay: base_ms.map(Duration::from_millis),
                    max_delay: None,
                    strategy,
                    jitter,
                }),
        )
    }

    fn arb_entry() -> impl Strategy<Value = OutboxEntry> {
        (
            "[a-z0-9-]{1,16}",
            "/[a-z]{1,8}/[0-9]{1,4}",
            arb_action(),
            arb_action(),
            arb_override(),
            0u32..20,
            0i64..4_000_000_000,
            0u32..1_000_000_000,
            proptest::option::of("[ -~]{0,24}"),
            proptest::option::of(prop_oneof![
                Just(Resolution::Commit),
                Just(Resolution::Rollback(RollbackReason::Permanent)),
                Just(Resolution::Rollback(RollbackReason::RetryExhausted)),
            ]),
        )
            .prop_map(
                |(key, target, commit, rollback, over, attempt, secs, nanos, last_error, pending)| {
                    let at = Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now);
                    let mut descriptor = EffectDescriptor::new(
                        IdempotencyKey::new(key).unwrap(),
                        RequestSpec::patch(target, json!({"done": attempt % 2 == 0}))
                            .with_header("x-attempt", attempt.to_string()),
                        commit,
                        rollback,
                    );
                    descriptor.retry_policy = over;
                    if attempt % 3 == 0 {
                        descriptor.timeout = Some(Duration::from_millis(u64::from(attempt) * 250));
                    }
                    let mut entry = OutboxEntry::new(descriptor, at);
                    entry.attempt = attempt;
                    entry.next_attempt_at = at + chrono::Duration::milliseconds(i64::from(attempt) * 10);
                    entry.last_error = last_error;
                    entry.pending_resolution = pending;
                    entry
                },
            )
    }

    fn arb_snapshot() -> impl Strategy<Value = Snapshot<TodoState>> {
        (
            proptest::collection::btree_map(any::<u32>(), "[ -~]{0,16}", 0..8),
            proptest::collection::vec(any::<u32>(), 0..8),
            proptest::collection::vec(arb_entry(), 0..6),
        )
            .prop_map(|(todos, synced, entries)| Snapshot::new(TodoState { todos, synced }, entries))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: decode(encode(snapshot)) == snapshot.
        #[test]
        fn snapshot_round_trips(snapshot in arb_snapshot()) {
            let bytes = encode(&snapshot).unwrap();
            let decoded: Snapshot<TodoState> = decode(&bytes).unwrap();
            prop_assert_eq!(decoded, snapshot);
        }
    }
}
