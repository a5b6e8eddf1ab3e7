use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use outbox_core::{IdempotencyKey, RequestSpec};

use super::{FailureHint, NetworkTransport, TransportError, TransportResponse};

/// What the scripted remote does with one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedOutcome {
    /// Apply the request and answer 200.
    Succeed,
    /// Fail without applying the request.
    Fail(FailureHint),
    /// Apply the request, then lose the response (e.g. a timeout after the
    /// server already did the work).
    AppliedThenFail(FailureHint),
}

/// How the scripted remote treats repeated idempotency keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteMode {
    /// A key is applied at most once.
    #[default]
    Idempotent,
    /// Every execution is applied again (duplicates on retry).
    NonIdempotent,
}

/// A call as seen by the scripted remote.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub idempotency_key: IdempotencyKey,
    pub request: RequestSpec,
}

#[derive(Debug)]
struct Inner {
    per_key: HashMap<IdempotencyKey, VecDeque<ScriptedOutcome>>,
    queue: VecDeque<ScriptedOutcome>,
    default: ScriptedOutcome,
    mode: RemoteMode,
    calls: Vec<RecordedCall>,
    applied: Vec<RecordedCall>,
    seen: HashSet<IdempotencyKey>,
}

/// Deterministic transport for tests/dev.
///
/// Outcomes come from, in order: the script registered for the call's
/// idempotency key, then the shared script, then the default outcome. Every
/// call is recorded, and a small remote ledger records which requests were
/// actually applied so tests can tell duplicates from deduplicated retries.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
    latency: Duration,
    abortable: bool,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// A remote that accepts everything, idempotently, instantly.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                per_key: HashMap::new(),
                queue: VecDeque::new(),
                default: ScriptedOutcome::Succeed,
                mode: RemoteMode::Idempotent,
                calls: Vec::new(),
                applied: Vec::new(),
                seen: HashSet::new(),
            })),
            latency: Duration::ZERO,
            abortable: false,
        }
    }

    pub fn with_default(self, outcome: ScriptedOutcome) -> Self {
        self.lock().default = outcome;
        self
    }

    pub fn with_mode(self, mode: RemoteMode) -> Self {
        self.lock().mode = mode;
        self
    }

    /// Delay every call by `latency` before it is answered.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_abort_support(mut self, abortable: bool) -> Self {
        self.abortable = abortable;
        self
    }

    /// Outcomes for the next calls carrying `key`.
    pub fn script(&self, key: &IdempotencyKey, outcomes: impl IntoIterator<Item = ScriptedOutcome>) {
        self.lock()
            .per_key
            .entry(key.clone())
            .or_default()
            .extend(outcomes);
    }

    /// Outcome for the next call without a per-key script.
    pub fn push(&self, outcome: ScriptedOutcome) {
        self.lock().queue.push_back(outcome);
    }

    pub fn set_default(&self, outcome: ScriptedOutcome) {
        self.lock().default = outcome;
    }

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn calls_for(&self, key: &IdempotencyKey) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| &c.idempotency_key == key)
            .count()
    }

    /// Requests the remote actually applied, in order.
    pub fn applied(&self) -> Vec<RecordedCall> {
        self.lock().applied.clone()
    }

    pub fn applied_for(&self, key: &IdempotencyKey) -> usize {
        self.lock()
            .applied
            .iter()
            .filter(|c| &c.idempotency_key == key)
            .count()
    }

    /// Poll until at least `n` calls were received or `timeout` elapses.
    pub async fn wait_for_calls(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.call_count() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_outcome(&self, call: RecordedCall) -> ScriptedOutcome {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let outcome = match inner
            .per_key
            .get_mut(&call.idempotency_key)
            .and_then(VecDeque::pop_front)
        {
            Some(outcome) => outcome,
            None => inner.queue.pop_front().unwrap_or(inner.default),
        };
        inner.calls.push(call);
        outcome
    }

    fn apply(&self, call: RecordedCall) {
        let mut inner = self.lock();
        match inner.mode {
            RemoteMode::Idempotent => {
                if inner.seen.insert(call.idempotency_key.clone()) {
                    inner.applied.push(call);
                }
            }
            RemoteMode::NonIdempotent => inner.applied.push(call),
        }
    }
}

#[async_trait]
impl NetworkTransport for ScriptedTransport {
    async fn execute(
        &self,
        request: &RequestSpec,
        idempotency_key: &IdempotencyKey,
    ) -> Result<TransportResponse, TransportError> {
        let call = RecordedCall {
            idempotency_key: idempotency_key.clone(),
            request: request.clone(),
        };
        let outcome = self.next_outcome(call.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match outcome {
            ScriptedOutcome::Succeed => {
                self.apply(call);
                Ok(TransportResponse::ok())
            }
            ScriptedOutcome::Fail(hint) => Err(scripted_error(hint)),
            ScriptedOutcome::AppliedThenFail(hint) => {
                self.apply(call);
                Err(scripted_error(hint))
            }
        }
    }

    fn supports_abort(&self) -> bool {
        self.abortable
    }
}

fn scripted_error(hint: FailureHint) -> TransportError {
    let status = match hint {
        FailureHint::ServerUnavailable => Some(503),
        FailureHint::Rejected => Some(422),
        FailureHint::Network | FailureHint::Timeout => None,
    };
    TransportError::new(hint, status, "scripted failure")
}
