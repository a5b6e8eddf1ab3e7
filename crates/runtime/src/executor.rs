//! Effect executor: drains the outbox head against the network transport.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use outbox_core::{EntryId, Reducer};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::ActionBus;
use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use crate::error::{EffectFailure, OutboxError, RollbackReason};
use crate::outbox::{OutboxEntry, Resolution};
use crate::reconciler::Reconciler;
use crate::retry::{RetryDecision, RetryScheduler};
use crate::transport::{NetworkTransport, TransportResponse};

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    /// Transport calls started.
    pub attempted: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub retries_scheduled: u64,
    /// Rollbacks caused by a used-up retry budget (subset of `rolled_back`).
    pub exhausted: u64,
    /// Commit/rollback dispatches that failed and will be retried.
    pub resolution_failures: u64,
    /// In-flight calls cancelled by shutdown.
    pub aborted: u64,
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct ExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl ExecutorHandle {
    /// Request graceful shutdown and wait for the executor to stop.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(error = %err, "effect executor task failed");
            }
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        lock_stats(&self.stats).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn lock_stats(stats: &Mutex<ExecutorStats>) -> MutexGuard<'_, ExecutorStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once shutdown was requested (or the requester is gone).
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn wait_for_status(rx: &mut watch::Receiver<ConnectivityStatus>, wanted: ConnectivityStatus) {
    loop {
        if *rx.borrow_and_update() == wanted {
            return;
        }
        if rx.changed().await.is_err() {
            // Monitor gone: the status can no longer change.
            std::future::pending::<()>().await;
        }
    }
}

enum Race {
    Shutdown,
    ConnectivityLost,
    Finished(Result<TransportResponse, EffectFailure>),
}

/// The single worker of one runtime. Never more than one call in flight.
pub(crate) struct Executor<R: Reducer> {
    name: String,
    bus: ActionBus<R>,
    reconciler: Reconciler<R>,
    transport: Arc<dyn NetworkTransport>,
    connectivity: ConnectivityMonitor,
    scheduler: RetryScheduler,
    request_timeout: Duration,
    resolution_retry_delay: Duration,
    stats: Arc<Mutex<ExecutorStats>>,
    shutdown: watch::Receiver<bool>,
    /// Resolution decided for the head whose dispatch (and persisted
    /// marking) failed.
    memo: Option<(EntryId, Resolution)>,
}

impl<R: Reducer> Executor<R> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        bus: ActionBus<R>,
        transport: Arc<dyn NetworkTransport>,
        connectivity: ConnectivityMonitor,
        scheduler: RetryScheduler,
        request_timeout: Duration,
        resolution_retry_delay: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            name,
            reconciler: Reconciler::new(bus.clone()),
            bus,
            transport,
            connectivity,
            scheduler,
            request_timeout,
            resolution_retry_delay,
            stats: Arc::new(Mutex::new(ExecutorStats::default())),
            shutdown,
            memo: None,
        }
    }

    /// Spawn the executor as a tokio task.
    pub(crate) fn spawn(self, shutdown: watch::Sender<bool>) -> ExecutorHandle {
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run());
        ExecutorHandle {
            shutdown,
            join: Some(join),
            stats,
        }
    }

    async fn run(mut self) {
        info!(executor = %self.name, "effect executor started");
        let mut connectivity = self.connectivity.watch();

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let head = self.bus.head();

            // A decided resolution needs no network call.
            if let Some(entry) = &head {
                if let Some(resolution) = self.decided_resolution(entry) {
                    self.finish(entry, resolution, entry.attempt, None).await;
                    continue;
                }
            }

            if !connectivity.borrow_and_update().is_online() {
                debug!(executor = %self.name, "offline; waiting for connectivity");
                tokio::select! {
                    _ = shutdown_requested(&mut self.shutdown) => break,
                    _ = wait_for_status(&mut connectivity, ConnectivityStatus::Online) => {}
                }
                continue;
            }

            let Some(entry) = head else {
                tokio::select! {
                    _ = shutdown_requested(&mut self.shutdown) => break,
                    _ = self.bus.outbox_changed().notified() => {}
                }
                continue;
            };

            let now = Utc::now();
            if !entry.is_due(now) {
                let wait = (entry.next_attempt_at - now).to_std().unwrap_or_default();
                tokio::select! {
                    _ = shutdown_requested(&mut self.shutdown) => break,
                    _ = tokio::time::sleep(wait) => {}
                    _ = wait_for_status(&mut connectivity, ConnectivityStatus::Offline) => {}
                }
                continue;
            }

            self.attempt(entry, &mut connectivity).await;
        }

        info!(executor = %self.name, "effect executor stopped");
    }

    fn decided_resolution(&self, entry: &OutboxEntry) -> Option<Resolution> {
        entry.pending_resolution.or_else(|| match self.memo {
            Some((id, resolution)) if id == entry.id => Some(resolution),
            _ => None,
        })
    }

    async fn attempt(
        &mut self,
        entry: OutboxEntry,
        connectivity: &mut watch::Receiver<ConnectivityStatus>,
    ) {
        let attempt = entry.attempt.saturating_add(1);
        let timeout = entry.descriptor.timeout.unwrap_or(self.request_timeout);
        lock_stats(&self.stats).attempted += 1;
        debug!(
            executor = %self.name,
            entry_id = %entry.id,
            idempotency_key = %entry.idempotency_key(),
            attempt,
            "executing effect"
        );

        let transport = &self.transport;
        let call = async {
            match tokio::time::timeout(
                timeout,
                transport.execute(&entry.descriptor.request, &entry.descriptor.idempotency_key),
            )
            .await
            {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => Err(EffectFailure::from(err)),
                Err(_) => Err(EffectFailure::Transient(format!(
                    "request timed out after {}ms",
                    timeout.as_millis()
                ))),
            }
        };

        let race = if transport.supports_abort() {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => Race::Shutdown,
                _ = wait_for_status(connectivity, ConnectivityStatus::Offline) => Race::ConnectivityLost,
                outcome = call => Race::Finished(outcome),
            }
        } else {
            Race::Finished(call.await)
        };

        let outcome = match race {
            Race::Finished(outcome) => outcome,
            Race::ConnectivityLost => Err(EffectFailure::Transient(
                "connectivity lost during request".to_string(),
            )),
            Race::Shutdown => {
                lock_stats(&self.stats).aborted += 1;
                info!(
                    executor = %self.name,
                    entry_id = %entry.id,
                    "in-flight effect aborted by shutdown; entry kept"
                );
                return;
            }
        };

        match outcome {
            Ok(response) => {
                debug!(
                    executor = %self.name,
                    entry_id = %entry.id,
                    status = response.status,
                    "effect succeeded"
                );
                self.finish(&entry, Resolution::Commit, attempt, None).await;
            }
            Err(failure) => self.handle_failure(&entry, failure).await,
        }
    }

    async fn handle_failure(&mut self, entry: &OutboxEntry, failure: EffectFailure) {
        match self.scheduler.decide(entry, &failure, Utc::now()) {
            RetryDecision::Retry {
                attempt,
                delay,
                next_attempt_at,
            } => {
                lock_stats(&self.stats).retries_scheduled += 1;
                warn!(
                    executor = %self.name,
                    entry_id = %entry.id,
                    idempotency_key = %entry.idempotency_key(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "effect failed; retry scheduled"
                );
                if let Err(err) = self
                    .bus
                    .requeue(entry.id, attempt, next_attempt_at, Some(failure.to_string()))
                    .await
                {
                    error!(
                        executor = %self.name,
                        entry_id = %entry.id,
                        error = %err,
                        "failed to record retry schedule"
                    );
                    self.pause(delay.max(self.resolution_retry_delay)).await;
                }
            }
            RetryDecision::Rollback { reason, attempt } => {
                if reason == RollbackReason::RetryExhausted {
                    lock_stats(&self.stats).exhausted += 1;
                }
                warn!(
                    executor = %self.name,
                    entry_id = %entry.id,
                    idempotency_key = %entry.idempotency_key(),
                    attempt,
                    reason = %reason,
                    error = %failure,
                    "effect failed; rolling back"
                );
                self.finish(
                    entry,
                    Resolution::Rollback(reason),
                    attempt,
                    Some(failure.to_string()),
                )
                .await;
            }
        }
    }

    /// Dispatch the resolving action. On failure the resolution is recorded
    /// so the effect is not executed again.
    async fn finish(
        &mut self,
        entry: &OutboxEntry,
        resolution: Resolution,
        attempt: u32,
        last_error: Option<String>,
    ) {
        match self.reconciler.apply(entry, resolution).await {
            Ok(()) => {
                self.memo = None;
                let mut stats = lock_stats(&self.stats);
                match resolution {
                    Resolution::Commit => stats.committed += 1,
                    Resolution::Rollback(_) => stats.rolled_back += 1,
                }
            }
            Err(OutboxError::StateCorruption(msg)) => {
                self.memo = None;
                error!(
                    executor = %self.name,
                    entry_id = %entry.id,
                    error = %msg,
                    "outbox head changed under a resolution"
                );
            }
            Err(_) => {
                lock_stats(&self.stats).resolution_failures += 1;
                self.memo = Some((entry.id, resolution));
                if entry.pending_resolution.is_none() {
                    if let Err(err) = self
                        .bus
                        .mark_pending_resolution(entry.id, resolution, attempt, last_error)
                        .await
                    {
                        warn!(
                            executor = %self.name,
                            entry_id = %entry.id,
                            error = %err,
                            "failed to record pending resolution; kept in memory"
                        );
                    }
                }
                self.pause(self.resolution_retry_delay).await;
            }
        }
    }

    async fn pause(&mut self, delay: Duration) {
        tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
