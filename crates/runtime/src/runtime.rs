//! Runtime: one composed outbox per application.
//!
//! There is no global instance. Each `Runtime` owns its reducer, action bus
//! and executor, and several runtimes may live in one process side by side.

use std::sync::Arc;

use outbox_core::{Action, EntryId, Reducer};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::bus::ActionBus;
use crate::config::{ConfigError, OutboxConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::error::OutboxResult;
use crate::executor::{Executor, ExecutorHandle, ExecutorStats};
use crate::outbox::Outbox;
use crate::persistence::PersistenceAdapter;
use crate::retry::RetryScheduler;
use crate::snapshot;
use crate::transport::NetworkTransport;

/// Builder for [`Runtime`].
pub struct RuntimeBuilder<R: Reducer> {
    reducer: R,
    persistence: Arc<dyn PersistenceAdapter>,
    transport: Arc<dyn NetworkTransport>,
    connectivity: ConnectivityMonitor,
    config: OutboxConfig,
    initial_state: Option<R::State>,
}

impl<R: Reducer> RuntimeBuilder<R> {
    pub fn config(mut self, config: OutboxConfig) -> Self {
        self.config = config;
        self
    }

    /// State to start from when nothing was persisted yet.
    pub fn initial_state(mut self, state: R::State) -> Self {
        self.initial_state = Some(state);
        self
    }

    /// Recover the persisted snapshot (if any) and start the executor.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn start(self) -> OutboxResult<Runtime<R>> {
        let (state, outbox) = match self.persistence.load().await? {
            Some(bytes) => {
                let snapshot = snapshot::decode::<R::State>(&bytes)?;
                let (state, outbox) = snapshot.into_parts();
                info!(
                    runtime = %self.config.name,
                    entries = outbox.len(),
                    "restored outbox from snapshot"
                );
                if outbox.entries().any(|e| e.pending_resolution.is_some()) {
                    warn!(runtime = %self.config.name, "restored head awaits a resolution from before the restart");
                }
                (state, outbox)
            }
            None => {
                let state = self.initial_state.ok_or(ConfigError::MissingInitialState)?;
                (state, Outbox::new())
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let bus = ActionBus::new(
            self.reducer,
            self.persistence,
            self.config.clone(),
            state,
            outbox,
            shutdown_rx.clone(),
        );

        let executor = Executor::new(
            self.config.name.clone(),
            bus.clone(),
            self.transport,
            self.connectivity.clone(),
            RetryScheduler::new(self.config.default_retry.clone()),
            self.config.request_timeout,
            self.config.resolution_retry_delay,
            shutdown_rx,
        );
        let executor = executor.spawn(shutdown_tx);

        Ok(Runtime {
            name: self.config.name,
            bus,
            connectivity: self.connectivity,
            executor,
        })
    }
}

/// A running outbox.
pub struct Runtime<R: Reducer> {
    name: String,
    bus: ActionBus<R>,
    connectivity: ConnectivityMonitor,
    executor: ExecutorHandle,
}

impl<R: Reducer> Runtime<R> {
    pub fn builder<P, T>(reducer: R, persistence: P, transport: T, connectivity: ConnectivityMonitor) -> RuntimeBuilder<R>
    where
        P: PersistenceAdapter + 'static,
        T: NetworkTransport + 'static,
    {
        RuntimeBuilder {
            reducer,
            persistence: Arc::new(persistence),
            transport: Arc::new(transport),
            connectivity,
            config: OutboxConfig::default(),
            initial_state: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &ActionBus<R> {
        &self.bus
    }

    /// Shorthand for `bus().dispatch(action)`.
    pub async fn dispatch(&self, action: Action) -> OutboxResult<Option<EntryId>> {
        self.bus.dispatch(action).await
    }

    pub fn state(&self) -> R::State {
        self.bus.state()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    pub fn is_running(&self) -> bool {
        !self.executor.is_finished()
    }

    /// Stop accepting dispatches and wait for the executor to stop.
    ///
    /// Entries still queued stay persisted and resume on the next start.
    pub async fn shutdown(self) {
        info!(runtime = %self.name, pending = self.bus.queue_status().pending, "shutting down outbox runtime");
        self.executor.shutdown().await;
    }
}

impl<R: Reducer> core::fmt::Debug for Runtime<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.name)
            .field("bus", &self.bus)
            .field("connectivity", &self.connectivity)
            .field("executor", &self.executor)
            .finish()
    }
}
