//! Connectivity monitoring.
//!
//! The monitor is an injected value, never global state: each runtime gets
//! the monitor it was built with, and several runtimes may share one.
//! Status changes are pushed by the embedder with [`ConnectivityMonitor::set_status`]
//! or, for platforms that can only probe, by a poller task.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityStatus {
    Online,
    Offline,
}

impl ConnectivityStatus {
    pub fn is_online(self) -> bool {
        self == ConnectivityStatus::Online
    }
}

type Callback = Arc<dyn Fn(ConnectivityStatus) + Send + Sync>;

struct Inner {
    tx: watch::Sender<ConnectivityStatus>,
    subscribers: Mutex<BTreeMap<u64, Callback>>,
    next_id: AtomicU64,
}

impl Inner {
    fn subscribers(&self) -> MutexGuard<'_, BTreeMap<u64, Callback>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared connectivity status with change notifications.
///
/// Cheap to clone; clones observe and update the same status.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("status", &self.status())
            .field("subscribers", &self.inner.subscribers().len())
            .finish()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::online()
    }
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                tx,
                subscribers: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn online() -> Self {
        Self::new(ConnectivityStatus::Online)
    }

    pub fn offline() -> Self {
        Self::new(ConnectivityStatus::Offline)
    }

    pub fn status(&self) -> ConnectivityStatus {
        *self.inner.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.status().is_online()
    }

    /// Update the status. Subscribers run only on an actual change.
    ///
    /// Returns whether the status changed.
    pub fn set_status(&self, status: ConnectivityStatus) -> bool {
        let changed = self.inner.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            tracing::info!(status = ?status, "connectivity changed");
            let callbacks: Vec<Callback> = self.inner.subscribers().values().cloned().collect();
            for callback in callbacks {
                callback(status);
            }
        }
        changed
    }

    pub fn set_online(&self) -> bool {
        self.set_status(ConnectivityStatus::Online)
    }

    pub fn set_offline(&self) -> bool {
        self.set_status(ConnectivityStatus::Offline)
    }

    /// Run `callback` on every status change until the subscription is
    /// dropped or unsubscribed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectivityStatus) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers().insert(id, Arc::new(callback));
        Subscription {
            id,
            monitor: Arc::downgrade(&self.inner),
        }
    }

    /// Receiver that resolves `changed()` on every status change.
    pub fn watch(&self) -> watch::Receiver<ConnectivityStatus> {
        self.inner.tx.subscribe()
    }

    /// Probe `probe` every `interval` and publish its result.
    ///
    /// The poller stops when the returned handle is stopped or dropped.
    pub fn spawn_poller<P>(&self, probe: P, interval: Duration) -> PollerHandle
    where
        P: ConnectivityProbe + 'static,
    {
        let monitor = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let status = probe.probe().await;
                monitor.set_status(status);
            }
        });
        PollerHandle { task }
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    monitor: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.monitor.upgrade() {
            inner.subscribers().remove(&self.id);
        }
    }
}

/// Source of connectivity status for the polling mode.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe(&self) -> ConnectivityStatus;
}

/// Running connectivity poller.
#[derive(Debug)]
pub struct PollerHandle {
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn stop(self) {
        // Drop aborts the task.
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn callbacks_fire_only_on_change() {
        let monitor = ConnectivityMonitor::online();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = monitor.subscribe(move |s| sink.lock().unwrap().push(s));

        assert!(!monitor.set_online());
        assert!(monitor.set_offline());
        assert!(!monitor.set_offline());
        assert!(monitor.set_online());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectivityStatus::Offline, ConnectivityStatus::Online]
        );
    }

    #[test]
    fn dropping_the_subscription_detaches() {
        let monitor = ConnectivityMonitor::online();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = monitor.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_offline();
        sub.unsubscribe();
        monitor.set_online();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_status() {
        let a = ConnectivityMonitor::offline();
        let b = a.clone();
        b.set_online();
        assert!(a.is_online());
    }

    #[tokio::test]
    async fn watch_receiver_sees_transitions() {
        let monitor = ConnectivityMonitor::offline();
        let mut rx = monitor.watch();
        monitor.set_online();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectivityStatus::Online);
    }

    struct FixedProbe(ConnectivityStatus);

    #[async_trait]
    impl ConnectivityProbe for FixedProbe {
        async fn probe(&self) -> ConnectivityStatus {
            self.0
        }
    }

    #[tokio::test]
    async fn poller_publishes_probe_results() {
        let monitor = ConnectivityMonitor::online();
        let mut rx = monitor.watch();
        let poller = monitor.spawn_poller(FixedProbe(ConnectivityStatus::Offline), Duration::from_millis(5));

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!monitor.is_online());
        poller.stop();
    }
}
