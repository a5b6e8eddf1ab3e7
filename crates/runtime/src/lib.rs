//! `outbox-runtime`: the offline-resilient effect outbox.
//!
//! Actions are dispatched through an [`ActionBus`], which applies them to
//! application state optimistically and queues their declarative effects.
//! A single executor per [`Runtime`] drains the queue in order whenever the
//! [`ConnectivityMonitor`] reports online, retries transient failures with
//! backoff, and reconciles every effect with exactly one commit or rollback
//! action. State and queue are persisted together after every change, so a
//! restart resumes where the previous process stopped.
//!
//! ```ignore
//! let runtime = Runtime::builder(reducer, FilePersistence::new(path), transport, ConnectivityMonitor::online())
//!     .config(OutboxConfig::from_env()?)
//!     .initial_state(TodoState::default())
//!     .start()
//!     .await?;
//! runtime.dispatch(add_todo_with_effect).await?;
//! ```

pub mod bus;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod executor;
pub mod outbox;
pub mod persistence;
pub mod reconciler;
pub mod retry;
pub mod runtime;
pub mod snapshot;
pub mod transport;


pub use bus::{ActionBus, PersistenceHealth};
pub use config::{ConfigError, OutboxConfig};
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, ConnectivityStatus, PollerHandle, Subscription};
pub use error::{EffectFailure, OutboxError, OutboxResult, PersistenceError, RollbackReason};
pub use executor::{ExecutorHandle, ExecutorStats};
pub use outbox::{Outbox, OutboxEntry, QueueStatus, Resolution};
pub use persistence::{FilePersistence, InMemoryPersistence, PersistenceAdapter};
#[cfg(feature = "sqlite")]
pub use persistence::SqlitePersistence;
pub use reconciler::Reconciler;
pub use retry::{RetryDecision, RetryScheduler};
pub use runtime::{Runtime, RuntimeBuilder};
pub use snapshot::{SNAPSHOT_FORMAT_VERSION, SerializedSnapshot, Snapshot};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{
    FailureHint, NetworkTransport, RecordedCall, RemoteMode, ScriptedOutcome, ScriptedTransport,
    TransportError, TransportResponse,
};

pub use outbox_core;
