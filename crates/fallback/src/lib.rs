//! ProTrack offline reconciliation layer.
//!
//! Keeps the supply-chain app usable while the backend is unreachable:
//! reads come from a device-local mirror, writes are queued as pending
//! operations, and the queue is replayed in order once the backend is back.
//! `FallbackManager` is the entry point; `SyncWorker` drives reconnection in
//! the background.

pub mod backend;
pub mod commands;
pub mod config;
pub mod error;
pub mod mirror;
pub mod monitor;
pub mod queue;
pub mod replay;
pub mod seed;
pub mod store;
pub mod sync_manager;
pub mod sync_worker;
pub mod types;

pub use backend::{Backend, BackendError, InMemoryBackend, RestBackend};
pub use config::{Config, ConfigError};
pub use error::{FallbackError, FallbackResult};
pub use mirror::LocalMirror;
pub use monitor::{Backoff, ConnectionMonitor};
pub use queue::PendingQueue;
pub use store::{InMemoryStore, OfflineStore, SqliteStore, StoreError};
pub use sync_manager::{FallbackManager, FallbackOptions};
pub use sync_worker::SyncWorker;
pub use types::{
    ConnectionStatus, DeadLetter, OperationKind, PendingOperation, RejectedPolicy, ReplayFailure,
    StatusReport, SyncReport, SyncState,
};
