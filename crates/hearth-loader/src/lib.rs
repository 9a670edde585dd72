//! Loader for Hearth ledgers.
//!
//! The [`Loader`] owns everything between the CRDT engine and the storage
//! gateways for one ledger:
//!
//! - the car log (every CAR that makes up the ledger, newest first) and the
//!   block cache filled from it,
//! - the [`CommitQueue`] that serializes commits, compactions and remote
//!   merges,
//! - the local data, meta and WAL stores ([`StoreSet`]) and an optional
//!   remote ([`RemoteStores`]),
//! - the [`RemoteWal`] that pushes local commits to the remote with
//!   at-least-once delivery,
//! - the [`TaskManager`] that dedups remote meta events before they are
//!   applied,
//! - the compaction strategy table ([`CompactStrategies`]).
//!
//! # Write path
//!
//! 1. The CAR is written to the local data store.
//! 2. If a remote is attached, a WAL operation naming the CAR is persisted.
//! 3. The new meta record is written to the local meta store.
//!
//! The meta pointer therefore never names a CAR that is not durable.

pub mod commit_queue;
pub mod compact;
pub mod config;
pub mod error;
pub mod keybag_store;
pub mod loader;
pub mod remote_wal;
pub mod stores;
pub mod task_manager;

pub use commit_queue::CommitQueue;
pub use compact::{CompactStrategies, CompactStrategy, FullCompaction, NoopCompaction};
pub use config::{LoaderConfig, WalRetryConfig};
pub use error::{LoaderError, LoaderResult};
pub use keybag_store::GatewayKeyBagProvider;
pub use loader::{CommitOpts, Loader};
pub use remote_wal::{RemoteWal, WalOperation, WalState};
pub use stores::{DataStore, MetaStore, RemoteStores, StoreSet, WalStore};
pub use task_manager::{MetaApplier, RemoteEvent, TaskManager};
