//! CRDT engine for Hearth ledgers.
//!
//! Every write becomes a [`ClockEvent`] whose parents are the current head,
//! packed into one CAR by the loader. Replicas exchange CARs through a
//! remote and fold each other's heads in with [`clock::advance`]; documents
//! are read by replaying the clock in a deterministic topological order
//! where the last writer wins.
//!
//! [`FireproofCompaction`] is the default compaction strategy: it rewrites
//! the ledger into a single CAR holding exactly the blocks the head can
//! reach.

pub mod clock;
pub mod crdt;
pub mod error;
pub mod event;
pub mod fireproof;
pub mod history;

pub use crdt::{Crdt, CrdtMeta, DocRecord};
pub use error::{CrdtError, CrdtResult};
pub use event::{ClockEvent, EventData, EventUpdate};
pub use fireproof::FireproofCompaction;
pub use history::{materialize, replay, DocEntry};
