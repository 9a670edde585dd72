//! Content-addressed block storage for Hearth.
//!
//! Every piece of ledger data (document bodies, clock events) is an
//! immutable [`Block`](hearth_types::Block) identified by its CID. This
//! crate holds blocks in memory and defines how they are looked up.
//!
//! # Traits
//!
//! - [`BlockStore`] -- synchronous put/get/entries over a local map
//! - [`BlockFetcher`] -- asynchronous lookup that may hit the network
//!
//! # Implementations
//!
//! - [`MemoryBlockStore`] -- `HashMap`-based store, insertion ordered
//! - [`CarTransaction`] -- the blocks written by one commit
//! - [`MultiFetcher`] -- tries several fetchers in order, first hit wins
//!
//! # Design Rules
//!
//! 1. Blocks are immutable; writing the same CID twice is a no-op.
//! 2. A block whose bytes do not hash to its CID is never stored.
//! 3. The store never interprets block contents.

pub mod error;
pub mod memory;
pub mod multi;
pub mod traits;
pub mod transaction;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryBlockStore;
pub use multi::MultiFetcher;
pub use traits::{BlockFetcher, BlockStore};
pub use transaction::CarTransaction;
