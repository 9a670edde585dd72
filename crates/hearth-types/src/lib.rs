//! Foundation types for Hearth.
//!
//! Every other Hearth crate depends on `hearth-types`. Nothing here performs
//! I/O; these are the values that flow between the block store, the CAR
//! layer, the loader and the CRDT engine.
//!
//! # Key Types
//!
//! - [`Cid`] -- content identifier: codec tag plus BLAKE3 digest
//! - [`Block`] -- immutable `(cid, bytes)` pair
//! - [`ClockHead`] -- sorted causal frontier of clock-event CIDs
//! - [`DbMeta`] -- pointer record naming the latest committed CAR
//! - [`CarClockLink`] -- a meta record plus the CARs it supersedes
//! - [`TransactionMeta`] -- what a commit changed, carried in the CAR header
//! - [`DocUpdate`] -- one document mutation in a bulk write

pub mod block;
pub mod cid;
pub mod doc;
pub mod error;
pub mod meta;

pub use block::Block;
pub use cid::{Cid, Codec};
pub use doc::{DocId, DocUpdate};
pub use error::{TypeError, TypeResult};
pub use meta::{CarClockLink, ClockHead, DbMeta, TransactionMeta};
