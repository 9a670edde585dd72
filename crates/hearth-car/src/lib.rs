//! CAR envelopes: the unit of durability in Hearth.
//!
//! Every commit and every compaction produces exactly one CAR: an ordered
//! batch of blocks plus a JSON header naming the root CIDs, the
//! [`TransactionMeta`](hearth_types::TransactionMeta) of the commit and the
//! car log at write time. The CAR is itself addressed by a CID (codec
//! `car`) over the full envelope bytes.
//!
//! # Wire format
//!
//! ```text
//! "HCAR" | u32 BE version | varint len | header JSON
//!        | ( varint len | 33-byte cid | payload )*
//!        | 32-byte BLAKE3 checksum of everything before it
//! ```
//!
//! When the header carries a key fingerprint, each payload is
//! `ciphertext || nonce` under that key. CIDs always hash the plaintext,
//! so structure stays visible while content does not.
//!
//! Decoding never panics: truncated, tampered or hash-mismatched input is
//! reported as a [`CarError`].

pub mod error;
pub mod header;
pub mod reader;
pub mod varint;
pub mod writer;

pub use error::{CarError, CarResult};
pub use header::CarHeader;
pub use reader::{CarBlocks, CarReader};
pub use writer::CarWriter;

/// Leading magic bytes of every envelope.
pub const MAGIC: &[u8; 4] = b"HCAR";
/// Current envelope version.
pub const VERSION: u32 = 1;
/// Largest single length-prefixed field accepted on read.
pub const MAX_FIELD_LEN: u64 = 4 * 1024 * 1024;
/// Length of the trailing checksum.
pub const CHECKSUM_LEN: usize = 32;
