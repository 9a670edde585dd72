use hearth_types::{Cid, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("block not found: {0}")]
    NotFound(Cid),

    #[error("hash mismatch for block {cid}")]
    HashMismatch { cid: Cid },

    #[error("fetch failed for block {cid}: {reason}")]
    Fetch { cid: Cid, reason: String },

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

pub type StoreResult<T> = Result<T, StoreError>;
