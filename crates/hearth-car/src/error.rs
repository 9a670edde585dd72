use hearth_crypto::CryptoError;
use hearth_types::{Cid, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarError {
    #[error("invalid car magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported car version: {0}")]
    UnsupportedVersion(u32),

    #[error("truncated car at offset {offset}: {reason}")]
    Truncated { offset: usize, reason: String },

    #[error("car checksum mismatch")]
    ChecksumMismatch,

    #[error("block {cid} does not match its content")]
    HashMismatch { cid: Cid },

    #[error("invalid car header: {0}")]
    InvalidHeader(String),

    #[error("field at offset {offset} too large: {len} bytes")]
    FieldTooLarge { offset: usize, len: u64 },

    #[error("car is encrypted with key {0} but no key was supplied")]
    MissingKey(String),

    #[error("car is encrypted with key {expected} but key {actual} was supplied")]
    KeyMismatch { expected: String, actual: String },

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CarError {
    /// Returns `true` for errors caused by corrupt or tampered input.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            CarError::InvalidMagic { .. }
                | CarError::UnsupportedVersion(_)
                | CarError::Truncated { .. }
                | CarError::ChecksumMismatch
                | CarError::HashMismatch { .. }
                | CarError::InvalidHeader(_)
                | CarError::FieldTooLarge { .. }
                | CarError::Type(_)
        )
    }
}

pub type CarResult<T> = Result<T, CarError>;
