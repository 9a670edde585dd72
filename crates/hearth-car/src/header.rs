use hearth_types::{Cid, TransactionMeta};
use serde::{Deserialize, Serialize};

use crate::VERSION;

/// Envelope header, stored as JSON right after the version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CarHeader {
    pub version: u32,
    /// Entry points into the blocks of this CAR (the clock head for commits).
    pub roots: Vec<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<TransactionMeta>,
    /// Car log at write time, newest first, excluding this CAR.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cars: Vec<Cid>,
    /// Cars this CAR supersedes; non-empty only for compactions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compact: Vec<Cid>,
    /// Fingerprint of the key that sealed the payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl CarHeader {
    pub fn new(roots: Vec<Cid>) -> Self {
        Self {
            version: VERSION,
            roots,
            meta: None,
            cars: Vec::new(),
            compact: Vec::new(),
            key: None,
        }
    }

    pub fn is_compaction(&self) -> bool {
        !self.compact.is_empty()
    }
}
