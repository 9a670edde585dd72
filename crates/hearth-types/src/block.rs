use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cid::{Cid, Codec};
use crate::error::{TypeError, TypeResult};

/// An immutable, content-addressed chunk of bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    bytes: Bytes,
}

impl Block {
    /// Hash `bytes` under `codec` and wrap them.
    pub fn new(codec: Codec, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let cid = Cid::compute(codec, &bytes);
        Self { cid, bytes }
    }

    /// Pair bytes with a declared CID, rejecting the pair if they disagree.
    pub fn with_cid(cid: Cid, bytes: impl Into<Bytes>) -> TypeResult<Self> {
        let bytes = bytes.into();
        if !cid.verify(&bytes) {
            return Err(TypeError::HashMismatch {
                cid: cid.to_hex(),
            });
        }
        Ok(Self { cid, bytes })
    }

    /// Serialize `value` as JSON into a `DagJson` block.
    pub fn encode_json<T: Serialize>(value: &T) -> TypeResult<Self> {
        let data =
            serde_json::to_vec(value).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(Self::new(Codec::DagJson, data))
    }

    /// Deserialize the block bytes as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> TypeResult<T> {
        serde_json::from_slice(&self.bytes).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Re-hash the bytes and compare with the CID.
    pub fn verify(&self) -> bool {
        self.cid.verify(&self.bytes)
    }

    pub fn into_parts(self) -> (Cid, Bytes) {
        (self.cid, self.bytes)
    }
}
