use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{TypeError, TypeResult};

/// How the bytes behind a [`Cid`] are to be interpreted.
///
/// The codec is part of the identifier and of the hash domain, so the same
/// bytes stored as `Raw` and as `DagJson` get different CIDs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Codec {
    /// Opaque bytes.
    Raw,
    /// JSON-encoded structured data (documents and clock events).
    DagJson,
    /// A packed CAR envelope.
    Car,
}

impl Codec {
    /// Single-byte tag written in front of the digest.
    pub const fn tag(self) -> u8 {
        match self {
            Codec::Raw => 0x55,
            Codec::DagJson => 0xa9,
            Codec::Car => 0x02,
        }
    }

    pub fn from_tag(tag: u8) -> TypeResult<Self> {
        match tag {
            0x55 => Ok(Codec::Raw),
            0xa9 => Ok(Codec::DagJson),
            0x02 => Ok(Codec::Car),
            other => Err(TypeError::UnknownCodec(other)),
        }
    }

    /// Hash domain for this codec.
    pub const fn domain(self) -> &'static str {
        match self {
            Codec::Raw => "hearth-raw-v1",
            Codec::DagJson => "hearth-dag-json-v1",
            Codec::Car => "hearth-car-v1",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::DagJson => "dag-json",
            Codec::Car => "car",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Content identifier for a block.
///
/// A `Cid` is a codec tag plus the BLAKE3 digest of the block bytes, hashed
/// under the codec's domain. Identical bytes with the same codec always
/// produce the same `Cid`, and a `Cid` never names two different byte
/// strings.
///
/// The text form is the lowercase hex of `tag || digest` (66 characters);
/// that is also how a `Cid` is serialized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    codec: Codec,
    digest: [u8; 32],
}

impl Cid {
    /// Length of the binary form (`tag || digest`).
    pub const ENCODED_LEN: usize = 33;

    /// Compute the CID of `data` under `codec`.
    pub fn compute(codec: Codec, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(codec.domain().as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Self {
            codec,
            digest: *hasher.finalize().as_bytes(),
        }
    }

    /// Build a CID from a pre-computed digest.
    pub fn from_digest(codec: Codec, digest: [u8; 32]) -> Self {
        Self { codec, digest }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Returns `true` if `data` hashes to this CID.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(self.codec, data) == *self
    }

    /// Binary form: codec tag followed by the digest.
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0] = self.codec.tag();
        out[1..].copy_from_slice(&self.digest);
        out
    }

    pub fn from_slice(bytes: &[u8]) -> TypeResult<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(TypeError::InvalidLength {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            });
        }
        let codec = Codec::from_tag(bytes[0])?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[1..]);
        Ok(Self { codec, digest })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Short hex representation of the digest (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.digest[..4])
    }

    pub fn from_hex(s: &str) -> TypeResult<Self> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({}:{})", self.codec, self.short_hex())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Cid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
