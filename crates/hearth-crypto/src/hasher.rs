/// Domain-separated BLAKE3 hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a key fingerprint can never collide with a checksum over
/// the same bytes. Block CIDs use the per-codec domains on
/// [`hearth_types::Codec`].
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for symmetric key fingerprints.
    pub const KEY: Self = Self {
        domain: "hearth-key-v1",
    };
    /// Hasher for whole-envelope checksums.
    pub const CHECKSUM: Self = Self {
        domain: "hearth-checksum-v1",
    };

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Hex form of [`hash`](Self::hash); used for key fingerprints.
    pub fn hash_hex(&self, data: &[u8]) -> String {
        hex::encode(self.hash(data))
    }

    pub fn verify(&self, data: &[u8], expected: &[u8; 32]) -> bool {
        self.hash(data) == *expected
    }
}
