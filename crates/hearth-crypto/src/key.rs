use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::hasher::ContentHasher;

pub(crate) const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// 256-bit symmetric key used to encrypt block payloads.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Stable public identifier of this key.
    pub fn fingerprint(&self) -> String {
        ContentHasher::KEY.hash_hex(&self.0)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymmetricKey({})", &self.fingerprint()[..8])
    }
}

/// A key paired with its fingerprint, ready to seal and open payloads.
///
/// Sealed output is `ciphertext || nonce` with a fresh random 24-byte
/// nonce per call.
#[derive(Clone)]
pub struct KeyedCrypto {
    key: SymmetricKey,
    fingerprint: String,
}

impl KeyedCrypto {
    pub fn new(key: SymmetricKey) -> Self {
        let fingerprint = key.fingerprint();
        Self { key, fingerprint }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.key.0))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mut sealed = self
            .cipher()
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        sealed.extend_from_slice(&nonce);
        Ok(sealed)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::CiphertextTooShort(sealed.len()));
        }
        let (ciphertext, nonce) = sealed.split_at(sealed.len() - NONCE_LEN);
        self.cipher()
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

impl fmt::Debug for KeyedCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedCrypto")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}
