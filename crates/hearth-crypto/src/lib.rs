//! Cryptographic primitives for Hearth.
//!
//! Provides domain-separated BLAKE3 hashing, XChaCha20-Poly1305 payload
//! encryption keyed by fingerprint, and the [`KeyBag`] that owns per-ledger
//! key material.
//!
//! All crypto operations wrap established libraries -- no custom cryptography.

pub mod error;
pub mod hasher;
pub mod key;
pub mod keybag;

pub use error::{CryptoError, CryptoResult};
pub use hasher::ContentHasher;
pub use key::{KeyedCrypto, SymmetricKey};
pub use keybag::{KeyBag, KeyBagItem, KeyBagProvider, KeyEntry, MemoryKeyBagProvider};
