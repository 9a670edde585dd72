use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: ciphertext was tampered with or the key is wrong")]
    Decrypt,

    #[error("ciphertext too short: {0} bytes")]
    CiphertextTooShort(usize),

    #[error("no key bag named {0}")]
    KeyBagNotFound(String),

    #[error("key {fingerprint} not found in key bag {name}")]
    KeyNotFound { name: String, fingerprint: String },

    #[error("key bag provider error: {0}")]
    Provider(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
