//! Per-ledger key material, looked up by fingerprint.
//!
//! A [`KeyBagItem`] holds every key a ledger has ever used, so data sealed
//! before a rotation stays readable. Exactly one key per item is marked
//! `default`; new payloads are sealed with it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{CryptoError, CryptoResult};
use crate::key::{KeyedCrypto, SymmetricKey};

/// One stored key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    /// Hex-encoded key material.
    pub key: String,
    #[serde(default)]
    pub default: bool,
}

/// Persisted key bag record: `{ name, keys: { fingerprint -> entry } }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBagItem {
    pub name: String,
    pub keys: BTreeMap<String, KeyEntry>,
}

impl KeyBagItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: BTreeMap::new(),
        }
    }

    /// Insert a key, optionally making it the default. Returns its fingerprint.
    pub fn upsert(&mut self, key: &SymmetricKey, make_default: bool) -> String {
        let fingerprint = key.fingerprint();
        if make_default {
            for entry in self.keys.values_mut() {
                entry.default = false;
            }
        }
        let entry = self.keys.entry(fingerprint.clone()).or_insert(KeyEntry {
            key: key.to_hex(),
            default: false,
        });
        entry.default |= make_default;
        // The first key is always the default.
        if !self.keys.values().any(|e| e.default) {
            if let Some(entry) = self.keys.get_mut(&fingerprint) {
                entry.default = true;
            }
        }
        fingerprint
    }

    pub fn default_key(&self) -> CryptoResult<Option<KeyedCrypto>> {
        self.keys
            .values()
            .find(|e| e.default)
            .map(|e| SymmetricKey::from_hex(&e.key).map(KeyedCrypto::new))
            .transpose()
    }

    pub fn key_by_fingerprint(&self, fingerprint: &str) -> CryptoResult<Option<KeyedCrypto>> {
        self.keys
            .get(fingerprint)
            .map(|e| SymmetricKey::from_hex(&e.key).map(KeyedCrypto::new))
            .transpose()
    }
}

/// Storage behind a [`KeyBag`].
#[async_trait]
pub trait KeyBagProvider: Send + Sync {
    async fn get(&self, id: &str) -> CryptoResult<Option<KeyBagItem>>;
    async fn set(&self, id: &str, item: &KeyBagItem) -> CryptoResult<()>;
    async fn delete(&self, id: &str) -> CryptoResult<()>;
}

/// Process-local provider. Key bags vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKeyBagProvider {
    items: RwLock<HashMap<String, KeyBagItem>>,
}

impl MemoryKeyBagProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyBagProvider for MemoryKeyBagProvider {
    async fn get(&self, id: &str) -> CryptoResult<Option<KeyBagItem>> {
        Ok(self.items.read().expect("lock poisoned").get(id).cloned())
    }

    async fn set(&self, id: &str, item: &KeyBagItem) -> CryptoResult<()> {
        self.items
            .write()
            .expect("lock poisoned")
            .insert(id.to_string(), item.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> CryptoResult<()> {
        self.items.write().expect("lock poisoned").remove(id);
        Ok(())
    }
}

/// Key material store for all ledgers sharing one provider.
pub struct KeyBag {
    provider: Arc<dyn KeyBagProvider>,
    // Serializes read-modify-write cycles against the provider.
    write_lock: Mutex<()>,
}

impl KeyBag {
    pub fn new(provider: Arc<dyn KeyBagProvider>) -> Self {
        Self {
            provider,
            write_lock: Mutex::new(()),
        }
    }

    /// Key bag backed by a fresh [`MemoryKeyBagProvider`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyBagProvider::new()))
    }

    /// The default key for `name`.
    ///
    /// When the bag does not exist and `create` is set, a key is generated
    /// and stored first; otherwise a missing bag is
    /// [`CryptoError::KeyBagNotFound`].
    pub async fn get_named_key(&self, name: &str, create: bool) -> CryptoResult<KeyedCrypto> {
        if let Some(item) = self.provider.get(name).await? {
            if let Some(crypto) = item.default_key()? {
                return Ok(crypto);
            }
        }
        if !create {
            return Err(CryptoError::KeyBagNotFound(name.to_string()));
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have created it while we waited.
        let mut item = self
            .provider
            .get(name)
            .await?
            .unwrap_or_else(|| KeyBagItem::new(name));
        if let Some(crypto) = item.default_key()? {
            return Ok(crypto);
        }
        let key = SymmetricKey::generate();
        let fingerprint = item.upsert(&key, true);
        self.provider.set(name, &item).await?;
        info!(name, fingerprint = %&fingerprint[..8], "created key bag");
        Ok(KeyedCrypto::new(key))
    }

    /// Look up a specific key of `name` by fingerprint.
    pub async fn get_key(&self, name: &str, fingerprint: &str) -> CryptoResult<KeyedCrypto> {
        let item = self
            .provider
            .get(name)
            .await?
            .ok_or_else(|| CryptoError::KeyBagNotFound(name.to_string()))?;
        item.key_by_fingerprint(fingerprint)?
            .ok_or_else(|| CryptoError::KeyNotFound {
                name: name.to_string(),
                fingerprint: fingerprint.to_string(),
            })
    }

    /// Add existing key material (e.g. shared by a peer).
    pub async fn upsert(
        &self,
        name: &str,
        key: &SymmetricKey,
        make_default: bool,
    ) -> CryptoResult<String> {
        let _guard = self.write_lock.lock().await;
        let mut item = self
            .provider
            .get(name)
            .await?
            .unwrap_or_else(|| KeyBagItem::new(name));
        let fingerprint = item.upsert(key, make_default);
        self.provider.set(name, &item).await?;
        debug!(name, fingerprint = %&fingerprint[..8], make_default, "upserted key");
        Ok(fingerprint)
    }

    /// Generate a new default key for `name`. Older keys stay readable.
    pub async fn rotate(&self, name: &str) -> CryptoResult<KeyedCrypto> {
        let key = SymmetricKey::generate();
        let fingerprint = self.upsert(name, &key, true).await?;
        info!(name, fingerprint = %&fingerprint[..8], "rotated key");
        Ok(KeyedCrypto::new(key))
    }

    pub async fn delete(&self, name: &str) -> CryptoResult<()> {
        let _guard = self.write_lock.lock().await;
        self.provider.delete(name).await?;
        info!(name, "deleted key bag");
        Ok(())
    }
}

impl std::fmt::Debug for KeyBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBag").finish_non_exhaustive()
    }
}
