//! In-process gateway for tests and single-process replicas.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::subscription::Subscription;
use crate::traits::Gateway;
use crate::urls;

/// In-process gateway backed by nested maps.
///
/// Entries are grouped into buckets: one bucket per store URL (the URL
/// without its `key` parameter). `destroy` drops a whole bucket. Every
/// `put` is fanned out to subscribers of that exact entry URL.
pub struct MemoryGateway {
    buckets: RwLock<HashMap<String, BTreeMap<String, Bytes>>>,
    subscribers: RwLock<HashMap<String, Vec<broadcast::Sender<Bytes>>>>,
    closed: RwLock<HashSet<String>>,
    channel_capacity: usize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Gateway whose subscriptions buffer up to `channel_capacity` values.
    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            closed: RwLock::new(HashSet::new()),
            channel_capacity,
        }
    }

    fn bucket_of(url: &Url) -> String {
        urls::without_param(url, "key").to_string()
    }

    fn locate(url: &Url) -> GatewayResult<(String, String)> {
        let key = urls::require_key(url)?;
        Ok((Self::bucket_of(url), key))
    }

    fn ensure_open(&self, bucket: &str) -> GatewayResult<()> {
        if self.closed.read().expect("lock poisoned").contains(bucket) {
            return Err(GatewayError::Closed(bucket.to_string()));
        }
        Ok(())
    }

    /// Number of entries in the store at `url`.
    pub fn len(&self, url: &Url) -> usize {
        self.buckets
            .read()
            .expect("lock poisoned")
            .get(&Self::bucket_of(url))
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, url: &Url) -> bool {
        self.len(url) == 0
    }

    /// Sorted keys of the store at `url`.
    pub fn keys(&self, url: &Url) -> Vec<String> {
        self.buckets
            .read()
            .expect("lock poisoned")
            .get(&Self::bucket_of(url))
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live subscriptions across all URLs.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("lock poisoned")
            .values()
            .map(|subs| subs.iter().filter(|s| s.receiver_count() > 0).count())
            .sum()
    }

    fn notify(&self, url: &Url, body: &Bytes) {
        let mut subs = self.subscribers.write().expect("lock poisoned");
        let topic = url.to_string();
        if let Some(list) = subs.get_mut(&topic) {
            // A failed send means every receiver was dropped.
            list.retain(|tx| tx.send(body.clone()).is_ok());
            if list.is_empty() {
                subs.remove(&topic);
            }
        }
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn start(&self, base: &Url) -> GatewayResult<Url> {
        let bucket = Self::bucket_of(base);
        self.closed.write().expect("lock poisoned").remove(&bucket);
        debug!(url = %base, "memory gateway started");
        Ok(urls::without_param(base, "key"))
    }

    async fn close(&self, url: &Url) -> GatewayResult<()> {
        self.closed
            .write()
            .expect("lock poisoned")
            .insert(Self::bucket_of(url));
        Ok(())
    }

    async fn destroy(&self, url: &Url) -> GatewayResult<()> {
        let bucket = Self::bucket_of(url);
        let removed = self
            .buckets
            .write()
            .expect("lock poisoned")
            .remove(&bucket)
            .map_or(0, |b| b.len());
        debug!(url = %bucket, removed, "memory gateway destroyed store");
        Ok(())
    }

    async fn put(&self, url: &Url, body: Bytes) -> GatewayResult<()> {
        let (bucket, key) = Self::locate(url)?;
        self.ensure_open(&bucket)?;
        self.buckets
            .write()
            .expect("lock poisoned")
            .entry(bucket)
            .or_default()
            .insert(key, body.clone());
        self.notify(url, &body);
        Ok(())
    }

    async fn get(&self, url: &Url) -> GatewayResult<Bytes> {
        let (bucket, key) = Self::locate(url)?;
        self.ensure_open(&bucket)?;
        self.buckets
            .read()
            .expect("lock poisoned")
            .get(&bucket)
            .and_then(|b| b.get(&key))
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(url.to_string()))
    }

    async fn delete(&self, url: &Url) -> GatewayResult<()> {
        let (bucket, key) = Self::locate(url)?;
        self.ensure_open(&bucket)?;
        if let Some(b) = self.buckets.write().expect("lock poisoned").get_mut(&bucket) {
            b.remove(&key);
        }
        Ok(())
    }

    async fn subscribe(&self, url: &Url) -> GatewayResult<Subscription> {
        urls::require_key(url)?;
        let (tx, rx) = broadcast::channel(self.channel_capacity);
        self.subscribers
            .write()
            .expect("lock poisoned")
            .entry(url.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(url.clone(), rx))
    }
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bucket_count = self.buckets.read().expect("lock poisoned").len();
        f.debug_struct("MemoryGateway")
            .field("bucket_count", &bucket_count)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urls::{store_url, StoreKind};

    fn base() -> Url {
        Url::parse("memory://test-ledger").unwrap()
    }

    fn entry(gw: &MemoryGateway, kind: StoreKind, key: &str) -> Url {
        gw.build_url(&store_url(&base(), kind), key).unwrap()
    }

    // ---------------------------------------------------------------
    // Basic put / get / delete
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn put_then_get() {
        let gw = MemoryGateway::new();
        let url = entry(&gw, StoreKind::Data, "a");
        gw.put(&url, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(gw.get(&url).await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let gw = MemoryGateway::new();
        let url = entry(&gw, StoreKind::Data, "absent");
        let err = gw.get(&url).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let gw = MemoryGateway::new();
        let url = entry(&gw, StoreKind::Meta, "main");
        gw.put(&url, Bytes::from_static(b"x")).await.unwrap();
        gw.delete(&url).await.unwrap();
        gw.delete(&url).await.unwrap();
        assert!(gw.get(&url).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let gw = MemoryGateway::new();
        let url = entry(&gw, StoreKind::Meta, "main");
        gw.put(&url, Bytes::from_static(b"1")).await.unwrap();
        gw.put(&url, Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(gw.get(&url).await.unwrap(), Bytes::from_static(b"2"));
    }

    #[tokio::test]
    async fn missing_key_param_is_invalid() {
        let gw = MemoryGateway::new();
        let err = gw.get(&base()).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUrl { .. }));
        assert!(!err.is_not_found());
    }

    // ---------------------------------------------------------------
    // Store isolation and lifecycle
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn stores_are_isolated() {
        let gw = MemoryGateway::new();
        gw.put(&entry(&gw, StoreKind::Data, "k"), Bytes::from_static(b"d"))
            .await
            .unwrap();
        assert!(gw
            .get(&entry(&gw, StoreKind::Meta, "k"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn destroy_drops_one_store() {
        let gw = MemoryGateway::new();
        let data = store_url(&base(), StoreKind::Data);
        let meta = store_url(&base(), StoreKind::Meta);
        gw.put(&entry(&gw, StoreKind::Data, "a"), Bytes::from_static(b"1"))
            .await
            .unwrap();
        gw.put(&entry(&gw, StoreKind::Data, "b"), Bytes::from_static(b"2"))
            .await
            .unwrap();
        gw.put(&entry(&gw, StoreKind::Meta, "main"), Bytes::from_static(b"m"))
            .await
            .unwrap();
        assert_eq!(gw.keys(&data), vec!["a".to_string(), "b".to_string()]);

        gw.destroy(&data).await.unwrap();
        assert!(gw.is_empty(&data));
        assert_eq!(gw.len(&meta), 1);
    }

    #[tokio::test]
    async fn closed_store_rejects_io_until_restarted() {
        let gw = MemoryGateway::new();
        let data = store_url(&base(), StoreKind::Data);
        let url = entry(&gw, StoreKind::Data, "a");
        gw.close(&data).await.unwrap();
        let err = gw.put(&url, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Closed(_)));

        let started = gw.start(&data).await.unwrap();
        assert_eq!(started, data);
        gw.put(&url, Bytes::from_static(b"ok")).await.unwrap();
    }

    // ---------------------------------------------------------------
    // Subscriptions
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn subscribers_see_puts() {
        let gw = MemoryGateway::new();
        let url = entry(&gw, StoreKind::Meta, "main");
        let mut sub = gw.subscribe(&url).await.unwrap();
        gw.put(&url, Bytes::from_static(b"head-1")).await.unwrap();
        gw.put(&url, Bytes::from_static(b"head-2")).await.unwrap();
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"head-1"));
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"head-2"));
    }

    #[tokio::test]
    async fn other_keys_do_not_notify() {
        let gw = MemoryGateway::new();
        let mut sub = gw
            .subscribe(&entry(&gw, StoreKind::Meta, "main"))
            .await
            .unwrap();
        gw.put(&entry(&gw, StoreKind::Meta, "other"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let gw = MemoryGateway::new();
        let url = entry(&gw, StoreKind::Meta, "main");
        let sub = gw.subscribe(&url).await.unwrap();
        assert_eq!(gw.subscriber_count(), 1);
        drop(sub);
        gw.put(&url, Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(gw.subscriber_count(), 0);
    }
}
