use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::{GatewayError, GatewayResult};
use crate::subscription::Subscription;
use crate::urls;

/// Uniform key-value protocol every storage backend implements.
///
/// Implementations must satisfy:
/// - `get` on an absent key returns [`GatewayError::NotFound`], never
///   another error variant.
/// - `put` is atomic per key: a concurrent `get` sees the old value or the
///   new one, never a mix.
/// - Backend failures are returned as values; nothing panics.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// URL of entry `key` under the store at `base`.
    fn build_url(&self, base: &Url, key: &str) -> GatewayResult<Url> {
        Ok(urls::with_param(base, "key", key))
    }

    /// Prepare the store at `base` for use and return its canonical URL.
    async fn start(&self, base: &Url) -> GatewayResult<Url>;

    /// Release resources held for the store at `url`.
    async fn close(&self, url: &Url) -> GatewayResult<()>;

    /// Remove every entry of the store at `url`.
    async fn destroy(&self, url: &Url) -> GatewayResult<()>;

    async fn put(&self, url: &Url, body: Bytes) -> GatewayResult<()>;

    async fn get(&self, url: &Url) -> GatewayResult<Bytes>;

    /// Delete an entry. Deleting an absent key is not an error.
    async fn delete(&self, url: &Url) -> GatewayResult<()>;

    /// Push notification of every `put` to `url`.
    ///
    /// Backends without push support keep the default, and callers fall
    /// back to polling.
    async fn subscribe(&self, url: &Url) -> GatewayResult<Subscription> {
        let _ = url;
        Err(GatewayError::Unsupported("subscribe"))
    }
}
