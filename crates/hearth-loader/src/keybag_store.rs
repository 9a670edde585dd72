use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hearth_crypto::{CryptoError, CryptoResult, KeyBagItem, KeyBagProvider};
use hearth_gateway::{Gateway, GatewayError, Url};

/// [`KeyBagProvider`] that keeps each key bag as a JSON entry behind a
/// gateway, keyed by bag name.
pub struct GatewayKeyBagProvider {
    gateway: Arc<dyn Gateway>,
    url: Url,
}

impl GatewayKeyBagProvider {
    pub fn new(gateway: Arc<dyn Gateway>, url: Url) -> Self {
        Self { gateway, url }
    }

    fn entry_url(&self, id: &str) -> CryptoResult<Url> {
        self.gateway
            .build_url(&self.url, id)
            .map_err(|e| CryptoError::Provider(e.to_string()))
    }
}

#[async_trait]
impl KeyBagProvider for GatewayKeyBagProvider {
    async fn get(&self, id: &str) -> CryptoResult<Option<KeyBagItem>> {
        match self.gateway.get(&self.entry_url(id)?).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CryptoError::Serialization(e.to_string())),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(CryptoError::Provider(e.to_string())),
        }
    }

    async fn set(&self, id: &str, item: &KeyBagItem) -> CryptoResult<()> {
        let body =
            serde_json::to_vec(item).map_err(|e| CryptoError::Serialization(e.to_string()))?;
        self.gateway
            .put(&self.entry_url(id)?, Bytes::from(body))
            .await
            .map_err(|e| CryptoError::Provider(e.to_string()))
    }

    async fn delete(&self, id: &str) -> CryptoResult<()> {
        self.gateway
            .delete(&self.entry_url(id)?)
            .await
            .map_err(|e| CryptoError::Provider(e.to_string()))
    }
}
