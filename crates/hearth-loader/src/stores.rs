//! Typed views of the data, meta and WAL gateways of one ledger.
//!
//! Each store encodes its own records and addresses them under its base
//! URL; the gateway only moves bytes.

use std::sync::Arc;

use bytes::Bytes;
use hearth_gateway::{urls, Gateway, GatewayError, StoreKind, Subscription, Url};
use hearth_types::{Block, CarClockLink, Cid, Codec};
use tracing::debug;

use crate::error::{LoaderError, LoaderResult};
use crate::remote_wal::WalState;

/// Key under which the meta list and WAL state are stored.
pub const MAIN_BRANCH: &str = "main";

/// CAR envelopes, keyed by CAR CID.
#[derive(Clone)]
pub struct DataStore {
    gateway: Arc<dyn Gateway>,
    url: Url,
}

impl DataStore {
    pub fn new(gateway: Arc<dyn Gateway>, url: Url) -> Self {
        Self { gateway, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn start(&mut self) -> LoaderResult<()> {
        self.url = self.gateway.start(&self.url).await?;
        Ok(())
    }

    /// Load a CAR. `None` when the store does not have it.
    pub async fn load(&self, cid: &Cid) -> LoaderResult<Option<Block>> {
        let url = self.gateway.build_url(&self.url, &cid.to_hex())?;
        match self.gateway.get(&url).await {
            Ok(bytes) => Ok(Some(Block::with_cid(*cid, bytes)?)),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, car: &Block) -> LoaderResult<()> {
        let url = self.gateway.build_url(&self.url, &car.cid().to_hex())?;
        self.gateway.put(&url, car.bytes().clone()).await?;
        debug!(car = %car.cid().short_hex(), len = car.len(), "saved car");
        Ok(())
    }

    pub async fn remove(&self, cid: &Cid) -> LoaderResult<()> {
        let url = self.gateway.build_url(&self.url, &cid.to_hex())?;
        self.gateway.delete(&url).await?;
        Ok(())
    }

    pub async fn close(&self) -> LoaderResult<()> {
        Ok(self.gateway.close(&self.url).await?)
    }

    pub async fn destroy(&self) -> LoaderResult<()> {
        Ok(self.gateway.destroy(&self.url).await?)
    }
}

/// The current list of meta records of one branch.
///
/// Stored as a JSON array of [`CarClockLink`]s. More than one entry means
/// writers advanced the ledger concurrently and nobody has merged yet.
#[derive(Clone)]
pub struct MetaStore {
    gateway: Arc<dyn Gateway>,
    url: Url,
}

impl MetaStore {
    pub fn new(gateway: Arc<dyn Gateway>, url: Url) -> Self {
        Self { gateway, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn start(&mut self) -> LoaderResult<()> {
        self.url = self.gateway.start(&self.url).await?;
        Ok(())
    }

    fn entry_url(&self) -> LoaderResult<Url> {
        Ok(self.gateway.build_url(&self.url, MAIN_BRANCH)?)
    }

    /// Current meta records; empty for a branch that was never written.
    pub async fn load(&self) -> LoaderResult<Vec<CarClockLink>> {
        match self.gateway.get(&self.entry_url()?).await {
            Ok(bytes) => decode_links(&bytes),
            Err(GatewayError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, links: &[CarClockLink]) -> LoaderResult<()> {
        let body =
            serde_json::to_vec(links).map_err(|e| LoaderError::Serialization(e.to_string()))?;
        self.gateway.put(&self.entry_url()?, Bytes::from(body)).await?;
        debug!(links = links.len(), "saved meta");
        Ok(())
    }

    /// Push notification of every meta update. Each message decodes with
    /// [`decode_links`].
    pub async fn subscribe(&self) -> LoaderResult<Subscription> {
        Ok(self.gateway.subscribe(&self.entry_url()?).await?)
    }

    pub async fn close(&self) -> LoaderResult<()> {
        Ok(self.gateway.close(&self.url).await?)
    }

    pub async fn destroy(&self) -> LoaderResult<()> {
        Ok(self.gateway.destroy(&self.url).await?)
    }
}

pub fn decode_links(bytes: &[u8]) -> LoaderResult<Vec<CarClockLink>> {
    let links: Vec<CarClockLink> =
        serde_json::from_slice(bytes).map_err(|e| LoaderError::Serialization(e.to_string()))?;
    for link in &links {
        if link.cid != link.db_meta.car || link.cid.codec() != Codec::Car {
            return Err(LoaderError::InvariantViolation(format!(
                "meta link {} does not name a car",
                link.cid
            )));
        }
    }
    Ok(links)
}

/// Pending remote writes, stored with bincode.
#[derive(Clone)]
pub struct WalStore {
    gateway: Arc<dyn Gateway>,
    url: Url,
}

impl WalStore {
    pub fn new(gateway: Arc<dyn Gateway>, url: Url) -> Self {
        Self { gateway, url }
    }

    pub async fn start(&mut self) -> LoaderResult<()> {
        self.url = self.gateway.start(&self.url).await?;
        Ok(())
    }

    fn entry_url(&self) -> LoaderResult<Url> {
        Ok(self.gateway.build_url(&self.url, MAIN_BRANCH)?)
    }

    pub async fn load(&self) -> LoaderResult<WalState> {
        match self.gateway.get(&self.entry_url()?).await {
            Ok(bytes) => {
                bincode::deserialize(&bytes).map_err(|e| LoaderError::Serialization(e.to_string()))
            }
            Err(GatewayError::NotFound(_)) => Ok(WalState::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, state: &WalState) -> LoaderResult<()> {
        let body =
            bincode::serialize(state).map_err(|e| LoaderError::Serialization(e.to_string()))?;
        self.gateway.put(&self.entry_url()?, Bytes::from(body)).await?;
        Ok(())
    }

    pub async fn close(&self) -> LoaderResult<()> {
        Ok(self.gateway.close(&self.url).await?)
    }

    pub async fn destroy(&self) -> LoaderResult<()> {
        Ok(self.gateway.destroy(&self.url).await?)
    }
}

/// The three local stores of one ledger.
#[derive(Clone)]
pub struct StoreSet {
    pub data: DataStore,
    pub meta: MetaStore,
    pub wal: WalStore,
}

impl StoreSet {
    /// All three stores on one gateway, told apart by the `store` parameter.
    pub fn new(gateway: Arc<dyn Gateway>, base: &Url) -> Self {
        Self::with_gateways(gateway.clone(), gateway.clone(), gateway, base)
    }

    pub fn with_gateways(
        data: Arc<dyn Gateway>,
        meta: Arc<dyn Gateway>,
        wal: Arc<dyn Gateway>,
        base: &Url,
    ) -> Self {
        Self {
            data: DataStore::new(data, urls::store_url(base, StoreKind::Data)),
            meta: MetaStore::new(meta, urls::store_url(base, StoreKind::Meta)),
            wal: WalStore::new(wal, urls::store_url(base, StoreKind::Wal)),
        }
    }

    pub async fn start(&mut self) -> LoaderResult<()> {
        self.data.start().await?;
        self.meta.start().await?;
        self.wal.start().await
    }

    pub async fn close(&self) -> LoaderResult<()> {
        self.data.close().await?;
        self.meta.close().await?;
        self.wal.close().await
    }

    pub async fn destroy(&self) -> LoaderResult<()> {
        self.data.destroy().await?;
        self.meta.destroy().await?;
        self.wal.destroy().await
    }
}

/// Data and meta stores of a remote replica.
#[derive(Clone)]
pub struct RemoteStores {
    pub data: DataStore,
    pub meta: MetaStore,
}

impl RemoteStores {
    pub fn new(gateway: Arc<dyn Gateway>, base: &Url) -> Self {
        Self::with_gateways(gateway.clone(), gateway, base)
    }

    pub fn with_gateways(data: Arc<dyn Gateway>, meta: Arc<dyn Gateway>, base: &Url) -> Self {
        Self {
            data: DataStore::new(data, urls::store_url(base, StoreKind::Data)),
            meta: MetaStore::new(meta, urls::store_url(base, StoreKind::Meta)),
        }
    }

    pub async fn start(&mut self) -> LoaderResult<()> {
        self.data.start().await?;
        self.meta.start().await
    }
}

impl std::fmt::Debug for RemoteStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStores")
            .field("data", &self.data.url.as_str())
            .field("meta", &self.meta.url.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_wal::WalOperation;
    use hearth_gateway::MemoryGateway;
    use hearth_types::DbMeta;

    fn base() -> Url {
        Url::parse("memory://ledger?name=stores").unwrap()
    }

    async fn started() -> (Arc<MemoryGateway>, StoreSet) {
        let gateway = Arc::new(MemoryGateway::new());
        let mut stores = StoreSet::new(gateway.clone(), &base());
        stores.start().await.unwrap();
        (gateway, stores)
    }

    #[tokio::test]
    async fn data_roundtrip_and_remove() {
        let (_, stores) = started().await;
        let car = Block::new(Codec::Car, b"envelope".to_vec());
        assert!(stores.data.load(car.cid()).await.unwrap().is_none());
        stores.data.save(&car).await.unwrap();
        assert_eq!(stores.data.load(car.cid()).await.unwrap(), Some(car.clone()));
        stores.data.remove(car.cid()).await.unwrap();
        assert!(stores.data.load(car.cid()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_car_is_rejected() {
        let (gateway, stores) = started().await;
        let car = Block::new(Codec::Car, b"envelope".to_vec());
        let url = gateway.build_url(stores.data.url(), &car.cid().to_hex()).unwrap();
        gateway.put(&url, Bytes::from_static(b"tampered")).await.unwrap();
        assert!(matches!(
            stores.data.load(car.cid()).await,
            Err(LoaderError::Type(_))
        ));
    }

    #[tokio::test]
    async fn meta_list_roundtrip() {
        let (_, stores) = started().await;
        assert!(stores.meta.load().await.unwrap().is_empty());
        let a = Cid::compute(Codec::Car, b"a");
        let b = Cid::compute(Codec::Car, b"b");
        let links = vec![
            CarClockLink::new(DbMeta::new(a, None), vec![]),
            CarClockLink::new(DbMeta::new(b, Some("fp".into())), vec![a]),
        ];
        stores.meta.save(&links).await.unwrap();
        assert_eq!(stores.meta.load().await.unwrap(), links);
    }

    #[test]
    fn link_must_name_a_car() {
        let raw = Cid::compute(Codec::Raw, b"not a car");
        let json = serde_json::to_vec(&vec![CarClockLink::new(DbMeta::new(raw, None), vec![])])
            .unwrap();
        assert!(matches!(
            decode_links(&json),
            Err(LoaderError::InvariantViolation(_))
        ));
        assert!(matches!(
            decode_links(b"{not json"),
            Err(LoaderError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn wal_state_roundtrip() {
        let (_, stores) = started().await;
        assert_eq!(stores.wal.load().await.unwrap(), WalState::default());
        let car = Cid::compute(Codec::Car, b"c");
        let state = WalState {
            operations: vec![WalOperation::new(
                vec![car],
                CarClockLink::new(DbMeta::new(car, None), vec![]),
            )],
        };
        stores.wal.save(&state).await.unwrap();
        assert_eq!(stores.wal.load().await.unwrap(), state);
    }

    #[tokio::test]
    async fn stores_share_a_gateway_without_colliding() {
        let (gateway, stores) = started().await;
        stores.meta.save(&[]).await.unwrap();
        stores.wal.save(&WalState::default()).await.unwrap();
        assert_eq!(gateway.len(stores.meta.url()), 1);
        assert_eq!(gateway.len(stores.data.url()), 0);
    }

    #[tokio::test]
    async fn meta_updates_are_pushed() {
        let (_, stores) = started().await;
        let mut sub = stores.meta.subscribe().await.unwrap();
        let car = Cid::compute(Codec::Car, b"pushed");
        let links = vec![CarClockLink::new(DbMeta::new(car, None), vec![])];
        stores.meta.save(&links).await.unwrap();
        let pushed = sub.recv().await.unwrap();
        assert_eq!(decode_links(&pushed).unwrap(), links);
    }
}
