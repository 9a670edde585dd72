//! The car log and the paths CARs take through it.
//!
//! Commits are written in a fixed order: CAR, then WAL entry (only with a
//! remote attached), then the meta record. A reader that sees a meta record
//! can therefore always load the CAR it names. Blocks of every CAR read so
//! far are kept in an in-memory cache; older CARs are decoded on demand.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use hearth_car::{CarHeader, CarReader, CarWriter};
use hearth_crypto::{KeyBag, KeyedCrypto};
use hearth_gateway::Subscription;
use hearth_store::{
    BlockFetcher, BlockStore, CarTransaction, MemoryBlockStore, StoreError, StoreResult,
};
use hearth_types::{Block, CarClockLink, Cid, DbMeta, TransactionMeta};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commit_queue::CommitQueue;
use crate::config::LoaderConfig;
use crate::error::{LoaderError, LoaderResult};
use crate::remote_wal::{missing_operations, RemoteWal, WalOperation};
use crate::stores::{RemoteStores, StoreSet};
use crate::task_manager::TaskManager;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommitOpts {
    /// The transaction replaces every CAR currently in the log.
    pub compact: bool,
}

impl CommitOpts {
    pub fn compaction() -> Self {
        Self { compact: true }
    }
}

#[derive(Default)]
struct CarLog {
    /// Newest first, no duplicates, nothing from `seen_compacted`.
    cars: Vec<Cid>,
    seen_compacted: HashSet<Cid>,
    /// Meta records already merged or written by us.
    seen_meta: HashSet<Cid>,
    /// Cars whose blocks are in the cache.
    processed: HashSet<Cid>,
    /// Meta records not superseded by any other we know of.
    frontier: Vec<CarClockLink>,
}

/// Owns the car log of one ledger and everything that moves CARs between
/// the CRDT and its stores.
///
/// Mutating operations ([`commit`](Self::commit),
/// [`compact`](Self::compact), [`merge_db_metas`](Self::merge_db_metas))
/// assume the caller runs them inside [`commit_queue`](Self::commit_queue).
pub struct Loader {
    name: String,
    stores: StoreSet,
    remote: RwLock<Option<RemoteStores>>,
    keybag: Arc<KeyBag>,
    crypto: RwLock<Option<KeyedCrypto>>,
    config: LoaderConfig,
    cache: Arc<MemoryBlockStore>,
    log: RwLock<CarLog>,
    commit_queue: CommitQueue,
    wal: RemoteWal,
    task_manager: TaskManager,
    wal_notify: Arc<Notify>,
    wal_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Loader {
    /// Start the stores and resolve the ledger key. Nothing is read yet;
    /// call [`ready`](Self::ready) next.
    pub async fn open(
        name: impl Into<String>,
        mut stores: StoreSet,
        keybag: Arc<KeyBag>,
        config: LoaderConfig,
    ) -> LoaderResult<Arc<Self>> {
        let name = name.into();
        stores.start().await?;
        let crypto = if config.public {
            None
        } else {
            Some(keybag.get_named_key(&name, true).await?)
        };
        let wal = RemoteWal::new(stores.wal.clone(), config.wal.clone());
        let task_manager = TaskManager::new(config.task_retries);
        debug!(ledger = %name, public = config.public, "loader opened");
        Ok(Arc::new(Self {
            name,
            stores,
            remote: RwLock::new(None),
            keybag,
            crypto: RwLock::new(crypto),
            config,
            cache: Arc::new(MemoryBlockStore::new()),
            log: RwLock::new(CarLog::default()),
            commit_queue: CommitQueue::new(),
            wal,
            task_manager,
            wal_notify: Arc::new(Notify::new()),
            wal_worker: Mutex::new(None),
        }))
    }

    /// Load the pending WAL and the local meta records. Returns the
    /// transaction metas the CRDT must apply to reach the stored head.
    pub async fn ready(&self) -> LoaderResult<Vec<TransactionMeta>> {
        self.wal.load().await?;
        let links = self.stores.meta.load().await?;
        let metas = self.merge_links(&links, false).await?;
        info!(
            ledger = %self.name,
            cars = self.log.read().expect("lock poisoned").cars.len(),
            metas = metas.len(),
            "loader ready"
        );
        Ok(metas)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn keybag(&self) -> &Arc<KeyBag> {
        &self.keybag
    }

    pub fn commit_queue(&self) -> &CommitQueue {
        &self.commit_queue
    }

    pub fn task_manager(&self) -> &TaskManager {
        &self.task_manager
    }

    /// Blocks of every CAR read so far.
    pub fn cached_blocks(&self) -> Arc<MemoryBlockStore> {
        self.cache.clone()
    }

    pub fn remote_wal(&self) -> &RemoteWal {
        &self.wal
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Cars that make up the ledger, newest first.
    pub fn car_log(&self) -> Vec<Cid> {
        self.log.read().expect("lock poisoned").cars.clone()
    }

    pub fn seen_compacted(&self) -> HashSet<Cid> {
        self.log.read().expect("lock poisoned").seen_compacted.clone()
    }

    /// Current unmerged meta records.
    pub fn frontier(&self) -> Vec<CarClockLink> {
        self.log.read().expect("lock poisoned").frontier.clone()
    }

    /// Fingerprint of the key new CARs are sealed with.
    pub fn key_fingerprint(&self) -> Option<String> {
        self.current_crypto().map(|c| c.fingerprint().to_string())
    }

    fn current_crypto(&self) -> Option<KeyedCrypto> {
        if self.config.public {
            return None;
        }
        self.crypto.read().expect("lock poisoned").clone()
    }

    fn remote(&self) -> Option<RemoteStores> {
        self.remote.read().expect("lock poisoned").clone()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.read().expect("lock poisoned").is_some()
    }

    pub fn needs_compaction(&self) -> bool {
        let cars = self.log.read().expect("lock poisoned").cars.len();
        self.config.auto_compact > 0 && cars > self.config.auto_compact
    }

    /// Switch to a fresh default key. CARs already written stay readable
    /// through the key bag.
    pub async fn rotate_key(&self) -> LoaderResult<String> {
        let crypto = self.keybag.rotate(&self.name).await?;
        let fingerprint = crypto.fingerprint().to_string();
        *self.crypto.write().expect("lock poisoned") = Some(crypto);
        Ok(fingerprint)
    }

    /// Pack `txn` into one CAR and make it durable.
    ///
    /// The CAR is written to the data store first, then (with a remote)
    /// queued in the WAL, and only then is the meta record replaced. A
    /// compaction additionally deletes the CARs it supersedes.
    pub async fn commit(
        &self,
        txn: &CarTransaction,
        meta: TransactionMeta,
        opts: CommitOpts,
    ) -> LoaderResult<DbMeta> {
        let (previous, parents) = {
            let log = self.log.read().expect("lock poisoned");
            let parents: Vec<Cid> = log.frontier.iter().map(|l| l.cid).collect();
            (log.cars.clone(), parents)
        };
        let crypto = self.current_crypto();
        let blocks = txn.blocks();

        let mut writer = CarWriter::new(meta.head.tips().to_vec()).with_meta(meta);
        writer = if opts.compact {
            writer.with_compacted(previous.clone())
        } else {
            writer.with_car_log(previous.clone())
        };
        if let Some(crypto) = &crypto {
            writer = writer.with_crypto(crypto.clone());
        }
        writer.add_blocks(blocks.iter().cloned());
        let car = writer.finish()?;
        let car_cid = *car.cid();

        self.stores.data.save(&car).await?;
        let db_meta = DbMeta::new(car_cid, crypto.map(|c| c.fingerprint().to_string()));
        let link = CarClockLink::new(db_meta.clone(), parents);
        let has_remote = self.has_remote();
        if has_remote {
            self.wal
                .enqueue(WalOperation::new(vec![car_cid], link.clone()))
                .await?;
        }
        self.stores.meta.save(std::slice::from_ref(&link)).await?;

        for block in &blocks {
            self.cache.put(block.clone())?;
        }
        {
            let mut log = self.log.write().expect("lock poisoned");
            if opts.compact {
                log.seen_compacted.extend(previous.iter().copied());
                log.cars = vec![car_cid];
            } else {
                log.cars.insert(0, car_cid);
            }
            log.seen_meta.insert(car_cid);
            log.processed.insert(car_cid);
            log.frontier = vec![link];
        }
        info!(
            ledger = %self.name,
            car = %car_cid.short_hex(),
            blocks = blocks.len(),
            compact = opts.compact,
            "committed car"
        );

        if opts.compact {
            for old in previous.iter().filter(|c| **c != car_cid) {
                if let Err(e) = self.stores.data.remove(old).await {
                    warn!(car = %old.short_hex(), error = %e, "failed to delete compacted car");
                }
            }
        }
        if has_remote {
            self.wal_notify.notify_one();
        }
        Ok(db_meta)
    }

    /// Run the configured compaction strategy and commit its result.
    pub async fn compact(&self, meta: TransactionMeta) -> LoaderResult<Option<DbMeta>> {
        let strategy = self.config.strategies.get(&self.config.compact_strategy)?;
        let before = self.log.read().expect("lock poisoned").cars.len();
        let Some(txn) = strategy.compact(self, &meta.head).await? else {
            debug!(ledger = %self.name, strategy = %self.config.compact_strategy, "compaction skipped");
            return Ok(None);
        };
        let db_meta = self.commit(&txn, meta, CommitOpts::compaction()).await?;
        info!(
            ledger = %self.name,
            strategy = %self.config.compact_strategy,
            cars = before,
            blocks = txn.len(),
            "compacted"
        );
        Ok(Some(db_meta))
    }

    /// Merge meta records from another replica into the car log and record
    /// them as the new local frontier. Returns the transaction metas of the
    /// CARs that were new to us.
    pub async fn merge_db_metas(
        &self,
        links: &[CarClockLink],
    ) -> LoaderResult<Vec<TransactionMeta>> {
        self.merge_links(links, true).await
    }

    async fn merge_links(
        &self,
        links: &[CarClockLink],
        persist: bool,
    ) -> LoaderResult<Vec<TransactionMeta>> {
        let mut metas = Vec::new();
        let mut changed = false;
        for link in links {
            let known = {
                let mut log = self.log.write().expect("lock poisoned");
                !log.seen_meta.insert(link.cid) || log.cars.contains(&link.cid)
            };
            if known {
                continue;
            }

            let header = match self.load_car_blocks(&link.cid).await {
                Ok((header, _)) => header,
                Err(e) => {
                    self.log.write().expect("lock poisoned").seen_meta.remove(&link.cid);
                    return Err(e);
                }
            };

            {
                let mut log = self.log.write().expect("lock poisoned");
                log.seen_compacted.extend(header.compact.iter().copied());
                let mut cars = Vec::with_capacity(1 + log.cars.len() + header.cars.len());
                for cid in std::iter::once(link.cid)
                    .chain(log.cars.iter().copied())
                    .chain(header.cars.iter().copied())
                {
                    if !log.seen_compacted.contains(&cid) && !cars.contains(&cid) {
                        cars.push(cid);
                    }
                }
                log.cars = cars;
                log.frontier.retain(|f| {
                    !link.parents.contains(&f.cid)
                        && !header.cars.contains(&f.cid)
                        && !header.compact.contains(&f.cid)
                });
                if !log.frontier.iter().any(|f| f.cid == link.cid) {
                    log.frontier.push(link.clone());
                }
            }
            debug!(
                ledger = %self.name,
                car = %link.cid.short_hex(),
                compaction = header.is_compaction(),
                "merged meta"
            );
            changed = true;
            if let Some(meta) = header.meta {
                metas.push(meta);
            }
        }

        if changed && persist {
            let frontier = self.frontier();
            self.stores.meta.save(&frontier).await?;
        }
        Ok(metas)
    }

    /// Fetch a CAR, falling back to the remote and caching it locally.
    async fn load_car(&self, cid: &Cid) -> LoaderResult<CarReader> {
        if let Some(block) = self.stores.data.load(cid).await? {
            return Ok(CarReader::from_block(&block)?);
        }
        let Some(remote) = self.remote() else {
            return Err(LoaderError::MissingCar(*cid));
        };
        let Some(block) = remote.data.load(cid).await? else {
            return Err(LoaderError::MissingCar(*cid));
        };
        self.stores.data.save(&block).await?;
        debug!(car = %cid.short_hex(), "fetched car from remote");
        Ok(CarReader::from_block(&block)?)
    }

    async fn crypto_for(&self, header: &CarHeader) -> LoaderResult<Option<KeyedCrypto>> {
        let Some(fingerprint) = &header.key else {
            return Ok(None);
        };
        let current = self.crypto.read().expect("lock poisoned").clone();
        if let Some(crypto) = current.filter(|c| c.fingerprint() == fingerprint) {
            return Ok(Some(crypto));
        }
        Ok(Some(self.keybag.get_key(&self.name, fingerprint).await?))
    }

    /// Decode a CAR into the block cache. Returns its header and blocks.
    async fn load_car_blocks(&self, cid: &Cid) -> LoaderResult<(CarHeader, Vec<Block>)> {
        let reader = self.load_car(cid).await?;
        let crypto = self.crypto_for(reader.header()).await?;
        let blocks = reader.read_all(crypto.as_ref())?;
        for block in &blocks {
            self.cache.put(block.clone())?;
        }
        self.log
            .write()
            .expect("lock poisoned")
            .processed
            .insert(*cid);
        Ok((reader.header().clone(), blocks))
    }

    /// Every block stored in `car`.
    pub async fn car_blocks(&self, car: &Cid) -> LoaderResult<Vec<Block>> {
        Ok(self.load_car_blocks(car).await?.1)
    }

    /// Look a block up in the cache, then in the CARs of the log that have
    /// not been read yet, newest first.
    pub async fn get_block(&self, cid: &Cid) -> LoaderResult<Option<Block>> {
        if let Some(block) = self.cache.get(cid) {
            return Ok(Some(block));
        }
        for car in self.car_log() {
            let processed = self.log.read().expect("lock poisoned").processed.contains(&car);
            if processed {
                continue;
            }
            self.load_car_blocks(&car).await?;
            if let Some(block) = self.cache.get(cid) {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    /// Use `remote` as the replica this ledger syncs with.
    ///
    /// The car log is reconciled against the WAL first: every car and
    /// frontier link no pending operation covers is queued behind the
    /// existing operations. The queue is then delivered before this returns.
    pub async fn attach_remote(self: &Arc<Self>, mut remote: RemoteStores) -> LoaderResult<()> {
        remote.start().await?;
        *self.remote.write().expect("lock poisoned") = Some(remote);

        let (cars, frontier) = {
            let log = self.log.read().expect("lock poisoned");
            (log.cars.clone(), log.frontier.clone())
        };
        let missing = missing_operations(&self.wal.operations(), &cars, &frontier);
        if !missing.is_empty() {
            debug!(ledger = %self.name, queued = missing.len(), "queueing unsent commits");
        }
        for op in missing {
            self.wal.enqueue(op).await?;
        }
        if self.wal.pending() > 0 {
            if let Err(e) = self.flush().await {
                warn!(ledger = %self.name, error = %e, "remote wal replay failed, will retry");
            }
        }
        self.spawn_wal_worker();
        info!(ledger = %self.name, "remote attached");
        Ok(())
    }

    fn spawn_wal_worker(self: &Arc<Self>) {
        let notify = self.wal_notify.clone();
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                notify.notified().await;
                let Some(loader) = weak.upgrade() else { break };
                if let Err(e) = loader.flush().await {
                    warn!(ledger = %loader.name, error = %e, "background remote flush failed");
                }
            }
        });
        if let Some(old) = self.wal_worker.lock().expect("lock poisoned").replace(handle) {
            old.abort();
        }
    }

    /// Deliver every pending WAL operation now.
    pub async fn flush(&self) -> LoaderResult<usize> {
        let remote = self.remote().ok_or(LoaderError::RemoteNotAttached)?;
        self.wal
            .process(&self.stores.data, &remote, &self.car_log())
            .await
    }

    /// Current meta records of the remote.
    pub async fn pull(&self) -> LoaderResult<Vec<CarClockLink>> {
        let remote = self.remote().ok_or(LoaderError::RemoteNotAttached)?;
        remote.meta.load().await
    }

    pub async fn subscribe_remote(&self) -> LoaderResult<Subscription> {
        let remote = self.remote().ok_or(LoaderError::RemoteNotAttached)?;
        remote.meta.subscribe().await
    }

    fn stop_worker(&self) {
        if let Some(worker) = self.wal_worker.lock().expect("lock poisoned").take() {
            worker.abort();
        }
    }

    pub async fn close(&self) -> LoaderResult<()> {
        self.commit_queue.wait_idle().await;
        self.stop_worker();
        self.stores.close().await?;
        debug!(ledger = %self.name, "loader closed");
        Ok(())
    }

    /// Delete every local CAR, meta record and WAL entry.
    pub async fn destroy(&self) -> LoaderResult<()> {
        self.commit_queue.wait_idle().await;
        self.stop_worker();
        self.stores.destroy().await?;
        *self.log.write().expect("lock poisoned") = CarLog::default();
        self.cache.clear();
        info!(ledger = %self.name, "loader destroyed");
        Ok(())
    }
}

#[async_trait]
impl BlockFetcher for Loader {
    async fn fetch(&self, cid: &Cid) -> StoreResult<Option<Block>> {
        self.get_block(cid).await.map_err(|e| StoreError::Fetch {
            cid: *cid,
            reason: e.to_string(),
        })
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let log = self.log.read().expect("lock poisoned");
        f.debug_struct("Loader")
            .field("name", &self.name)
            .field("cars", &log.cars.len())
            .field("frontier", &log.frontier.len())
            .field("cached_blocks", &self.cache.len())
            .field("remote", &self.has_remote())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact::CompactStrategies;
    use hearth_crypto::MemoryKeyBagProvider;
    use hearth_gateway::{MemoryGateway, Url};
    use hearth_types::{ClockHead, Codec};

    struct Env {
        gateway: Arc<MemoryGateway>,
        keybag: Arc<KeyBag>,
    }

    impl Env {
        fn new() -> Self {
            Self {
                gateway: Arc::new(MemoryGateway::new()),
                keybag: Arc::new(KeyBag::new(Arc::new(MemoryKeyBagProvider::new()))),
            }
        }

        fn stores(&self) -> StoreSet {
            StoreSet::new(
                self.gateway.clone(),
                &Url::parse("memory://local?name=books").unwrap(),
            )
        }

        async fn open(&self, config: LoaderConfig) -> Arc<Loader> {
            Loader::open("books", self.stores(), self.keybag.clone(), config)
                .await
                .unwrap()
        }
    }

    fn config() -> LoaderConfig {
        LoaderConfig {
            compact_strategy: "full".into(),
            strategies: CompactStrategies::with_defaults(),
            ..LoaderConfig::default()
        }
    }

    fn txn_of(bodies: &[&[u8]]) -> (CarTransaction, Vec<Block>) {
        let txn = CarTransaction::new();
        let blocks: Vec<Block> = bodies
            .iter()
            .map(|b| Block::new(Codec::Raw, b.to_vec()))
            .collect();
        for b in &blocks {
            txn.put(b.clone()).unwrap();
        }
        (txn, blocks)
    }

    fn meta_for(block: &Block) -> TransactionMeta {
        TransactionMeta::new(ClockHead::single(*block.cid()))
    }

    async fn commit(loader: &Loader, bodies: &[&[u8]]) -> (DbMeta, Vec<Block>) {
        let (txn, blocks) = txn_of(bodies);
        let db_meta = loader
            .commit(&txn, meta_for(&blocks[0]), CommitOpts::default())
            .await
            .unwrap();
        (db_meta, blocks)
    }

    #[tokio::test]
    async fn car_log_is_newest_first() {
        let env = Env::new();
        let loader = env.open(config()).await;
        let (first, _) = commit(&loader, &[b"a"]).await;
        let (second, _) = commit(&loader, &[b"b"]).await;
        assert_eq!(loader.car_log(), vec![second.car, first.car]);
        assert_eq!(loader.frontier().len(), 1);
        assert_eq!(loader.frontier()[0].parents, vec![first.car]);
    }

    #[tokio::test]
    async fn reopen_restores_metas_and_blocks() {
        let env = Env::new();
        let (db_meta, blocks) = {
            let loader = env.open(config()).await;
            commit(&loader, &[b"one", b"two"]).await
        };

        let reopened = env.open(config()).await;
        let metas = reopened.ready().await.unwrap();
        assert_eq!(metas, vec![meta_for(&blocks[0])]);
        assert_eq!(reopened.car_log(), vec![db_meta.car]);
        for block in &blocks {
            assert_eq!(reopened.get_block(block.cid()).await.unwrap().as_ref(), Some(block));
        }
        // A second ready finds nothing new.
        assert!(reopened.ready().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn private_cars_are_sealed() {
        let env = Env::new();
        let loader = env.open(config()).await;
        let secret = b"private ledger body";
        let (db_meta, _) = commit(&loader, &[secret]).await;
        assert_eq!(db_meta.key, loader.key_fingerprint());
        assert!(db_meta.key.is_some());

        let stored = loader.stores().data.load(&db_meta.car).await.unwrap().unwrap();
        assert!(!stored.bytes().windows(secret.len()).any(|w| w == secret));
    }

    #[tokio::test]
    async fn public_cars_are_plain() {
        let env = Env::new();
        let loader = env
            .open(LoaderConfig {
                public: true,
                ..config()
            })
            .await;
        let body = b"public ledger body";
        let (db_meta, _) = commit(&loader, &[body]).await;
        assert!(db_meta.key.is_none());
        let stored = loader.stores().data.load(&db_meta.car).await.unwrap().unwrap();
        assert!(stored.bytes().windows(body.len()).any(|w| w == body));
    }

    #[tokio::test]
    async fn rotated_key_keeps_old_cars_readable() {
        let env = Env::new();
        let (old_fp, blocks) = {
            let loader = env.open(config()).await;
            let (db_meta, blocks) = commit(&loader, &[b"before rotation"]).await;
            let new_fp = loader.rotate_key().await.unwrap();
            assert_ne!(Some(new_fp), db_meta.key);
            commit(&loader, &[b"after rotation"]).await;
            (db_meta.key, blocks)
        };
        let reopened = env.open(config()).await;
        assert_ne!(reopened.key_fingerprint(), old_fp);
        reopened.ready().await.unwrap();
        assert_eq!(
            reopened.get_block(blocks[0].cid()).await.unwrap().as_ref(),
            Some(&blocks[0])
        );
    }

    #[tokio::test]
    async fn full_compaction_replaces_the_log() {
        let env = Env::new();
        let loader = env.open(config()).await;
        let (a, a_blocks) = commit(&loader, &[b"a"]).await;
        let (b, b_blocks) = commit(&loader, &[b"b"]).await;

        let compacted = loader
            .compact(meta_for(&b_blocks[0]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loader.car_log(), vec![compacted.car]);
        assert!(loader.seen_compacted().contains(&a.car));
        assert!(loader.stores().data.load(&a.car).await.unwrap().is_none());
        assert!(loader.stores().data.load(&b.car).await.unwrap().is_none());

        let reopened = env.open(config()).await;
        reopened.ready().await.unwrap();
        assert_eq!(reopened.car_log(), vec![compacted.car]);
        for block in a_blocks.iter().chain(&b_blocks) {
            assert!(reopened.get_block(block.cid()).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn noop_and_unknown_strategies() {
        let env = Env::new();
        let loader = env
            .open(LoaderConfig {
                compact_strategy: "no-op".into(),
                ..config()
            })
            .await;
        let (_, blocks) = commit(&loader, &[b"a"]).await;
        assert!(loader.compact(meta_for(&blocks[0])).await.unwrap().is_none());
        assert_eq!(loader.car_log().len(), 1);

        let other = Env::new()
            .open(LoaderConfig {
                compact_strategy: "missing".into(),
                ..config()
            })
            .await;
        assert!(matches!(
            other.compact(meta_for(&blocks[0])).await,
            Err(LoaderError::UnknownStrategy(_))
        ));
    }

    #[tokio::test]
    async fn needs_compaction_past_threshold() {
        let env = Env::new();
        let loader = env
            .open(LoaderConfig {
                auto_compact: 2,
                ..config()
            })
            .await;
        commit(&loader, &[b"1"]).await;
        commit(&loader, &[b"2"]).await;
        assert!(!loader.needs_compaction());
        commit(&loader, &[b"3"]).await;
        assert!(loader.needs_compaction());
    }

    #[tokio::test]
    async fn unknown_block_is_none() {
        let env = Env::new();
        let loader = env.open(config()).await;
        commit(&loader, &[b"x"]).await;
        let missing = Cid::compute(Codec::Raw, b"nowhere");
        assert!(loader.get_block(&missing).await.unwrap().is_none());
        assert!(loader.fetch(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remote_without_attach_is_an_error() {
        let env = Env::new();
        let loader = env.open(config()).await;
        assert!(matches!(loader.flush().await, Err(LoaderError::RemoteNotAttached)));
        assert!(matches!(loader.pull().await, Err(LoaderError::RemoteNotAttached)));
    }

    #[tokio::test]
    async fn replicas_exchange_cars_through_a_remote() {
        let shared_keys = Arc::new(MemoryKeyBagProvider::new());
        let remote_gateway = Arc::new(MemoryGateway::new());
        let remote_url = Url::parse("memory://remote?name=books").unwrap();

        let open_replica = |local: &str| {
            let stores = StoreSet::new(
                Arc::new(MemoryGateway::new()),
                &Url::parse(local).unwrap(),
            );
            let keybag = Arc::new(KeyBag::new(shared_keys.clone()));
            async move { Loader::open("books", stores, keybag, config()).await.unwrap() }
        };
        let alice = open_replica("memory://alice?name=books").await;
        let bob = open_replica("memory://bob?name=books").await;
        alice
            .attach_remote(RemoteStores::new(remote_gateway.clone(), &remote_url))
            .await
            .unwrap();
        bob.attach_remote(RemoteStores::new(remote_gateway.clone(), &remote_url))
            .await
            .unwrap();

        let (a_meta, a_blocks) = commit(&alice, &[b"from alice"]).await;
        alice.flush().await.unwrap();
        let (b_meta, _) = commit(&bob, &[b"from bob"]).await;
        bob.flush().await.unwrap();

        let links = alice.pull().await.unwrap();
        assert_eq!(links.len(), 2);
        let metas = alice.merge_db_metas(&links).await.unwrap();
        // Only bob's car is new to alice.
        assert_eq!(metas.len(), 1);
        assert_eq!(alice.car_log(), vec![b_meta.car, a_meta.car]);
        assert_eq!(alice.frontier().len(), 2);

        let bob_links = bob.pull().await.unwrap();
        bob.merge_db_metas(&bob_links).await.unwrap();
        assert_eq!(
            bob.get_block(a_blocks[0].cid()).await.unwrap().as_ref(),
            Some(&a_blocks[0])
        );

        // The merged frontier is persisted locally.
        assert_eq!(alice.stores().meta.load().await.unwrap().len(), 2);
    }
}
