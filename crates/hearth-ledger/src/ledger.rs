//! Document API over the CRDT, plus remote attachment and sync.

use std::sync::{Arc, Mutex, Weak};

use hearth_crdt::{Crdt, DocRecord};
use hearth_crypto::KeyBag;
use hearth_gateway::{Gateway, MemoryGateway, StoreKind, Url};
use hearth_loader::{
    stores::decode_links, CompactStrategies, CompactStrategy, DataStore, GatewayKeyBagProvider,
    MetaStore, RemoteStores, StoreSet, WalStore,
};
use hearth_types::{ClockHead, DbMeta, DocId, DocUpdate};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// Runtime collaborators of a ledger: the gateways behind its stores, the
/// key bag and the compaction strategy table.
#[derive(Clone)]
pub struct LedgerRuntime {
    pub data: Arc<dyn Gateway>,
    pub meta: Arc<dyn Gateway>,
    pub wal: Arc<dyn Gateway>,
    pub keybag: Arc<KeyBag>,
    pub strategies: CompactStrategies,
}

impl LedgerRuntime {
    /// Every store on `gateway`.
    pub fn new(gateway: Arc<dyn Gateway>, keybag: Arc<KeyBag>) -> Self {
        Self {
            data: gateway.clone(),
            meta: gateway.clone(),
            wal: gateway,
            keybag,
            strategies: CompactStrategies::with_defaults(),
        }
    }

    /// Every store and the key bag on one fresh in-memory gateway.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryGateway::new()), Arc::new(KeyBag::in_memory()))
    }

    /// Keep the key bag behind `gateway` at `url`.
    pub fn with_keybag_gateway(mut self, gateway: Arc<dyn Gateway>, url: Url) -> Self {
        self.keybag = Arc::new(KeyBag::new(Arc::new(GatewayKeyBagProvider::new(gateway, url))));
        self
    }

    pub fn with_strategy(
        mut self,
        name: impl Into<String>,
        strategy: Arc<dyn CompactStrategy>,
    ) -> Self {
        self.strategies.register(name, strategy);
        self
    }
}

impl std::fmt::Debug for LedgerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerRuntime")
            .field("strategies", &self.strategies)
            .finish_non_exhaustive()
    }
}

/// A remote replica to sync with.
#[derive(Clone)]
pub struct RemoteConfig {
    pub url: Url,
    pub data: Arc<dyn Gateway>,
    pub meta: Arc<dyn Gateway>,
    /// Apply remote meta updates as they arrive. Without it, call
    /// [`Ledger::pull`].
    pub subscribe: bool,
}

impl RemoteConfig {
    pub fn new(gateway: Arc<dyn Gateway>, url: Url) -> Self {
        Self {
            url,
            data: gateway.clone(),
            meta: gateway,
            subscribe: true,
        }
    }

    pub fn polling(mut self) -> Self {
        self.subscribe = false;
        self
    }
}

/// Result of a document write.
#[derive(Clone, Debug, PartialEq)]
pub struct DocResponse {
    pub id: DocId,
    pub head: ClockHead,
}

/// Result of a bulk write.
#[derive(Clone, Debug, PartialEq)]
pub struct BulkResponse {
    pub ids: Vec<DocId>,
    pub head: ClockHead,
}

/// Documents read at one head.
#[derive(Clone, Debug, PartialEq)]
pub struct DocRows {
    pub rows: Vec<DocRecord>,
    pub head: ClockHead,
}

/// A named document ledger.
///
/// Documents are JSON objects identified by their `_id` field. Writes go
/// through the commit queue one at a time; each commit becomes one CAR.
/// With a remote attached, commits are pushed through the WAL and remote
/// commits are pulled in either by subscription or by [`pull`](Self::pull).
pub struct Ledger {
    name: String,
    config: LedgerConfig,
    crdt: Arc<Crdt>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Ledger {
    /// Open `name` on in-memory stores.
    pub async fn open(name: impl Into<String>, config: LedgerConfig) -> LedgerResult<Self> {
        Self::open_with(name, config, LedgerRuntime::memory()).await
    }

    pub async fn open_with(
        name: impl Into<String>,
        config: LedgerConfig,
        runtime: LedgerRuntime,
    ) -> LedgerResult<Self> {
        let name = name.into();
        config.validate()?;
        let stores = StoreSet {
            data: DataStore::new(runtime.data, config.stores.store_url(&name, StoreKind::Data)),
            meta: MetaStore::new(runtime.meta, config.stores.store_url(&name, StoreKind::Meta)),
            wal: WalStore::new(runtime.wal, config.stores.store_url(&name, StoreKind::Wal)),
        };
        let crdt = Crdt::open(
            name.clone(),
            stores,
            runtime.keybag,
            config.loader_config(runtime.strategies),
        )
        .await?;
        info!(ledger = %name, tips = crdt.head().len(), "ledger opened");
        Ok(Self {
            name,
            config,
            crdt,
            listener: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn crdt(&self) -> &Arc<Crdt> {
        &self.crdt
    }

    pub fn head(&self) -> ClockHead {
        self.crdt.head()
    }

    /// Write one document. A missing `_id` is filled with a fresh UUIDv7.
    pub async fn put(&self, doc: Value) -> LedgerResult<DocResponse> {
        let (id, doc) = prepare(doc)?;
        let meta = self.crdt.bulk(vec![DocUpdate::put(id.clone(), doc)]).await?;
        Ok(DocResponse { id, head: meta.head })
    }

    /// Write many documents, committing `write_queue.chunk_size` at a time.
    pub async fn bulk(&self, docs: Vec<Value>) -> LedgerResult<BulkResponse> {
        let mut ids = Vec::with_capacity(docs.len());
        let mut updates = Vec::with_capacity(docs.len());
        for doc in docs {
            let (id, doc) = prepare(doc)?;
            ids.push(id.clone());
            updates.push(DocUpdate::put(id, doc));
        }
        let mut head = self.crdt.head();
        for chunk in updates.chunks(self.config.write_queue.chunk_size) {
            head = self.crdt.bulk(chunk.to_vec()).await?.head;
        }
        debug!(ledger = %self.name, docs = ids.len(), "bulk write");
        Ok(BulkResponse { ids, head })
    }

    pub async fn get(&self, id: &str) -> LedgerResult<Value> {
        match self.crdt.get(id).await? {
            Some(DocRecord {
                value: Some(value),
                del: false,
                ..
            }) => Ok(value),
            _ => Err(LedgerError::NotFound(id.to_string())),
        }
    }

    pub async fn del(&self, id: &str) -> LedgerResult<DocResponse> {
        let meta = self.crdt.bulk(vec![DocUpdate::delete(id)]).await?;
        Ok(DocResponse {
            id: id.to_string(),
            head: meta.head,
        })
    }

    pub async fn all_docs(&self) -> LedgerResult<DocRows> {
        let (rows, head) = self.crdt.all_docs().await?;
        Ok(DocRows { rows, head })
    }

    /// Documents changed since `since`; an empty head means from the start.
    pub async fn changes(&self, since: &ClockHead) -> LedgerResult<DocRows> {
        let (rows, head) = self.crdt.changes(since).await?;
        Ok(DocRows { rows, head })
    }

    pub async fn compact(&self) -> LedgerResult<Option<DbMeta>> {
        Ok(self.crdt.compact().await?)
    }

    /// Collapse concurrent tips into one.
    pub async fn merge(&self) -> LedgerResult<ClockHead> {
        Ok(self.crdt.merge().await?.head)
    }

    /// Sync with `remote`: push what is pending, take in what the remote
    /// has, and with `subscribe` keep listening for its updates.
    pub async fn attach(&self, remote: RemoteConfig) -> LedgerResult<()> {
        let url = urls_for(&remote.url, &self.name);
        let stores = RemoteStores::with_gateways(remote.data, remote.meta, &url);
        let loader = self.crdt.loader();
        loader.attach_remote(stores).await?;

        if remote.subscribe {
            // Subscribe before the first pull so nothing lands in between.
            let mut subscription = loader.subscribe_remote().await?;
            let crdt = Arc::downgrade(&self.crdt);
            let name = self.name.clone();
            let handle = tokio::spawn(async move {
                while let Some(body) = subscription.recv().await {
                    let Some(crdt) = Weak::upgrade(&crdt) else { break };
                    let links = match decode_links(&body) {
                        Ok(links) => links,
                        Err(e) => {
                            warn!(ledger = %name, error = %e, "undecodable remote meta");
                            continue;
                        }
                    };
                    if let Err(e) = crdt.receive(links).await {
                        warn!(ledger = %name, error = %e, "failed to apply remote meta");
                    }
                }
                debug!(ledger = %name, "remote subscription ended");
            });
            if let Some(old) = self.listener.lock().expect("lock poisoned").replace(handle) {
                old.abort();
            }
        }

        self.pull().await?;
        info!(ledger = %self.name, remote = %url, subscribe = remote.subscribe, "remote attached");
        Ok(())
    }

    /// Apply the remote's current meta records.
    pub async fn pull(&self) -> LedgerResult<ClockHead> {
        let links = self.crdt.loader().pull().await?;
        self.crdt.receive(links).await?;
        Ok(self.crdt.head())
    }

    /// Push pending WAL operations; returns how many were acknowledged.
    pub async fn flush(&self) -> LedgerResult<usize> {
        Ok(self.crdt.loader().flush().await?)
    }

    pub async fn wait_idle(&self) {
        self.crdt.loader().commit_queue().wait_idle().await;
    }

    fn stop_listener(&self) {
        if let Some(handle) = self.listener.lock().expect("lock poisoned").take() {
            handle.abort();
        }
    }

    pub async fn close(&self) -> LedgerResult<()> {
        self.stop_listener();
        self.crdt.close().await?;
        info!(ledger = %self.name, "ledger closed");
        Ok(())
    }

    pub async fn destroy(&self) -> LedgerResult<()> {
        self.stop_listener();
        self.crdt.destroy().await?;
        Ok(())
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        self.stop_listener();
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("name", &self.name)
            .field("head", &self.crdt.head())
            .finish()
    }
}

fn urls_for(base: &Url, name: &str) -> Url {
    hearth_gateway::urls::with_param(base, "name", name)
}

/// Check that `doc` is an object and settle its `_id`.
fn prepare(doc: Value) -> LedgerResult<(DocId, Value)> {
    let Value::Object(mut fields) = doc else {
        return Err(LedgerError::InvalidDocument("documents must be JSON objects".into()));
    };
    let id = match fields.get("_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::String(_)) | None => uuid::Uuid::now_v7().to_string(),
        Some(other) => {
            return Err(LedgerError::InvalidDocument(format!(
                "_id must be a string, got {other}"
            )))
        }
    };
    fields.insert("_id".into(), Value::String(id.clone()));
    Ok((id, Value::Object(fields)))
}
