//! Documents on top of the Merkle clock.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hearth_crypto::KeyBag;
use hearth_loader::{
    CommitOpts, Loader, LoaderConfig, LoaderError, LoaderResult, MetaApplier, RemoteEvent,
    StoreSet,
};
use hearth_store::{BlockFetcher, CarTransaction, MultiFetcher};
use hearth_types::{CarClockLink, Cid, ClockHead, DbMeta, DocId, DocUpdate, TransactionMeta};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::merge_heads;
use crate::error::{CrdtError, CrdtResult};
use crate::event::{ClockEvent, EventUpdate};
use crate::fireproof::FireproofCompaction;
use crate::history::{materialize, replay, DocEntry};

/// A document as seen at some head.
#[derive(Clone, Debug, PartialEq)]
pub struct DocRecord {
    pub id: DocId,
    /// `None` when deleted.
    pub value: Option<Value>,
    pub del: bool,
    /// Clock event that wrote this state.
    pub clock: Cid,
}

/// Result of a write.
#[derive(Clone, Debug, PartialEq)]
pub struct CrdtMeta {
    pub head: ClockHead,
    /// The CAR the write produced; `None` when there was nothing to write.
    pub car: Option<DbMeta>,
}

struct Index {
    head: ClockHead,
    docs: BTreeMap<DocId, DocEntry>,
}

/// Document CRDT over a Merkle clock.
///
/// Local writes produce one clock event whose parents are the current
/// tips, so the head collapses to that single event. Remote heads are
/// folded in with [`merge_heads`](crate::clock::merge_heads); concurrent
/// tips stay until [`merge`](Self::merge) writes an event above them.
/// Reads replay the clock in a deterministic order, so every replica at
/// the same head sees the same documents.
pub struct Crdt {
    loader: Arc<Loader>,
    /// Decoded blocks first, then the car log.
    blocks: MultiFetcher,
    head: RwLock<ClockHead>,
    index: Mutex<Option<Arc<Index>>>,
}

impl Crdt {
    /// Open the ledger and replay its stored head.
    ///
    /// Registers the `fireproof` compaction strategy unless the table
    /// already has one by that name.
    pub async fn open(
        name: impl Into<String>,
        stores: StoreSet,
        keybag: Arc<KeyBag>,
        mut config: LoaderConfig,
    ) -> CrdtResult<Arc<Self>> {
        if !config.strategies.contains("fireproof") {
            config
                .strategies
                .register("fireproof", Arc::new(FireproofCompaction));
        }
        let loader = Loader::open(name, stores, keybag, config).await?;
        let blocks = MultiFetcher::new(vec![
            loader.cached_blocks() as Arc<dyn BlockFetcher>,
            loader.clone() as Arc<dyn BlockFetcher>,
        ]);
        let crdt = Arc::new(Self {
            loader,
            blocks,
            head: RwLock::new(ClockHead::new()),
            index: Mutex::new(None),
        });
        let metas = crdt.loader.ready().await?;
        for meta in &metas {
            crdt.apply_head(&meta.head).await?;
        }
        info!(ledger = %crdt.loader.name(), tips = crdt.head().len(), "crdt ready");
        Ok(crdt)
    }

    pub fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    pub fn head(&self) -> ClockHead {
        self.head.read().expect("lock poisoned").clone()
    }

    fn set_head(&self, head: ClockHead) {
        *self.head.write().expect("lock poisoned") = head;
    }

    /// Write `updates` as one clock event in one CAR.
    pub async fn bulk(&self, updates: Vec<DocUpdate>) -> CrdtResult<CrdtMeta> {
        for update in &updates {
            validate(update)?;
        }
        if updates.is_empty() {
            return Ok(CrdtMeta {
                head: self.head(),
                car: None,
            });
        }

        let meta = self
            .loader
            .commit_queue()
            .enqueue(async {
                let txn = CarTransaction::new();
                let mut ops = Vec::with_capacity(updates.len());
                for update in updates {
                    let value = match (&update.value, update.del) {
                        (Some(body), false) => Some(*txn.put_json(body)?.cid()),
                        _ => None,
                    };
                    ops.push(EventUpdate {
                        id: update.id,
                        value,
                        del: update.del,
                    });
                }
                self.write_event(txn, ops).await
            })
            .await?;
        self.maybe_compact().await;
        Ok(meta)
    }

    /// Collapse concurrent tips under one empty event. A head with at most
    /// one tip is left alone.
    pub async fn merge(&self) -> CrdtResult<CrdtMeta> {
        let meta = self
            .loader
            .commit_queue()
            .enqueue(async {
                let head = self.head();
                if head.len() <= 1 {
                    return Ok(CrdtMeta { head, car: None });
                }
                debug!(tips = head.len(), "merging concurrent tips");
                self.write_event(CarTransaction::new(), Vec::new()).await
            })
            .await?;
        self.maybe_compact().await;
        Ok(meta)
    }

    /// Runs inside the commit queue.
    async fn write_event(
        &self,
        txn: CarTransaction,
        ops: Vec<EventUpdate>,
    ) -> CrdtResult<CrdtMeta> {
        let parents = self.head().tips().to_vec();
        let event = ClockEvent::new(parents, ops).to_block()?;
        let head = ClockHead::single(*event.cid());
        txn.put(event)?;
        let db_meta = self
            .loader
            .commit(&txn, TransactionMeta::new(head.clone()), CommitOpts::default())
            .await?;
        self.set_head(head.clone());
        Ok(CrdtMeta {
            head,
            car: Some(db_meta),
        })
    }

    /// Fold a head from a CAR into the local head. The caller holds the
    /// commit queue, or nothing else can be writing yet.
    pub async fn apply_head(&self, remote: &ClockHead) -> CrdtResult<ClockHead> {
        let merged = merge_heads(&self.blocks, &self.head(), remote).await?;
        self.set_head(merged.clone());
        Ok(merged)
    }

    /// Hand remote meta records to the task manager, which applies the ones
    /// that are new.
    pub async fn receive(&self, links: Vec<CarClockLink>) -> CrdtResult<()> {
        for link in links {
            self.loader
                .task_manager()
                .handle_event(RemoteEvent::from(link), self)
                .await?;
        }
        Ok(())
    }

    /// Compact with the configured strategy.
    pub async fn compact(&self) -> CrdtResult<Option<DbMeta>> {
        let compacted = self
            .loader
            .commit_queue()
            .enqueue(async {
                let head = self.head();
                self.loader.compact(TransactionMeta::new(head)).await
            })
            .await?;
        Ok(compacted)
    }

    async fn maybe_compact(&self) {
        if !self.loader.needs_compaction() {
            return;
        }
        if let Err(e) = self.compact().await {
            warn!(ledger = %self.loader.name(), error = %e, "auto compaction failed");
        }
    }

    async fn index(&self) -> CrdtResult<Arc<Index>> {
        let head = self.head();
        let mut cached = self.index.lock().await;
        if let Some(index) = cached.as_ref().filter(|i| i.head == head) {
            return Ok(index.clone());
        }
        let events = replay(&self.blocks, &head, &ClockHead::new()).await?;
        let index = Arc::new(Index {
            docs: materialize(&events),
            head,
        });
        *cached = Some(index.clone());
        Ok(index)
    }

    async fn load_body(&self, cid: &Cid) -> CrdtResult<Value> {
        let block = self
            .blocks
            .fetch(cid)
            .await?
            .ok_or(CrdtError::MissingBlock(*cid))?;
        Ok(block.decode_json()?)
    }

    async fn record(&self, id: &str, entry: &DocEntry) -> CrdtResult<DocRecord> {
        let value = match (&entry.value, entry.del) {
            (Some(cid), false) => Some(self.load_body(cid).await?),
            _ => None,
        };
        Ok(DocRecord {
            id: id.to_string(),
            value,
            del: entry.del,
            clock: entry.clock,
        })
    }

    /// Latest state of `id`, including deletes. `None` if never written.
    pub async fn get(&self, id: &str) -> CrdtResult<Option<DocRecord>> {
        let index = self.index().await?;
        match index.docs.get(id) {
            Some(entry) => Ok(Some(self.record(id, entry).await?)),
            None => Ok(None),
        }
    }

    /// Live documents ordered by id, and the head they were read at.
    pub async fn all_docs(&self) -> CrdtResult<(Vec<DocRecord>, ClockHead)> {
        let index = self.index().await?;
        let mut docs = Vec::new();
        for (id, entry) in index.docs.iter().filter(|(_, e)| !e.del) {
            docs.push(self.record(id, entry).await?);
        }
        Ok((docs, index.head.clone()))
    }

    /// Documents changed after `since`, oldest change first, one entry per
    /// document. Deletes are included.
    pub async fn changes(&self, since: &ClockHead) -> CrdtResult<(Vec<DocRecord>, ClockHead)> {
        let head = self.head();
        let events = replay(&self.blocks, &head, since).await?;
        let docs = materialize(&events);
        let mut entries: Vec<(&DocId, &DocEntry)> = docs.iter().collect();
        entries.sort_by_key(|(_, e)| e.seq);
        let mut changes = Vec::with_capacity(entries.len());
        for (id, entry) in entries {
            changes.push(self.record(id, entry).await?);
        }
        Ok((changes, head))
    }

    pub async fn close(&self) -> CrdtResult<()> {
        Ok(self.loader.close().await?)
    }

    pub async fn destroy(&self) -> CrdtResult<()> {
        self.loader.destroy().await?;
        self.set_head(ClockHead::new());
        *self.index.lock().await = None;
        Ok(())
    }
}

fn validate(update: &DocUpdate) -> CrdtResult<()> {
    if update.id.is_empty() {
        return Err(CrdtError::InvalidUpdate {
            id: update.id.clone(),
            reason: "empty id".into(),
        });
    }
    if !update.del && update.value.is_none() {
        return Err(CrdtError::InvalidUpdate {
            id: update.id.clone(),
            reason: "put without a value".into(),
        });
    }
    Ok(())
}

#[async_trait]
impl MetaApplier for Crdt {
    async fn apply(&self, events: &[RemoteEvent]) -> LoaderResult<()> {
        let links: Vec<CarClockLink> = events.iter().map(CarClockLink::from).collect();
        self.loader
            .commit_queue()
            .enqueue(async {
                let metas = self.loader.merge_db_metas(&links).await?;
                for meta in &metas {
                    self.apply_head(&meta.head).await?;
                }
                debug!(
                    events = links.len(),
                    metas = metas.len(),
                    tips = self.head().len(),
                    "applied remote metas"
                );
                Ok::<(), LoaderError>(())
            })
            .await
    }
}

impl std::fmt::Debug for Crdt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crdt")
            .field("loader", &self.loader)
            .field("blocks", &self.blocks)
            .field("head", &self.head())
            .finish()
    }
}
