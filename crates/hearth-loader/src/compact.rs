use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use hearth_store::CarTransaction;
use hearth_types::ClockHead;
use tracing::debug;

use crate::error::{LoaderError, LoaderResult};
use crate::loader::Loader;

/// Produces the blocks of a compacted CAR.
///
/// The returned transaction must hold every block reachable from `head`:
/// once it is committed, the CARs it supersedes are deleted. `None` means
/// "nothing to do".
#[async_trait]
pub trait CompactStrategy: Send + Sync {
    async fn compact(&self, loader: &Loader, head: &ClockHead)
        -> LoaderResult<Option<CarTransaction>>;
}

/// Copies every block of every CAR in the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct FullCompaction;

#[async_trait]
impl CompactStrategy for FullCompaction {
    async fn compact(
        &self,
        loader: &Loader,
        _head: &ClockHead,
    ) -> LoaderResult<Option<CarTransaction>> {
        let txn = CarTransaction::new();
        for car in loader.car_log() {
            for block in loader.car_blocks(&car).await? {
                txn.put(block)?;
            }
        }
        if txn.is_empty() {
            return Ok(None);
        }
        debug!(blocks = txn.len(), "full compaction collected blocks");
        Ok(Some(txn))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopCompaction;

#[async_trait]
impl CompactStrategy for NoopCompaction {
    async fn compact(
        &self,
        _loader: &Loader,
        _head: &ClockHead,
    ) -> LoaderResult<Option<CarTransaction>> {
        Ok(None)
    }
}

/// Named compaction strategies.
#[derive(Clone, Default)]
pub struct CompactStrategies {
    strategies: BTreeMap<String, Arc<dyn CompactStrategy>>,
}

impl CompactStrategies {
    /// Table with `full` and `no-op`.
    pub fn with_defaults() -> Self {
        Self::default()
            .with("full", Arc::new(FullCompaction))
            .with("no-op", Arc::new(NoopCompaction))
    }

    pub fn with(mut self, name: impl Into<String>, strategy: Arc<dyn CompactStrategy>) -> Self {
        self.register(name, strategy);
        self
    }

    /// Add or replace a strategy.
    pub fn register(&mut self, name: impl Into<String>, strategy: Arc<dyn CompactStrategy>) {
        self.strategies.insert(name.into(), strategy);
    }

    pub fn get(&self, name: &str) -> LoaderResult<Arc<dyn CompactStrategy>> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| LoaderError::UnknownStrategy(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CompactStrategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
