use hearth_gateway::{urls, StoreKind, Url};
use hearth_loader::{CompactStrategies, LoaderConfig, WalRetryConfig};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

const DEFAULT_BASE: &str = "memory://hearth";

/// Where a ledger keeps its stores.
///
/// Every store lives under `base` unless it has its own URL. The ledger
/// name and store kind are added as query parameters, so one base can hold
/// many ledgers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreUrls {
    pub base: Url,
    pub data: Option<Url>,
    pub meta: Option<Url>,
    pub wal: Option<Url>,
}

impl StoreUrls {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            data: None,
            meta: None,
            wal: None,
        }
    }

    /// Base URL of `kind` for ledger `name`.
    pub fn store_url(&self, name: &str, kind: StoreKind) -> Url {
        let root = match kind {
            StoreKind::Data => self.data.as_ref(),
            StoreKind::Meta => self.meta.as_ref(),
            StoreKind::Wal => self.wal.as_ref(),
        }
        .unwrap_or(&self.base);
        urls::store_url(&urls::with_param(root, "name", name), kind)
    }

    /// Where key bags are kept when they live behind a gateway.
    pub fn keybag_url(&self) -> Url {
        urls::with_param(&self.base, "store", "keybag")
    }
}

impl Default for StoreUrls {
    fn default() -> Self {
        Self::new(Url::parse(DEFAULT_BASE).expect("default base url is valid"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteQueueConfig {
    /// Documents per commit when a bulk write is split.
    pub chunk_size: usize,
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self { chunk_size: 32 }
    }
}

/// Serializable ledger settings. Gateways, key bags and compaction
/// strategies are supplied at runtime through
/// [`LedgerRuntime`](crate::LedgerRuntime).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub stores: StoreUrls,
    /// Compact once the ledger spans more than this many CARs; zero turns
    /// automatic compaction off.
    pub auto_compact: usize,
    pub compact_strategy: String,
    pub write_queue: WriteQueueConfig,
    /// Store CARs unencrypted.
    pub public: bool,
    pub wal: WalRetryConfig,
    pub task_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let loader = LoaderConfig::default();
        Self {
            stores: StoreUrls::default(),
            auto_compact: loader.auto_compact,
            compact_strategy: loader.compact_strategy,
            write_queue: WriteQueueConfig::default(),
            public: loader.public,
            wal: loader.wal,
            task_retries: loader.task_retries,
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.write_queue.chunk_size == 0 {
            return Err(LedgerError::Config("write_queue.chunk_size must be positive".into()));
        }
        if self.compact_strategy.is_empty() {
            return Err(LedgerError::Config("compact_strategy is empty".into()));
        }
        if self.wal.multiplier == 0 {
            return Err(LedgerError::Config("wal.multiplier must be positive".into()));
        }
        Ok(())
    }

    pub fn loader_config(&self, strategies: CompactStrategies) -> LoaderConfig {
        LoaderConfig {
            auto_compact: self.auto_compact,
            compact_strategy: self.compact_strategy.clone(),
            strategies,
            public: self.public,
            wal: self.wal.clone(),
            task_retries: self.task_retries,
        }
    }
}
