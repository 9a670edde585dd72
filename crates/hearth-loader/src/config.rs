use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compact::CompactStrategies;

/// Retry policy for pushing WAL operations to a remote.
///
/// A failed operation is retried with exponential backoff, starting at
/// `initial_backoff_ms` and multiplying by `multiplier` up to
/// `max_backoff_ms`. After `max_retries` retries the operation stays queued
/// and the flush reports the failure; the next flush starts over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalRetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: u32,
    pub max_retries: u32,
}

impl WalRetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Backoff that follows `current`.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.multiplier.max(1))
            .min(Duration::from_millis(self.max_backoff_ms))
    }
}

impl Default for WalRetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2,
            max_retries: 5,
        }
    }
}

/// Per-ledger loader settings.
#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// Compact once the car log holds more than this many CARs. Zero
    /// disables automatic compaction.
    pub auto_compact: usize,
    /// Name of the strategy in `strategies` used by `compact`.
    pub compact_strategy: String,
    pub strategies: CompactStrategies,
    /// Write CARs unencrypted.
    pub public: bool,
    pub wal: WalRetryConfig,
    /// Failed applications of a remote event before it is dropped.
    pub task_retries: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            auto_compact: 100,
            compact_strategy: "fireproof".into(),
            strategies: CompactStrategies::with_defaults(),
            public: false,
            wal: WalRetryConfig::default(),
            task_retries: 3,
        }
    }
}
