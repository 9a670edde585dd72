//! Hearth: local-first, content-addressed document ledgers.
//!
//! A [`Ledger`] stores JSON documents as blocks packed into encrypted CARs
//! behind pluggable [`Gateway`](hearth_gateway::Gateway)s. Replicas sync by
//! exchanging CARs and meta records through a remote; concurrent writes
//! become concurrent clock tips that [`Ledger::merge`] folds back together.
//!
//! ```no_run
//! # async fn demo() -> hearth_ledger::LedgerResult<()> {
//! use hearth_ledger::{Ledger, LedgerConfig};
//! use serde_json::json;
//!
//! let ledger = Ledger::open("todo", LedgerConfig::default()).await?;
//! ledger.put(json!({"_id": "a", "title": "water plants"})).await?;
//! let doc = ledger.get("a").await?;
//! assert_eq!(doc["title"], "water plants");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ledger;

pub use config::{LedgerConfig, StoreUrls, WriteQueueConfig};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{BulkResponse, DocResponse, DocRows, Ledger, LedgerRuntime, RemoteConfig};

pub use hearth_crdt::DocRecord;
pub use hearth_gateway::{Gateway, MemoryGateway, Url};
pub use hearth_types::{Cid, ClockHead, DbMeta, DocId};

/// Install a fmt subscriber that writes through the test harness. Safe to
/// call more than once; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_target(false)
        .try_init();
}
