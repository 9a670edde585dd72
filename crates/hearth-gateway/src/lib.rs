//! Storage gateway protocol for Hearth.
//!
//! Every backend (memory, file system, object storage, remote service)
//! implements the [`Gateway`] trait. Gateways address values by URL: the
//! path names the ledger, the `store` query parameter names the store
//! (`data`, `meta`, `wal`), and the `key` parameter names the entry.
//!
//! Gateway methods never panic on backend failure. They return
//! [`GatewayResult`], and a missing key is the distinguished
//! [`GatewayError::NotFound`] so callers can tell "doesn't exist yet" from
//! "backend is broken".

pub mod error;
pub mod memory;
pub mod subscription;
pub mod traits;
pub mod urls;

pub use error::{GatewayError, GatewayResult};
pub use memory::MemoryGateway;
pub use subscription::Subscription;
pub use traits::Gateway;
pub use urls::StoreKind;
pub use url::Url;
