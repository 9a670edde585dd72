use hearth_car::CarError;
use hearth_crypto::CryptoError;
use hearth_gateway::GatewayError;
use hearth_store::StoreError;
use hearth_types::{Cid, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("car error: {0}")]
    Car(#[from] CarError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("car {0} is in the car log but no store has it")]
    MissingCar(Cid),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("unknown compaction strategy: {0}")]
    UnknownStrategy(String),

    #[error("no remote attached")]
    RemoteNotAttached,

    #[error("remote write failed after {attempts} attempts: {last}")]
    WalRetriesExhausted { attempts: u32, last: String },

    #[error("applying remote metas failed: {0}")]
    Apply(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LoaderError {
    /// Returns `true` when the error means "absent", not "broken".
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoaderError::Gateway(e) if e.is_not_found())
    }
}

pub type LoaderResult<T> = Result<T, LoaderError>;
