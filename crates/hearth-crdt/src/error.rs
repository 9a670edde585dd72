use hearth_loader::LoaderError;
use hearth_store::StoreError;
use hearth_types::{Cid, DocId, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("block error: {0}")]
    Store(#[from] StoreError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// A clock or document block could not be resolved from any CAR.
    #[error("missing block {0}")]
    MissingBlock(Cid),

    #[error("block {cid} is not a clock event: {reason}")]
    InvalidEvent { cid: Cid, reason: String },

    #[error("invalid update for {id:?}: {reason}")]
    InvalidUpdate { id: DocId, reason: String },
}

pub type CrdtResult<T> = Result<T, CrdtError>;

impl From<CrdtError> for LoaderError {
    fn from(err: CrdtError) -> Self {
        match err {
            CrdtError::Loader(e) => e,
            CrdtError::Store(e) => LoaderError::Store(e),
            CrdtError::Type(e) => LoaderError::Type(e),
            CrdtError::MissingBlock(cid) => {
                LoaderError::InvariantViolation(format!("unresolved clock block {cid}"))
            }
            other => LoaderError::Apply(other.to_string()),
        }
    }
}
