use hearth_crdt::CrdtError;
use hearth_gateway::GatewayError;
use hearth_loader::LoaderError;
use hearth_types::DocId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The document was never written or has been deleted.
    #[error("document not found: {0}")]
    NotFound(DocId),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("crdt error: {0}")]
    Crdt(#[from] CrdtError),

    #[error("loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl LedgerError {
    /// True only for a missing document; storage-level misses surface as
    /// their own variants.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::NotFound(_))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_documents_are_not_found() {
        assert!(LedgerError::NotFound("a".into()).is_not_found());
        assert!(!LedgerError::Gateway(GatewayError::NotFound("memory://x".into())).is_not_found());
        assert!(!LedgerError::Loader(LoaderError::RemoteNotAttached).is_not_found());
    }
}
