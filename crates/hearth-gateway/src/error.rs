use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The key does not exist. Expected and recoverable.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("operation not supported by this gateway: {0}")]
    Unsupported(&'static str),

    #[error("gateway closed: {0}")]
    Closed(String),

    /// The backend is unreachable or refused the request. Retryable.
    #[error("backend error: {0}")]
    Backend(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
