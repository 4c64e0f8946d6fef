use cdp_adapter::{AdapterError, AdapterErrorKind};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum SnapshotError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("page closed: {0}")]
    PageClosed(String),
    #[error("snapshot timeout: {0}")]
    Timeout(String),
    #[error("cdp error: {0}")]
    Cdp(AdapterError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl SnapshotError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<AdapterError> for SnapshotError {
    fn from(err: AdapterError) -> Self {
        match err.kind {
            AdapterErrorKind::Timeout => SnapshotError::Timeout(err.to_string()),
            AdapterErrorKind::SessionClosed => SnapshotError::PageClosed(err.to_string()),
            _ => SnapshotError::Cdp(err),
        }
    }
}
