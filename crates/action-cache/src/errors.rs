use action_primitives::ActionError;
use thiserror::Error;

#[derive(Clone, Debug, Error)]
pub enum CacheError {
    /// Stored document is unreadable or carries another schema version. Lookups treat it as a
    /// miss.
    #[error("cache schema mismatch: {0}")]
    Schema(String),
    #[error("cache io failure: {0}")]
    Io(String),
    #[error("act timed out after {0}ms")]
    Timeout(u64),
    #[error("planner failed: {0}")]
    Planner(String),
    #[error("action failed: {0}")]
    Action(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl CacheError {
    pub fn is_schema(&self) -> bool {
        matches!(self, CacheError::Schema(_))
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

impl From<ActionError> for CacheError {
    fn from(err: ActionError) -> Self {
        CacheError::Action(err.to_string())
    }
}
