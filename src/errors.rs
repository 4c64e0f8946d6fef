//! Error surface of the engine facade.

use action_cache::CacheError;
use action_locator::LocatorError;
use action_primitives::ActionError;
use cdp_adapter::AdapterError;
use perceiver_structural::SnapshotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(String),

    /// No page is open, or the requested one was closed
    #[error("no open page: {0}")]
    NoPage(String),
}

impl EngineError {
    /// True when the failure means the element was absent, however it surfaced.
    pub fn is_element_missing(&self) -> bool {
        match self {
            EngineError::Locator(err) => err.is_absent(),
            EngineError::Action(ActionError::Locator(err)) => err.is_absent(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absence_is_recognised_through_action_errors() {
        let missing = LocatorError::ElementNotFound("#gone".into());
        assert!(EngineError::from(missing.clone()).is_element_missing());
        assert!(EngineError::from(ActionError::from(missing)).is_element_missing());
        assert!(!EngineError::Config("bad".into()).is_element_missing());
        assert!(EngineError::from(CacheError::Timeout(10))
            .to_string()
            .contains("10ms"));
    }
}
