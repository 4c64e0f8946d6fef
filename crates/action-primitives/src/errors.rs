//! Error types for action primitives

use action_locator::LocatorError;
use cdp_adapter::{AdapterError, AdapterErrorKind};
use thiserror::Error;

/// Comprehensive error types for action primitive operations
#[derive(Debug, Error, Clone)]
pub enum ActionError {
    /// Target element could not be resolved
    #[error(transparent)]
    Locator(#[from] LocatorError),

    /// Element resolved but has no layout box to act on
    #[error("Element not visible: {0}")]
    NotVisible(String),

    /// Element cannot take text input
    #[error("Element not editable: {0}")]
    NotEditable(String),

    /// Unknown key name inside `{...}`
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Argument outside its accepted range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The action did not finish before its deadline
    #[error("Action timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled or interrupted
    #[error("Operation interrupted: {0}")]
    Interrupted(String),

    /// CDP communication or protocol error
    #[error("CDP error: {0}")]
    Cdp(AdapterError),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AdapterError> for ActionError {
    fn from(err: AdapterError) -> Self {
        match err.kind {
            AdapterErrorKind::Timeout => ActionError::Timeout(err.to_string()),
            AdapterErrorKind::FrameDetached => {
                ActionError::Locator(LocatorError::StaleFrame(err.to_string()))
            }
            _ => ActionError::Cdp(err),
        }
    }
}

impl ActionError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ActionError::Locator(err) => err.is_retryable(),
            ActionError::NotVisible(_) | ActionError::Timeout(_) => true,
            ActionError::Cdp(err) => err.retriable,
            _ => false,
        }
    }

    /// Get error severity level (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            ActionError::Internal(_) => 3,
            ActionError::Cdp(_) | ActionError::Timeout(_) => 2,
            ActionError::Locator(err) => err.severity(),
            ActionError::NotVisible(_) | ActionError::NotEditable(_) => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_timeouts_become_action_timeouts() {
        let err: ActionError =
            AdapterError::timeout("Input.dispatchKeyEvent", std::time::Duration::from_secs(1))
                .into();
        assert!(matches!(err, ActionError::Timeout(_)));
        assert!(err.is_retryable());

        let err: ActionError = AdapterError::protocol(-32000, "No node").into();
        assert!(matches!(err, ActionError::Cdp(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn locator_errors_keep_their_severity() {
        let err = ActionError::from(LocatorError::ElementNotFound("#x".into()));
        assert_eq!(err.severity(), 1);
        assert_eq!(err.to_string(), "Element not found: #x");
    }
}
