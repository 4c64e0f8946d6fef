//! Error types for selector resolution

use cdp_adapter::{AdapterError, AdapterErrorKind};
use thiserror::Error;

/// Locator error enumeration
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// Selector resolved to zero elements, or the index is out of range
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Element is attached but fails the visibility predicate
    #[error("Element not visible: {0}")]
    ElementNotVisible(String),

    /// An intermediate `>>` hop did not resolve to exactly one frame element
    #[error("Frame hop '{hop}' matched {matches} frame elements, expected exactly one")]
    FrameHop { hop: String, matches: usize },

    /// Selector string could not be parsed or was rejected by the page
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    /// The frame navigated or detached while resolving
    #[error("Stale frame: {0}")]
    StaleFrame(String),

    /// Timeout while resolving or waiting
    #[error("Resolution timeout: {0}")]
    Timeout(String),

    /// Wait was cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// CDP communication error
    #[error("CDP error: {0}")]
    Cdp(#[from] AdapterError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LocatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            LocatorError::Timeout(_) | LocatorError::StaleFrame(_) => true,
            LocatorError::Cdp(err) => err.retriable,
            _ => false,
        }
    }

    /// True when the selector simply had nothing to match.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            LocatorError::ElementNotFound(_) | LocatorError::FrameHop { matches: 0, .. }
        )
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            LocatorError::Internal(_) => 3,
            LocatorError::Cdp(_) | LocatorError::Timeout(_) => 2,
            LocatorError::ElementNotFound(_)
            | LocatorError::ElementNotVisible(_)
            | LocatorError::FrameHop { .. }
            | LocatorError::StaleFrame(_) => 1,
            _ => 0,
        }
    }
}

/// Frame detachment and lost contexts surface as stale-frame errors.
pub(crate) fn from_adapter(err: AdapterError) -> LocatorError {
    match err.kind {
        AdapterErrorKind::FrameDetached => {
            LocatorError::StaleFrame(err.hint.unwrap_or_else(|| "frame detached".to_string()))
        }
        AdapterErrorKind::Timeout => LocatorError::Timeout(err.to_string()),
        _ => LocatorError::Cdp(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_match_hops_count_as_absent() {
        assert!(LocatorError::FrameHop {
            hop: "iframe".into(),
            matches: 0
        }
        .is_absent());
        assert!(!LocatorError::FrameHop {
            hop: "iframe".into(),
            matches: 2
        }
        .is_absent());
        assert!(LocatorError::ElementNotFound("x".into()).is_absent());
    }

    #[test]
    fn detached_frames_map_to_stale_frame() {
        let err = from_adapter(
            AdapterError::new(AdapterErrorKind::FrameDetached).with_hint("frame F gone"),
        );
        assert!(matches!(err, LocatorError::StaleFrame(ref msg) if msg == "frame F gone"));
        assert!(err.is_retryable());
    }
}
