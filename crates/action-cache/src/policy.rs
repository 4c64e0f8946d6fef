use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime switches for [`ActCache`](crate::ActCache).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// When off every call goes straight to the planner and nothing is stored
    pub enabled: bool,
    /// Re-resolve failing replay steps through the planner
    pub self_heal: bool,
    pub dir: PathBuf,
    /// Deadline for one `act` call unless the request carries its own
    pub timeout_ms: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            self_heal: true,
            dir: PathBuf::from(".pagewright/cache"),
            timeout_ms: 60_000,
        }
    }
}

impl CachePolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
