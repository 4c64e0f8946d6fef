use serde::{Deserialize, Serialize};

/// Bounds applied while building a snapshot tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotLimits {
    /// Deepest level kept below a frame root
    pub max_depth: usize,
    /// Children kept per node
    pub max_children: usize,
    /// Nodes kept across all frames
    pub max_nodes: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_depth: 32,
            max_children: 200,
            max_nodes: 5000,
        }
    }
}

impl SnapshotLimits {
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}
