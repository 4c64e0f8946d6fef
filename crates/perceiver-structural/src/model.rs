use std::collections::BTreeMap;

use action_locator::BoundingBox;
use cdp_adapter::{FrameId, PageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub String);

impl SnapshotId {
    pub fn new() -> Self {
        SnapshotId(Uuid::new_v4().to_string())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

/// One accessibility node merged with the DOM data of its backing element.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AxNode {
    pub node_id: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// AX properties such as `focusable`, `checked` or `disabled`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<i64>,
    /// Lower-case tag of the backing element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Content box in main-frame page coordinates, captured for interactable nodes only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<BoundingBox>,
    pub frame_id: FrameId,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AxNode>,
}

impl AxNode {
    /// Depth-first iteration over this node and its descendants.
    pub fn walk(&self) -> Vec<&AxNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn is_disabled(&self) -> bool {
        self.properties
            .get("disabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub frame_id: FrameId,
    pub parent: Option<FrameId>,
    pub url: String,
    pub out_of_process: bool,
    pub root: Option<AxNode>,
}

/// Frame left out of a snapshot, with the failure that caused it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedFrame {
    pub frame_id: FrameId,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub captured_at: DateTime<Utc>,
    pub page: PageId,
    pub url: String,
    /// Main frame first, then children depth-first
    pub frames: Vec<FrameSnapshot>,
    pub node_count: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation_reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub skipped_frames: Vec<SkippedFrame>,
}

impl Snapshot {
    pub fn nodes(&self) -> impl Iterator<Item = &AxNode> {
        self.frames
            .iter()
            .filter_map(|frame| frame.root.as_ref())
            .flat_map(|root| root.walk())
    }
}
