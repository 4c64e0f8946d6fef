//! Element metadata indexed by backend node id, read from a pierced `DOM.getDocument` tree.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct DomMeta {
    pub tag_name: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub(crate) struct DomIndex {
    metadata: HashMap<i64, DomMeta>,
}

impl DomIndex {
    /// Indexes every element reachable from `root`, including shadow trees and same-process
    /// frame documents.
    pub fn from_document(root: &Value) -> Self {
        let mut metadata = HashMap::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if node.get("nodeType").and_then(|v| v.as_u64()) == Some(1) {
                if let Some(backend) = node.get("backendNodeId").and_then(|v| v.as_i64()) {
                    metadata.insert(backend, Self::extract(node));
                }
            }
            for key in ["children", "shadowRoots", "pseudoElements"] {
                if let Some(children) = node.get(key).and_then(|v| v.as_array()) {
                    stack.extend(children.iter());
                }
            }
            for key in ["contentDocument", "templateContent"] {
                if let Some(child) = node.get(key) {
                    stack.push(child);
                }
            }
        }
        Self { metadata }
    }

    fn extract(node: &Value) -> DomMeta {
        let tag_name = node
            .get("localName")
            .or_else(|| node.get("nodeName"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut attributes = BTreeMap::new();
        if let Some(flat) = node.get("attributes").and_then(|v| v.as_array()) {
            for pair in flat.chunks(2) {
                if let [name, value] = pair {
                    if let Some(name) = name.as_str() {
                        attributes.insert(
                            name.to_string(),
                            value.as_str().unwrap_or_default().to_string(),
                        );
                    }
                }
            }
        }
        DomMeta {
            tag_name,
            attributes,
        }
    }

    pub fn get(&self, backend_node_id: i64) -> Option<&DomMeta> {
        self.metadata.get(&backend_node_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.metadata.len()
    }
}
