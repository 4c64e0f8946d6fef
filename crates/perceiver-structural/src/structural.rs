use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use action_locator::{frame_offset, BoundingBox};
use async_trait::async_trait;
use cdp_adapter::{CdpSession, FrameId, Page, PageId, RawEvent, SessionId};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::StructuralPerceiver;
use crate::cache::SnapshotCache;
use crate::dom::DomIndex;
use crate::errors::SnapshotError;
use crate::interactive::is_interactable;
use crate::limits::SnapshotLimits;
use crate::metrics;
use crate::model::{AxNode, FrameSnapshot, SkippedFrame, Snapshot, SnapshotId};

pub struct StructuralPerceiverImpl {
    limits: SnapshotLimits,
    snapshot_cache: SnapshotCache,
}

impl StructuralPerceiverImpl {
    pub fn new(limits: SnapshotLimits) -> Self {
        Self {
            limits,
            snapshot_cache: SnapshotCache::new(Duration::from_secs(1)),
        }
    }

    /// Reuse window for snapshots of an unchanged frame tree; zero disables reuse.
    pub fn with_cache_ttl(self, ttl: Duration) -> Self {
        self.snapshot_cache.set_ttl(ttl);
        self
    }

    pub fn limits(&self) -> &SnapshotLimits {
        &self.limits
    }

    /// Drops cached snapshots of `page`.
    pub fn invalidate(&self, page: &PageId) {
        self.snapshot_cache.invalidate(page.as_str());
    }

    /// Invalidates a page whenever the adapter reports it closed or one of its frames gone
    /// or navigated. The task ends when the bus closes or the perceiver is dropped.
    pub fn follow_events(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<RawEvent>,
    ) -> JoinHandle<()> {
        let perceiver = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(perceiver) = perceiver.upgrade() else {
                    break;
                };
                match event {
                    Ok(RawEvent::PageClosed { page, .. })
                    | Ok(RawEvent::FrameNavigated { page, .. })
                    | Ok(RawEvent::FrameDetached { page, .. }) => perceiver.invalidate(&page),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "event bus lagged, dropping every cached snapshot");
                        perceiver.snapshot_cache.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for StructuralPerceiverImpl {
    fn default() -> Self {
        Self::new(SnapshotLimits::default())
    }
}

#[async_trait]
impl StructuralPerceiver for StructuralPerceiverImpl {
    async fn snapshot(&self, page: &Arc<Page>) -> Result<Snapshot, SnapshotError> {
        let started = Instant::now();
        let frames = frame_state(page);
        if let Some(hit) = self.snapshot_cache.get(page.id().as_str(), &frames) {
            metrics::record_snapshot(true, started.elapsed());
            return Ok(hit);
        }

        let snapshot = capture(page, &self.limits).await?;
        metrics::record_snapshot(false, started.elapsed());
        if snapshot.truncated {
            metrics::record_truncation();
        }
        self.snapshot_cache
            .put(page.id().as_str(), frames, snapshot.clone());
        Ok(snapshot)
    }
}

/// Changes whenever any frame attaches, detaches or navigates.
fn frame_state(page: &Page) -> String {
    let mut frames: Vec<String> = page
        .frames()
        .into_iter()
        .map(|frame| format!("{}@{}", frame.id, frame.generation))
        .collect();
    frames.sort();
    frames.join(",")
}

/// Captures the merged accessibility/DOM tree of every frame of `page`.
///
/// A frame whose accessibility tree cannot be read is listed in `skipped_frames` and the
/// capture continues with the remaining frames.
pub async fn capture(page: &Arc<Page>, limits: &SnapshotLimits) -> Result<Snapshot, SnapshotError> {
    if page.is_closed() {
        return Err(SnapshotError::PageClosed(page.id().to_string()));
    }

    let mut budget = Budget::new(*limits);
    let mut dom_indexes: HashMap<SessionId, DomIndex> = HashMap::new();
    let mut frames = Vec::new();
    let mut skipped_frames = Vec::new();

    for frame_id in frame_order(page) {
        let Some(info) = page.frame(&frame_id) else {
            continue;
        };
        let session = match page.session_for(&frame_id) {
            Ok(session) => session,
            Err(err) => {
                skipped_frames.push(SkippedFrame {
                    frame_id: frame_id.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if !dom_indexes.contains_key(&info.session) {
            let index = load_dom_index(&session, limits).await;
            dom_indexes.insert(info.session.clone(), index);
        }
        let empty = DomIndex::default();
        let dom = dom_indexes.get(&info.session).unwrap_or(&empty);

        let root = match session
            .send(
                "Accessibility.getFullAXTree",
                json!({ "frameId": frame_id.as_str() }),
            )
            .await
        {
            Ok(response) => {
                let raw = response
                    .get("nodes")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                let tree = AxTree::new(&raw);
                let mut root = tree.build_root(&frame_id, dom, &mut budget);
                if let Some(root) = root.as_mut() {
                    attach_bounds(page, &session, &frame_id, root).await;
                }
                root
            }
            Err(err) => {
                warn!(frame = %frame_id, "accessibility tree unavailable: {}", err);
                skipped_frames.push(SkippedFrame {
                    frame_id: frame_id.clone(),
                    reason: err.to_string(),
                });
                None
            }
        };

        frames.push(FrameSnapshot {
            frame_id,
            parent: info.parent,
            url: info.url,
            out_of_process: info.out_of_process,
            root,
        });
    }

    debug!(
        page = %page.id(),
        frames = frames.len(),
        nodes = budget.count,
        truncated = budget.reason.is_some(),
        "snapshot captured"
    );

    Ok(Snapshot {
        id: SnapshotId::new(),
        captured_at: Utc::now(),
        page: page.id().clone(),
        url: page.url(),
        frames,
        node_count: budget.count,
        truncated: budget.reason.is_some(),
        truncation_reason: budget.reason,
        skipped_frames,
    })
}

/// Main frame, then children depth-first.
fn frame_order(page: &Page) -> Vec<FrameId> {
    let mut order = Vec::new();
    let mut stack = vec![page.main_frame()];
    while let Some(frame) = stack.pop() {
        let mut children = page.child_frames(&frame);
        children.reverse();
        stack.extend(children);
        order.push(frame);
    }
    order
}

/// The document walk stops one level past `max_depth`; deeper nodes carry no attributes.
async fn load_dom_index(session: &CdpSession, limits: &SnapshotLimits) -> DomIndex {
    let depth = limits.max_depth + 1;
    match session
        .send("DOM.getDocument", json!({ "depth": depth, "pierce": true }))
        .await
    {
        Ok(response) => DomIndex::from_document(response.get("root").unwrap_or(&Value::Null)),
        Err(err) => {
            warn!("dom tree unavailable, snapshot carries no attributes: {}", err);
            DomIndex::default()
        }
    }
}

/// Fills `bounds` on interactable nodes, in main-frame coordinates.
async fn attach_bounds(page: &Page, session: &CdpSession, frame: &FrameId, root: &mut AxNode) {
    let wanted: Vec<i64> = root
        .walk()
        .into_iter()
        .filter(|node| is_interactable(node))
        .filter_map(|node| node.backend_node_id)
        .collect();
    if wanted.is_empty() {
        return;
    }

    let (dx, dy) = match frame_offset(page, frame).await {
        Ok(offset) => offset,
        Err(err) => {
            warn!(frame = %frame, "frame offset unavailable, skipping geometry: {}", err);
            return;
        }
    };

    let mut boxes = HashMap::new();
    for backend in wanted {
        let Ok(model) = session
            .send("DOM.getBoxModel", json!({ "backendNodeId": backend }))
            .await
        else {
            continue;
        };
        let quad = model
            .get("model")
            .and_then(|m| m.get("content"))
            .and_then(|q| serde_json::from_value::<Vec<f64>>(q.clone()).ok());
        if let Some(bbox) = quad.as_deref().and_then(BoundingBox::from_quad) {
            boxes.insert(backend, bbox.translate(dx, dy));
        }
    }
    assign_bounds(root, &boxes);
}

fn assign_bounds(node: &mut AxNode, boxes: &HashMap<i64, BoundingBox>) {
    if let Some(backend) = node.backend_node_id {
        if let Some(bbox) = boxes.get(&backend) {
            node.bounds = Some(*bbox);
        }
    }
    for child in node.children.iter_mut() {
        assign_bounds(child, boxes);
    }
}

/// Node allowance shared by every frame of one capture.
struct Budget {
    limits: SnapshotLimits,
    count: usize,
    reason: Option<String>,
}

impl Budget {
    fn new(limits: SnapshotLimits) -> Self {
        Self {
            limits,
            count: 0,
            reason: None,
        }
    }

    fn exhausted(&self) -> bool {
        self.count >= self.limits.max_nodes
    }

    fn truncate(&mut self, reason: String) {
        if self.reason.is_none() {
            self.reason = Some(reason);
        }
    }
}

struct AxTree<'a> {
    nodes: HashMap<&'a str, &'a Value>,
    root: Option<&'a str>,
}

impl<'a> AxTree<'a> {
    fn new(raw: &'a [Value]) -> Self {
        let mut nodes = HashMap::new();
        let mut root = None;
        for node in raw {
            let Some(id) = node.get("nodeId").and_then(|v| v.as_str()) else {
                continue;
            };
            if root.is_none() && node.get("parentId").is_none() {
                root = Some(id);
            }
            nodes.insert(id, node);
        }
        if root.is_none() {
            root = raw
                .first()
                .and_then(|node| node.get("nodeId"))
                .and_then(|v| v.as_str());
        }
        Self { nodes, root }
    }

    /// Walks the tree with an explicit stack. Ignored nodes are dropped and their children
    /// hoisted into the nearest kept ancestor; a run of hoisted levels longer than
    /// `max_depth` is cut like an over-deep subtree.
    fn build_root(&self, frame: &FrameId, dom: &DomIndex, budget: &mut Budget) -> Option<AxNode> {
        let root_id = self.root?;
        let root = self.nodes.get(root_id).copied()?;
        if budget.exhausted() {
            budget.truncate(format!("max_nodes {} reached", budget.limits.max_nodes));
            return None;
        }
        budget.count += 1;

        let limits = budget.limits;
        let mut visited: HashSet<&str> = HashSet::from([root_id]);
        // preorder: a node's parent always sits at a lower index
        let mut arena: Vec<(Option<usize>, AxNode)> = vec![(None, convert(root, frame, dom))];
        let mut kept_children: Vec<usize> = vec![0];
        let mut stack: Vec<Pending<'a>> = Vec::new();
        self.push_children(root, 0, 1, 0, &mut stack, budget);

        while let Some(item) = stack.pop() {
            if !visited.insert(item.id) {
                continue;
            }
            let Some(raw) = self.nodes.get(item.id).copied() else {
                continue;
            };
            if raw.get("ignored").and_then(|v| v.as_bool()).unwrap_or(false) {
                if item.hops >= limits.max_depth {
                    if !child_ids(raw).is_empty() {
                        budget.truncate(format!("max_depth {} exceeded", limits.max_depth));
                    }
                    continue;
                }
                self.push_children(raw, item.parent, item.depth, item.hops + 1, &mut stack, budget);
                continue;
            }

            if kept_children[item.parent] >= limits.max_children {
                budget.truncate(format!("max_children {} exceeded", limits.max_children));
                continue;
            }
            if budget.exhausted() {
                budget.truncate(format!("max_nodes {} reached", limits.max_nodes));
                continue;
            }
            budget.count += 1;
            kept_children[item.parent] += 1;

            let index = arena.len();
            arena.push((Some(item.parent), convert(raw, frame, dom)));
            kept_children.push(0);
            self.push_children(raw, index, item.depth + 1, 0, &mut stack, budget);
        }

        let mut root = None;
        while let Some((parent, mut node)) = arena.pop() {
            node.children.reverse();
            match parent {
                Some(parent) => arena[parent].1.children.push(node),
                None => root = Some(node),
            }
        }
        root
    }

    fn push_children(
        &self,
        raw: &'a Value,
        parent: usize,
        depth: usize,
        hops: usize,
        stack: &mut Vec<Pending<'a>>,
        budget: &mut Budget,
    ) {
        let ids = child_ids(raw);
        if ids.is_empty() {
            return;
        }
        if depth > budget.limits.max_depth {
            budget.truncate(format!("max_depth {} exceeded", budget.limits.max_depth));
            return;
        }
        stack.extend(ids.into_iter().rev().map(|id| Pending {
            id,
            parent,
            depth,
            hops,
        }));
    }
}

/// A raw node waiting to be visited under the kept node at `parent`.
struct Pending<'a> {
    id: &'a str,
    parent: usize,
    depth: usize,
    hops: usize,
}

fn child_ids(raw: &Value) -> Vec<&str> {
    raw.get("childIds")
        .and_then(|v| v.as_array())
        .map(|ids| ids.iter().filter_map(|id| id.as_str()).collect())
        .unwrap_or_default()
}

fn convert(raw: &Value, frame: &FrameId, dom: &DomIndex) -> AxNode {
    let backend_node_id = raw.get("backendDOMNodeId").and_then(|v| v.as_i64());
    let meta = backend_node_id.and_then(|id| dom.get(id));

    let mut properties = BTreeMap::new();
    if let Some(props) = raw.get("properties").and_then(|v| v.as_array()) {
        for prop in props {
            if let Some(name) = prop.get("name").and_then(|v| v.as_str()) {
                let value = prop
                    .get("value")
                    .and_then(|v| v.get("value"))
                    .cloned()
                    .unwrap_or(Value::Null);
                properties.insert(name.to_string(), value);
            }
        }
    }

    AxNode {
        node_id: raw
            .get("nodeId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        role: ax_value(raw, "role").unwrap_or_default(),
        name: ax_value(raw, "name"),
        value: ax_value(raw, "value"),
        description: ax_value(raw, "description"),
        properties,
        backend_node_id,
        tag_name: meta.map(|m| m.tag_name.clone()),
        attributes: meta.map(|m| m.attributes.clone()).unwrap_or_default(),
        bounds: None,
        frame_id: frame.clone(),
        children: Vec::new(),
    }
}

/// Text of an `AXValue` field; empty strings count as absent.
fn ax_value(raw: &Value, field: &str) -> Option<String> {
    let value = raw.get(field)?.get("value")?;
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Null => return None,
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactive::{ElementFilter, ElementQuery};
    use cdp_adapter::testing::{responder, TestBrowser};
    use cdp_adapter::{AdapterError, CommandTarget};

    fn ax(id: &str, parent: Option<&str>, role: &str, name: &str, backend: i64, children: &[&str]) -> Value {
        let mut node = json!({
            "nodeId": id,
            "ignored": false,
            "role": { "type": "role", "value": role },
            "name": { "type": "computedString", "value": name },
            "backendDOMNodeId": backend,
            "childIds": children,
        });
        if let Some(parent) = parent {
            node["parentId"] = json!(parent);
        }
        node
    }

    fn main_tree() -> Value {
        let mut ignored = ax("3", Some("1"), "generic", "", 12, &["4"]);
        ignored["ignored"] = json!(true);
        json!({ "nodes": [
            ax("1", None, "RootWebArea", "Shop", 10, &["2", "3"]),
            ax("2", Some("1"), "button", "Buy", 11, &[]),
            ignored,
            ax("4", Some("3"), "link", "Help", 13, &[]),
        ]})
    }

    fn document() -> Value {
        json!({ "root": {
            "nodeType": 9, "backendNodeId": 1,
            "children": [
                { "nodeType": 1, "backendNodeId": 10, "localName": "body" },
                { "nodeType": 1, "backendNodeId": 11, "localName": "button", "attributes": ["id", "buy"] },
                { "nodeType": 1, "backendNodeId": 13, "localName": "a", "attributes": ["href", "/help"] }
            ]
        }})
    }

    fn browser_responder(child_fails: bool) -> cdp_adapter::testing::Responder {
        responder(move |_: &CommandTarget, method: &str, params: &Value| match method {
            "DOM.getDocument" => Some(Ok(document())),
            "Accessibility.getFullAXTree" => match params["frameId"].as_str() {
                Some("P1") => Some(Ok(main_tree())),
                Some("child") if child_fails => {
                    Some(Err(AdapterError::protocol(-32000, "Frame with the given id was not found.")))
                }
                Some("child") => Some(Ok(json!({ "nodes": [ax("c1", None, "RootWebArea", "Ad", 20, &[])] }))),
                _ => None,
            },
            "DOM.getBoxModel" => match params["backendNodeId"].as_i64() {
                Some(11) => Some(Ok(json!({ "model": { "content": [10, 10, 50, 10, 50, 30, 10, 30] } }))),
                _ => Some(Err(AdapterError::protocol(-32000, "Could not compute box model."))),
            },
            _ => None,
        })
    }

    #[tokio::test]
    async fn merges_ax_and_dom_per_frame() {
        let browser = TestBrowser::start(browser_responder(false)).await;
        let page = browser.open_page("P1", "S1").await;
        browser.add_frame(&page, "S1", "child", "P1").await;

        let snapshot = capture(&page, &SnapshotLimits::default()).await.unwrap();
        assert!(!snapshot.truncated);
        assert!(snapshot.skipped_frames.is_empty());
        assert_eq!(snapshot.frames.len(), 2);
        assert_eq!(snapshot.frames[0].frame_id.as_str(), "P1");
        assert_eq!(snapshot.frames[1].parent.as_ref().map(FrameId::as_str), Some("P1"));

        let root = snapshot.frames[0].root.as_ref().unwrap();
        let roles: Vec<&str> = root.children.iter().map(|n| n.role.as_str()).collect();
        // the ignored generic is dropped and its link hoisted
        assert_eq!(roles, vec!["button", "link"]);

        let button = &root.children[0];
        assert_eq!(button.tag_name.as_deref(), Some("button"));
        assert_eq!(button.attributes.get("id").map(String::as_str), Some("buy"));
        assert_eq!(button.bounds.map(|b| (b.x, b.width)), Some((10.0, 40.0)));
        assert_eq!(root.children[1].attributes.get("href").map(String::as_str), Some("/help"));
        assert_eq!(snapshot.node_count, 4);

        // one document fetch for the shared session
        assert_eq!(browser.transport.sent("DOM.getDocument").len(), 1);
        assert_eq!(browser.transport.sent("DOM.getDocument")[0]["pierce"], true);
    }

    #[tokio::test]
    async fn failing_frames_are_skipped() {
        let browser = TestBrowser::start(browser_responder(true)).await;
        let page = browser.open_page("P1", "S1").await;
        browser.add_frame(&page, "S1", "child", "P1").await;

        let snapshot = capture(&page, &SnapshotLimits::default()).await.unwrap();
        assert_eq!(snapshot.skipped_frames.len(), 1);
        assert_eq!(snapshot.skipped_frames[0].frame_id.as_str(), "child");
        assert!(snapshot.frames[0].root.is_some());
        assert!(snapshot.frames[1].root.is_none());
    }

    #[tokio::test]
    async fn limits_truncate_with_a_reason() {
        let browser = TestBrowser::start(browser_responder(false)).await;
        let page = browser.open_page("P1", "S1").await;

        let limits = SnapshotLimits {
            max_children: 1,
            ..SnapshotLimits::default()
        };
        let snapshot = capture(&page, &limits).await.unwrap();
        assert!(snapshot.truncated);
        assert_eq!(snapshot.truncation_reason.as_deref(), Some("max_children 1 exceeded"));
        assert_eq!(snapshot.frames[0].root.as_ref().unwrap().children.len(), 1);
        assert_eq!(snapshot.node_count, 2);

        let shallow = capture(&page, &SnapshotLimits::default().with_max_depth(0)).await.unwrap();
        assert!(shallow.frames[0].root.as_ref().unwrap().children.is_empty());
        assert_eq!(shallow.truncation_reason.as_deref(), Some("max_depth 0 exceeded"));

        let tiny = SnapshotLimits {
            max_nodes: 2,
            ..SnapshotLimits::default()
        };
        let capped = capture(&page, &tiny).await.unwrap();
        assert_eq!(capped.node_count, 2);
        assert_eq!(capped.truncation_reason.as_deref(), Some("max_nodes 2 reached"));
    }

    fn ignored(id: &str, parent: &str, children: &[&str]) -> Value {
        let mut node = ax(id, Some(parent), "generic", "", 0, children);
        node["ignored"] = json!(true);
        node
    }

    #[tokio::test]
    async fn long_ignored_chains_are_cut_without_recursion() {
        const LINKS: usize = 20_000;
        let mut nodes = vec![ax("root", None, "RootWebArea", "Deep", 1, &["g0"])];
        for i in 0..LINKS {
            let id = format!("g{i}");
            let parent = if i == 0 { "root".to_string() } else { format!("g{}", i - 1) };
            let next = format!("g{}", i + 1);
            let children: Vec<&str> = if i + 1 < LINKS { vec![next.as_str()] } else { vec![] };
            nodes.push(ignored(&id, &parent, &children));
        }
        let tree = json!({ "nodes": nodes });

        let browser = TestBrowser::start(responder(move |_: &CommandTarget, method: &str, _: &Value| {
            match method {
                "Accessibility.getFullAXTree" => Some(Ok(tree.clone())),
                _ => None,
            }
        }))
        .await;
        let page = browser.open_page("P1", "S1").await;

        let snapshot = capture(&page, &SnapshotLimits::default()).await.unwrap();
        assert!(snapshot.truncated);
        assert_eq!(snapshot.truncation_reason.as_deref(), Some("max_depth 32 exceeded"));
        assert_eq!(snapshot.node_count, 1);
        assert!(snapshot.frames[0].root.as_ref().unwrap().children.is_empty());

        // the document walk is bounded too
        assert_eq!(browser.transport.sent("DOM.getDocument")[0]["depth"], 33);
    }

    #[tokio::test]
    async fn cyclic_child_ids_visit_each_node_once() {
        let tree = json!({ "nodes": [
            ax("1", None, "RootWebArea", "Loop", 1, &["2", "2"]),
            ax("2", Some("1"), "button", "Again", 2, &["1", "3"]),
            ignored("3", "2", &["3", "4"]),
            ax("4", Some("3"), "link", "Out", 4, &["2"]),
        ]});
        let browser = TestBrowser::start(responder(move |_: &CommandTarget, method: &str, _: &Value| {
            match method {
                "Accessibility.getFullAXTree" => Some(Ok(tree.clone())),
                _ => None,
            }
        }))
        .await;
        let page = browser.open_page("P1", "S1").await;

        let snapshot = capture(&page, &SnapshotLimits::default()).await.unwrap();
        assert!(!snapshot.truncated);
        assert_eq!(snapshot.node_count, 3);
        let root = snapshot.frames[0].root.as_ref().unwrap();
        assert_eq!(root.children.len(), 1);
        let button = &root.children[0];
        assert_eq!(button.role, "button");
        let below: Vec<&str> = button.children.iter().map(|n| n.role.as_str()).collect();
        assert_eq!(below, vec!["link"]);
        assert!(button.children[0].children.is_empty());
    }

    #[tokio::test]
    async fn repeated_snapshots_reuse_the_cached_tree() {
        let browser = TestBrowser::start(browser_responder(false)).await;
        let page = browser.open_page("P1", "S1").await;
        let perceiver = StructuralPerceiverImpl::default();

        let first = perceiver.snapshot(&page).await.unwrap();
        let second = perceiver.snapshot(&page).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(browser.transport.sent("Accessibility.getFullAXTree").len(), 1);

        let uncached = StructuralPerceiverImpl::default().with_cache_ttl(Duration::ZERO);
        perceiver.invalidate(page.id());
        perceiver.snapshot(&page).await.unwrap();
        assert_eq!(browser.transport.sent("Accessibility.getFullAXTree").len(), 2);

        let a = uncached.snapshot(&page).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        let b = uncached.snapshot(&page).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn bus_events_drop_cached_snapshots() {
        let browser = TestBrowser::start(browser_responder(false)).await;
        let page = browser.open_page("P1", "S1").await;
        let perceiver =
            Arc::new(StructuralPerceiverImpl::default().with_cache_ttl(Duration::from_secs(60)));
        let follower = perceiver.follow_events(browser.adapter.subscribe());

        perceiver.snapshot(&page).await.unwrap();
        assert_eq!(perceiver.snapshot_cache.len(), 1);

        browser
            .emit(
                "Page.frameNavigated",
                Some("S1"),
                json!({ "frame": { "id": "P1", "url": "https://example.test/next" } }),
            )
            .await;
        for _ in 0..100 {
            if perceiver.snapshot_cache.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(perceiver.snapshot_cache.is_empty());

        drop(perceiver);
        browser
            .emit(
                "Page.frameNavigated",
                Some("S1"),
                json!({ "frame": { "id": "P1", "url": "https://example.test/last" } }),
            )
            .await;
        tokio::time::timeout(Duration::from_secs(1), follower)
            .await
            .expect("follower stops once the perceiver is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn interactive_elements_are_listed_by_type() {
        let browser = TestBrowser::start(browser_responder(false)).await;
        let page = browser.open_page("P1", "S1").await;
        let perceiver = StructuralPerceiverImpl::default();

        let all = perceiver
            .interactive_elements(&page, &ElementQuery::default())
            .await
            .unwrap();
        let tags: Vec<_> = all.elements.iter().map(|el| el.label().to_string()).collect();
        assert_eq!(tags, vec!["button", "a"]);
        assert_eq!(all.pagination.total_pages, 1);

        let links = ElementQuery {
            element_type: ElementFilter::Link,
            ..ElementQuery::default()
        };
        let listed = perceiver.interactive_elements(&page, &links).await.unwrap();
        assert_eq!(listed.elements.len(), 1);
        assert_eq!(listed.elements[0].index, 2);
        assert_eq!(listed.elements[0].name.as_deref(), Some("Help"));

        let bad = ElementQuery {
            page_size: 500,
            ..ElementQuery::default()
        };
        let sent = browser.transport.sent("Accessibility.getFullAXTree").len();
        assert!(perceiver.interactive_elements(&page, &bad).await.is_err());
        assert_eq!(browser.transport.sent("Accessibility.getFullAXTree").len(), sent);
    }
}
