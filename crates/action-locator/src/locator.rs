//! Lazy element locators.
//!
//! A [`Locator`] stores a page, a frame and a parsed selector. Nothing is resolved until an
//! operation runs, and every operation queries the live document again, so a locator survives
//! navigations and re-renders that would invalidate an element handle.

use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::remote::{self, CallArg, CallTarget};
use cdp_adapter::{AdapterError, AdapterErrorKind, CdpSession, FrameId, Page};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{from_adapter, LocatorError};
use crate::handle::ElementHandle;
use crate::scripts;
use crate::selector::{Selector, SelectorKind, SelectorPart};
use crate::types::{MatchIndex, WaitOptions};
use crate::wait;

/// Attempts made when the frame navigates in the middle of a query.
const MAX_ATTEMPTS: usize = 3;

/// Selector bound to a page and frame, resolved on every call.
#[derive(Clone)]
pub struct Locator {
    page: Arc<Page>,
    frame: FrameId,
    selector: Selector,
    index: MatchIndex,
    pierce_shadow: bool,
    timeout: Duration,
}

impl Locator {
    /// Locator scoped to the page's main frame.
    pub fn new(page: Arc<Page>, selector: Selector) -> Self {
        let frame = page.main_frame();
        let timeout = page.session().default_timeout();
        Self {
            page,
            frame,
            selector,
            index: MatchIndex::default(),
            pierce_shadow: true,
            timeout,
        }
    }

    pub fn parse(page: Arc<Page>, selector: &str) -> Result<Self, LocatorError> {
        Ok(Self::new(page, Selector::parse(selector)?))
    }

    /// Rescopes the locator to `frame`. Queries never leave that frame's document.
    pub fn in_frame(mut self, frame: FrameId) -> Self {
        self.frame = frame;
        self
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.index = MatchIndex::Nth(index);
        self
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }

    pub fn last(mut self) -> Self {
        self.index = MatchIndex::Last;
        self
    }

    pub fn with_pierce_shadow(mut self, pierce: bool) -> Self {
        self.pierce_shadow = pierce;
        self
    }

    /// Bound on waiting for an execution context during a single query.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn frame(&self) -> &FrameId {
        &self.frame
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn index(&self) -> MatchIndex {
        self.index
    }

    pub fn pierce_shadow(&self) -> bool {
        self.pierce_shadow
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of matches in the target frame. Child frames are never counted.
    pub async fn count(&self) -> Result<usize, LocatorError> {
        let matches = self.query().await?;
        let count = matches.kept.len();
        matches.release().await;
        Ok(count)
    }

    /// Every match, in document order.
    pub async fn all(&self) -> Result<Vec<ElementHandle>, LocatorError> {
        let matches = self.query().await?;
        let elements = remote::array_elements(&matches.session, &matches.array_id).await;
        let handles = elements.map(|elements| {
            matches
                .kept
                .iter()
                .filter_map(|&i| elements.get(i))
                .filter_map(|object| object.object_id.clone())
                .map(|object_id| matches.handle(&self.page, object_id))
                .collect::<Vec<_>>()
        });
        matches.release().await;
        handles.map_err(from_adapter)
    }

    /// The element picked by this locator's index.
    pub async fn resolve(&self) -> Result<ElementHandle, LocatorError> {
        let matches = self.query().await?;
        let result = match matches.pick(self.index) {
            Some(position) => matches.element_at(&self.page, position).await,
            None => Err(self.not_found(matches.kept.len())),
        };
        matches.release().await;
        result
    }

    /// Like [`resolve`](Self::resolve) but absence is `None` rather than an error.
    pub async fn resolve_optional(&self) -> Result<Option<ElementHandle>, LocatorError> {
        match self.resolve().await {
            Ok(handle) => Ok(Some(handle)),
            Err(err) if err.is_absent() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Polls until the element reaches `options.state`.
    pub async fn wait_for(
        &self,
        options: &WaitOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<ElementHandle>, LocatorError> {
        wait::wait_for_locator(self, options, cancel).await
    }

    fn not_found(&self, matched: usize) -> LocatorError {
        if matched == 0 {
            LocatorError::ElementNotFound(format!("no element matches '{}'", self.selector))
        } else {
            LocatorError::ElementNotFound(format!(
                "'{}' matched {matched} elements, index {:?} is out of range",
                self.selector, self.index
            ))
        }
    }

    async fn query(&self) -> Result<Matches, LocatorError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.query_once().await {
                Err(LocatorError::StaleFrame(reason)) if attempt < MAX_ATTEMPTS => {
                    debug!(
                        target: "action-locator",
                        selector = %self.selector,
                        attempt,
                        %reason,
                        "frame changed during query; retrying"
                    );
                }
                other => return other,
            }
        }
    }

    async fn query_once(&self) -> Result<Matches, LocatorError> {
        let mut frame = self.frame.clone();
        for hop in self.selector.frame_hops() {
            frame = self.enter_frame(&frame, hop).await?;
        }
        self.query_in(&frame, self.selector.target()).await
    }

    /// Resolves one `>>` hop to the frame hosted by its single frame element.
    async fn enter_frame(&self, frame: &FrameId, hop: &SelectorPart) -> Result<FrameId, LocatorError> {
        let matches = self.query_in(frame, hop).await?;
        if matches.kept.len() != 1 {
            let found = matches.kept.len();
            matches.release().await;
            return Err(LocatorError::FrameHop {
                hop: hop.raw.clone(),
                matches: found,
            });
        }

        let element = matches.element_at(&self.page, matches.kept[0]).await;
        matches.release().await;
        let element = element?;

        let tag = element.tag_name().await;
        let child = match tag {
            Ok(tag) if tag == "iframe" || tag == "frame" => element.content_frame().await,
            Ok(_) => {
                element.release().await;
                return Err(LocatorError::FrameHop {
                    hop: hop.raw.clone(),
                    matches: 0,
                });
            }
            Err(err) => Err(err),
        };
        element.release().await;

        let child = child?.ok_or_else(|| {
            LocatorError::StaleFrame(format!("'{}' has no content document yet", hop.raw))
        })?;
        if self.page.frame(&child).is_none() {
            return Err(LocatorError::StaleFrame(format!(
                "frame {child} behind '{}' is not attached yet",
                hop.raw
            )));
        }
        debug!(target: "action-locator", hop = %hop.raw, frame = %child, "entered frame");
        Ok(child)
    }

    async fn query_in(&self, frame: &FrameId, part: &SelectorPart) -> Result<Matches, LocatorError> {
        let generation = self
            .page
            .frame_generation(frame)
            .ok_or_else(|| LocatorError::StaleFrame(format!("frame {frame} detached")))?;
        let (session, context) = self
            .page
            .execution_context(frame, self.timeout)
            .await
            .map_err(from_adapter)?;

        let array = remote::call_function_on(
            &session,
            &CallTarget::Context(context),
            scripts::QUERY_ALL,
            &[
                CallArg::Value(Value::from(part.kind.as_str())),
                CallArg::Value(Value::from(part.query.as_str())),
                CallArg::Value(Value::Bool(self.pierce_shadow)),
            ],
            false,
        )
        .await
        .map_err(|err| query_error(part, err))?;
        let array_id = array.object_id.ok_or_else(|| {
            LocatorError::Internal(format!("query for '{}' returned no array", part.raw))
        })?;

        let mut matches = Matches {
            session,
            array_id,
            kept: Vec::new(),
            frame: frame.clone(),
            generation,
        };
        match matches.filter(part.kind).await {
            Ok(kept) => matches.kept = kept,
            Err(err) => {
                matches.release().await;
                return Err(err);
            }
        }

        if self.page.frame_generation(frame) != Some(generation) {
            matches.release().await;
            return Err(LocatorError::StaleFrame(format!(
                "frame {frame} navigated while resolving '{}'",
                part.raw
            )));
        }
        Ok(matches)
    }
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locator")
            .field("page", self.page.id())
            .field("frame", &self.frame)
            .field("selector", &self.selector.raw())
            .field("index", &self.index)
            .field("pierce_shadow", &self.pierce_shadow)
            .finish()
    }
}

/// Page-side result array plus the positions that survived filtering.
struct Matches {
    session: Arc<CdpSession>,
    array_id: String,
    kept: Vec<usize>,
    frame: FrameId,
    generation: u64,
}

impl Matches {
    async fn filter(&self, kind: SelectorKind) -> Result<Vec<usize>, LocatorError> {
        let target = CallTarget::Object(self.array_id.clone());
        if kind == SelectorKind::Text {
            let paths = remote::call_function_on(&self.session, &target, scripts::ELEMENT_PATHS, &[], true)
                .await
                .map_err(from_adapter)?
                .value_or_null();
            let paths: Vec<Vec<u32>> = serde_json::from_value(paths)
                .map_err(|err| LocatorError::Internal(format!("malformed element paths: {err}")))?;
            return Ok(innermost(&paths));
        }

        let length = remote::call_function_on(&self.session, &target, scripts::LENGTH, &[], true)
            .await
            .map_err(from_adapter)?
            .value_or_null()
            .as_u64()
            .unwrap_or(0) as usize;
        Ok((0..length).collect())
    }

    fn pick(&self, index: MatchIndex) -> Option<usize> {
        match index {
            MatchIndex::Nth(n) => self.kept.get(n).copied(),
            MatchIndex::Last => self.kept.last().copied(),
        }
    }

    async fn element_at(&self, page: &Arc<Page>, position: usize) -> Result<ElementHandle, LocatorError> {
        let element = remote::call_function_on(
            &self.session,
            &CallTarget::Object(self.array_id.clone()),
            scripts::ELEMENT_AT,
            &[CallArg::Value(Value::from(position))],
            false,
        )
        .await
        .map_err(from_adapter)?;
        let object_id = element
            .object_id
            .ok_or_else(|| LocatorError::ElementNotFound(format!("element {position} vanished")))?;
        Ok(self.handle(page, object_id))
    }

    fn handle(&self, page: &Arc<Page>, object_id: String) -> ElementHandle {
        ElementHandle::new(
            Arc::clone(page),
            self.frame.clone(),
            Arc::clone(&self.session),
            object_id,
            self.generation,
        )
    }

    async fn release(self) {
        remote::release_object(&self.session, &self.array_id).await;
    }
}

/// Page-side exceptions during a query mean the page rejected the selector.
fn query_error(part: &SelectorPart, err: AdapterError) -> LocatorError {
    if err.kind == AdapterErrorKind::Evaluation {
        let detail = err.hint.unwrap_or_else(|| "rejected by the page".to_string());
        return LocatorError::InvalidSelector(format!("'{}': {detail}", part.raw));
    }
    from_adapter(err)
}

/// Positions of candidates that have no other candidate beneath them.
///
/// Paths are composed-tree child indices; a strict prefix means ancestor.
pub(crate) fn innermost(paths: &[Vec<u32>]) -> Vec<usize> {
    (0..paths.len())
        .filter(|&i| {
            !paths.iter().enumerate().any(|(j, other)| {
                j != i && other.len() > paths[i].len() && other.starts_with(&paths[i])
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_adapter::testing::{responder, TestBrowser};
    use cdp_adapter::CommandTarget;
    use serde_json::json;
    use std::collections::HashMap;

    /// Canned query results: selector query -> composed-tree paths of its matches.
    fn fake_dom(entries: &[(&str, Vec<Vec<u32>>)]) -> cdp_adapter::testing::Responder {
        let dom: HashMap<String, Vec<Vec<u32>>> = entries
            .iter()
            .map(|(query, paths)| (query.to_string(), paths.clone()))
            .collect();

        responder(move |_: &CommandTarget, method: &str, params: &Value| {
            match method {
                "Runtime.callFunctionOn" => {
                    let decl = params["functionDeclaration"].as_str().unwrap_or_default();
                    let object = params["objectId"].as_str().unwrap_or_default();
                    if decl == scripts::QUERY_ALL {
                        let query = params["arguments"][1]["value"].as_str().unwrap_or_default();
                        if query.starts_with("[[") {
                            return Some(Ok(json!({
                                "result": { "type": "object", "subtype": "error" },
                                "exceptionDetails": {
                                    "text": "Uncaught",
                                    "exception": { "description": "SyntaxError: not a valid selector" }
                                }
                            })));
                        }
                        return Some(Ok(json!({
                            "result": { "type": "object", "subtype": "array", "objectId": format!("arr:{query}") }
                        })));
                    }
                    let query = object.strip_prefix("arr:").unwrap_or_default();
                    let paths = dom.get(query).cloned().unwrap_or_default();
                    if decl == scripts::ELEMENT_PATHS {
                        return Some(Ok(json!({ "result": { "type": "object", "value": paths } })));
                    }
                    if decl == scripts::LENGTH {
                        return Some(Ok(json!({ "result": { "type": "number", "value": paths.len() } })));
                    }
                    if decl == scripts::ELEMENT_AT {
                        let index = params["arguments"][0]["value"].as_u64().unwrap_or(0);
                        return Some(Ok(json!({
                            "result": { "type": "object", "subtype": "node", "objectId": format!("el:{query}:{index}") }
                        })));
                    }
                    if decl == scripts::TAG_NAME {
                        let tag = if object.starts_with("el:iframe") { "IFRAME" } else { "DIV" };
                        return Some(Ok(json!({ "result": { "type": "string", "value": tag } })));
                    }
                    None
                }
                "Runtime.getProperties" => {
                    let object = params["objectId"].as_str().unwrap_or_default();
                    let query = object.strip_prefix("arr:").unwrap_or_default();
                    let len = dom.get(query).map(Vec::len).unwrap_or(0);
                    let props: Vec<Value> = (0..len)
                        .map(|i| json!({ "name": i.to_string(), "value": { "type": "object", "objectId": format!("el:{query}:{i}") } }))
                        .collect();
                    Some(Ok(json!({ "result": props })))
                }
                "DOM.describeNode" => Some(Ok(json!({
                    "node": { "backendNodeId": 7, "nodeName": "IFRAME", "frameId": "child" }
                }))),
                _ => None,
            }
        })
    }

    #[test]
    fn innermost_drops_ancestors() {
        // html > body > div > span
        let paths = vec![vec![1], vec![1, 2], vec![1, 2, 1], vec![1, 2, 1, 1]];
        assert_eq!(innermost(&paths), vec![3]);

        // Sibling leaves both survive, in order.
        let paths = vec![vec![1, 2], vec![1, 2, 1], vec![1, 2, 3]];
        assert_eq!(innermost(&paths), vec![1, 2]);

        // [1, 2, 1] is not an ancestor of [1, 2, 10].
        let paths = vec![vec![1, 2, 1], vec![1, 2, 10]];
        assert_eq!(innermost(&paths), vec![0, 1]);

        // Shadow content sits below its host through the 0 marker.
        let paths = vec![vec![1, 2, 1], vec![1, 2, 1, 0, 1]];
        assert_eq!(innermost(&paths), vec![1]);
    }

    #[tokio::test]
    async fn text_selectors_count_innermost_only() {
        let browser = TestBrowser::start(fake_dom(&[
            ("World", vec![vec![1], vec![1, 2], vec![1, 2, 1], vec![1, 2, 1, 1]]),
            ("Hello World", vec![vec![1], vec![1, 2], vec![1, 2, 1]]),
        ]))
        .await;
        let page = browser.open_page("P1", "S1").await;

        let world = Locator::parse(page.clone(), "text=World").unwrap();
        assert_eq!(world.count().await.unwrap(), 1);
        assert_eq!(world.resolve().await.unwrap().object_id(), "el:World:3");

        let both = Locator::parse(page, "text=Hello World").unwrap();
        assert_eq!(both.count().await.unwrap(), 1);
        assert_eq!(both.resolve().await.unwrap().object_id(), "el:Hello World:2");

        // Every query array is released again.
        assert!(!browser.transport.sent("Runtime.releaseObject").is_empty());
    }

    #[tokio::test]
    async fn nth_first_last_and_out_of_range() {
        let three = vec![vec![1, 2, 1], vec![1, 2, 2], vec![1, 2, 3]];
        let browser = TestBrowser::start(fake_dom(&[(".test", three)])).await;
        let page = browser.open_page("P1", "S1").await;
        let locator = Locator::parse(page, ".test").unwrap();

        assert_eq!(locator.count().await.unwrap(), 3);
        let second = locator.clone().nth(1).resolve().await.unwrap();
        assert_eq!(second.object_id(), "el:.test:1");

        let first = locator.clone().first().resolve().await.unwrap();
        let zeroth = locator.clone().nth(0).resolve().await.unwrap();
        assert_eq!(first.object_id(), zeroth.object_id());
        assert_eq!(
            locator.clone().last().resolve().await.unwrap().object_id(),
            "el:.test:2"
        );

        let all = locator.all().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].object_id(), "el:.test:2");

        let err = locator.clone().nth(5).resolve().await.unwrap_err();
        assert!(matches!(err, LocatorError::ElementNotFound(_)));
        assert!(locator.nth(5).resolve_optional().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_elements_are_reported() {
        let browser = TestBrowser::start(fake_dom(&[])).await;
        let page = browser.open_page("P1", "S1").await;
        let locator = Locator::parse(page, "#nope").unwrap();
        assert_eq!(locator.count().await.unwrap(), 0);
        let err = locator.resolve().await.unwrap_err();
        assert!(err.is_absent());
    }

    #[tokio::test]
    async fn page_rejections_are_invalid_selectors() {
        let browser = TestBrowser::start(fake_dom(&[])).await;
        let page = browser.open_page("P1", "S1").await;
        let err = Locator::parse(page, "[[broken").unwrap().count().await.unwrap_err();
        assert!(matches!(err, LocatorError::InvalidSelector(ref msg) if msg.contains("SyntaxError")));
    }

    #[tokio::test]
    async fn frame_hops_need_exactly_one_frame_element() {
        let browser = TestBrowser::start(fake_dom(&[
            ("iframe", vec![vec![1, 2, 1], vec![1, 2, 2]]),
            ("iframe#pay", vec![vec![1, 2, 1]]),
            ("div.box", vec![vec![1, 2, 4]]),
            (".inner", vec![vec![1, 2, 1]]),
        ]))
        .await;
        let page = browser.open_page("P1", "S1").await;
        browser.add_frame(&page, "S1", "child", "P1").await;

        let err = Locator::parse(page.clone(), "iframe >> .inner")
            .unwrap()
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::FrameHop { matches: 2, .. }));

        let err = Locator::parse(page.clone(), "div.box >> .inner")
            .unwrap()
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::FrameHop { matches: 0, .. }));

        let inner = Locator::parse(page, "iframe#pay >> .inner")
            .unwrap()
            .resolve()
            .await
            .unwrap();
        assert_eq!(inner.frame(), &FrameId::new("child"));
    }
}
