//! Top-level page handle and its frame tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::frames::{FrameInfo, FrameTree};
use crate::ids::{ExecutionContextId, FrameId, PageId, SessionId};
use crate::protocol::{ScreenshotFormat, ScreenshotOptions};
use crate::remote::{self, RemoteObject};
use crate::session::CdpSession;

struct PageState {
    frames: FrameTree,
    url: String,
    title: String,
}

/// A top-level page (tab or popup).
///
/// The page owns its frame tree and the sessions of its out-of-process frames. It holds no
/// reference to the context it belongs to; the opener is kept as an id.
pub struct Page {
    id: PageId,
    opener: Option<PageId>,
    session: Arc<CdpSession>,
    sessions: DashMap<SessionId, Arc<CdpSession>>,
    state: RwLock<PageState>,
    contexts: watch::Sender<u64>,
    closed: AtomicBool,
}

impl Page {
    pub fn new(
        id: PageId,
        opener: Option<PageId>,
        session_id: SessionId,
        session: Arc<CdpSession>,
        url: impl Into<String>,
    ) -> Self {
        let main = FrameId::new(id.as_str());
        let mut frames = FrameTree::new(main, session_id.clone());
        let url = url.into();
        frames.navigated(&FrameId::new(id.as_str()), url.clone(), None).ok();

        let sessions = DashMap::new();
        sessions.insert(session_id, Arc::clone(&session));
        let (contexts, _) = watch::channel(0);

        Self {
            id,
            opener,
            session,
            sessions,
            state: RwLock::new(PageState {
                frames,
                url,
                title: String::new(),
            }),
            contexts,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &PageId {
        &self.id
    }

    pub fn opener(&self) -> Option<&PageId> {
        self.opener.as_ref()
    }

    /// Session of the page's main target.
    pub fn session(&self) -> Arc<CdpSession> {
        Arc::clone(&self.session)
    }

    pub fn url(&self) -> String {
        self.state.read().url.clone()
    }

    pub fn title(&self) -> String {
        self.state.read().title.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn main_frame(&self) -> FrameId {
        self.state.read().frames.main().clone()
    }

    /// Snapshot of every frame, main frame first.
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.state
            .read()
            .frames
            .iter()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn frame(&self, id: &FrameId) -> Option<FrameInfo> {
        self.state.read().frames.get(id).cloned()
    }

    pub fn parent_of(&self, id: &FrameId) -> Option<FrameId> {
        self.state.read().frames.parent(id).cloned()
    }

    pub fn child_frames(&self, id: &FrameId) -> Vec<FrameId> {
        self.state
            .read()
            .frames
            .get(id)
            .map(|frame| frame.children.clone())
            .unwrap_or_default()
    }

    pub fn session_for(&self, frame: &FrameId) -> Result<Arc<CdpSession>, AdapterError> {
        let session_id = self
            .state
            .read()
            .frames
            .get(frame)
            .map(|info| info.session.clone())
            .ok_or_else(|| self.detached_error(frame))?;
        self.sessions
            .get(&session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                AdapterError::session_closed(format!(
                    "session {session_id} for frame {frame} is gone"
                ))
            })
    }

    fn detached_error(&self, frame: &FrameId) -> AdapterError {
        AdapterError::new(AdapterErrorKind::FrameDetached)
            .with_hint(format!("frame {frame} is not attached to page {}", self.id))
    }

    /// Current generation of a frame's document; changes on every navigation.
    pub fn frame_generation(&self, frame: &FrameId) -> Option<u64> {
        self.state.read().frames.get(frame).map(|f| f.generation)
    }

    /// Waits until `frame` has a live default execution context.
    ///
    /// After a navigation the old context is dropped; callers block here until the new
    /// document's context is reported instead of evaluating against a stale one.
    pub async fn execution_context(
        &self,
        frame: &FrameId,
        timeout: Duration,
    ) -> Result<(Arc<CdpSession>, ExecutionContextId), AdapterError> {
        let mut changes = self.contexts.subscribe();
        let wait = async {
            loop {
                if self.is_closed() {
                    return Err(AdapterError::session_closed(format!(
                        "page {} closed",
                        self.id
                    )));
                }
                let current = self
                    .state
                    .read()
                    .frames
                    .get(frame)
                    .map(|info| info.context)
                    .ok_or_else(|| self.detached_error(frame))?;
                if let Some(context) = current {
                    return Ok((self.session_for(frame)?, context));
                }
                if changes.changed().await.is_err() {
                    return Err(AdapterError::session_closed("page state dropped"));
                }
            }
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            AdapterError::new(AdapterErrorKind::Timeout).with_hint(format!(
                "no execution context for frame {frame} within {}ms",
                timeout.as_millis()
            ))
        })?
    }

    pub async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        let main = self.main_frame();
        self.evaluate_in_frame(&main, expression).await
    }

    pub async fn evaluate_in_frame(
        &self,
        frame: &FrameId,
        expression: &str,
    ) -> Result<Value, AdapterError> {
        let object = self.evaluate_handle_in_frame(frame, expression, true).await?;
        Ok(object.value_or_null())
    }

    pub async fn evaluate_handle_in_frame(
        &self,
        frame: &FrameId,
        expression: &str,
        return_by_value: bool,
    ) -> Result<RemoteObject, AdapterError> {
        let (session, context) = self
            .execution_context(frame, self.session.default_timeout())
            .await?;
        remote::evaluate(&session, Some(context), expression, return_by_value).await
    }

    /// Navigates the main frame and waits for its load event.
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), AdapterError> {
        url::Url::parse(url).map_err(|err| {
            AdapterError::internal(format!("invalid navigation url '{url}': {err}"))
        })?;

        let mut loaded = self.session.subscribe("Page.loadEventFired");
        let response = self
            .session
            .send_with_timeout("Page.navigate", json!({ "url": url }), timeout)
            .await?;

        if let Some(error_text) = response.get("errorText").and_then(|v| v.as_str()) {
            return Err(AdapterError::new(AdapterErrorKind::Protocol)
                .with_hint(format!("navigation to {url} failed: {error_text}")));
        }

        if response.get("loaderId").is_none() {
            debug!(target: "cdp-adapter", page = %self.id, url, "same-document navigation");
            return Ok(());
        }

        tokio::time::timeout(timeout, loaded.recv())
            .await
            .map_err(|_| AdapterError::timeout("Page.navigate", timeout))?
            .ok_or_else(|| AdapterError::session_closed("page closed during navigation"))?;
        Ok(())
    }

    pub async fn reload(&self, timeout: Duration) -> Result<(), AdapterError> {
        let mut loaded = self.session.subscribe("Page.loadEventFired");
        self.session
            .send_with_timeout("Page.reload", json!({}), timeout)
            .await?;
        tokio::time::timeout(timeout, loaded.recv())
            .await
            .map_err(|_| AdapterError::timeout("Page.reload", timeout))?;
        Ok(())
    }

    pub async fn screenshot(&self, options: &ScreenshotOptions) -> Result<Vec<u8>, AdapterError> {
        let mut params = Map::new();
        match &options.format {
            ScreenshotFormat::Png => {
                params.insert("format".into(), json!("png"));
            }
            ScreenshotFormat::Jpeg { quality } => {
                params.insert("format".into(), json!("jpeg"));
                if let Some(quality) = quality {
                    params.insert("quality".into(), json!(quality));
                }
            }
        }
        if let Some(clip) = &options.clip {
            params.insert(
                "clip".into(),
                serde_json::to_value(clip).map_err(|e| AdapterError::internal(e.to_string()))?,
            );
        }
        if options.full_page {
            params.insert("captureBeyondViewport".into(), Value::Bool(true));
        }

        let response = self
            .session
            .send("Page.captureScreenshot", Value::Object(params))
            .await?;
        let data = response
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::internal("Page.captureScreenshot returned no data"))?;
        STANDARD
            .decode(data)
            .map_err(|err| AdapterError::internal(format!("invalid screenshot payload: {err}")))
    }

    /// Asks the browser to close this page. Bookkeeping follows the resulting target events.
    pub async fn close(&self) -> Result<(), AdapterError> {
        if self.is_closed() {
            return Ok(());
        }
        self.session.send("Page.close", json!({})).await?;
        Ok(())
    }

    pub async fn bring_to_front(&self) -> Result<(), AdapterError> {
        self.session.send("Page.bringToFront", json!({})).await?;
        Ok(())
    }

    pub(crate) fn add_session(&self, id: SessionId, session: Arc<CdpSession>) {
        self.sessions.insert(id, session);
    }

    pub(crate) fn remove_session(&self, id: &SessionId) -> Option<Arc<CdpSession>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub(crate) fn sessions(&self) -> Vec<Arc<CdpSession>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub(crate) fn frame_attached(
        &self,
        frame: FrameId,
        parent: &FrameId,
        session: SessionId,
    ) -> Result<(), AdapterError> {
        self.state.write().frames.attach(frame, parent, session)
    }

    pub(crate) fn out_of_process_attached(
        &self,
        frame: &FrameId,
        session: SessionId,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write();
        let main = state.frames.main().clone();
        state.frames.adopt_out_of_process(frame, &main, session)
    }

    pub(crate) fn frame_detached(&self, frame: &FrameId) -> Vec<FrameId> {
        let removed = self.state.write().frames.detach(frame);
        self.notify_contexts();
        removed
    }

    pub(crate) fn frame_navigated(
        &self,
        frame: &FrameId,
        parent: Option<&FrameId>,
        session: SessionId,
        url: &str,
        name: Option<String>,
    ) -> Result<Vec<FrameId>, AdapterError> {
        let mut state = self.state.write();
        if !state.frames.contains(frame) {
            let parent = parent.cloned().unwrap_or_else(|| state.frames.main().clone());
            state.frames.attach(frame.clone(), &parent, session)?;
        }
        let removed = state.frames.navigated(frame, url, name)?;
        if frame == state.frames.main() {
            state.url = url.to_string();
        }
        drop(state);
        self.notify_contexts();
        Ok(removed)
    }

    /// Records a frame reported by `Page.getFrameTree` unless events already described it.
    pub(crate) fn sync_frame(
        &self,
        frame: &FrameId,
        parent: Option<&FrameId>,
        session: SessionId,
        url: &str,
        name: Option<String>,
    ) -> Result<(), AdapterError> {
        let known = self
            .state
            .read()
            .frames
            .get(frame)
            .map(|info| !info.url.is_empty())
            .unwrap_or(false);
        if known {
            return Ok(());
        }
        self.frame_navigated(frame, parent, session, url, name)
            .map(|_| ())
    }

    pub(crate) fn context_created(&self, frame: &FrameId, context: ExecutionContextId) {
        if self.state.write().frames.set_context(frame, context) {
            self.notify_contexts();
        }
    }

    pub(crate) fn context_destroyed(&self, session: &SessionId, context: ExecutionContextId) {
        self.state.write().frames.drop_context(session, context);
        self.notify_contexts();
    }

    pub(crate) fn contexts_cleared(&self, session: &SessionId) {
        self.state.write().frames.clear_contexts(session);
        self.notify_contexts();
    }

    pub(crate) fn set_target_info(&self, url: &str, title: &str) {
        let mut state = self.state.write();
        if !url.is_empty() {
            state.url = url.to_string();
        }
        state.title = title.to_string();
    }

    /// Marks the page closed and closes every session it owns.
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
        for session in self.sessions() {
            session.close();
        }
        self.sessions.clear();
        self.notify_contexts();
    }

    fn notify_contexts(&self) {
        self.contexts.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("opener", &self.opener)
            .field("url", &self.url())
            .field("closed", &self.is_closed())
            .finish()
    }
}
