//! Browser-level event loop: turns target, frame and runtime events into the page graph.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::context::BrowserContext;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::RawEvent;
use crate::ids::{BrowserId, FrameId, PageId, SessionId};
use crate::metrics::{self, AdapterMetricsSnapshot};
use crate::page::Page;
use crate::protocol::{
    AttachedToTargetParams, DetachedFromTargetParams, ExecutionContextCreatedParams,
    ExecutionContextDestroyedParams, FrameAttachedParams, FrameDetachedParams,
    FrameNavigatedParams, LifecycleParams, TargetCreatedParams, TargetDestroyedParams,
};
use crate::registry::{BindingKind, Registry};
use crate::session::CdpSession;
use crate::timestamp_now;
use crate::transport::{CdpTransport, ChromiumTransport, TransportEvent};

pub type EventBus = broadcast::Sender<RawEvent>;

/// Owns the browser connection and the single browser context built on top of it.
pub struct CdpAdapter {
    pub browser_id: BrowserId,
    pub cfg: CdpConfig,
    bus: EventBus,
    transport: Arc<dyn CdpTransport>,
    browser: Arc<CdpSession>,
    context: Arc<BrowserContext>,
    registry: Registry,
    sessions: DashMap<SessionId, Arc<CdpSession>>,
    init_scripts: Arc<RwLock<Vec<String>>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpAdapter {
    pub fn new(cfg: CdpConfig, bus: EventBus) -> Self {
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, bus, transport)
    }

    pub fn with_transport(
        cfg: CdpConfig,
        bus: EventBus,
        transport: Arc<dyn CdpTransport>,
    ) -> Self {
        let deadline = Duration::from_millis(cfg.default_deadline_ms);
        let browser = Arc::new(CdpSession::browser(Arc::clone(&transport), deadline));
        Self {
            browser_id: BrowserId::new(),
            cfg,
            bus,
            transport,
            browser,
            context: Arc::new(BrowserContext::new()),
            registry: Registry::new(),
            sessions: DashMap::new(),
            init_scripts: Arc::new(RwLock::new(Vec::new())),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    /// Connects, starts the event loop and turns on target discovery with flattened
    /// auto-attach. Calling it again is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<(), AdapterError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        let loop_task = spawn(Self::event_loop(Arc::clone(self)));
        self.tasks.lock().await.push(loop_task);

        self.browser
            .send("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;
        self.browser
            .send(
                "Target.setAutoAttach",
                json!({ "autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true }),
            )
            .await?;
        info!(target: "cdp-adapter", browser = %self.browser_id.0, "adapter started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.bus.subscribe()
    }

    /// Session addressing the browser target itself.
    pub fn browser_session(&self) -> Arc<CdpSession> {
        Arc::clone(&self.browser)
    }

    pub fn context(&self) -> Arc<BrowserContext> {
        Arc::clone(&self.context)
    }

    pub fn active_page(&self) -> Option<Arc<Page>> {
        self.context.active_page()
    }

    pub fn page(&self, id: &PageId) -> Option<Arc<Page>> {
        self.context.page(id)
    }

    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.context.pages()
    }

    pub fn metrics(&self) -> AdapterMetricsSnapshot {
        metrics::snapshot()
    }

    fn require_page(&self, id: &PageId) -> Result<Arc<Page>, AdapterError> {
        self.context.page(id).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::TargetNotFound)
                .with_hint(format!("page {id} is not open"))
        })
    }

    /// Opens a tab and navigates it. A background tab does not take focus.
    pub async fn new_page(&self, url: &str, background: bool) -> Result<Arc<Page>, AdapterError> {
        let mut events = self.bus.subscribe();
        let response = self
            .browser
            .send(
                "Target.createTarget",
                json!({ "url": "about:blank", "background": background }),
            )
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AdapterError::internal("Target.createTarget returned no targetId"))?;
        let id = PageId::new(target_id);

        let timeout = self.deadline();
        let page = match self.context.page(&id) {
            Some(page) => page,
            None => self.wait_for_page(&id, &mut events, timeout).await?,
        };

        if background {
            self.context.insert(Arc::clone(&page), false);
        } else {
            self.context.activate(&id);
            self.emit(RawEvent::PageActivated {
                page: id.clone(),
                ts: timestamp_now(),
            });
        }

        let main = page.main_frame();
        page.execution_context(&main, timeout).await?;
        if !url.is_empty() && url != "about:blank" {
            page.navigate(url, timeout).await?;
        }
        Ok(page)
    }

    async fn wait_for_page(
        &self,
        id: &PageId,
        events: &mut broadcast::Receiver<RawEvent>,
        timeout: Duration,
    ) -> Result<Arc<Page>, AdapterError> {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(RawEvent::PageOpened { page, .. }) if &page == id => {
                        if let Some(page) = self.context.page(id) {
                            return Ok(page);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(page) = self.context.page(id) {
                            return Ok(page);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(AdapterError::session_closed("adapter event bus closed"));
                    }
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| AdapterError::timeout("Target.attachedToTarget", timeout))?
    }

    /// Closes a page. Focus returns to the most recently active page still open.
    pub async fn close_page(&self, id: &PageId) -> Result<(), AdapterError> {
        self.require_page(id)?;
        self.browser
            .send("Target.closeTarget", json!({ "targetId": id.as_str() }))
            .await?;
        self.forget_page(id);
        Ok(())
    }

    pub async fn bring_to_front(&self, id: &PageId) -> Result<(), AdapterError> {
        let page = self.require_page(id)?;
        page.bring_to_front().await?;
        self.context.activate(id);
        self.emit(RawEvent::PageActivated {
            page: id.clone(),
            ts: timestamp_now(),
        });
        Ok(())
    }

    /// Registers a script that runs before any page script in every current and future
    /// document, including out-of-process frames.
    pub async fn add_init_script(&self, source: impl Into<String>) -> Result<(), AdapterError> {
        let source = source.into();
        self.init_scripts.write().push(source.clone());
        for page in self.context.pages() {
            for session in page.sessions() {
                session
                    .send(
                        "Page.addScriptToEvaluateOnNewDocument",
                        json!({ "source": source, "runImmediately": true }),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    fn emit(&self, event: RawEvent) {
        let _ = self.bus.send(event);
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-adapter", "event loop entered");
        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        if !self.shutdown.is_cancelled() {
                            self.handle_transport_closed();
                        }
                        break;
                    }
                },
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    /// The connection is gone for good: every session fails and every page closes.
    fn handle_transport_closed(&self) {
        warn!(target: "cdp-adapter", "cdp transport closed; closing all sessions");
        for page in self.context.drain() {
            page.mark_closed();
            self.emit(RawEvent::PageClosed {
                page: page.id().clone(),
                ts: timestamp_now(),
            });
        }
        for entry in self.sessions.iter() {
            entry.value().close();
        }
        self.sessions.clear();
        self.registry.clear();
        self.browser.close();
        metrics::set_open_pages(0);
        self.emit(RawEvent::Error {
            page: None,
            message: "cdp connection closed".to_string(),
        });
    }

    fn handle_event(&self, event: TransportEvent) {
        if let Err(err) = self.process_event(&event) {
            warn!(target: "cdp-adapter", method = %event.method, %err, "cdp event handling failed");
            self.emit(RawEvent::Error {
                page: None,
                message: format!("{}: {err}", event.method),
            });
        }

        let session = match &event.session_id {
            None => Some(Arc::clone(&self.browser)),
            Some(id) => self
                .sessions
                .get(&SessionId::new(id.as_str()))
                .map(|entry| Arc::clone(entry.value())),
        };
        if let Some(session) = session {
            session.dispatch(&event.method, &event.params);
        }
    }

    fn process_event(&self, event: &TransportEvent) -> Result<(), AdapterError> {
        metrics::record_event(&event.method);
        let session = event.session_id.as_deref().map(SessionId::new);

        match event.method.as_str() {
            "Target.attachedToTarget" => self.on_attached(session, parse(&event.params)?),
            "Target.detachedFromTarget" => {
                let payload: DetachedFromTargetParams = parse(&event.params)?;
                self.on_session_detached(&SessionId::new(payload.session_id));
                Ok(())
            }
            "Target.targetDestroyed" => {
                let payload: TargetDestroyedParams = parse(&event.params)?;
                self.on_target_destroyed(&payload.target_id);
                Ok(())
            }
            "Target.targetInfoChanged" => {
                let payload: TargetCreatedParams = parse(&event.params)?;
                let info = payload.target_info;
                if let Some(page) = self.context.page(&PageId::new(info.target_id.as_str())) {
                    page.set_target_info(&info.url, &info.title);
                }
                Ok(())
            }
            "Target.targetCreated" => {
                let payload: TargetCreatedParams = parse(&event.params)?;
                debug!(
                    target: "cdp-adapter",
                    target_id = %payload.target_info.target_id,
                    kind = %payload.target_info.target_type,
                    "target created"
                );
                Ok(())
            }
            method if method.starts_with("Page.") || method.starts_with("Runtime.") => {
                match session {
                    Some(session) => self.on_session_event(&session, method, &event.params),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }

    fn on_attached(
        &self,
        parent: Option<SessionId>,
        payload: AttachedToTargetParams,
    ) -> Result<(), AdapterError> {
        let session_id = SessionId::new(payload.session_id.as_str());
        let info = payload.target_info;
        let waiting = payload.waiting_for_debugger;

        let session = Arc::new(CdpSession::attached(
            session_id.clone(),
            info.target_id.as_str(),
            Arc::clone(&self.transport),
            self.deadline(),
        ));

        let page = match info.target_type.as_str() {
            "page" if parent.is_none() => {
                let id = PageId::new(info.target_id.as_str());
                let opener = info.opener_id.as_deref().map(PageId::new);
                let page = Arc::new(Page::new(
                    id.clone(),
                    opener.clone(),
                    session_id.clone(),
                    Arc::clone(&session),
                    info.url.clone(),
                ));
                page.set_target_info(&info.url, &info.title);
                self.registry.bind_page(session_id.clone(), id.clone());
                self.context.insert(Arc::clone(&page), true);
                metrics::set_open_pages(self.context.len());
                info!(target: "cdp-adapter", page = %id, opener = ?opener, "page attached");
                self.emit(RawEvent::PageOpened {
                    page: id,
                    opener,
                    url: info.url.clone(),
                    ts: timestamp_now(),
                });
                page
            }
            "iframe" => {
                let binding = parent.as_ref().and_then(|p| self.registry.get(p));
                let page = binding
                    .as_ref()
                    .and_then(|binding| self.context.page(&binding.page))
                    .ok_or_else(|| {
                        AdapterError::new(AdapterErrorKind::TargetNotFound)
                            .with_hint(format!("no page owns iframe target {}", info.target_id))
                    })?;
                let frame = FrameId::new(info.target_id.as_str());
                page.out_of_process_attached(&frame, session_id.clone())?;
                page.add_session(session_id.clone(), Arc::clone(&session));
                self.registry
                    .bind_frame(session_id.clone(), page.id().clone(), frame.clone());
                debug!(target: "cdp-adapter", page = %page.id(), frame = %frame, "oopif attached");
                self.emit(RawEvent::FrameAttached {
                    page: page.id().clone(),
                    parent: page.parent_of(&frame),
                    frame,
                    out_of_process: true,
                });
                page
            }
            other => {
                debug!(target: "cdp-adapter", kind = other, target_id = %info.target_id, "ignoring target");
                if waiting {
                    spawn(async move {
                        let _ = session
                            .send("Runtime.runIfWaitingForDebugger", json!({}))
                            .await;
                    });
                }
                return Ok(());
            }
        };

        metrics::record_session_attached();
        self.sessions.insert(session_id.clone(), Arc::clone(&session));
        let scripts = self.init_scripts.read().clone();
        spawn(async move {
            if let Err(err) =
                prepare_session(&page, &session, &session_id, scripts, waiting).await
            {
                warn!(target: "cdp-adapter", session = %session_id, %err, "session setup failed");
            }
        });
        Ok(())
    }

    fn on_session_detached(&self, session_id: &SessionId) {
        let Some(binding) = self.registry.remove(session_id) else {
            return;
        };
        if let Some((_, session)) = self.sessions.remove(session_id) {
            session.close();
        }
        match binding.kind {
            BindingKind::Page => self.forget_page(&binding.page),
            BindingKind::Frame(frame) => {
                if let Some(page) = self.context.page(&binding.page) {
                    page.remove_session(session_id);
                    for removed in page.frame_detached(&frame) {
                        self.emit(RawEvent::FrameDetached {
                            page: binding.page.clone(),
                            frame: removed,
                        });
                    }
                }
            }
        }
    }

    fn on_target_destroyed(&self, target_id: &str) {
        let page_id = PageId::new(target_id);
        if self.context.page(&page_id).is_some() {
            self.forget_page(&page_id);
        } else if let Some(session) = self.registry.session_for_target(target_id) {
            self.on_session_detached(&session);
        }
    }

    /// Drops a page and its sessions. Safe to call more than once.
    fn forget_page(&self, id: &PageId) {
        let was_active = self.context.active_id().as_ref() == Some(id);
        let (removed, active) = self.context.remove(id);
        let Some(page) = removed else {
            return;
        };

        page.mark_closed();
        for session_id in self.registry.remove_page(id) {
            if let Some((_, session)) = self.sessions.remove(&session_id) {
                session.close();
            }
        }
        metrics::set_open_pages(self.context.len());
        info!(target: "cdp-adapter", page = %id, next_active = ?active, "page closed");
        self.emit(RawEvent::PageClosed {
            page: id.clone(),
            ts: timestamp_now(),
        });
        if was_active {
            if let Some(active) = active {
                self.emit(RawEvent::PageActivated {
                    page: active,
                    ts: timestamp_now(),
                });
            }
        }
    }

    fn on_session_event(
        &self,
        session_id: &SessionId,
        method: &str,
        params: &Value,
    ) -> Result<(), AdapterError> {
        let Some(binding) = self.registry.get(session_id) else {
            return Ok(());
        };
        let Some(page) = self.context.page(&binding.page) else {
            return Ok(());
        };
        let page_id = page.id().clone();

        match method {
            "Page.frameAttached" => {
                let payload: FrameAttachedParams = parse(params)?;
                let frame = FrameId::new(payload.frame_id);
                let parent = FrameId::new(payload.parent_frame_id);
                page.frame_attached(frame.clone(), &parent, session_id.clone())?;
                self.emit(RawEvent::FrameAttached {
                    page: page_id,
                    frame,
                    parent: Some(parent),
                    out_of_process: false,
                });
            }
            "Page.frameDetached" => {
                let payload: FrameDetachedParams = parse(params)?;
                if payload.reason.as_deref() == Some("swap") {
                    return Ok(());
                }
                for frame in page.frame_detached(&FrameId::new(payload.frame_id)) {
                    self.emit(RawEvent::FrameDetached {
                        page: page_id.clone(),
                        frame,
                    });
                }
            }
            "Page.frameNavigated" => {
                let payload: FrameNavigatedParams = parse(params)?;
                let frame = FrameId::new(payload.frame.id);
                let parent = payload.frame.parent_id.map(FrameId::new);
                let removed = page.frame_navigated(
                    &frame,
                    parent.as_ref(),
                    session_id.clone(),
                    &payload.frame.url,
                    payload.frame.name,
                )?;
                for child in removed {
                    self.emit(RawEvent::FrameDetached {
                        page: page_id.clone(),
                        frame: child,
                    });
                }
                self.emit(RawEvent::FrameNavigated {
                    page: page_id,
                    frame,
                    url: payload.frame.url,
                });
            }
            "Page.lifecycleEvent" => {
                let payload: LifecycleParams = parse(params)?;
                self.emit(RawEvent::PageLifecycle {
                    page: page_id,
                    frame: FrameId::new(payload.frame_id),
                    phase: payload.name,
                    ts: timestamp_now(),
                });
            }
            "Runtime.executionContextCreated" => {
                let payload: ExecutionContextCreatedParams = parse(params)?;
                let context = payload.context;
                if let Some(aux) = context.aux_data.filter(|aux| aux.is_default) {
                    if let Some(frame) = aux.frame_id {
                        page.context_created(&FrameId::new(frame), context.id);
                    }
                }
            }
            "Runtime.executionContextDestroyed" => {
                let payload: ExecutionContextDestroyedParams = parse(params)?;
                page.context_destroyed(session_id, payload.execution_context_id);
            }
            "Runtime.executionContextsCleared" => {
                page.contexts_cleared(session_id);
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T, AdapterError> {
    serde_json::from_value(params.clone())
        .map_err(|err| AdapterError::internal(format!("malformed event payload: {err}")))
}

/// Per-session setup. A paused target is always resumed, even when setup fails midway.
async fn prepare_session(
    page: &Page,
    session: &CdpSession,
    session_id: &SessionId,
    scripts: Vec<String>,
    waiting: bool,
) -> Result<(), AdapterError> {
    let setup = async {
        session.enable_domain("Page").await?;
        let tree = session.send("Page.getFrameTree", json!({})).await?;
        if let Some(root) = tree.get("frameTree") {
            apply_frame_tree(page, session_id, root, None);
        }
        session
            .send("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;
        for source in scripts {
            session
                .send(
                    "Page.addScriptToEvaluateOnNewDocument",
                    json!({ "source": source, "runImmediately": true }),
                )
                .await?;
        }
        session.enable_domain("Runtime").await?;
        session
            .send(
                "Target.setAutoAttach",
                json!({ "autoAttach": true, "waitForDebuggerOnStart": true, "flatten": true }),
            )
            .await?;
        Ok::<(), AdapterError>(())
    };
    let outcome = setup.await;

    if waiting {
        session
            .send("Runtime.runIfWaitingForDebugger", json!({}))
            .await?;
    }
    outcome
}

fn apply_frame_tree(page: &Page, session: &SessionId, node: &Value, parent: Option<&FrameId>) {
    let Some(frame) = node.get("frame") else {
        return;
    };
    let Some(id) = frame.get("id").and_then(|v| v.as_str()).map(FrameId::new) else {
        return;
    };
    let url = frame.get("url").and_then(|v| v.as_str()).unwrap_or_default();
    let name = frame
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if let Err(err) = page.sync_frame(&id, parent, session.clone(), url, name) {
        debug!(target: "cdp-adapter", frame = %id, %err, "skipping frame from tree snapshot");
        return;
    }

    if let Some(children) = node.get("childFrames").and_then(|v| v.as_array()) {
        for child in children {
            apply_frame_tree(page, session, child, Some(&id));
        }
    }
}
