//! Scripted transport for exercising the adapter without a browser.
//!
//! Enabled with the `test-util` feature. Commands are answered by a caller-supplied responder
//! and events are injected through a channel, so higher layers can drive a page graph
//! deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::adapter::CdpAdapter;
use crate::config::CdpConfig;
use crate::error::AdapterError;
use crate::ids::{FrameId, PageId};
use crate::page::Page;
use crate::transport::{CdpTransport, CommandTarget, TransportEvent};

/// Answers a command; `None` falls back to an empty object.
pub type Responder =
    Arc<dyn Fn(&CommandTarget, &str, &Value) -> Option<Result<Value, AdapterError>> + Send + Sync>;

pub fn responder<F>(f: F) -> Responder
where
    F: Fn(&CommandTarget, &str, &Value) -> Option<Result<Value, AdapterError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

pub struct ScriptedTransport {
    rx: tokio::sync::Mutex<mpsc::Receiver<TransportEvent>>,
    commands: Mutex<Vec<(CommandTarget, String, Value)>>,
    responder: Responder,
}

impl ScriptedTransport {
    pub fn new(responder: Responder) -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Arc::new(Self {
                rx: tokio::sync::Mutex::new(rx),
                commands: Mutex::new(Vec::new()),
                responder,
            }),
            tx,
        )
    }

    pub fn commands(&self) -> Vec<(CommandTarget, String, Value)> {
        self.commands.lock().clone()
    }

    /// Parameters of every command sent with `method`, in order.
    pub fn sent(&self, method: &str) -> Vec<Value> {
        self.commands
            .lock()
            .iter()
            .filter(|(_, m, _)| m == method)
            .map(|(_, _, params)| params.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }
}

#[async_trait]
impl CdpTransport for ScriptedTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.rx.lock().await.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let answer = (self.responder)(&target, method, &params);
        self.commands
            .lock()
            .push((target, method.to_string(), params));
        answer.unwrap_or_else(|| Ok(json!({})))
    }
}

/// A started adapter wired to a [`ScriptedTransport`].
pub struct TestBrowser {
    pub adapter: Arc<CdpAdapter>,
    pub transport: Arc<ScriptedTransport>,
    events: mpsc::Sender<TransportEvent>,
    next_context: AtomicI64,
}

impl TestBrowser {
    pub async fn start(responder: Responder) -> Self {
        let (bus, _) = crate::event_bus(256);
        let (transport, events) = ScriptedTransport::new(responder);
        let adapter = Arc::new(CdpAdapter::with_transport(
            CdpConfig {
                default_deadline_ms: 2_000,
                ..CdpConfig::default()
            },
            bus,
            transport.clone() as Arc<dyn CdpTransport>,
        ));
        if let Err(err) = adapter.start().await {
            panic!("scripted adapter failed to start: {err}");
        }
        Self {
            adapter,
            transport,
            events,
            next_context: AtomicI64::new(1),
        }
    }

    pub async fn emit(&self, method: &str, session: Option<&str>, params: Value) {
        let event = TransportEvent {
            method: method.to_string(),
            params,
            session_id: session.map(str::to_string),
        };
        if self.events.send(event).await.is_err() {
            panic!("adapter event loop is gone");
        }
    }

    /// Attaches a top-level page and gives its main frame a live execution context.
    pub async fn open_page(&self, target: &str, session: &str) -> Arc<Page> {
        self.emit(
            "Target.attachedToTarget",
            None,
            json!({
                "sessionId": session,
                "targetInfo": { "targetId": target, "type": "page", "url": "about:blank" },
                "waitingForDebugger": false,
            }),
        )
        .await;

        let id = PageId::new(target);
        let page = wait_until(|| self.adapter.page(&id)).await;
        self.create_context(session, target).await;
        page
    }

    /// Attaches a same-process child frame with its own execution context.
    pub async fn add_frame(&self, page: &Page, session: &str, frame: &str, parent: &str) {
        self.emit(
            "Page.frameAttached",
            Some(session),
            json!({ "frameId": frame, "parentFrameId": parent }),
        )
        .await;
        let id = FrameId::new(frame);
        wait_until(|| page.frame(&id)).await;
        self.create_context(session, frame).await;
        if let Err(err) = page.execution_context(&id, Duration::from_secs(1)).await {
            panic!("frame {frame} never got a context: {err}");
        }
    }

    /// Reports a fresh default context for `frame` and waits until the page sees it.
    pub async fn create_context(&self, session: &str, frame: &str) -> i64 {
        let context = self.next_context.fetch_add(1, Ordering::Relaxed);
        self.emit(
            "Runtime.executionContextCreated",
            Some(session),
            json!({ "context": { "id": context, "auxData": { "frameId": frame, "isDefault": true } } }),
        )
        .await;
        for _ in 0..200 {
            let ready = self
                .adapter
                .pages()
                .iter()
                .filter_map(|page| page.frame(&FrameId::new(frame)))
                .any(|info| info.context == Some(context));
            if ready {
                return context;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("context {context} for frame {frame} never registered");
    }
}

async fn wait_until<T, F: Fn() -> Option<T>>(probe: F) -> T {
    for _ in 0..200 {
        if let Some(value) = probe() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}
