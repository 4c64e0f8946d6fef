use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::read_devtools_url;

/// Protocol event as read off the wire, tagged with the flattened session it belongs to.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// One physical connection shared by every session.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    /// Next event from the connection; `None` once the connection is gone.
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

type RuntimeFactory = Arc<
    dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<RuntimeState>, AdapterError>> + Send + Sync,
>;

/// Websocket transport to a Chromium instance, launched on demand or reached by url.
///
/// The connection is established once. When it drops, every in-flight command fails with
/// `SessionClosed` and later commands fail immediately; reconnecting is left to the caller.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    state: Arc<OnceCell<Arc<RuntimeState>>>,
    factory: RuntimeFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: RuntimeFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move {
                let state = RuntimeState::start(cfg).await?;
                Ok(Arc::new(state))
            })
        });

        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn runtime(&self) -> Result<Arc<RuntimeState>, AdapterError> {
        let runtime = self
            .state
            .get_or_try_init(|| (self.factory)(self.cfg.clone()))
            .await?;

        if !runtime.is_alive() {
            return Err(AdapterError::session_closed(
                "cdp connection dropped; reconnect is not automatic",
            ));
        }
        Ok(Arc::clone(runtime))
    }

    #[cfg(test)]
    fn with_factory(cfg: CdpConfig, factory: RuntimeFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(OnceCell::new()),
            factory,
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        self.runtime().await.map(|_| ())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let runtime = self.state.get()?;
        runtime.next_event().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let runtime = self.runtime().await?;
        runtime.send_internal(target, method, params).await
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, AdapterError>>,
}

type Inflight = HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>;

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn start(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url)
        } else {
            let browser_cfg = Self::browser_config(&cfg)?;
            let wait = Duration::from_millis(cfg.launch_timeout_ms);
            Self::launch_browser(browser_cfg, wait).await?
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();
        let heartbeat_alive = alive.clone();
        let heartbeat_tx = command_tx.clone();

        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp-transport", ?err, "transport loop terminated with error");
            }
        });

        let heartbeat_task = Self::spawn_heartbeat(
            heartbeat_tx,
            heartbeat_alive,
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.default_deadline_ms),
        );

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            heartbeat_task,
            child: Mutex::new(child),
            alive,
        })
    }

    #[cfg(test)]
    fn test_stub() -> (Arc<Self>, Arc<AtomicBool>) {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let (_events_tx, events_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let loop_task = tokio::spawn(futures::future::pending::<()>());

        (
            Arc::new(Self {
                command_tx,
                events_rx: Mutex::new(events_rx),
                loop_task,
                heartbeat_task: None,
                child: Mutex::new(None),
                alive: alive.clone(),
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|_| AdapterError::session_closed("cdp command channel closed"))?;

        match resp_rx.await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::session_closed(
                "command response channel closed",
            )),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    fn spawn_heartbeat(
        sender: mpsc::Sender<ControlMessage>,
        alive: Arc<AtomicBool>,
        interval_duration: Duration,
        deadline: Duration,
    ) -> Option<JoinHandle<()>> {
        if interval_duration.as_millis() == 0 {
            return None;
        }

        let response_deadline = deadline.min(Duration::from_secs(5));

        Some(tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while alive.load(Ordering::Relaxed) {
                ticker.tick().await;

                if !alive.load(Ordering::Relaxed) {
                    break;
                }

                let (resp_tx, resp_rx) = oneshot::channel();
                let message = ControlMessage {
                    target: CommandTarget::Browser,
                    method: "Browser.getVersion".to_string(),
                    params: Value::Object(Default::default()),
                    responder: resp_tx,
                };

                if sender.send(message).await.is_err() {
                    debug!(target: "cdp-transport", "heartbeat send failed (channel closed)");
                    break;
                }

                match tokio::time::timeout(response_deadline, resp_rx).await {
                    Ok(Ok(Ok(_))) => {}
                    Ok(Ok(Err(err))) => {
                        warn!(target: "cdp-transport", ?err, "heartbeat command error");
                        break;
                    }
                    Ok(Err(_)) => {
                        debug!(target: "cdp-transport", "heartbeat response channel closed");
                        break;
                    }
                    Err(_) => {
                        warn!(target: "cdp-transport", "heartbeat timed out; marking connection dead");
                        alive.store(false, Ordering::Relaxed);
                        break;
                    }
                }
            }
        }))
    }

    fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
        if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!(
                    "chrome executable not found at {}",
                    cfg.executable.display()
                ))
                .with_data(json!({
                    "expected": cfg.executable,
                    "hint": "Set PAGEWRIGHT_CHROME to the full path of chrome/chromium or pass a websocket url."
                })));
        }

        let profile_dir = if cfg.user_data_dir.is_absolute() {
            cfg.user_data_dir.clone()
        } else {
            let cwd = std::env::current_dir().map_err(|err| {
                AdapterError::internal(format!("failed to resolve cwd for user-data-dir: {err}"))
            })?;
            cwd.join(&cfg.user_data_dir)
        };

        fs::create_dir_all(&profile_dir).map_err(|err| {
            AdapterError::internal(format!("failed to ensure user-data-dir: {err}"))
        })?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
            .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms));

        if !cfg.headless {
            builder = builder.with_head();
        }

        if std::env::var("PAGEWRIGHT_DISABLE_SANDBOX")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            builder = builder.no_sandbox();
        }

        let mut args = vec![
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-popup-blocking",
            "--disable-sync",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--remote-allow-origins=*",
            "--use-mock-keychain",
        ];
        if cfg.headless {
            args.push("--headless=new");
            args.push("--hide-scrollbars");
            args.push("--mute-audio");
        }
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir);

        builder
            .build()
            .map_err(|err| AdapterError::internal(format!("browser config error: {err}")))
    }

    async fn launch_browser(
        config: BrowserConfig,
        wait: Duration,
    ) -> Result<(Option<Child>, String), AdapterError> {
        let mut child = config
            .launch()
            .map_err(|err| AdapterError::internal(format!("failed to launch chromium: {err}")))?;
        let ws_url = read_devtools_url(&mut child, wait).await?;
        Ok((Some(child), ws_url))
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), AdapterError> {
        let mut inflight: Inflight = HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::handle_command(&mut conn, cmd, &mut inflight);
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::handle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::handle_event(event, &event_tx).await {
                                warn!(target: "cdp-transport", ?err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let adapter_err = Self::map_cdp_error(err);
                            Self::fail_inflight(&mut inflight, &adapter_err);
                            return Err(adapter_err);
                        }
                        None => {
                            let err = AdapterError::session_closed("cdp connection closed");
                            Self::fail_inflight(&mut inflight, &err);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn fail_inflight(inflight: &mut Inflight, err: &AdapterError) {
        let pending = inflight.len();
        for (_, sender) in inflight.drain() {
            let _ = sender.send(Err(err.clone()));
        }
        if pending > 0 {
            warn!(target: "cdp-transport", pending, "failed in-flight commands after connection loss");
        }
    }

    fn handle_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut Inflight,
    ) {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
            }
            Err(err) => {
                let adapter_err =
                    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string());
                let _ = cmd.responder.send(Err(adapter_err));
            }
        }
    }

    fn handle_response(resp: Response, inflight: &mut Inflight) {
        let entry = inflight.remove(&resp.id);
        let result = Self::extract_payload(resp);

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn handle_event(
        event: CdpEventMessage,
        event_tx: &mpsc::Sender<TransportEvent>,
    ) -> Result<(), AdapterError> {
        let raw: CdpJsonEventMessage = event
            .try_into()
            .map_err(|err| AdapterError::internal(format!("failed to decode cdp event: {err}")))?;

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        event_tx
            .send(payload)
            .await
            .map_err(|err| AdapterError::internal(err.to_string()))
    }

    fn extract_payload(resp: Response) -> Result<Value, AdapterError> {
        if let Some(error) = resp.error {
            Err(AdapterError::protocol(error.code, error.message))
        } else if let Some(result) = resp.result {
            Ok(result)
        } else {
            Ok(Value::Object(Default::default()))
        }
    }

    fn map_cdp_error(err: CdpError) -> AdapterError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint(hint)
                .retriable(true),
            CdpError::Serde(_) | CdpError::JavascriptException(_) | CdpError::FrameNotFound(_) => {
                AdapterError::internal(hint)
            }
            _ => AdapterError::session_closed(hint),
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use tokio::sync::Mutex as TokioMutex;

    fn counting_factory(
        spawn_count: Arc<AtomicUsize>,
        alive_flags: Arc<TokioMutex<Vec<Arc<AtomicBool>>>>,
    ) -> RuntimeFactory {
        Arc::new(move |_cfg: CdpConfig| {
            let spawn_count = spawn_count.clone();
            let alive_flags = alive_flags.clone();
            Box::pin(async move {
                spawn_count.fetch_add(1, AtomicOrdering::SeqCst);
                let (runtime, alive) = RuntimeState::test_stub();
                alive_flags.lock().await.push(alive);
                Ok(runtime)
            })
        })
    }

    #[tokio::test]
    async fn reuses_single_runtime_while_alive() {
        let spawn_count = Arc::new(AtomicUsize::new(0));
        let alive_flags = Arc::new(TokioMutex::new(Vec::new()));
        let transport = ChromiumTransport::with_factory(
            CdpConfig::default(),
            counting_factory(spawn_count.clone(), alive_flags),
        );

        let rt1 = transport.runtime().await.expect("runtime #1");
        let rt2 = transport.runtime().await.expect("runtime #2");
        assert!(Arc::ptr_eq(&rt1, &rt2));
        assert_eq!(spawn_count.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dead_runtime_is_not_recreated() {
        let spawn_count = Arc::new(AtomicUsize::new(0));
        let alive_flags = Arc::new(TokioMutex::new(Vec::new()));
        let transport = ChromiumTransport::with_factory(
            CdpConfig::default(),
            counting_factory(spawn_count.clone(), alive_flags.clone()),
        );

        transport.runtime().await.expect("runtime");
        alive_flags.lock().await[0].store(false, AtomicOrdering::SeqCst);

        let err = transport
            .send_command(CommandTarget::Browser, "Browser.getVersion", json!({}))
            .await
            .expect_err("dead connection must fail");
        assert_eq!(err.kind, AdapterErrorKind::SessionClosed);
        assert_eq!(spawn_count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn remote_errors_become_protocol_errors() {
        let resp: Response = serde_json::from_value(json!({
            "id": 7,
            "error": { "code": -32601, "message": "'Foo.bar' wasn't found" }
        }))
        .expect("response");
        let err = RuntimeState::extract_payload(resp).expect_err("protocol error");
        assert_eq!(err.kind, AdapterErrorKind::Protocol);
        assert_eq!(err.protocol_code(), Some(-32601));
    }

    #[tokio::test]
    async fn connection_loss_fails_every_inflight_call() {
        let mut inflight: Inflight = HashMap::new();
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        inflight.insert(CallId::new(1), tx_a);
        inflight.insert(CallId::new(2), tx_b);

        RuntimeState::fail_inflight(
            &mut inflight,
            &AdapterError::session_closed("cdp connection closed"),
        );

        assert!(inflight.is_empty());
        for rx in [rx_a, rx_b] {
            let err = rx.await.expect("responder").expect_err("failed call");
            assert_eq!(err.kind, AdapterErrorKind::SessionClosed);
        }
    }
}
