//! A protocol session multiplexed over the shared transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::SessionId;
use crate::listeners::{EventStream, ListenerFn, ListenerId, ListenerRegistry};
use crate::metrics;
use crate::transport::{CdpTransport, CommandTarget};

/// Handle for one protocol target (or the browser itself).
///
/// Sessions share the physical connection but fail independently: closing one fails only the
/// calls awaiting on it and drops only its listeners.
pub struct CdpSession {
    id: Option<SessionId>,
    target_id: Option<String>,
    transport: Arc<dyn CdpTransport>,
    listeners: ListenerRegistry,
    domains: DashSet<String>,
    closed: CancellationToken,
    default_timeout: Duration,
}

impl CdpSession {
    /// Root session addressing the browser target.
    pub fn browser(transport: Arc<dyn CdpTransport>, default_timeout: Duration) -> Self {
        Self::build(None, None, transport, default_timeout)
    }

    pub fn attached(
        id: SessionId,
        target_id: impl Into<String>,
        transport: Arc<dyn CdpTransport>,
        default_timeout: Duration,
    ) -> Self {
        Self::build(Some(id), Some(target_id.into()), transport, default_timeout)
    }

    fn build(
        id: Option<SessionId>,
        target_id: Option<String>,
        transport: Arc<dyn CdpTransport>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            id,
            target_id,
            transport,
            listeners: ListenerRegistry::new(),
            domains: DashSet::new(),
            closed: CancellationToken::new(),
            default_timeout,
        }
    }

    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn command_target(&self) -> CommandTarget {
        match &self.id {
            Some(id) => CommandTarget::Session(id.0.clone()),
            None => CommandTarget::Browser,
        }
    }

    fn label(&self) -> &str {
        self.id.as_ref().map(|id| id.as_str()).unwrap_or("browser")
    }

    pub async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.send_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Sends a command with a per-call deadline.
    ///
    /// Fails with `Protocol` when the remote side rejects it, `Timeout` once `timeout`
    /// elapses (the browser may still apply the command), and `SessionClosed` if the session
    /// closes while waiting.
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, AdapterError> {
        if self.closed.is_cancelled() {
            return Err(AdapterError::session_closed(format!(
                "session {} is closed",
                self.label()
            )));
        }

        trace!(target: "cdp-adapter", session = self.label(), method, "send");
        metrics::record_command(method);
        let start = Instant::now();
        let call = self
            .transport
            .send_command(self.command_target(), method, params);

        let outcome = tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(AdapterError::session_closed(format!(
                "session {} closed while awaiting {method}",
                self.label()
            ))),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(inner) => inner,
                Err(_) => Err(AdapterError::timeout(method, timeout)),
            },
        };

        match &outcome {
            Ok(_) => metrics::record_command_success(method, start.elapsed()),
            Err(err) => {
                metrics::record_command_failure(method);
                debug!(target: "cdp-adapter", session = self.label(), method, %err, "command failed");
            }
        }
        outcome
    }

    pub fn on(&self, event: &str, handler: ListenerFn) -> ListenerId {
        self.listeners.on(event, handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    pub fn subscribe(&self, event: &str) -> EventStream {
        self.listeners.subscribe(event)
    }

    pub(crate) fn dispatch(&self, event: &str, params: &Value) -> usize {
        if self.closed.is_cancelled() {
            return 0;
        }
        self.listeners.dispatch(event, params)
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<(), AdapterError> {
        self.send(&format!("{domain}.enable"), json!({})).await?;
        self.domains.insert(domain.to_string());
        Ok(())
    }

    pub async fn disable_domain(&self, domain: &str) -> Result<(), AdapterError> {
        self.domains.remove(domain);
        self.send(&format!("{domain}.disable"), json!({})).await?;
        Ok(())
    }

    pub fn is_domain_enabled(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    /// Pass-through for arbitrary protocol domains (`WebAuthn`, `Audits`, ...).
    ///
    /// The method's domain must have been enabled on this session first, otherwise the call
    /// fails with `DomainNotEnabled` instead of being sent.
    pub async fn call_domain(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        let (domain, command) = method.split_once('.').ok_or_else(|| {
            AdapterError::internal(format!("'{method}' is not a Domain.method name"))
        })?;

        match command {
            "enable" => {
                self.enable_domain(domain).await?;
                return Ok(json!({}));
            }
            "disable" => {
                self.disable_domain(domain).await?;
                return Ok(json!({}));
            }
            _ => {}
        }

        if !self.is_domain_enabled(domain) {
            return Err(AdapterError::new(AdapterErrorKind::DomainNotEnabled)
                .with_hint(format!("call {domain}.enable before {method}"))
                .with_data(json!({ "domain": domain, "method": method })));
        }
        self.send(method, params).await
    }

    /// Fails pending calls and drops listeners. Idempotent.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.listeners.clear();
        self.domains.clear();
        debug!(target: "cdp-adapter", session = self.label(), "session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl std::fmt::Debug for CdpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpSession")
            .field("id", &self.id)
            .field("target_id", &self.target_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::listener;
    use crate::transport::TransportEvent;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport whose commands either answer immediately or never answer.
    #[derive(Default)]
    struct StallingTransport {
        stall: Vec<&'static str>,
        sent: Mutex<Vec<(CommandTarget, String)>>,
    }

    #[async_trait]
    impl CdpTransport for StallingTransport {
        async fn start(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            None
        }

        async fn send_command(
            &self,
            target: CommandTarget,
            method: &str,
            _params: Value,
        ) -> Result<Value, AdapterError> {
            self.sent.lock().push((target, method.to_string()));
            if method == "DOM.reject" {
                return Err(AdapterError::protocol(-32000, "rejected"));
            }
            if self.stall.contains(&method) {
                futures::future::pending::<()>().await;
            }
            Ok(json!({ "ok": true }))
        }
    }

    fn session_with(transport: StallingTransport) -> (Arc<CdpSession>, Arc<StallingTransport>) {
        let transport = Arc::new(transport);
        let session = Arc::new(CdpSession::attached(
            SessionId::from("S1"),
            "T1",
            transport.clone() as Arc<dyn CdpTransport>,
            Duration::from_secs(5),
        ));
        (session, transport)
    }

    #[tokio::test]
    async fn commands_are_addressed_to_the_session() {
        let (session, transport) = session_with(StallingTransport::default());
        let result = session.send("Page.reload", json!({})).await.expect("reply");
        assert_eq!(result, json!({ "ok": true }));
        assert_eq!(
            transport.sent.lock()[0],
            (CommandTarget::Session("S1".into()), "Page.reload".to_string())
        );
    }

    #[tokio::test]
    async fn remote_rejection_surfaces_as_protocol_error() {
        let (session, _) = session_with(StallingTransport::default());
        let err = session.send("DOM.reject", json!({})).await.expect_err("rejected");
        assert_eq!(err.kind, AdapterErrorKind::Protocol);
        assert!(!session.is_closed(), "protocol errors are not fatal to the session");
    }

    #[tokio::test]
    async fn per_call_timeout_is_enforced() {
        let (session, _) = session_with(StallingTransport {
            stall: vec!["Runtime.evaluate"],
            ..Default::default()
        });
        let err = session
            .send_with_timeout("Runtime.evaluate", json!({}), Duration::from_millis(20))
            .await
            .expect_err("timeout");
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
    }

    #[tokio::test]
    async fn closing_fails_pending_calls_and_drops_listeners() {
        let (session, _) = session_with(StallingTransport {
            stall: vec!["Page.navigate"],
            ..Default::default()
        });
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        session.on(
            "Page.loadEventFired",
            listener(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.send("Page.navigate", json!({})).await })
        };
        tokio::task::yield_now().await;
        session.close();

        let err = pending.await.expect("join").expect_err("closed");
        assert_eq!(err.kind, AdapterErrorKind::SessionClosed);
        assert_eq!(session.dispatch("Page.loadEventFired", &json!({})), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let err = session.send("Page.reload", json!({})).await.expect_err("closed");
        assert_eq!(err.kind, AdapterErrorKind::SessionClosed);
    }

    #[tokio::test]
    async fn closing_one_session_leaves_siblings_working() {
        let transport = Arc::new(StallingTransport::default()) as Arc<dyn CdpTransport>;
        let a = CdpSession::attached("A".into(), "TA", transport.clone(), Duration::from_secs(1));
        let b = CdpSession::attached("B".into(), "TB", transport, Duration::from_secs(1));
        a.close();
        assert!(a.send("Page.reload", json!({})).await.is_err());
        assert!(b.send("Page.reload", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn domain_calls_require_enable_first() {
        let (session, transport) = session_with(StallingTransport::default());

        let err = session
            .call_domain("WebAuthn.addVirtualAuthenticator", json!({}))
            .await
            .expect_err("domain disabled");
        assert_eq!(err.kind, AdapterErrorKind::DomainNotEnabled);
        assert!(transport.sent.lock().is_empty(), "nothing reaches the wire");

        session.call_domain("WebAuthn.enable", json!({})).await.expect("enable");
        session
            .call_domain("WebAuthn.addVirtualAuthenticator", json!({}))
            .await
            .expect("enabled call");

        session.disable_domain("WebAuthn").await.expect("disable");
        assert!(session
            .call_domain("WebAuthn.addVirtualAuthenticator", json!({}))
            .await
            .is_err());
    }
}
