//! Per-session event listener registry.
//!
//! Handlers are keyed by protocol event name and invoked in registration order. A handler that
//! returns an error or panics is logged and skipped; delivery to the remaining handlers continues.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

pub type ListenerFn = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Boxes a closure as a [`ListenerFn`].
pub fn listener<F>(f: F) -> ListenerFn
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Inner {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(ListenerId, ListenerFn)>>>,
}

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Inner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: &str, handler: ListenerFn) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        remove_listener(&self.inner, id)
    }

    /// FIFO stream of one event's payloads; dropping the stream unsubscribes it.
    pub fn subscribe(&self, event: &str) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = listener(move |params| {
            tx.send(params.clone())
                .map_err(|_| anyhow::anyhow!("event stream receiver dropped"))
        });
        let id = self.on(event, handler);
        EventStream {
            rx,
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `params` to every handler of `event`; returns how many handled it cleanly.
    pub fn dispatch(&self, event: &str, params: &Value) -> usize {
        let handlers: Vec<(ListenerId, ListenerFn)> = match self.inner.handlers.read().get(event) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(params))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    warn!(target: "cdp-adapter", event, listener = id.0, %err, "event listener failed");
                }
                Err(_) => {
                    warn!(target: "cdp-adapter", event, listener = id.0, "event listener panicked");
                }
            }
        }
        delivered
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .handlers
            .read()
            .get(event)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Drops every handler; open streams observe end-of-stream.
    pub fn clear(&self) {
        self.inner.handlers.write().clear();
    }
}

fn remove_listener(inner: &Inner, id: ListenerId) -> bool {
    let mut handlers = inner.handlers.write();
    let mut removed = false;
    handlers.retain(|_, list| {
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        removed |= list.len() != before;
        !list.is_empty()
    });
    removed
}

pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Value>,
    id: ListenerId,
    registry: Weak<Inner>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            remove_listener(&inner, self.id);
        }
    }
}
