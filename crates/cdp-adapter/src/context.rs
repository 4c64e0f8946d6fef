//! Set of pages sharing one browser context, with an activation stack.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::ids::PageId;
use crate::page::Page;

/// Pages of a browser context.
///
/// `order` is an activation stack: the last entry is the active page. Closing the active page
/// falls back to the most recently active survivor.
#[derive(Default)]
pub struct BrowserContext {
    pages: DashMap<PageId, Arc<Page>>,
    order: Mutex<Vec<PageId>>,
}

impl BrowserContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a page. Background pages go to the bottom of the stack and do not steal focus.
    pub fn insert(&self, page: Arc<Page>, activate: bool) {
        let id = page.id().clone();
        self.pages.insert(id.clone(), page);
        let mut order = self.order.lock();
        order.retain(|existing| existing != &id);
        if activate || order.is_empty() {
            order.push(id);
        } else {
            order.insert(0, id);
        }
    }

    /// Moves `id` to the top of the stack. Returns false for unknown pages.
    pub fn activate(&self, id: &PageId) -> bool {
        if !self.pages.contains_key(id) {
            return false;
        }
        let mut order = self.order.lock();
        order.retain(|existing| existing != id);
        order.push(id.clone());
        true
    }

    /// Removes a page and returns it with the page that is active afterwards.
    pub fn remove(&self, id: &PageId) -> (Option<Arc<Page>>, Option<PageId>) {
        let removed = self.pages.remove(id).map(|(_, page)| page);
        let mut order = self.order.lock();
        order.retain(|existing| existing != id);
        (removed, order.last().cloned())
    }

    pub fn active_page(&self) -> Option<Arc<Page>> {
        let active = self.order.lock().last().cloned()?;
        self.page(&active)
    }

    pub fn active_id(&self) -> Option<PageId> {
        self.order.lock().last().cloned()
    }

    pub fn page(&self, id: &PageId) -> Option<Arc<Page>> {
        self.pages.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Pages in activation order, least recently active first.
    pub fn pages(&self) -> Vec<Arc<Page>> {
        self.order
            .lock()
            .iter()
            .filter_map(|id| self.page(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Empties the context, returning every page that was in it.
    pub fn drain(&self) -> Vec<Arc<Page>> {
        self.order.lock().clear();
        let ids: Vec<PageId> = self.pages.iter().map(|entry| entry.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.pages.remove(&id).map(|(_, page)| page))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterError;
    use crate::session::CdpSession;
    use crate::transport::{CdpTransport, CommandTarget, TransportEvent};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    struct NullTransport;

    #[async_trait]
    impl CdpTransport for NullTransport {
        async fn start(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            None
        }

        async fn send_command(
            &self,
            _target: CommandTarget,
            _method: &str,
            _params: Value,
        ) -> Result<Value, AdapterError> {
            Ok(Value::Null)
        }
    }

    fn page(id: &str) -> Arc<Page> {
        let session = Arc::new(CdpSession::attached(
            format!("S-{id}").into(),
            id,
            Arc::new(NullTransport),
            Duration::from_secs(1),
        ));
        Arc::new(Page::new(
            id.into(),
            None,
            format!("S-{id}").into(),
            session,
            "about:blank",
        ))
    }

    #[test]
    fn closing_active_page_falls_back_to_previous() {
        let context = BrowserContext::new();
        context.insert(page("A"), true);
        context.insert(page("B"), true);
        context.insert(page("C"), true);
        context.activate(&"B".into());

        let (removed, active) = context.remove(&"B".into());
        assert!(removed.is_some());
        assert_eq!(active, Some(PageId::from("C")));

        let (_, active) = context.remove(&"C".into());
        assert_eq!(active, Some(PageId::from("A")));
    }

    #[test]
    fn background_pages_do_not_steal_focus() {
        let context = BrowserContext::new();
        context.insert(page("A"), true);
        context.insert(page("B"), false);
        assert_eq!(context.active_id(), Some(PageId::from("A")));
        let ids: Vec<String> = context.pages().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["B", "A"]);
        assert!(!context.activate(&"missing".into()));
    }
}
