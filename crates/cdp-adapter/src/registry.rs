//! Routing table from flattened session ids to the page that owns them.

use dashmap::DashMap;
use serde::Serialize;

use crate::ids::{FrameId, PageId, SessionId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum BindingKind {
    /// Main target of a top-level page.
    Page,
    /// Out-of-process iframe rooted at the given frame.
    Frame(FrameId),
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionBinding {
    pub page: PageId,
    pub target_id: String,
    pub kind: BindingKind,
}

/// Concurrent registry of attached sessions.
#[derive(Default)]
pub struct Registry {
    sessions: DashMap<SessionId, SessionBinding>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_page(&self, session: SessionId, page: PageId) {
        let target_id = page.as_str().to_string();
        self.sessions.insert(
            session,
            SessionBinding {
                page,
                target_id,
                kind: BindingKind::Page,
            },
        );
    }

    pub fn bind_frame(&self, session: SessionId, page: PageId, frame: FrameId) {
        self.sessions.insert(
            session,
            SessionBinding {
                page,
                target_id: frame.as_str().to_string(),
                kind: BindingKind::Frame(frame),
            },
        );
    }

    pub fn get(&self, session: &SessionId) -> Option<SessionBinding> {
        self.sessions.get(session).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, session: &SessionId) -> Option<SessionBinding> {
        self.sessions.remove(session).map(|(_, binding)| binding)
    }

    /// Session attached to a target, if any.
    pub fn session_for_target(&self, target_id: &str) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|entry| entry.value().target_id == target_id)
            .map(|entry| entry.key().clone())
    }

    /// Drops every binding of `page`, returning the removed session ids.
    pub fn remove_page(&self, page: &PageId) -> Vec<SessionId> {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| &entry.value().page == page)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &ids {
            self.sessions.remove(id);
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_removal_drops_frame_sessions_too() {
        let registry = Registry::new();
        registry.bind_page("S-page".into(), "P1".into());
        registry.bind_frame("S-frame".into(), "P1".into(), "F-oop".into());
        registry.bind_page("S-other".into(), "P2".into());

        assert_eq!(
            registry.session_for_target("F-oop"),
            Some(SessionId::from("S-frame"))
        );

        let mut removed = registry.remove_page(&"P1".into());
        removed.sort();
        assert_eq!(removed, vec![SessionId::from("S-frame"), SessionId::from("S-page")]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&"S-other".into()).map(|b| b.kind), Some(BindingKind::Page));
    }
}
