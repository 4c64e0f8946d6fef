//! Frame tree of a single page.
//!
//! Frames reference their parent and children by id only; the tree owns every node.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::ids::{ExecutionContextId, FrameId, SessionId};

#[derive(Clone, Debug, Serialize)]
pub struct FrameInfo {
    pub id: FrameId,
    pub parent: Option<FrameId>,
    pub children: Vec<FrameId>,
    pub url: String,
    pub name: Option<String>,
    /// Session that owns this frame's document.
    pub session: SessionId,
    /// Root of an out-of-process child target.
    pub out_of_process: bool,
    /// Default execution context; `None` until the document's context is (re)created.
    pub context: Option<ExecutionContextId>,
    /// Bumped on every navigation so stale handles can be told apart.
    pub generation: u64,
}

impl FrameInfo {
    fn new(id: FrameId, parent: Option<FrameId>, session: SessionId) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            url: String::new(),
            name: None,
            session,
            out_of_process: false,
            context: None,
            generation: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FrameTree {
    main: FrameId,
    frames: HashMap<FrameId, FrameInfo>,
}

impl FrameTree {
    pub fn new(main: FrameId, session: SessionId) -> Self {
        let mut frames = HashMap::new();
        frames.insert(main.clone(), FrameInfo::new(main.clone(), None, session));
        Self { main, frames }
    }

    pub fn main(&self) -> &FrameId {
        &self.main
    }

    pub fn get(&self, id: &FrameId) -> Option<&FrameInfo> {
        self.frames.get(id)
    }

    pub fn contains(&self, id: &FrameId) -> bool {
        self.frames.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn parent(&self, id: &FrameId) -> Option<&FrameId> {
        self.frames.get(id).and_then(|frame| frame.parent.as_ref())
    }

    /// Frames in pre-order starting at the main frame.
    pub fn iter(&self) -> Vec<&FrameInfo> {
        let mut out = Vec::with_capacity(self.frames.len());
        let mut stack = vec![&self.main];
        while let Some(id) = stack.pop() {
            if let Some(frame) = self.frames.get(id) {
                out.push(frame);
                stack.extend(frame.children.iter().rev());
            }
        }
        out
    }

    /// Records a child frame. Re-attaching a known frame only refreshes its session.
    pub fn attach(
        &mut self,
        id: FrameId,
        parent: &FrameId,
        session: SessionId,
    ) -> Result<(), AdapterError> {
        if let Some(existing) = self.frames.get_mut(&id) {
            existing.session = session;
            return Ok(());
        }

        let parent_frame = self.frames.get_mut(parent).ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::FrameDetached)
                .with_hint(format!("parent frame {parent} is not attached"))
        })?;
        parent_frame.children.push(id.clone());
        self.frames
            .insert(id.clone(), FrameInfo::new(id, Some(parent.clone()), session));
        Ok(())
    }

    /// Moves a frame (and its same-process descendants) onto an out-of-process session.
    pub fn adopt_out_of_process(
        &mut self,
        id: &FrameId,
        fallback_parent: &FrameId,
        session: SessionId,
    ) -> Result<(), AdapterError> {
        if !self.frames.contains_key(id) {
            self.attach(id.clone(), fallback_parent, session.clone())?;
        }
        let old_session = self.frames.get(id).map(|frame| frame.session.clone());
        for frame_id in self.subtree(id) {
            if let Some(frame) = self.frames.get_mut(&frame_id) {
                if Some(&frame.session) == old_session.as_ref() {
                    frame.session = session.clone();
                    frame.context = None;
                }
            }
        }
        if let Some(frame) = self.frames.get_mut(id) {
            frame.out_of_process = true;
        }
        Ok(())
    }

    /// Removes a frame and its descendants, returning the removed ids (root first).
    /// The main frame is never removed.
    pub fn detach(&mut self, id: &FrameId) -> Vec<FrameId> {
        if *id == self.main || !self.frames.contains_key(id) {
            return Vec::new();
        }

        let removed = self.subtree(id);
        if let Some(parent) = self.parent(id).cloned() {
            if let Some(parent_frame) = self.frames.get_mut(&parent) {
                parent_frame.children.retain(|child| child != id);
            }
        }
        for frame_id in &removed {
            self.frames.remove(frame_id);
        }
        removed
    }

    /// Applies a committed navigation: records the url, drops the execution context and
    /// bumps the generation. Children of the old document are discarded.
    pub fn navigated(
        &mut self,
        id: &FrameId,
        url: impl Into<String>,
        name: Option<String>,
    ) -> Result<Vec<FrameId>, AdapterError> {
        let children = self
            .frames
            .get(id)
            .map(|frame| frame.children.clone())
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::FrameDetached)
                    .with_hint(format!("navigated frame {id} is not attached"))
            })?;

        let mut removed = Vec::new();
        for child in children {
            removed.extend(self.detach(&child));
        }

        if let Some(frame) = self.frames.get_mut(id) {
            frame.url = url.into();
            frame.name = name;
            frame.context = None;
            frame.generation += 1;
        }
        Ok(removed)
    }

    pub fn set_context(&mut self, id: &FrameId, context: ExecutionContextId) -> bool {
        match self.frames.get_mut(id) {
            Some(frame) => {
                frame.context = Some(context);
                true
            }
            None => false,
        }
    }

    /// Forgets a destroyed context owned by `session`.
    pub fn drop_context(&mut self, session: &SessionId, context: ExecutionContextId) {
        for frame in self.frames.values_mut() {
            if &frame.session == session && frame.context == Some(context) {
                frame.context = None;
            }
        }
    }

    pub fn clear_contexts(&mut self, session: &SessionId) {
        for frame in self.frames.values_mut() {
            if &frame.session == session {
                frame.context = None;
            }
        }
    }

    /// Frames whose documents live in `session`.
    pub fn frames_for_session(&self, session: &SessionId) -> Vec<FrameId> {
        self.frames
            .values()
            .filter(|frame| &frame.session == session)
            .map(|frame| frame.id.clone())
            .collect()
    }

    fn subtree(&self, id: &FrameId) -> Vec<FrameId> {
        let mut out = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if let Some(frame) = self.frames.get(&current) {
                stack.extend(frame.children.iter().cloned());
                out.push(current);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> FrameTree {
        let mut tree = FrameTree::new("main".into(), "S-main".into());
        tree.attach("a".into(), &"main".into(), "S-main".into())
            .unwrap();
        tree.attach("a1".into(), &"a".into(), "S-main".into()).unwrap();
        tree.attach("b".into(), &"main".into(), "S-main".into())
            .unwrap();
        tree
    }

    #[test]
    fn preorder_iteration_starts_at_main() {
        let tree = tree();
        let order: Vec<&str> = tree.iter().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(order, vec!["main", "a", "a1", "b"]);
        assert_eq!(tree.parent(&"a1".into()), Some(&FrameId::from("a")));
        assert_eq!(tree.parent(&"main".into()), None);
    }

    #[test]
    fn attach_requires_known_parent() {
        let mut tree = tree();
        let err = tree
            .attach("x".into(), &"missing".into(), "S-main".into())
            .expect_err("unknown parent");
        assert_eq!(err.kind, AdapterErrorKind::FrameDetached);
    }

    #[test]
    fn detach_removes_whole_subtree_but_never_main() {
        let mut tree = tree();
        let mut removed = tree.detach(&"a".into());
        removed.sort();
        assert_eq!(removed, vec![FrameId::from("a"), FrameId::from("a1")]);
        assert!(!tree.contains(&"a1".into()));
        assert!(tree.detach(&"main".into()).is_empty());
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn navigation_invalidates_context_and_bumps_generation() {
        let mut tree = tree();
        assert!(tree.set_context(&"a".into(), 7));
        let removed = tree
            .navigated(&"a".into(), "https://example.com/next", None)
            .unwrap();
        assert_eq!(removed, vec![FrameId::from("a1")]);

        let frame = tree.get(&"a".into()).unwrap();
        assert_eq!(frame.context, None);
        assert_eq!(frame.generation, 1);
        assert_eq!(frame.url, "https://example.com/next");
    }

    #[test]
    fn out_of_process_adoption_moves_session_and_clears_context() {
        let mut tree = tree();
        tree.set_context(&"b".into(), 3);
        tree.adopt_out_of_process(&"b".into(), &"main".into(), "S-b".into())
            .unwrap();
        let frame = tree.get(&"b".into()).unwrap();
        assert!(frame.out_of_process);
        assert_eq!(frame.session, SessionId::from("S-b"));
        assert_eq!(frame.context, None);
        assert_eq!(tree.frames_for_session(&"S-b".into()), vec![FrameId::from("b")]);

        tree.adopt_out_of_process(&"late".into(), &"main".into(), "S-late".into())
            .unwrap();
        assert_eq!(tree.parent(&"late".into()), Some(&FrameId::from("main")));
    }

    #[test]
    fn cleared_contexts_are_scoped_to_session() {
        let mut tree = tree();
        tree.adopt_out_of_process(&"b".into(), &"main".into(), "S-b".into())
            .unwrap();
        tree.set_context(&"main".into(), 1);
        tree.set_context(&"b".into(), 1);
        tree.clear_contexts(&"S-main".into());
        assert_eq!(tree.get(&"main".into()).unwrap().context, None);
        assert_eq!(tree.get(&"b".into()).unwrap().context, Some(1));

        tree.drop_context(&"S-b".into(), 1);
        assert_eq!(tree.get(&"b".into()).unwrap().context, None);
    }
}
