//! Concrete element references produced by a locator.

use std::sync::Arc;

use cdp_adapter::remote::{self, CallArg, CallTarget};
use cdp_adapter::{CdpSession, FrameId, Page};
use serde_json::{json, Value};

use crate::errors::{from_adapter, LocatorError};
use crate::scripts;
use crate::types::BoundingBox;

/// Remote handle to one element in one frame.
///
/// A handle is tied to the document it was resolved in; once the frame navigates it reports
/// itself stale instead of acting on the new document.
#[derive(Clone)]
pub struct ElementHandle {
    page: Arc<Page>,
    frame: FrameId,
    session: Arc<CdpSession>,
    object_id: String,
    generation: u64,
}

impl ElementHandle {
    pub(crate) fn new(
        page: Arc<Page>,
        frame: FrameId,
        session: Arc<CdpSession>,
        object_id: String,
        generation: u64,
    ) -> Self {
        Self {
            page,
            frame,
            session,
            object_id,
            generation,
        }
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn frame(&self) -> &FrameId {
        &self.frame
    }

    pub fn session(&self) -> &Arc<CdpSession> {
        &self.session
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// True once the owning frame navigated or detached.
    pub fn is_stale(&self) -> bool {
        self.page.frame_generation(&self.frame) != Some(self.generation)
    }

    fn ensure_fresh(&self) -> Result<(), LocatorError> {
        if self.is_stale() {
            return Err(LocatorError::StaleFrame(format!(
                "frame {} navigated since the element was resolved",
                self.frame
            )));
        }
        Ok(())
    }

    /// Calls `declaration` with the element as `this`, returning the value.
    pub async fn call(&self, declaration: &str, args: &[Value]) -> Result<Value, LocatorError> {
        self.ensure_fresh()?;
        let args: Vec<CallArg> = args.iter().cloned().map(CallArg::Value).collect();
        let result = remote::call_function_on(
            &self.session,
            &CallTarget::Object(self.object_id.clone()),
            declaration,
            &args,
            true,
        )
        .await
        .map_err(from_adapter)?;
        Ok(result.value_or_null())
    }

    pub async fn backend_node_id(&self) -> Result<i64, LocatorError> {
        let node = self.describe().await?;
        node.get("backendNodeId")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| LocatorError::Internal("DOM.describeNode returned no backendNodeId".into()))
    }

    async fn describe(&self) -> Result<Value, LocatorError> {
        self.ensure_fresh()?;
        let response = self
            .session
            .send("DOM.describeNode", json!({ "objectId": self.object_id }))
            .await
            .map_err(from_adapter)?;
        Ok(response.get("node").cloned().unwrap_or(Value::Null))
    }

    /// Frame hosted by this `<iframe>`/`<frame>` element.
    pub async fn content_frame(&self) -> Result<Option<FrameId>, LocatorError> {
        let node = self.describe().await?;
        let frame_id = node
            .get("frameId")
            .and_then(|v| v.as_str())
            .or_else(|| {
                node.get("contentDocument")
                    .and_then(|doc| doc.get("frameId"))
                    .and_then(|v| v.as_str())
            });
        Ok(frame_id.map(FrameId::new))
    }

    pub async fn tag_name(&self) -> Result<String, LocatorError> {
        let value = self.call(scripts::TAG_NAME, &[]).await?;
        Ok(value.as_str().unwrap_or_default().to_ascii_lowercase())
    }

    pub async fn text(&self) -> Result<String, LocatorError> {
        let value = self.call(scripts::INNER_TEXT, &[]).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn is_visible(&self) -> Result<bool, LocatorError> {
        let value = self.call(scripts::IS_VISIBLE, &[]).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    pub async fn xpath(&self) -> Result<String, LocatorError> {
        let value = self.call(scripts::XPATH_OF, &[]).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LocatorError::Internal("xpath computation returned no string".into()))
    }

    pub async fn scroll_into_view(&self) -> Result<(), LocatorError> {
        self.ensure_fresh()?;
        self.session
            .send(
                "DOM.scrollIntoViewIfNeeded",
                json!({ "objectId": self.object_id }),
            )
            .await
            .map_err(from_adapter)?;
        Ok(())
    }

    /// Box in page coordinates, `None` when the element has no layout box.
    ///
    /// Prefers the box model's content quad and falls back to the client rect. Out-of-process
    /// frame offsets are added so the result can be fed straight to input events.
    pub async fn bounding_box(&self) -> Result<Option<BoundingBox>, LocatorError> {
        self.ensure_fresh()?;
        let local = match self
            .session
            .send("DOM.getBoxModel", json!({ "objectId": self.object_id }))
            .await
        {
            Ok(model) => model
                .get("model")
                .and_then(|m| m.get("content"))
                .and_then(|quad| serde_json::from_value::<Vec<f64>>(quad.clone()).ok())
                .and_then(|quad| BoundingBox::from_quad(&quad)),
            Err(_) => None,
        };

        let local = match local {
            Some(bbox) => Some(bbox),
            None => {
                let rect = self.call(scripts::BOUNDING_RECT, &[]).await?;
                serde_json::from_value::<Option<BoundingBox>>(rect).unwrap_or(None)
            }
        };

        let Some(local) = local.filter(|bbox| !bbox.is_empty()) else {
            return Ok(None);
        };
        let (dx, dy) = frame_offset(&self.page, &self.frame).await?;
        Ok(Some(local.translate(dx, dy)))
    }

    /// Releases the remote object. Later calls on this handle fail.
    pub async fn release(self) {
        remote::release_object(&self.session, &self.object_id).await;
    }
}

impl std::fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementHandle")
            .field("page", self.page.id())
            .field("frame", &self.frame)
            .field("object_id", &self.object_id)
            .finish()
    }
}

/// Offset of the local root hosting `frame` relative to the main frame.
///
/// Box models are reported relative to the local root of the session that owns the document,
/// so only out-of-process boundaries add an offset: the content-box origin of each owner element
/// in its parent's local root.
pub async fn frame_offset(page: &Page, frame: &FrameId) -> Result<(f64, f64), LocatorError> {
    let mut dx = 0.0;
    let mut dy = 0.0;
    let mut current = frame.clone();

    loop {
        let root = local_root(page, &current)?;
        let Some(parent) = page.parent_of(&root) else {
            break;
        };
        let (x, y) = owner_origin(page, &root, &parent).await?;
        dx += x;
        dy += y;
        current = parent;
    }
    Ok((dx, dy))
}

fn local_root(page: &Page, frame: &FrameId) -> Result<FrameId, LocatorError> {
    let mut current = frame.clone();
    loop {
        let info = page
            .frame(&current)
            .ok_or_else(|| LocatorError::StaleFrame(format!("frame {current} detached")))?;
        match info.parent {
            Some(parent) if !info.out_of_process => current = parent,
            _ => return Ok(current),
        }
    }
}

async fn owner_origin(
    page: &Page,
    frame: &FrameId,
    parent: &FrameId,
) -> Result<(f64, f64), LocatorError> {
    let session = page.session_for(parent).map_err(from_adapter)?;
    let owner = session
        .send("DOM.getFrameOwner", json!({ "frameId": frame.as_str() }))
        .await
        .map_err(from_adapter)?;
    let backend = owner
        .get("backendNodeId")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| LocatorError::Internal(format!("no owner element for frame {frame}")))?;
    let model = session
        .send("DOM.getBoxModel", json!({ "backendNodeId": backend }))
        .await
        .map_err(from_adapter)?;
    let quad: Vec<f64> = model
        .get("model")
        .and_then(|m| m.get("content"))
        .and_then(|quad| serde_json::from_value(quad.clone()).ok())
        .unwrap_or_default();
    let origin = BoundingBox::from_quad(&quad)
        .ok_or_else(|| LocatorError::Internal(format!("owner of frame {frame} has no box")))?;
    Ok((origin.x, origin.y))
}
