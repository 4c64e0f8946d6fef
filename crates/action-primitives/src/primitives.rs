//! Action primitives implementation
//!
//! Core primitives for driving a page through raw input events:
//! 1. click / hover - pointer events at an element centroid or a fixed point
//! 2. type_text / press - text entry with the `{Key}` grammar
//! 3. scroll - window scrolling, element reveal and wheel deltas
//! 4. drag_and_drop - interpolated pointer drag between two targets

mod click;
mod drag;
mod scroll;
mod type_text;

pub use click::*;
pub use drag::*;
pub use scroll::*;
pub use type_text::*;

use std::future::Future;

use action_locator::{ElementHandle, Point};
use async_trait::async_trait;
use tracing::debug;

use crate::{
    errors::ActionError,
    types::{
        ActionReport, ClickOptions, DragOptions, ExecCtx, ScrollTarget, Target, TypeOptions,
        TypingConfig,
    },
};

/// Action primitives trait
///
/// Each primitive is responsible for:
/// - Validating the execution context
/// - Resolving its target to page coordinates
/// - Dispatching the input events
/// - Generating a report
#[async_trait]
pub trait ActionPrimitives: Send + Sync {
    /// Click a target
    async fn click(
        &self,
        ctx: &ExecCtx,
        target: &Target,
        options: &ClickOptions,
    ) -> Result<ActionReport, ActionError>;

    /// Move the pointer over a target
    async fn hover(&self, ctx: &ExecCtx, target: &Target) -> Result<ActionReport, ActionError>;

    /// Type text into an element
    async fn type_text(
        &self,
        ctx: &ExecCtx,
        target: &Target,
        text: &str,
        options: &TypeOptions,
    ) -> Result<ActionReport, ActionError>;

    /// Press keys on whatever has focus
    async fn press(&self, ctx: &ExecCtx, keys: &str) -> Result<ActionReport, ActionError>;

    /// Scroll the page or reveal an element
    async fn scroll(&self, ctx: &ExecCtx, target: &ScrollTarget)
        -> Result<ActionReport, ActionError>;

    /// Drag from one target to another
    async fn drag_and_drop(
        &self,
        ctx: &ExecCtx,
        from: &Target,
        to: &Target,
        options: &DragOptions,
    ) -> Result<ActionReport, ActionError>;
}

/// Default implementation of action primitives
#[derive(Debug, Clone, Default)]
pub struct DefaultActionPrimitives {
    /// Typing thresholds
    typing: TypingConfig,
}

impl DefaultActionPrimitives {
    pub fn new(typing: TypingConfig) -> Self {
        Self { typing }
    }

    pub fn typing(&self) -> &TypingConfig {
        &self.typing
    }
}

/// Page coordinates for a target, plus the element when it came from a locator.
///
/// Elements are scrolled into view first so the centroid is inside the viewport.
pub(crate) async fn resolve_point(
    target: &Target,
) -> Result<(Point, Option<ElementHandle>), ActionError> {
    match target {
        Target::Point(point) => Ok((*point, None)),
        Target::Locator(locator) => {
            let element = locator.resolve().await?;
            element.scroll_into_view().await?;
            let bbox = element.bounding_box().await?.ok_or_else(|| {
                ActionError::NotVisible(format!("'{}' has no layout box", locator.selector()))
            })?;
            let point = bbox.center();
            debug!(selector = %locator.selector(), x = point.x, y = point.y, "target resolved");
            Ok((point, Some(element)))
        }
    }
}

/// Runs `work` until it finishes, the context deadline passes, or the context is cancelled.
pub(crate) async fn bounded<T, F>(ctx: &ExecCtx, what: &str, work: F) -> Result<T, ActionError>
where
    F: Future<Output = Result<T, ActionError>>,
{
    ctx.check()?;
    let remaining = ctx.remaining_time();
    tokio::select! {
        biased;
        _ = ctx.cancel_token.cancelled() => {
            Err(ActionError::Interrupted(format!("{what} cancelled")))
        }
        outcome = tokio::time::timeout(remaining, work) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ActionError::Timeout(format!(
                "{what} did not finish within {}ms",
                remaining.as_millis()
            ))),
        },
    }
}

#[async_trait]
impl ActionPrimitives for DefaultActionPrimitives {
    async fn click(
        &self,
        ctx: &ExecCtx,
        target: &Target,
        options: &ClickOptions,
    ) -> Result<ActionReport, ActionError> {
        click::execute_click(ctx, target, options).await
    }

    async fn hover(&self, ctx: &ExecCtx, target: &Target) -> Result<ActionReport, ActionError> {
        click::execute_hover(ctx, target).await
    }

    async fn type_text(
        &self,
        ctx: &ExecCtx,
        target: &Target,
        text: &str,
        options: &TypeOptions,
    ) -> Result<ActionReport, ActionError> {
        type_text::execute_type_text(self, ctx, target, text, options).await
    }

    async fn press(&self, ctx: &ExecCtx, keys: &str) -> Result<ActionReport, ActionError> {
        type_text::execute_press(ctx, keys).await
    }

    async fn scroll(
        &self,
        ctx: &ExecCtx,
        target: &ScrollTarget,
    ) -> Result<ActionReport, ActionError> {
        scroll::execute_scroll(ctx, target).await
    }

    async fn drag_and_drop(
        &self,
        ctx: &ExecCtx,
        from: &Target,
        to: &Target,
        options: &DragOptions,
    ) -> Result<ActionReport, ActionError> {
        drag::execute_drag(ctx, from, to, options).await
    }
}
