//! Scroll primitive - window scrolling, element reveal and wheel deltas

use std::time::Instant;

use action_locator::Point;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    errors::ActionError,
    input,
    primitives::bounded,
    scripts,
    types::{ActionReport, ExecCtx, ScrollTarget},
};

/// Execute scroll primitive
///
/// Window scrolls go through `scrollBy`/`scrollTo`; `By` dispatches a real wheel event so
/// nested scroll containers under the pointer receive it.
pub async fn execute_scroll(
    ctx: &ExecCtx,
    target: &ScrollTarget,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(
        action_id = %ctx.action_id,
        target = ?target,
        "Executing scroll primitive"
    );

    let position = bounded(ctx, "scroll", async {
        match target {
            ScrollTarget::Up(px) => window_scroll(ctx, &format!("window.scrollBy(0, {})", -px.abs())).await?,
            ScrollTarget::Down(px) => window_scroll(ctx, &format!("window.scrollBy(0, {})", px.abs())).await?,
            ScrollTarget::ToTop => window_scroll(ctx, "window.scrollTo(0, 0)").await?,
            ScrollTarget::ToBottom => {
                window_scroll(
                    ctx,
                    "window.scrollTo(0, Math.max(document.body ? document.body.scrollHeight : 0, document.documentElement.scrollHeight))",
                )
                .await?
            }
            ScrollTarget::ToElement(locator) => {
                let element = locator.resolve().await?;
                element.scroll_into_view().await?;
            }
            ScrollTarget::By { dx, dy, at } => {
                let point = match at {
                    Some(point) => *point,
                    None => viewport_center(ctx).await?,
                };
                debug!(x = point.x, y = point.y, dx, dy, "Dispatching wheel event");
                input::mouse_wheel(&ctx.page.session(), point, *dx, *dy).await?;
            }
        }
        Ok(scroll_position(ctx).await)
    })
    .await?;

    let latency_ms = start_instant.elapsed().as_millis() as u64;
    info!(
        action_id = %ctx.action_id,
        latency_ms = latency_ms,
        "Scroll completed successfully"
    );

    let report = ActionReport::success(started_at, latency_ms);
    Ok(match position {
        Some(position) => report.with_scroll_position(position),
        None => report,
    })
}

async fn window_scroll(ctx: &ExecCtx, expression: &str) -> Result<(), ActionError> {
    ctx.page.evaluate(expression).await?;
    Ok(())
}

async fn viewport_center(ctx: &ExecCtx) -> Result<Point, ActionError> {
    let value = ctx.page.evaluate(scripts::VIEWPORT_CENTER).await?;
    serde_json::from_value(value)
        .map_err(|err| ActionError::Internal(format!("viewport size unreadable: {err}")))
}

/// Window scroll offset; a missing offset is logged and left out of the report.
async fn scroll_position(ctx: &ExecCtx) -> Option<Point> {
    match ctx.page.evaluate(scripts::SCROLL_POSITION).await {
        Ok(value) => serde_json::from_value(value).ok(),
        Err(err) => {
            warn!("failed to read scroll position: {}", err);
            None
        }
    }
}
