//! Drag primitive - interpolated pointer drag between two targets

use std::time::Instant;

use action_locator::ElementHandle;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    errors::ActionError,
    input,
    keys::Modifiers,
    primitives::{bounded, resolve_point},
    types::{ActionReport, DragOptions, DragReport, ExecCtx, MouseButton, Target},
};

/// Execute drag primitive
///
/// Presses at the source, moves through `steps` evenly spaced points to the destination with
/// `step_delay` between moves, then releases.
pub async fn execute_drag(
    ctx: &ExecCtx,
    from: &Target,
    to: &Target,
    options: &DragOptions,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(
        action_id = %ctx.action_id,
        from = %from.describe(),
        to = %to.describe(),
        steps = options.steps,
        "Executing drag primitive"
    );

    if options.steps == 0 {
        return Err(ActionError::InvalidArgument(
            "drag needs at least one step".to_string(),
        ));
    }

    let drag = bounded(ctx, "drag", async {
        let (start, source) = resolve_point(from).await?;
        let (end, destination) = resolve_point(to).await?;
        let session = ctx.page.session();
        let button = MouseButton::Left;

        input::mouse_move(&session, start, 0, Modifiers::NONE).await?;
        input::mouse_button(&session, true, start, button, 1, Modifiers::NONE).await?;
        for step in 1..=options.steps {
            let point = start.lerp(&end, f64::from(step) / f64::from(options.steps));
            input::mouse_move(&session, point, button.mask(), Modifiers::NONE).await?;
            if !options.step_delay.is_zero() {
                tokio::time::sleep(options.step_delay).await;
            }
        }
        input::mouse_button(&session, false, end, button, 1, Modifiers::NONE).await?;
        debug!(steps = options.steps, "Drag released");

        let (from_xpath, to_xpath) = if options.return_xpaths {
            (xpath_of(source.as_ref()).await, xpath_of(destination.as_ref()).await)
        } else {
            (None, None)
        };
        Ok(DragReport {
            from: start,
            to: end,
            from_xpath,
            to_xpath,
        })
    })
    .await?;

    let latency_ms = start_instant.elapsed().as_millis() as u64;
    info!(
        action_id = %ctx.action_id,
        latency_ms = latency_ms,
        "Drag completed successfully"
    );

    Ok(ActionReport::success(started_at, latency_ms)
        .with_point(drag.to)
        .with_drag(drag))
}

/// XPath of a dragged element. The drop may have moved or removed it, so failures are
/// reported as missing rather than failing the drag.
async fn xpath_of(element: Option<&ElementHandle>) -> Option<String> {
    let element = element?;
    match element.xpath().await {
        Ok(xpath) => Some(xpath),
        Err(err) => {
            warn!("could not compute xpath after drag: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{event_types, one_element, page, BUTTON_QUAD};
    use action_locator::{Locator, Point};
    use std::time::Duration;

    #[tokio::test]
    async fn interpolates_between_points() {
        let (browser, page) = page(one_element(None, false)).await;
        let ctx = ExecCtx::new(page, Duration::from_secs(5));
        let options = DragOptions {
            steps: 4,
            step_delay: Duration::ZERO,
            return_xpaths: true,
        };

        let report = execute_drag(
            &ctx,
            &Point::new(0.0, 0.0).into(),
            &Point::new(100.0, 40.0).into(),
            &options,
        )
        .await
        .unwrap();

        let types = event_types(&browser, "Input.dispatchMouseEvent");
        assert_eq!(types.first().map(String::as_str), Some("mouseMoved"));
        assert_eq!(types[1], "mousePressed");
        assert_eq!(types.iter().filter(|t| *t == "mouseMoved").count(), 5);
        assert_eq!(types.last().map(String::as_str), Some("mouseReleased"));

        let events = browser.transport.sent("Input.dispatchMouseEvent");
        assert_eq!(events[2]["x"], 25.0);
        assert_eq!(events[2]["y"], 10.0);
        assert_eq!(events[2]["buttons"], 1);

        let drag = report.drag.unwrap();
        assert_eq!(drag.to, Point::new(100.0, 40.0));
        // Points have no element to describe
        assert_eq!(drag.from_xpath, None);
    }

    #[tokio::test]
    async fn reports_element_xpaths_on_request() {
        let (_browser, page) = page(one_element(Some(BUTTON_QUAD), false)).await;
        let ctx = ExecCtx::new(page.clone(), Duration::from_secs(5));
        let source = Locator::parse(page, "#card").unwrap();
        let options = DragOptions {
            steps: 2,
            step_delay: Duration::from_millis(1),
            return_xpaths: true,
        };

        let report = execute_drag(&ctx, &source.into(), &Point::new(300.0, 300.0).into(), &options)
            .await
            .unwrap();
        let drag = report.drag.unwrap();
        assert_eq!(drag.from, Point::new(60.0, 40.0));
        assert_eq!(drag.from_xpath.as_deref(), Some("/html[1]/body[1]/div[1]"));
        assert_eq!(drag.to_xpath, None);
    }

    #[tokio::test]
    async fn zero_steps_are_rejected() {
        let (_browser, page) = page(one_element(None, false)).await;
        let ctx = ExecCtx::new(page, Duration::from_secs(5));
        let options = DragOptions {
            steps: 0,
            ..DragOptions::default()
        };
        let err = execute_drag(&ctx, &Point::new(0.0, 0.0).into(), &Point::new(1.0, 1.0).into(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidArgument(_)));
    }
}
