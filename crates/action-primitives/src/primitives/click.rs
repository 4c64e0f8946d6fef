//! Click primitive - press and release at an element centroid or a fixed point

use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use crate::{
    errors::ActionError,
    input,
    keys::Modifiers,
    primitives::{bounded, resolve_point},
    types::{ActionReport, ClickOptions, ExecCtx, Target},
};

/// Execute click primitive
///
/// Steps:
/// 1. Validate context and options
/// 2. Resolve the target to page coordinates (scrolling elements into view)
/// 3. Move, press and release with the requested button and modifiers
/// 4. Generate action report
pub async fn execute_click(
    ctx: &ExecCtx,
    target: &Target,
    options: &ClickOptions,
) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(
        action_id = %ctx.action_id,
        target = %target.describe(),
        button = options.button.as_str(),
        "Executing click primitive"
    );

    if options.click_count == 0 {
        return Err(ActionError::InvalidArgument(
            "click_count must be at least 1".to_string(),
        ));
    }
    let modifiers = Modifiers::from_names(&options.modifiers)?;

    let point = bounded(ctx, "click", async {
        let (point, _) = resolve_point(target).await?;
        let session = ctx.page.session();

        debug!(x = point.x, y = point.y, "Dispatching click events");
        input::mouse_move(&session, point, 0, modifiers).await?;
        for count in 1..=options.click_count {
            input::mouse_button(&session, true, point, options.button, count, modifiers).await?;
            if options.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(options.delay_ms)).await;
            }
            input::mouse_button(&session, false, point, options.button, count, modifiers).await?;
        }
        Ok(point)
    })
    .await?;

    let latency_ms = start_instant.elapsed().as_millis() as u64;
    info!(
        action_id = %ctx.action_id,
        latency_ms = latency_ms,
        "Click completed successfully"
    );

    Ok(ActionReport::success(started_at, latency_ms).with_point(point))
}

/// Execute hover primitive: a single pointer move onto the target.
pub async fn execute_hover(ctx: &ExecCtx, target: &Target) -> Result<ActionReport, ActionError> {
    let started_at = Utc::now();
    let start_instant = Instant::now();

    info!(
        action_id = %ctx.action_id,
        target = %target.describe(),
        "Executing hover primitive"
    );

    let point = bounded(ctx, "hover", async {
        let (point, _) = resolve_point(target).await?;
        input::mouse_move(&ctx.page.session(), point, 0, Modifiers::NONE).await?;
        Ok(point)
    })
    .await?;

    let latency_ms = start_instant.elapsed().as_millis() as u64;
    debug!(action_id = %ctx.action_id, latency_ms, "Hover completed");

    Ok(ActionReport::success(started_at, latency_ms).with_point(point))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{event_types, one_element, page, BUTTON_QUAD};
    use crate::types::MouseButton;
    use action_locator::{Locator, LocatorError, Point};

    #[tokio::test]
    async fn clicks_a_point_verbatim() {
        let (browser, page) = page(one_element(None, false)).await;
        let ctx = ExecCtx::new(page, Duration::from_secs(5));

        let report = execute_click(&ctx, &Point::new(5.0, 7.0).into(), &ClickOptions::default())
            .await
            .unwrap();
        assert!(report.ok);
        assert_eq!(report.point, Some(Point::new(5.0, 7.0)));
        assert_eq!(
            event_types(&browser, "Input.dispatchMouseEvent"),
            vec!["mouseMoved", "mousePressed", "mouseReleased"]
        );
        assert!(browser.transport.sent("Runtime.callFunctionOn").is_empty());
    }

    #[tokio::test]
    async fn clicks_the_centre_of_a_located_element() {
        let (browser, page) = page(one_element(Some(BUTTON_QUAD), false)).await;
        let ctx = ExecCtx::new(page.clone(), Duration::from_secs(5));
        let locator = Locator::parse(page, "#submit").unwrap();
        let options = ClickOptions {
            button: MouseButton::Right,
            click_count: 2,
            modifiers: vec!["Shift".into()],
            ..ClickOptions::default()
        };

        let report = execute_click(&ctx, &locator.into(), &options).await.unwrap();
        assert_eq!(report.point, Some(Point::new(60.0, 40.0)));

        let events = browser.transport.sent("Input.dispatchMouseEvent");
        assert_eq!(events.len(), 5);
        assert_eq!(events[1]["button"], "right");
        assert_eq!(events[1]["buttons"], 2);
        assert_eq!(events[3]["clickCount"], 2);
        assert_eq!(events[3]["modifiers"], 8);
        assert_eq!(browser.transport.sent("DOM.scrollIntoViewIfNeeded").len(), 1);
    }

    #[tokio::test]
    async fn elements_without_layout_are_not_visible() {
        let (browser, page) = page(one_element(None, false)).await;
        let ctx = ExecCtx::new(page.clone(), Duration::from_secs(5));
        let locator = Locator::parse(page, "#hidden").unwrap();

        let err = execute_click(&ctx, &locator.into(), &ClickOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::NotVisible(_)));
        assert!(browser.transport.sent("Input.dispatchMouseEvent").is_empty());
    }

    #[tokio::test]
    async fn unknown_modifiers_and_cancelled_contexts_fail_before_input() {
        let (browser, page) = page(one_element(Some(BUTTON_QUAD), false)).await;
        let ctx = ExecCtx::new(page.clone(), Duration::from_secs(5));
        let options = ClickOptions {
            modifiers: vec!["Hyper".into()],
            ..ClickOptions::default()
        };
        let err = execute_click(&ctx, &Point::new(1.0, 1.0).into(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidKey(_)));

        ctx.cancel_token.cancel();
        let err = execute_hover(&ctx, &Point::new(1.0, 1.0).into())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Interrupted(_)));
        assert!(browser.transport.sent("Input.dispatchMouseEvent").is_empty());
    }

    #[tokio::test]
    async fn missing_targets_surface_locator_errors() {
        let responder = cdp_adapter::testing::responder(|_, method, params| {
            if method == "Runtime.callFunctionOn" {
                let decl = params["functionDeclaration"].as_str().unwrap_or_default();
                if decl.contains("this.length") {
                    return Some(Ok(
                        serde_json::json!({ "result": { "type": "number", "value": 0 } }),
                    ));
                }
                return Some(Ok(serde_json::json!({
                    "result": { "type": "object", "subtype": "array", "objectId": "arr:0" }
                })));
            }
            None
        });
        let (_browser, page) = page(responder).await;
        let ctx = ExecCtx::new(page.clone(), Duration::from_secs(5));
        let locator = Locator::parse(page, "#gone").unwrap();

        let err = execute_hover(&ctx, &locator.into()).await.unwrap_err();
        assert!(matches!(
            err,
            ActionError::Locator(LocatorError::ElementNotFound(_))
        ));
    }
}
