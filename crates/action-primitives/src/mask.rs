//! Screenshot masking with guaranteed overlay removal.

use std::sync::Arc;

use action_locator::{BoundingBox, Locator};
use cdp_adapter::{Page, ScreenshotOptions};
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::ActionError;

/// Overlay fill, chosen to stand out from typical page content
pub const MASK_COLOR: &str = "#FF00FF";

/// Overlays covering masked elements. Removed by [`release`](Self::release); a guard dropped
/// without it spawns the removal on the current runtime.
pub struct MaskGuard {
    page: Arc<Page>,
    token: String,
    boxes: usize,
    released: bool,
}

impl MaskGuard {
    /// Covers every element matched by `masks`. Elements without layout are skipped.
    pub async fn install(page: &Arc<Page>, masks: &[Locator]) -> Result<Self, ActionError> {
        let mut boxes: Vec<BoundingBox> = Vec::new();
        for locator in masks {
            for element in locator.all().await? {
                if let Some(bbox) = element.bounding_box().await? {
                    boxes.push(bbox);
                }
                element.release().await;
            }
        }

        let mut guard = MaskGuard {
            page: page.clone(),
            token: uuid::Uuid::new_v4().simple().to_string(),
            boxes: boxes.len(),
            released: false,
        };
        if boxes.is_empty() {
            guard.released = true;
            return Ok(guard);
        }

        debug!(token = %guard.token, boxes = boxes.len(), "Installing screenshot masks");
        if let Err(err) = page.evaluate(&install_expression(&guard.token, &boxes)).await {
            let _ = guard.release().await;
            return Err(err.into());
        }
        Ok(guard)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Number of overlays installed
    pub fn len(&self) -> usize {
        self.boxes
    }

    pub fn is_empty(&self) -> bool {
        self.boxes == 0
    }

    /// Removes the overlays.
    pub async fn release(mut self) -> Result<(), ActionError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.page.evaluate(&remove_expression(&self.token)).await?;
        Ok(())
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let page = self.page.clone();
        let expression = remove_expression(&self.token);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = page.evaluate(&expression).await {
                        warn!("failed to remove screenshot masks: {}", err);
                    }
                });
            }
            Err(_) => warn!(token = %self.token, "screenshot masks dropped outside a runtime"),
        }
    }
}

/// Captures a screenshot with `masks` covered. Overlays are removed whether or not the capture
/// succeeds.
pub async fn screenshot_with_masks(
    page: &Arc<Page>,
    masks: &[Locator],
    options: &ScreenshotOptions,
) -> Result<Vec<u8>, ActionError> {
    let guard = MaskGuard::install(page, masks).await?;
    let shot = page.screenshot(options).await;
    let released = guard.release().await;
    let bytes = shot?;
    released?;
    Ok(bytes)
}

fn install_expression(token: &str, boxes: &[BoundingBox]) -> String {
    let rects: Vec<_> = boxes
        .iter()
        .map(|b| json!({ "x": b.x, "y": b.y, "width": b.width, "height": b.height }))
        .collect();
    format!(
        r#"((token, rects, color) => {{
  const root = document.documentElement;
  for (const r of rects) {{
    const node = document.createElement('div');
    node.setAttribute('data-pagewright-mask', token);
    node.style.cssText = `position:absolute;left:${{r.x + window.scrollX}}px;top:${{r.y + window.scrollY}}px;width:${{r.width}}px;height:${{r.height}}px;background:${{color}};z-index:2147483647;pointer-events:none;`;
    root.appendChild(node);
  }}
  return rects.length;
}})({}, {}, {})"#,
        json!(token),
        json!(rects),
        json!(MASK_COLOR)
    )
}

fn remove_expression(token: &str) -> String {
    format!(
        "document.querySelectorAll('[data-pagewright-mask=\"{token}\"]').forEach((node) => node.remove())"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{one_element, page, BUTTON_QUAD};
    use cdp_adapter::testing::TestBrowser;
    use std::time::Duration;

    fn expressions(browser: &TestBrowser) -> Vec<String> {
        browser
            .transport
            .sent("Runtime.evaluate")
            .iter()
            .filter_map(|p| p["expression"].as_str().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn masks_are_removed_after_the_capture() {
        let (browser, page) = page(one_element(Some(BUTTON_QUAD), false)).await;
        let masks = vec![Locator::parse(page.clone(), ".avatar").unwrap()];

        let png = screenshot_with_masks(&page, &masks, &ScreenshotOptions::default())
            .await
            .unwrap();
        assert_eq!(&png[1..4], b"PNG");

        let exprs = expressions(&browser);
        assert_eq!(exprs.len(), 2);
        assert!(exprs[0].contains("data-pagewright-mask"));
        assert!(exprs[0].contains("\"width\":100.0"));
        assert!(exprs[1].contains("node.remove()"));
        assert_eq!(browser.transport.sent("Page.captureScreenshot").len(), 1);
    }

    #[tokio::test]
    async fn dropped_guards_clean_up_in_the_background() {
        let (browser, page) = page(one_element(Some(BUTTON_QUAD), false)).await;
        let masks = vec![Locator::parse(page.clone(), ".avatar").unwrap()];

        let guard = MaskGuard::install(&page, &masks).await.unwrap();
        assert_eq!(guard.len(), 1);
        let token = guard.token().to_string();
        drop(guard);

        for _ in 0..100 {
            if expressions(&browser).iter().any(|e| e.contains("remove()") && e.contains(&token)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("dropped mask guard never removed its overlays");
    }

    #[tokio::test]
    async fn nothing_to_mask_touches_nothing() {
        let (browser, page) = page(one_element(None, false)).await;
        let masks = vec![Locator::parse(page.clone(), ".hidden").unwrap()];

        let guard = MaskGuard::install(&page, &masks).await.unwrap();
        assert!(guard.is_empty());
        guard.release().await.unwrap();
        assert!(expressions(&browser).is_empty());
    }
}
