//! Replays cached steps on a live page through the action primitives.

use std::sync::Arc;
use std::time::Duration;

use action_locator::Locator;
use action_primitives::{
    ActionPrimitives, ClickOptions, DefaultActionPrimitives, DragOptions, ExecCtx, ScrollTarget,
    Target, TypeOptions,
};
use async_trait::async_trait;
use cdp_adapter::Page;
use tracing::debug;

use crate::api::ActionExecutor;
use crate::errors::CacheError;
use crate::model::CachedAction;

/// Runs `click`, `doubleClick`, `hover`, `fill`, `type`, `press`, `scrollIntoView` and
/// `dragAndDrop` steps. `fill` clears the field first; `dragAndDrop` takes the drop selector
/// as its first argument.
pub struct PageActionExecutor {
    page: Arc<Page>,
    primitives: Arc<dyn ActionPrimitives>,
    step_timeout: Duration,
}

impl PageActionExecutor {
    pub fn new(page: Arc<Page>) -> Self {
        Self {
            page,
            primitives: Arc::new(DefaultActionPrimitives::default()),
            step_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_primitives(mut self, primitives: Arc<dyn ActionPrimitives>) -> Self {
        self.primitives = primitives;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    fn locate(&self, selector: &str) -> Result<Target, CacheError> {
        let locator = Locator::parse(self.page.clone(), selector)
            .map_err(|err| CacheError::Action(err.to_string()))?;
        Ok(Target::Locator(locator))
    }

    fn argument<'a>(action: &'a CachedAction, index: usize) -> Result<&'a str, CacheError> {
        action
            .arguments
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| {
                CacheError::Action(format!(
                    "'{}' needs argument {} but has {}",
                    action.method,
                    index + 1,
                    action.arguments.len()
                ))
            })
    }
}

#[async_trait]
impl ActionExecutor for PageActionExecutor {
    async fn execute(&self, action: &CachedAction) -> Result<(), CacheError> {
        debug!(target: "action-cache", method = %action.method, selector = %action.selector, "Executing cached step");

        let ctx = ExecCtx::new(self.page.clone(), self.step_timeout);
        let p = &self.primitives;
        match action.method.as_str() {
            "click" => {
                let target = self.locate(&action.selector)?;
                p.click(&ctx, &target, &ClickOptions::default()).await?;
            }
            "doubleClick" => {
                let target = self.locate(&action.selector)?;
                let options = ClickOptions {
                    click_count: 2,
                    ..ClickOptions::default()
                };
                p.click(&ctx, &target, &options).await?;
            }
            "hover" => {
                let target = self.locate(&action.selector)?;
                p.hover(&ctx, &target).await?;
            }
            "fill" | "type" => {
                let text = Self::argument(action, 0)?;
                let target = self.locate(&action.selector)?;
                let options = TypeOptions {
                    clear_first: action.method == "fill",
                    ..TypeOptions::default()
                };
                p.type_text(&ctx, &target, text, &options).await?;
            }
            "press" => {
                let keys = Self::argument(action, 0)?;
                p.press(&ctx, keys).await?;
            }
            "scrollIntoView" => {
                let locator = Locator::parse(self.page.clone(), &action.selector)
                    .map_err(|err| CacheError::Action(err.to_string()))?;
                p.scroll(&ctx, &ScrollTarget::ToElement(locator)).await?;
            }
            "dragAndDrop" => {
                let to = self.locate(Self::argument(action, 0)?)?;
                let from = self.locate(&action.selector)?;
                p.drag_and_drop(&ctx, &from, &to, &DragOptions::default())
                    .await?;
            }
            other => {
                return Err(CacheError::Action(format!("unsupported method '{other}'")));
            }
        }
        Ok(())
    }
}
