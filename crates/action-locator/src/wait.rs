//! Polling waits on element state.

use std::sync::Arc;

use cdp_adapter::Page;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::LocatorError;
use crate::handle::ElementHandle;
use crate::locator::Locator;
use crate::types::{WaitOptions, WaitState};

/// Waits on `selector` in the page's main frame.
///
/// Returns the element for `attached` and `visible`, `None` for `hidden` and `detached`.
pub async fn wait_for_selector(
    page: &Arc<Page>,
    selector: &str,
    options: &WaitOptions,
    cancel: Option<&CancellationToken>,
) -> Result<Option<ElementHandle>, LocatorError> {
    let locator = Locator::parse(Arc::clone(page), selector)?;
    wait_for_locator(&locator, options, cancel).await
}

pub(crate) async fn wait_for_locator(
    locator: &Locator,
    options: &WaitOptions,
    cancel: Option<&CancellationToken>,
) -> Result<Option<ElementHandle>, LocatorError> {
    let mut locator = locator.clone();
    if let Some(pierce) = options.pierce_shadow {
        locator = locator.with_pierce_shadow(pierce);
    }
    if options.timeout < locator.timeout() {
        locator = locator.with_timeout(options.timeout);
    }

    let never = CancellationToken::new();
    let cancel = cancel.unwrap_or(&never);
    let polling = poll_until(&locator, options);

    select! {
        biased;
        _ = cancel.cancelled() => Err(LocatorError::Cancelled(format!(
            "wait for '{}' cancelled",
            locator.selector()
        ))),
        outcome = tokio::time::timeout(options.timeout, polling) => match outcome {
            Ok(result) => result,
            Err(_) => Err(LocatorError::Timeout(format!(
                "'{}' did not become {:?} within {}ms",
                locator.selector(),
                options.state,
                options.timeout.as_millis()
            ))),
        },
    }
}

async fn poll_until(
    locator: &Locator,
    options: &WaitOptions,
) -> Result<Option<ElementHandle>, LocatorError> {
    let mut polls = 0u32;
    loop {
        polls += 1;
        match check(locator, options.state).await {
            Ok(Some(outcome)) => {
                debug!(
                    target: "action-locator",
                    selector = %locator.selector(),
                    state = ?options.state,
                    polls,
                    "wait satisfied"
                );
                return Ok(outcome);
            }
            Ok(None) => {}
            Err(err) if err.is_retryable() => {
                debug!(target: "action-locator", selector = %locator.selector(), %err, "retrying wait");
            }
            Err(err) => return Err(err),
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

/// One probe. `Some(outcome)` once the state holds, `None` to keep polling.
async fn check(
    locator: &Locator,
    state: WaitState,
) -> Result<Option<Option<ElementHandle>>, LocatorError> {
    let element = locator.resolve_optional().await?;

    match (state, element) {
        (WaitState::Detached, None) | (WaitState::Hidden, None) => Ok(Some(None)),
        (WaitState::Attached, None) | (WaitState::Visible, None) => Ok(None),
        (WaitState::Attached, Some(element)) => Ok(Some(Some(element))),
        (WaitState::Detached, Some(element)) => {
            element.release().await;
            Ok(None)
        }
        (WaitState::Visible, Some(element)) => {
            if element.is_visible().await? {
                Ok(Some(Some(element)))
            } else {
                element.release().await;
                Ok(None)
            }
        }
        (WaitState::Hidden, Some(element)) => {
            let visible = element.is_visible().await?;
            element.release().await;
            Ok((!visible).then_some(None))
        }
    }
}
