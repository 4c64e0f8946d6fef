//! Chromium launch helpers.

use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

use crate::error::{AdapterError, AdapterErrorKind};

/// Stderr lines kept for the error hint when no endpoint shows up
const PREVIEW_LINES: usize = 8;

/// Browser endpoint announced on a `DevTools listening on ws://...` line.
pub(crate) fn devtools_endpoint(line: &str) -> Option<&str> {
    let (_, endpoint) = line.rsplit_once("listening on ")?;
    let endpoint = endpoint.trim();
    (endpoint.starts_with("ws") && endpoint.contains("devtools/browser")).then_some(endpoint)
}

/// Reads the launched browser's stderr until it announces its websocket endpoint.
pub(crate) async fn read_devtools_url(child: &mut Child, wait: Duration) -> Result<String, AdapterError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        AdapterError::new(AdapterErrorKind::CdpIo).with_hint("chromium stderr is not piped")
    })?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::new();

    let scan = async {
        while let Some(line) = lines.next().await {
            let line = line.map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("reading chromium stderr: {err}"))
            })?;
            if let Some(endpoint) = devtools_endpoint(&line) {
                return Ok(endpoint.to_string());
            }
            if preview.len() < PREVIEW_LINES {
                preview.push(line);
            }
        }
        Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint(format!(
            "chromium exited before announcing its devtools endpoint; stderr: {}",
            preview.join(" | ")
        )))
    };

    timeout(wait, scan).await.map_err(|_| {
        AdapterError::new(AdapterErrorKind::Timeout).with_hint(format!(
            "no devtools endpoint from chromium within {}ms",
            wait.as_millis()
        ))
    })?
}
