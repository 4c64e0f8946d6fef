//! Chromium DevTools Protocol plumbing for pagewright.
//!
//! The crate owns the wire connection, the per-target sessions multiplexed over it, and the
//! page/frame bookkeeping that higher layers (selector resolution, input actions, snapshots)
//! build on. Nothing here depends on a third-party automation library beyond the raw
//! connection types from `chromiumoxide`.

use std::{env, path::PathBuf};
use tokio::sync::broadcast;
use which::which;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for the adapter instance.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct BrowserId(pub Uuid);

    impl BrowserId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for BrowserId {
        fn default() -> Self {
            Self::new()
        }
    }

    string_id!(
        /// Top-level page, identified by its protocol target id.
        PageId
    );
    string_id!(
        /// Protocol frame id. For an out-of-process frame this equals its target id.
        FrameId
    );
    string_id!(
        /// Flattened protocol session id.
        SessionId
    );

    /// Runtime execution context id; only unique within one session.
    pub type ExecutionContextId = i64;
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::fmt;
    use std::time::Duration;
    use thiserror::Error;

    /// High-level error categories surfaced by the adapter.
    #[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
    pub enum AdapterErrorKind {
        /// The remote end rejected the command.
        #[error("protocol error")]
        Protocol,
        /// No response arrived before the local deadline.
        #[error("command timed out")]
        Timeout,
        /// The session (or the whole connection) went away.
        #[error("session closed")]
        SessionClosed,
        #[error("domain not enabled")]
        DomainNotEnabled,
        #[error("target not found")]
        TargetNotFound,
        #[error("frame detached")]
        FrameDetached,
        /// Page-side script threw.
        #[error("evaluation failed")]
        Evaluation,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to higher layers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        /// Remote rejection carrying the protocol error code and message.
        pub fn protocol(code: i64, message: impl Into<String>) -> Self {
            let message = message.into();
            Self::new(AdapterErrorKind::Protocol)
                .with_hint(format!("cdp error {code}: {message}"))
                .with_data(json!({ "code": code, "message": message }))
        }

        pub fn timeout(method: &str, after: Duration) -> Self {
            Self::new(AdapterErrorKind::Timeout)
                .with_hint(format!("{method} timed out after {}ms", after.as_millis()))
                .retriable(true)
        }

        pub fn session_closed(detail: impl Into<String>) -> Self {
            Self::new(AdapterErrorKind::SessionClosed).with_hint(detail)
        }

        pub fn internal(detail: impl Into<String>) -> Self {
            Self::new(AdapterErrorKind::Internal).with_hint(detail)
        }

        pub fn is_timeout(&self) -> bool {
            self.kind == AdapterErrorKind::Timeout
        }

        /// Protocol error code, when the remote side supplied one.
        pub fn protocol_code(&self) -> Option<i64> {
            if self.kind != AdapterErrorKind::Protocol {
                return None;
            }
            self.data
                .as_ref()
                .and_then(|data| data.get("code"))
                .and_then(|code| code.as_i64())
        }
    }
}

pub mod events {
    use super::ids::{FrameId, PageId};
    use serde::{Deserialize, Serialize};

    /// Page and frame graph changes, broadcast for observers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub enum RawEvent {
        PageOpened {
            page: PageId,
            opener: Option<PageId>,
            url: String,
            ts: u64,
        },
        PageActivated {
            page: PageId,
            ts: u64,
        },
        PageClosed {
            page: PageId,
            ts: u64,
        },
        PageLifecycle {
            page: PageId,
            frame: FrameId,
            phase: String,
            ts: u64,
        },
        FrameAttached {
            page: PageId,
            frame: FrameId,
            parent: Option<FrameId>,
            out_of_process: bool,
        },
        FrameDetached {
            page: PageId,
            frame: FrameId,
        },
        FrameNavigated {
            page: PageId,
            frame: FrameId,
            url: String,
        },
        Error {
            page: Option<PageId>,
            message: String,
        },
    }
}

pub mod config {
    use crate::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::{
        env,
        path::{Path, PathBuf},
    };

    /// Configuration for connecting to and tuning the browser connection.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        pub headless: bool,
        /// Default per-command deadline; callers may override per call.
        pub default_deadline_ms: u64,
        pub websocket_url: Option<String>,
        /// Zero disables the keep-alive probe.
        pub heartbeat_interval_ms: u64,
        pub launch_timeout_ms: u64,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                executable: default_chrome_path(),
                user_data_dir: default_profile_dir(),
                headless: resolve_headless_default(),
                default_deadline_ms: 30_000,
                websocket_url: resolve_ws_url(),
                heartbeat_interval_ms: 15_000,
                launch_timeout_ms: 20_000,
            }
        }
    }

    fn resolve_headless_default() -> bool {
        match env::var("PAGEWRIGHT_HEADLESS") {
            Ok(value) => {
                let lower = value.to_ascii_lowercase();
                !matches!(lower.as_str(), "0" | "false" | "no" | "off")
            }
            Err(_) => true,
        }
    }

    fn resolve_ws_url() -> Option<String> {
        match env::var("PAGEWRIGHT_WS_URL") {
            Ok(value) => {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Err(_) => None,
        }
    }

    fn default_chrome_path() -> PathBuf {
        detect_chrome_executable().unwrap_or_default()
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = env::var("PAGEWRIGHT_CHROME_PROFILE") {
            return PathBuf::from(path);
        }

        Path::new("./.pagewright-profile").into()
    }
}

pub(crate) fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("PAGEWRIGHT_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let root = PathBuf::from(value.trim());
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Chromium/Application/chrome.exe"));
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}

pub mod adapter;
pub mod context;
pub mod frames;
pub mod listeners;
pub mod metrics;
pub mod page;
pub mod protocol;
pub mod registry;
pub mod remote;
pub mod session;
pub mod transport;
#[cfg(feature = "test-util")]
pub mod testing;
pub mod util;

pub use adapter::{CdpAdapter, EventBus};
pub use config::CdpConfig;
pub use context::BrowserContext;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::RawEvent;
pub use frames::{FrameInfo, FrameTree};
pub use ids::{BrowserId, ExecutionContextId, FrameId, PageId, SessionId};
pub use listeners::{listener, EventStream, ListenerFn, ListenerId};
pub use metrics::AdapterMetricsSnapshot;
pub use page::Page;
pub use protocol::{ScreenshotClip, ScreenshotFormat, ScreenshotOptions, TargetInfo};
pub use remote::{CallArg, CallTarget, RemoteObject};
pub use session::CdpSession;
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

/// Helper to create the broadcast bus the adapter publishes page/frame changes on.
pub fn event_bus(buffer: usize) -> (EventBus, broadcast::Receiver<RawEvent>) {
    let bus = broadcast::channel(buffer);
    (bus.0, bus.1)
}

/// Milliseconds since the unix epoch.
pub fn timestamp_now() -> u64 {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}
