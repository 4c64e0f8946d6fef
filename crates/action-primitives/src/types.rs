//! Core data types for action primitives

use std::sync::Arc;
use std::time::{Duration, Instant};

use action_locator::{Locator, Point};
use cdp_adapter::Page;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::ActionError;

/// Execution context for action primitives
///
/// Contains all the runtime context needed to execute an action:
/// - Page the input events are dispatched to
/// - Deadline for timeout enforcement
/// - Cancellation token for cooperative cancellation
/// - Unique action ID for tracing and correlation
#[derive(Clone)]
pub struct ExecCtx {
    /// Page receiving the input events
    pub page: Arc<Page>,

    /// Deadline for this operation
    pub deadline: Instant,

    /// Cancellation token for cooperative cancellation
    pub cancel_token: CancellationToken,

    /// Unique identifier for this action
    pub action_id: String,
}

impl ExecCtx {
    /// Create a new execution context
    pub fn new(page: Arc<Page>, timeout: Duration) -> Self {
        Self::with_cancel(page, timeout, CancellationToken::new())
    }

    pub fn with_cancel(page: Arc<Page>, timeout: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            page,
            deadline: Instant::now() + timeout,
            cancel_token,
            action_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Check if this context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Check if this context has exceeded its deadline
    pub fn is_timeout(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Get remaining time until deadline
    pub fn remaining_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Fails fast when the context is already cancelled or expired.
    pub fn check(&self) -> Result<(), ActionError> {
        if self.is_cancelled() {
            return Err(ActionError::Interrupted("Context cancelled".to_string()));
        }
        if self.is_timeout() {
            return Err(ActionError::Timeout("Context deadline exceeded".to_string()));
        }
        Ok(())
    }
}

/// Where an action lands: an element's centroid or a fixed point
#[derive(Debug, Clone)]
pub enum Target {
    Locator(Locator),
    /// Main-frame viewport coordinates, used verbatim
    Point(Point),
}

impl From<Locator> for Target {
    fn from(locator: Locator) -> Self {
        Target::Locator(locator)
    }
}

impl From<Point> for Target {
    fn from(point: Point) -> Self {
        Target::Point(point)
    }
}

impl Target {
    /// Short description for logs and reports
    pub fn describe(&self) -> String {
        match self {
            Target::Locator(locator) => locator.selector().to_string(),
            Target::Point(p) => format!("({}, {})", p.x, p.y),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Middle,
    Right,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Middle => "middle",
            MouseButton::Right => "right",
        }
    }

    /// Bit in the protocol's `buttons` mask
    pub fn mask(&self) -> u8 {
        match self {
            MouseButton::Left => 1,
            MouseButton::Right => 2,
            MouseButton::Middle => 4,
        }
    }
}

/// Options for click
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickOptions {
    pub button: MouseButton,
    pub click_count: u32,
    /// Pause between press and release
    pub delay_ms: u64,
    /// Held modifiers, in key grammar form (`Ctrl`, `Shift`, ...)
    pub modifiers: Vec<String>,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self {
            button: MouseButton::Left,
            click_count: 1,
            delay_ms: 0,
            modifiers: Vec::new(),
        }
    }
}

/// How text reaches the element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingStrategy {
    /// Value setter plus input/change events, then one trailing key event
    DirectAssign,
    /// Chunked `Input.insertText`
    Progressive,
    /// One key event pair per character and per special key
    KeyboardSimulation,
}

/// Deadline for a typing action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTimeout {
    /// Derived from the text length and mode
    #[default]
    Auto,
    Millis(u64),
}

/// Options for type_text
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeOptions {
    /// Clear the current value before typing
    pub clear_first: bool,
    /// Press Enter afterwards
    pub submit: bool,
    /// Pause between keystrokes or chunks
    pub delay_ms: u64,
    pub timeout: TypeTimeout,
}

impl Default for TypeOptions {
    fn default() -> Self {
        Self {
            clear_first: true,
            submit: false,
            delay_ms: 0,
            timeout: TypeTimeout::Auto,
        }
    }
}

/// Typing thresholds shared by every action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingConfig {
    /// Texts longer than this (in chars) type progressively
    pub progressive_threshold: usize,
    pub chunk_size: usize,
    pub chunk_pause_ms: u64,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            progressive_threshold: 100,
            chunk_size: 50,
            chunk_pause_ms: 10,
        }
    }
}

/// Pixels scrolled by `Up`/`Down` when the caller gives none
pub const DEFAULT_SCROLL_PIXELS: f64 = 300.0;

/// Scroll target specification
#[derive(Debug, Clone)]
pub enum ScrollTarget {
    Up(f64),
    Down(f64),
    /// Scroll to top of page
    ToTop,
    /// Scroll to bottom of page
    ToBottom,
    /// Scroll an element into view
    ToElement(Locator),
    /// Mouse-wheel deltas dispatched at `at`, or the viewport centre
    By { dx: f64, dy: f64, at: Option<Point> },
}

impl ScrollTarget {
    pub fn up() -> Self {
        ScrollTarget::Up(DEFAULT_SCROLL_PIXELS)
    }

    pub fn down() -> Self {
        ScrollTarget::Down(DEFAULT_SCROLL_PIXELS)
    }
}

/// Options for drag_and_drop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DragOptions {
    /// Intermediate pointer moves between press and release
    pub steps: u32,
    #[serde(with = "millis")]
    pub step_delay: Duration,
    /// Report the absolute XPath of the source and target elements
    pub return_xpaths: bool,
}

impl Default for DragOptions {
    fn default() -> Self {
        Self {
            steps: 10,
            step_delay: Duration::from_millis(16),
            return_xpaths: false,
        }
    }
}

/// Endpoints of a completed drag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DragReport {
    pub from: Point,
    pub to: Point,
    pub from_xpath: Option<String>,
    pub to_xpath: Option<String>,
}

/// Comprehensive action execution report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    /// Whether the action succeeded
    pub ok: bool,

    /// When the action started
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,

    /// When the action finished
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub finished_at: DateTime<Utc>,

    /// Total latency in milliseconds
    pub latency_ms: u64,

    /// Page coordinates the input landed on
    pub point: Option<Point>,

    /// Strategy picked for typing
    pub typing_strategy: Option<TypingStrategy>,

    /// Scroll offset after a scroll
    pub scroll_position: Option<Point>,

    pub drag: Option<DragReport>,

    /// Error details (if failed)
    pub error: Option<String>,
}

impl ActionReport {
    /// Create a successful action report
    pub fn success(started_at: DateTime<Utc>, latency_ms: u64) -> Self {
        Self {
            ok: true,
            started_at,
            finished_at: Utc::now(),
            latency_ms,
            point: None,
            typing_strategy: None,
            scroll_position: None,
            drag: None,
            error: None,
        }
    }

    /// Create a failed action report
    pub fn failure(started_at: DateTime<Utc>, latency_ms: u64, error: &ActionError) -> Self {
        Self {
            error: Some(error.to_string()),
            ok: false,
            ..Self::success(started_at, latency_ms)
        }
    }

    pub fn with_point(mut self, point: Point) -> Self {
        self.point = Some(point);
        self
    }

    pub fn with_strategy(mut self, strategy: TypingStrategy) -> Self {
        self.typing_strategy = Some(strategy);
        self
    }

    pub fn with_scroll_position(mut self, position: Point) -> Self {
        self.scroll_position = Some(position);
        self
    }

    pub fn with_drag(mut self, drag: DragReport) -> Self {
        self.drag = Some(drag);
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
