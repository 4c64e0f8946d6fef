//! Core types for the locator system

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Point in page (main-frame viewport) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Point `t` of the way from `self` to `other` (0.0..=1.0)
    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        Point {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

/// Element box in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Box spanning the four corners of a protocol quad
    pub fn from_quad(quad: &[f64]) -> Option<Self> {
        if quad.len() < 8 {
            return None;
        }
        let xs = [quad[0], quad[2], quad[4], quad[6]];
        let ys = [quad[1], quad[3], quad[5], quad[7]];
        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// Which match a locator picks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchIndex {
    Nth(usize),
    Last,
}

impl Default for MatchIndex {
    fn default() -> Self {
        MatchIndex::Nth(0)
    }
}

/// Target state for `wait_for_selector`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitState {
    /// Present in the DOM
    Attached,
    /// Attached, non-empty box, not hidden by style
    #[default]
    Visible,
    /// Attached but not visible, or not attached
    Hidden,
    /// Absent from the DOM
    Detached,
}

/// Options for waiting on a selector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitOptions {
    pub state: WaitState,
    #[serde(with = "millis")]
    pub timeout: Duration,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Overrides the locator's shadow piercing when set
    pub pierce_shadow: Option<bool>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            state: WaitState::Visible,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            pierce_shadow: None,
        }
    }
}

impl WaitOptions {
    pub fn state(state: WaitState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
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
