//! Pagewright: browser automation over the Chrome DevTools Protocol.
//!
//! [`Engine`] ties one browser connection to selector resolution, input primitives,
//! accessibility snapshots and the action cache. The layer crates are re-exported for callers
//! that need them directly.

pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod metrics;

pub use action_cache;
pub use action_locator;
pub use action_primitives;
pub use cdp_adapter;
pub use perceiver_structural;

pub use config::{EngineConfig, Timeouts};
pub use engine::Engine;
pub use errors::EngineError;
pub use logging::{EngineLogger, LogLevel, LogRecord, MemoryLogger, TracingLogger};
