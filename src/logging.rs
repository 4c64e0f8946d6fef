//! Per-engine log routing.
//!
//! Every [`Engine`](crate::Engine) owns a logger sink and a `tracing` span tagged with its id,
//! so several engines in one process keep their output apart without global state.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LogRecord {
    pub engine_id: String,
    pub level: LogLevel,
    /// Subsystem, e.g. `navigation` or `act`
    pub category: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub trait EngineLogger: Send + Sync {
    fn log(&self, record: LogRecord);
}

/// Forwards records as `tracing` events; they inherit the engine span.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl EngineLogger for TracingLogger {
    fn log(&self, record: LogRecord) {
        let category = record.category.as_str();
        match record.level {
            LogLevel::Debug => debug!(target: "pagewright", category, "{}", record.message),
            LogLevel::Info => info!(target: "pagewright", category, "{}", record.message),
            LogLevel::Warn => warn!(target: "pagewright", category, "{}", record.message),
            LogLevel::Error => error!(target: "pagewright", category, "{}", record.message),
        }
    }
}

/// Keeps records in memory, for embedding callers and tests.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn messages(&self, category: &str) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.category == category)
            .map(|record| record.message.clone())
            .collect()
    }
}

impl EngineLogger for MemoryLogger {
    fn log(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_logger_filters_by_category() {
        let logger = MemoryLogger::new();
        for (category, message) in [("navigation", "a"), ("act", "b"), ("navigation", "c")] {
            logger.log(LogRecord {
                engine_id: "e1".into(),
                level: LogLevel::Info,
                category: category.into(),
                message: message.into(),
                timestamp: Utc::now(),
            });
        }
        assert_eq!(logger.messages("navigation"), vec!["a", "c"]);
        assert_eq!(logger.records().len(), 3);
        assert!(LogLevel::Warn > LogLevel::Info);
    }
}
