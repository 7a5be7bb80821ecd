//! Run logging capability.
//!
//! Components that do I/O (the report source, the store, the reconciler) take
//! a `&dyn RunLog` instead of reaching for a global logger. [`TracingLog`]
//! forwards to `tracing`; [`MemoryLog`] keeps entries so callers can inspect
//! what a run reported.

use std::sync::Mutex;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Logging sink passed explicitly into each component.
pub trait RunLog: Send + Sync {
    fn debug(&self, msg: &str);
    fn info(&self, msg: &str);
    fn warning(&self, msg: &str);
    fn error(&self, msg: &str);
}

/// Forwards every entry to a `tracing` event under the `occvol` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl RunLog for TracingLog {
    fn debug(&self, msg: &str) {
        tracing::debug!(target: "occvol", "{msg}");
    }

    fn info(&self, msg: &str) {
        tracing::info!(target: "occvol", "{msg}");
    }

    fn warning(&self, msg: &str) {
        tracing::warn!(target: "occvol", "{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: "occvol", "{msg}");
    }
}

/// Captures entries in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: LogLevel, msg: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((level, msg.to_string()));
        }
    }

    /// Snapshot of all entries in arrival order.
    pub fn entries(&self) -> Vec<(LogLevel, String)> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Messages logged at exactly `level`.
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, msg)| msg)
            .collect()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.messages(level).len()
    }
}

impl RunLog for MemoryLog {
    fn debug(&self, msg: &str) {
        self.push(LogLevel::Debug, msg);
    }

    fn info(&self, msg: &str) {
        self.push(LogLevel::Info, msg);
    }

    fn warning(&self, msg: &str) {
        self.push(LogLevel::Warning, msg);
    }

    fn error(&self, msg: &str) {
        self.push(LogLevel::Error, msg);
    }
}
