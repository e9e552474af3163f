//! Capped ring of timestamped diagnostic entries
//!
//! Every connection and capture step lands here so an operator can read the
//! tail of what happened without attaching a debugger. Entries are also
//! mirrored to the `log` facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Maximum number of retained entries.
pub const DEBUG_LOG_CAPACITY: usize = 250;

/// One diagnostic line. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl DebugLogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Shared handle to the debug log. Clones refer to the same ring.
#[derive(Debug, Clone, Default)]
pub struct DebugLog {
    entries: Arc<Mutex<VecDeque<DebugLogEntry>>>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, evicting the oldest once the cap is reached.
    pub fn append(&self, entry: DebugLogEntry) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while entries.len() >= DEBUG_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Record a message and mirror it to the `log` facade at `level`.
    pub fn record(&self, level: log::Level, message: impl Into<String>) {
        let message = message.into();
        log::log!(target: "iris_link", level, "{}", message);
        self.append(DebugLogEntry::new(message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(log::Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(log::Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(log::Level::Error, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.record(log::Level::Debug, message);
    }

    pub fn clear(&self) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.clear();
    }

    /// Copy of the current entries, oldest first.
    pub fn snapshot(&self) -> Vec<DebugLogEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot_len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot_len() == 0
    }

    fn snapshot_len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Render the log as `HH:MM:SS.mmm message` lines.
    pub fn to_text(&self) -> String {
        self.snapshot()
            .iter()
            .map(|e| format!("{} {}", e.timestamp.format("%H:%M:%S%.3f"), e.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
