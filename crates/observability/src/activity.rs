//! Operator-facing activity log.
//!
//! Workers and agents report notable events ("job started", "fell back to backup
//! search") through an [`ActivityLog`] handed to them at construction time. The
//! [`LogBuffer`] implementation keeps the most recent entries for display and
//! forwards every entry to `tracing`.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Sink for operator-visible activity.
pub trait ActivityLog: Send + Sync + 'static {
    fn record(&self, level: LogLevel, message: String);

    fn info(&self, message: String) {
        self.record(LogLevel::Info, message);
    }

    fn warn(&self, message: String) {
        self.record(LogLevel::Warn, message);
    }

    fn error(&self, message: String) {
        self.record(LogLevel::Error, message);
    }
}

/// Discards everything. Useful where activity is irrelevant (benches, some tests).
#[derive(Debug, Default, Copy, Clone)]
pub struct NoopActivityLog;

impl ActivityLog for NoopActivityLog {
    fn record(&self, _level: LogLevel, _message: String) {}
}

/// Bounded in-memory activity log; oldest entries are evicted first.
#[derive(Debug)]
pub struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the buffered entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ActivityLog for LogBuffer {
    fn record(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => tracing::info!(activity = true, "{message}"),
            LogLevel::Warn => tracing::warn!(activity = true, "{message}"),
            LogLevel::Error => tracing::error!(activity = true, "{message}"),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        };

        // Entries are plain data, so a poisoned lock is still usable.
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_evicts_oldest_when_full() {
        let log = LogBuffer::new(2);
        log.info("one".into());
        log.warn("two".into());
        log.error("three".into());

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "two");
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert_eq!(entries[1].message, "three");
        assert_eq!(entries[1].level, LogLevel::Error);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let log = LogBuffer::new(0);
        log.info("kept".into());
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.entries().len(), 1);
    }
}
