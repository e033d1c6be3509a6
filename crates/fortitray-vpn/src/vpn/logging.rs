//! Structured transcript capture for a connection.
//!
//! Client output milestones and the driver's own instrumentation land in a
//! capped in-memory buffer the UI can tail. Credentials never enter the
//! transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Log entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }
}

/// Where a transcript line originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Client process output.
    Process,
    /// The driver's own instrumentation.
    Internal,
}

/// A single structured transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
}

impl LogEntry {
    pub fn process(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            source: LogSource::Process,
            message: message.into(),
        }
    }

    pub fn internal(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: LogSource::Internal,
            message: message.into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Capped in-memory transcript for one connection.
pub struct ConnectionLog {
    connection_id: String,
    entries: RwLock<Vec<LogEntry>>,
    max_entries: usize,
}

impl ConnectionLog {
    pub fn new(connection_id: impl Into<String>, max_entries: usize) -> Self {
        Self {
            connection_id: connection_id.into(),
            entries: RwLock::new(Vec::new()),
            max_entries,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Append an entry, evicting the oldest once the cap is reached.
    pub fn append(&self, entry: LogEntry) {
        let mut entries = self.entries.write().expect("log lock poisoned");
        entries.push(entry);
        if entries.len() > self.max_entries {
            entries.remove(0);
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().expect("log lock poisoned").clone()
    }

    /// The last N entries.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.entries.read().expect("log lock poisoned");
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    /// Case-insensitive substring search over messages.
    pub fn search(&self, query: &str) -> Vec<LogEntry> {
        let q = query.to_lowercase();
        self.entries
            .read()
            .expect("log lock poisoned")
            .iter()
            .filter(|e| e.message.to_lowercase().contains(&q))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().expect("log lock poisoned").clear();
    }

    /// Export the transcript as pretty-printed JSON.
    pub fn export_json(&self) -> String {
        let entries = self.entries.read().expect("log lock poisoned");
        serde_json::to_string_pretty(&*entries).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read() {
        let log = ConnectionLog::new("c1", 100);
        log.append(LogEntry::internal(LogLevel::Info, "starting"));
        log.append(LogEntry::process("Tunnel is up"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].message, "starting");
        assert_eq!(log.entries()[1].source, LogSource::Process);
    }

    #[test]
    fn cap_evicts_oldest() {
        let log = ConnectionLog::new("c1", 3);
        for i in 0..5 {
            log.append(LogEntry::internal(LogLevel::Debug, format!("entry {}", i)));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "entry 2");
        assert_eq!(entries[2].message, "entry 4");
    }

    #[test]
    fn tail_returns_last_n() {
        let log = ConnectionLog::new("c1", 100);
        for i in 0..10 {
            log.append(LogEntry::internal(LogLevel::Info, format!("line {}", i)));
        }
        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].message, "line 9");
    }

    #[test]
    fn tail_larger_than_len() {
        let log = ConnectionLog::new("c1", 100);
        log.append(LogEntry::internal(LogLevel::Info, "only"));
        assert_eq!(log.tail(50).len(), 1);
    }

    #[test]
    fn search_is_case_insensitive() {
        let log = ConnectionLog::new("c1", 100);
        log.append(LogEntry::internal(LogLevel::Error, "Tunnel negotiation FAILED"));
        log.append(LogEntry::internal(LogLevel::Info, "all good"));
        let hits = log.search("failed");
        assert_eq!(hits.len(), 1);
        assert!(hits[0].message.contains("FAILED"));
    }

    #[test]
    fn clear_empties_the_buffer() {
        let log = ConnectionLog::new("c1", 100);
        log.append(LogEntry::internal(LogLevel::Info, "x"));
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn export_json_contains_messages() {
        let log = ConnectionLog::new("c1", 100);
        log.append(LogEntry::internal(LogLevel::Warning, "client exited early"));
        let json = log.export_json();
        assert!(json.contains("client exited early"));
        assert!(json.contains("warning"));
    }

    #[test]
    fn level_as_str() {
        assert_eq!(LogLevel::Error.as_str(), "ERROR");
        assert_eq!(LogLevel::Debug.as_str(), "DEBUG");
    }
}
