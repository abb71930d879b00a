//! Structured, in-memory log of simulation-domain events — distinct from
//! the `log`/`env_logger` diagnostic logging used for operational
//! messages (startup, config parse errors, I/O failures). `LogManager`
//! records things happening *inside* the simulation (a connection formed,
//! a packet relayed) as structured entries a UI or test harness can query,
//! kept separate from ordinary `log::info!` calls.

use std::collections::VecDeque;

/// Maximum number of entries retained; oldest entries are evicted first.
pub const LOG_CAPACITY: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Global,
    Person,
    Device,
    Connection,
    Packet,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub category: LogCategory,
    pub entity_id: Option<String>,
    pub message: String,
    pub details: Option<String>,
}

impl LogEntry {
    /// Render `timestamp_ms` (simulated ms since epoch) as a human-readable
    /// UTC wall-clock string, for a headless driver or test harness that
    /// wants to print a log entry without a UI to format it.
    pub fn formatted_timestamp(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.timestamp_ms as i64)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| format!("t+{}ms", self.timestamp_ms))
    }
}

/// Bounded ring buffer of [`LogEntry`] values plus a subscriber list.
/// Mirrors the bounded-history-with-eviction pattern used elsewhere in
/// this codebase for bounded collections (connection queues, the mesh
/// seen-set).
#[derive(Default)]
pub struct LogManager {
    entries: VecDeque<LogEntry>,
    next_id: u64,
    subscribers: Vec<Box<dyn FnMut(&LogEntry) + Send>>,
}

impl LogManager {
    pub fn new() -> LogManager {
        LogManager {
            entries: VecDeque::with_capacity(LOG_CAPACITY),
            next_id: 0,
            subscribers: Vec::new(),
        }
    }

    /// Append a new entry, evicting the oldest if at capacity, and deliver
    /// it to every subscriber exactly once.
    pub fn log(&mut self, timestamp_ms: u64, level: LogLevel, category: LogCategory, entity_id: Option<String>, message: impl Into<String>, details: Option<String>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let entry = LogEntry {
            id,
            timestamp_ms,
            level,
            category,
            entity_id,
            message: message.into(),
            details,
        };

        if self.entries.len() >= LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());

        for subscriber in &mut self.subscribers {
            subscriber(&entry);
        }

        id
    }

    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&LogEntry) + Send + 'static,
    {
        self.subscribers.push(Box::new(callback));
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries for a specific category, most-recent-last.
    pub fn entries_by_category(&self, category: LogCategory) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager").field("entries", &self.entries.len()).field("subscribers", &self.subscribers.len()).finish()
    }
}
