//! Console state kept across server restarts: the raw output buffer used for
//! crash classification and operator display, and the rendered chat log.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::OnceLock;

use crate::utils::current_timestamp;

// ─── Log Types ───────────────────────────────────────────────

/// A single line of console output from the managed process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// Sequential ID for polling (`GET /api/console?since=<id>`)
    pub id: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    pub source: LogSource,
    pub content: String,
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    /// Messages from the supervisor itself
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

// ─── Output Buffer ───────────────────────────────────────────

/// Ring buffer of raw output lines with sequential IDs.
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    next_id: u64,
    max_size: usize,
}

impl LogBuffer {
    pub fn with_capacity(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            lines: VecDeque::with_capacity(max_size),
            next_id: 1,
            max_size,
        }
    }

    /// Push a new log line and return the created `LogLine`.
    pub fn push(&mut self, source: LogSource, content: String) -> LogLine {
        let level = parse_log_level(&content);
        let level = match (source, level) {
            // stderr lines default to at least Warn
            (LogSource::Stderr, LogLevel::Info) => LogLevel::Warn,
            (_, level) => level,
        };
        let line = LogLine {
            id: self.next_id,
            timestamp: current_timestamp(),
            source,
            content,
            level,
        };
        self.next_id += 1;

        if self.lines.len() >= self.max_size {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// Get all lines with id > `since_id` (for polling).
    pub fn get_since(&self, since_id: u64) -> Vec<LogLine> {
        self.lines.iter().filter(|l| l.id > since_id).cloned().collect()
    }

    /// Get the most recent `count` lines.
    pub fn get_recent(&self, count: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(count);
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Raw text of the last `count` lines whose id is >= `first_id`.
    pub fn tail_since(&self, first_id: u64, count: usize) -> Vec<String> {
        let lines: Vec<&LogLine> = self.lines.iter().filter(|l| l.id >= first_id).collect();
        let skip = lines.len().saturating_sub(count);
        lines.into_iter().skip(skip).map(|l| l.content.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

// ─── Chat Log ────────────────────────────────────────────────

/// Rendered chat entries in insertion order, bounded to a fixed capacity.
/// Entries are never modified after they are pushed.
pub struct ChatLog {
    entries: VecDeque<String>,
    capacity: usize,
}

impl ChatLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: String) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The last `limit` entries, oldest first.
    pub fn snapshot(&self, limit: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Helpers ─────────────────────────────────────────────────

/// Parse the severity from a `[thread/LEVEL]` prefix.
///
/// Example:
///   `[12:00:00] [Server thread/WARN]: Can't keep up!` → Warn
fn parse_log_level(line: &str) -> LogLevel {
    static LEVEL: OnceLock<Option<Regex>> = OnceLock::new();
    let re = LEVEL.get_or_init(|| Regex::new(r"/(?P<level>INFO|WARN|ERROR|DEBUG|TRACE|FATAL)\]").ok());

    if let Some(caps) = re.as_ref().and_then(|re| re.captures(line)) {
        if let Some(level_match) = caps.name("level") {
            return match level_match.as_str() {
                "ERROR" | "FATAL" => LogLevel::Error,
                "WARN" => LogLevel::Warn,
                "DEBUG" | "TRACE" => LogLevel::Debug,
                _ => LogLevel::Info,
            };
        }
    }
    LogLevel::Info
}

// ─── Tests ───────────────────────────────────────────────────
