//! Structured JSONL evidence for lifecycle workloads.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or stdout.
//! - [`validate_log_line`]: validates a single JSONL line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Per-check and per-scenario verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `level`, `event`. Optional fields carry
/// scenario context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LogEntry {
    #[must_use]
    pub fn new(level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp(),
            level,
            event: event.into(),
            scenario: None,
            check: None,
            outcome: None,
            detail: None,
        }
    }
}

/// Seconds-with-millis since the Unix epoch, as a string field.
fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed log line: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema violation: {0}")]
    Schema(String),
}

enum Sink {
    Stdout,
    File(BufWriter<File>),
}

/// Writes JSONL lines to a file or stdout.
pub struct LogEmitter {
    sink: Sink,
}

impl LogEmitter {
    #[must_use]
    pub fn stdout() -> Self {
        Self { sink: Sink::Stdout }
    }

    pub fn to_file(path: &Path) -> Result<Self, LogError> {
        Ok(Self {
            sink: Sink::File(BufWriter::new(File::create(path)?)),
        })
    }

    pub fn emit(&mut self, entry: &LogEntry) -> Result<(), LogError> {
        let line = serde_json::to_string(entry)?;
        match &mut self.sink {
            Sink::Stdout => println!("{line}"),
            Sink::File(writer) => {
                writeln!(writer, "{line}")?;
                writer.flush()?;
            }
        }
        Ok(())
    }
}

/// Parses one JSONL line and checks the required fields.
pub fn validate_log_line(line: &str) -> Result<LogEntry, LogError> {
    let entry: LogEntry = serde_json::from_str(line)?;
    if entry.timestamp.is_empty() {
        return Err(LogError::Schema("empty timestamp".into()));
    }
    if entry.event.is_empty() {
        return Err(LogError::Schema("empty event".into()));
    }
    Ok(entry)
}
