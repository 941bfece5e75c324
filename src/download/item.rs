use super::errors::ValidationError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Log entry attached to an item while it moves through the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Warn,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Error,
            message: message.into(),
        }
    }
}

/// One order document to fetch
///
/// `id` is the order (or order-line) identifier and is unique within a session.
/// `source_location` is opaque to the engine; the transfer service decides how to
/// turn it into bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: String,
    pub source_location: String,
    pub destination_name: String,
    pub sequence_index: usize,
    #[serde(default)]
    pub retry_count: u32,
    /// Order date as shown on the listing page, when it could be extracted
    #[serde(default)]
    pub order_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogEntry>,
}

impl DownloadItem {
    pub fn new(
        id: impl Into<String>,
        source_location: impl Into<String>,
        destination_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_location: source_location.into(),
            destination_name: destination_name.into(),
            sequence_index: 0,
            retry_count: 0,
            order_date: None,
            logs: Vec::new(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.order_date = Some(date);
        self
    }

    /// Reject items the queue must not even attempt
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.source_location.trim().is_empty() {
            return Err(ValidationError::MissingLocator(self.id.clone()));
        }
        if self.destination_name.trim().is_empty() {
            return Err(ValidationError::MissingDestination(self.id.clone()));
        }
        Ok(())
    }

    pub fn log_info(&mut self, message: String) {
        self.logs.push(LogEntry::info(message));
    }

    pub fn log_warn(&mut self, message: String) {
        self.logs.push(LogEntry::warn(message));
    }

    pub fn log_error(&mut self, message: String) {
        self.logs.push(LogEntry::error(message));
    }
}

/// Final result of one item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Completed {
        destination: PathBuf,
        transfer_id: String,
        bytes: u64,
    },
    Failed {
        error: super::errors::ItemError,
        attempts: u32,
    },
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Format a millisecond duration to a human-readable string (e.g. "2h 15m", "45s")
pub fn format_duration(millis: u64) -> String {
    let seconds = millis / 1000;
    if seconds < 60 {
        if seconds == 0 {
            format!("{}ms", millis)
        } else {
            format!("{}s", seconds)
        }
    } else if seconds < 3600 {
        let mins = seconds / 60;
        let secs = seconds % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else {
        let hours = seconds / 3600;
        let mins = (seconds % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    }
}
