//! Session history
//!
//! One record per finished session, stored as TOML next to the settings file.

use super::queue::QueueReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// How a session ended
///
/// "Nothing matched the window" and "everything failed" are distinct states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Success,
    PartialSuccess,
    AllFailed,
    NothingFound,
    Stopped,
}

impl SessionStatus {
    pub fn classify(completed: usize, failed: usize, stopped: bool) -> Self {
        if stopped {
            Self::Stopped
        } else if completed == 0 && failed == 0 {
            Self::NothingFound
        } else if completed == 0 {
            Self::AllFailed
        } else if failed > 0 {
            Self::PartialSuccess
        } else {
            Self::Success
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialSuccess => "partial success",
            Self::AllFailed => "all failed",
            Self::NothingFound => "nothing found",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_number: u32,
    pub marketplace: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub range_label: String,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub status: SessionStatus,
    pub finished_at: DateTime<Utc>,
    /// Adaptive profile the queue ran with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl SessionRecord {
    /// Build a record from a finished queue run
    pub fn from_report(
        session: &crate::session::SessionPath,
        total: usize,
        report: &QueueReport,
    ) -> Self {
        let completed = report.completed.len();
        let failed = report.failed.len();
        Self {
            session_number: session.session_number,
            marketplace: session.marketplace.clone(),
            start_date: session.start_date.clone(),
            end_date: session.end_date.clone(),
            range_label: session.range_label.clone(),
            total,
            completed,
            failed,
            duration_ms: report.duration_ms,
            status: SessionStatus::classify(completed, failed, report.stopped),
            finished_at: Utc::now(),
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionHistory {
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, replacing an earlier one for the same marketplace and session number
    pub fn add(&mut self, record: SessionRecord) {
        if let Some(existing) = self.sessions.iter_mut().find(|r| {
            r.marketplace == record.marketplace && r.session_number == record.session_number
        }) {
            *existing = record;
        } else {
            self.sessions.push(record);
        }
    }

    pub fn latest(&self) -> Option<&SessionRecord> {
        self.sessions.iter().max_by_key(|r| r.finished_at)
    }

    pub fn all(&self) -> &[SessionRecord] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Loads history from a TOML file; a missing file is an empty history
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Saves history to a TOML file via temp file + rename
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension("toml.tmp");
        fs::write(&temp, content)?;
        fs::rename(&temp, path)?;
        Ok(())
    }
}
