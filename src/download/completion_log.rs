//! Per-item completion log
//!
//! Appends every finished item to an application-wide JSONL file.
//! Log files are organized by date: {logs_dir}/YYYYMMDD-items.jsonl

use super::item::{DownloadItem, ItemOutcome};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One line in the completion log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemLogEntry {
    pub item_id: String,
    pub session_number: u32,
    pub marketplace: String,
    pub destination_name: String,
    /// Local path of the written document
    pub destination: Option<PathBuf>,
    pub transfer_id: Option<String>,
    pub bytes: Option<u64>,
    pub attempts: u32,
    /// "completed" or "failed"
    pub status: String,
    pub error_message: Option<String>,
    pub logged_at: DateTime<Utc>,
}

impl ItemLogEntry {
    pub fn new(
        session_number: u32,
        marketplace: &str,
        item: &DownloadItem,
        outcome: &ItemOutcome,
    ) -> Self {
        let mut entry = Self {
            item_id: item.id.clone(),
            session_number,
            marketplace: marketplace.to_string(),
            destination_name: item.destination_name.clone(),
            destination: None,
            transfer_id: None,
            bytes: None,
            attempts: item.retry_count + 1,
            status: String::new(),
            error_message: None,
            logged_at: Utc::now(),
        };
        match outcome {
            ItemOutcome::Completed {
                destination,
                transfer_id,
                bytes,
            } => {
                entry.status = "completed".to_string();
                entry.destination = Some(destination.clone());
                entry.transfer_id = Some(transfer_id.clone());
                entry.bytes = Some(*bytes);
            }
            ItemOutcome::Failed { error, attempts } => {
                entry.status = "failed".to_string();
                entry.attempts = *attempts;
                entry.error_message = Some(error.to_string());
            }
        }
        entry
    }
}

/// Log file for today's date (UTC)
pub fn log_file_for_today(logs_dir: &Path) -> PathBuf {
    let today = Utc::now().format("%Y%m%d").to_string();
    logs_dir.join(format!("{}-items.jsonl", today))
}

/// Append one entry to `{logs_dir}/YYYYMMDD-items.jsonl`
///
/// Creates the logs directory if it doesn't exist.
pub fn append_entry(logs_dir: &Path, entry: &ItemLogEntry) -> Result<()> {
    std::fs::create_dir_all(logs_dir)?;
    let log_file = log_file_for_today(logs_dir);

    let json_line = serde_json::to_string(entry)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;
    writeln!(file, "{}", json_line)?;

    tracing::trace!(item_id = %entry.item_id, "Appended item log to {}", log_file.display());
    Ok(())
}

/// Read every entry from one log file, skipping malformed lines
pub fn read_entries(path: &Path) -> Result<Vec<ItemLogEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
