use crate::download::history::SessionRecord;
use crate::download::item::format_duration;
use crate::engine::sink::{ProgressEvent, ProgressSink, SinkError};
use crate::engine::{EngineStatus, PaginationSummary};
use std::io::Write;

pub fn format_pagination(summary: &PaginationSummary) -> String {
    let phase = if summary.is_complete {
        "complete, waiting for hand-off"
    } else if summary.is_running {
        "running"
    } else {
        "stale"
    };
    let mut output = String::new();
    output.push_str(&format!("Collection: {}\n", phase));
    output.push_str(&format!(
        "Window: {} to {}\n",
        summary.window.start, summary.window.end
    ));
    if !summary.range_label.is_empty() {
        output.push_str(&format!("Label: {}\n", summary.range_label));
    }
    output.push_str(&format!("Account: {}\n", summary.account_context));
    output.push_str(&format!("Current page: {}\n", summary.current_page));
    output.push_str(&format!("Collected: {}\n", summary.collected));
    output.push_str(&format!(
        "Started: {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S")
    ));
    output
}

pub fn format_status(status: &EngineStatus) -> String {
    let mut output = String::new();
    output.push_str(&format!("Marketplace: {}\n", status.marketplace));
    output.push_str(&format!("Last session: {:03}\n", status.last_session));
    output.push_str(&format!(
        "Profile: {} (failure rate {:.2})\n",
        status.profile, status.failure_rate
    ));
    match &status.pagination {
        Some(summary) => output.push_str(&format_pagination(summary)),
        None => output.push_str("No collection in progress."),
    }
    output
}

pub fn format_session(record: &SessionRecord) -> String {
    let label = if record.range_label.is_empty() {
        String::new()
    } else {
        format!(" [{}]", record.range_label)
    };
    format!(
        "Session {:03} {} {} to {}{}: {} ({}/{} completed, {} failed, {})",
        record.session_number,
        record.marketplace,
        record.start_date,
        record.end_date,
        label,
        record.status.label(),
        record.completed,
        record.total,
        record.failed,
        format_duration(record.duration_ms)
    )
}

pub fn format_history(records: &[SessionRecord], json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string());
    }
    if records.is_empty() {
        return "No sessions recorded.".to_string();
    }
    records
        .iter()
        .map(format_session)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prints engine progress to the terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn notify(&self, event: ProgressEvent) -> Result<(), SinkError> {
        match event {
            ProgressEvent::CollectionStarted { window, .. } => {
                println!("Collecting orders from {} to {}", window.start, window.end);
            }
            ProgressEvent::PageCollected {
                page,
                added,
                collected,
            } => {
                println!("Page {}: {} new, {} collected", page, added, collected);
            }
            ProgressEvent::CollectionComplete { collected } => {
                println!("Collection complete: {} documents", collected);
            }
            ProgressEvent::SessionStarted {
                session_number,
                total,
                profile,
            } => {
                println!(
                    "Session {:03}: downloading {} documents ({} profile)",
                    session_number, total, profile
                );
            }
            ProgressEvent::QueueProgress(stats) => {
                print!(
                    "\r[{:3}%] {}/{} done, {} failed, {} active   ",
                    stats.percentage, stats.current, stats.total, stats.failed, stats.active
                );
                std::io::stdout()
                    .flush()
                    .map_err(|e| SinkError(e.to_string()))?;
            }
            ProgressEvent::QueuePaused(stats) => {
                println!(
                    "\nQueue paused after a failure ({} pending). Press Enter to resume, Ctrl+C to stop.",
                    stats.pending
                );
            }
            ProgressEvent::ItemFinished {
                item_id,
                success: false,
                message,
            } => {
                eprintln!("\nFailed {}: {}", item_id, message.unwrap_or_default());
            }
            ProgressEvent::ItemFinished { .. } => {}
            ProgressEvent::SessionFinished(record) => {
                println!("\n{}", format_session(&record));
            }
            ProgressEvent::StateCleared => println!("Collection state cleared."),
        }
        Ok(())
    }
}
