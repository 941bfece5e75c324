//! Best-effort progress notifications
//!
//! A sink may have nobody listening (a closed UI, a dropped receiver). Its
//! failures are logged and never reach the engine.

use crate::download::history::SessionRecord;
use crate::download::queue::QueueStats;
use crate::pagination::DateWindow;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    CollectionStarted {
        window: DateWindow,
        range_label: String,
    },
    PageCollected {
        page: u32,
        added: usize,
        collected: usize,
    },
    CollectionComplete {
        collected: usize,
    },
    SessionStarted {
        session_number: u32,
        total: usize,
        profile: String,
    },
    QueueProgress(QueueStats),
    /// Queue held back after a failure; the host must send `Resume` or `Stop`
    QueuePaused(QueueStats),
    ItemFinished {
        item_id: String,
        success: bool,
        message: Option<String>,
    },
    SessionFinished(SessionRecord),
    StateCleared,
}

#[derive(Error, Debug)]
#[error("No listener attached: {0}")]
pub struct SinkError(pub String);

pub trait ProgressSink: Send + Sync {
    fn notify(&self, event: ProgressEvent) -> Result<(), SinkError>;
}

/// Deliver an event, dropping any failure
pub fn notify_best_effort(sink: &dyn ProgressSink, event: ProgressEvent) {
    if let Err(e) = sink.notify(event) {
        tracing::debug!("Progress notification dropped: {}", e);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn notify(&self, _event: ProgressEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes events to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn notify(&self, event: ProgressEvent) -> Result<(), SinkError> {
        match &event {
            ProgressEvent::QueueProgress(stats) => tracing::debug!(
                completed = stats.completed,
                failed = stats.failed,
                active = stats.active,
                "Progress {}%",
                stats.percentage
            ),
            ProgressEvent::ItemFinished {
                item_id,
                success: false,
                message,
            } => tracing::warn!(item_id = %item_id, "Item failed: {}", message.as_deref().unwrap_or("")),
            ProgressEvent::QueuePaused(stats) => tracing::warn!(
                pending = stats.pending,
                "Queue paused after a failure, waiting for resume or stop"
            ),
            other => tracing::info!(event = ?other, "Progress event"),
        }
        Ok(())
    }
}

/// Forwards events into a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn notify(&self, event: ProgressEvent) -> Result<(), SinkError> {
        self.tx
            .send(event)
            .map_err(|_| SinkError("progress receiver closed".to_string()))
    }
}
