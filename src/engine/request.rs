use crate::download::history::SessionRecord;
use crate::download::queue::QueueStats;
use crate::pagination::{DateWindow, PaginationState, TickOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Everything a host can ask the engine to do
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// Persist a fresh run positioned on page 1
    StartCollection {
        window: DateWindow,
        range_label: String,
    },
    /// One context lifetime: collect the loaded page or hand off a finished run
    ResumeCollection,
    Status,
    Pause,
    Resume,
    Stop,
    ClearState,
    History,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineResponse {
    CollectionStarted(PaginationSummary),
    /// Collection advanced; the host must start another context lifetime
    Collecting(TickOutcome),
    /// Hand-off ran the queue to the end
    SessionFinished(SessionRecord),
    /// Nothing persisted to resume
    Idle,
    StaleCleared,
    Status(EngineStatus),
    /// Pause/Resume/Stop; false when no queue was running
    Control { applied: bool },
    Cleared { had_state: bool },
    History(Vec<SessionRecord>),
}

/// Persisted run, as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaginationSummary {
    pub current_page: u32,
    pub last_page: Option<u32>,
    pub collected: usize,
    pub is_running: bool,
    pub is_complete: bool,
    pub window: DateWindow,
    pub account_context: String,
    pub range_label: String,
    pub started_at: DateTime<Utc>,
}

impl From<&PaginationState> for PaginationSummary {
    fn from(state: &PaginationState) -> Self {
        Self {
            current_page: state.current_page,
            last_page: state.last_page,
            collected: state.collected(),
            is_running: state.is_running,
            is_complete: state.is_complete,
            window: state.window,
            account_context: state.account_context.clone(),
            range_label: state.range_label.clone(),
            started_at: state.started_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub marketplace: String,
    pub pagination: Option<PaginationSummary>,
    pub queue: Option<QueueStats>,
    /// Last assigned session number for the marketplace
    pub last_session: u32,
    pub profile: String,
    pub failure_rate: f64,
}
