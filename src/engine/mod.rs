//! Orchestration engine
//!
//! Owns the pagination machine, the session counter and the folder resolver
//! for the life of the process, and dispatches every host request through
//! [`Orchestrator::handle`].

pub mod request;
pub mod sink;

pub use request::{EngineRequest, EngineResponse, EngineStatus, PaginationSummary};
pub use sink::{ChannelSink, NullSink, ProgressEvent, ProgressSink, TracingSink};

use crate::download::adaptive::{AdaptiveController, FailureSnapshot};
use crate::download::completion_log::{self, ItemLogEntry};
use crate::download::errors::{EngineError, PersistenceError};
use crate::download::history::{SessionHistory, SessionRecord};
use crate::download::item::{DownloadItem, ItemOutcome};
use crate::download::pipeline::{MirrorTarget, SessionDownloader};
use crate::download::queue::{QueueConfig, QueueObserver, QueueStats, TaskQueue};
use crate::download::transfer::TransferService;
use crate::pagination::{
    DateWindow, Navigator, PageCollector, PaginationMachine, PaginationState, Phase, TickOutcome,
};
use crate::session::path::DEFAULT_BASE_FOLDER;
use crate::session::{SessionCounter, SessionPath};
use crate::store::{KeyValueStore, get_json, set_json};
use sink::notify_best_effort;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Store key for the adaptive controller's failure history
pub const ADAPTIVE_KEY: &str = "adaptive_failures";

/// Run-wide settings, usually built from the application config
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub marketplace: String,
    pub base_folder: String,
    pub download_root: PathBuf,
    pub queue: QueueConfig,
    /// Let the failure history tune the queue
    pub adaptive: bool,
    pub max_pages: u32,
    /// Directory for the per-item JSONL log; disabled when `None`
    pub logs_dir: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            marketplace: "DE".to_string(),
            base_folder: DEFAULT_BASE_FOLDER.to_string(),
            download_root: PathBuf::from("Downloads"),
            queue: QueueConfig::default(),
            adaptive: true,
            max_pages: crate::pagination::machine::DEFAULT_MAX_PAGES,
            logs_dir: None,
            history_path: None,
        }
    }
}

/// Forwards queue callbacks to the sink and the item log
struct SessionObserver {
    sink: Arc<dyn ProgressSink>,
    session_number: u32,
    marketplace: String,
    logs_dir: Option<PathBuf>,
}

impl QueueObserver for SessionObserver {
    fn on_progress(&self, stats: &QueueStats) {
        notify_best_effort(self.sink.as_ref(), ProgressEvent::QueueProgress(stats.clone()));
    }

    fn on_paused(&self, stats: &QueueStats) {
        notify_best_effort(self.sink.as_ref(), ProgressEvent::QueuePaused(stats.clone()));
    }

    fn on_item_complete(&self, item: &DownloadItem, outcome: &ItemOutcome) {
        if let Some(logs_dir) = &self.logs_dir {
            let entry = ItemLogEntry::new(self.session_number, &self.marketplace, item, outcome);
            if let Err(e) = completion_log::append_entry(logs_dir, &entry) {
                tracing::warn!(item_id = %item.id, "Failed to append item log: {}", e);
            }
        }
        let message = match outcome {
            ItemOutcome::Completed { destination, .. } => Some(destination.display().to_string()),
            ItemOutcome::Failed { error, .. } => Some(error.to_string()),
        };
        notify_best_effort(
            self.sink.as_ref(),
            ProgressEvent::ItemFinished {
                item_id: item.id.clone(),
                success: outcome.is_success(),
                message,
            },
        );
    }
}

pub struct Orchestrator {
    settings: EngineSettings,
    store: Arc<dyn KeyValueStore>,
    machine: PaginationMachine,
    counter: SessionCounter,
    transfer: Arc<dyn TransferService>,
    mirror: Option<MirrorTarget>,
    sink: Arc<dyn ProgressSink>,
    collector: Option<Arc<dyn PageCollector>>,
    navigator: Option<Arc<dyn Navigator>>,
    active: Mutex<Option<TaskQueue>>,
}

impl Orchestrator {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn KeyValueStore>,
        transfer: Arc<dyn TransferService>,
    ) -> Self {
        let machine = PaginationMachine::new(store.clone()).with_max_pages(settings.max_pages);
        Self {
            counter: SessionCounter::new(store.clone()),
            machine,
            settings,
            store,
            transfer,
            mirror: None,
            sink: Arc::new(NullSink),
            collector: None,
            navigator: None,
            active: Mutex::new(None),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_mirror(mut self, mirror: MirrorTarget) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Attach the listing host that pages are collected from
    pub fn with_pages<H>(mut self, host: Arc<H>) -> Self
    where
        H: PageCollector + Navigator + 'static,
    {
        let collector: Arc<dyn PageCollector> = host.clone();
        let navigator: Arc<dyn Navigator> = host;
        self.collector = Some(collector);
        self.navigator = Some(navigator);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn machine(&self) -> &PaginationMachine {
        &self.machine
    }

    fn active(&self) -> MutexGuard<'_, Option<TaskQueue>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, event: ProgressEvent) {
        notify_best_effort(self.sink.as_ref(), event);
    }

    pub async fn handle(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        tracing::debug!(?request, "Engine request");
        match request {
            EngineRequest::StartCollection {
                window,
                range_label,
            } => self.start_collection(window, &range_label).await,
            EngineRequest::ResumeCollection => self.resume_collection().await,
            EngineRequest::Status => Ok(EngineResponse::Status(self.status().await?)),
            EngineRequest::Pause => Ok(EngineResponse::Control {
                applied: self.control_queue(TaskQueue::pause),
            }),
            EngineRequest::Resume => Ok(EngineResponse::Control {
                applied: self.control_queue(TaskQueue::resume),
            }),
            EngineRequest::Stop => Ok(EngineResponse::Control {
                applied: self.control_queue(TaskQueue::stop),
            }),
            EngineRequest::ClearState => {
                let had_state = self.machine.abort().await?;
                if had_state {
                    self.notify(ProgressEvent::StateCleared);
                }
                Ok(EngineResponse::Cleared { had_state })
            }
            EngineRequest::History => Ok(EngineResponse::History(self.history()?)),
        }
    }

    /// Re-invoke `ResumeCollection` until the run hands off or goes idle
    ///
    /// Each iteration stands in for one context lifetime.
    pub async fn drive(&self) -> Result<EngineResponse, EngineError> {
        loop {
            match self.handle(EngineRequest::ResumeCollection).await? {
                EngineResponse::Collecting(_) => continue,
                other => return Ok(other),
            }
        }
    }

    async fn start_collection(
        &self,
        window: DateWindow,
        range_label: &str,
    ) -> Result<EngineResponse, EngineError> {
        let state = self
            .machine
            .begin(window, &self.settings.marketplace, range_label)
            .await?;
        self.notify(ProgressEvent::CollectionStarted {
            window,
            range_label: range_label.to_string(),
        });
        Ok(EngineResponse::CollectionStarted(PaginationSummary::from(
            &state,
        )))
    }

    async fn resume_collection(&self) -> Result<EngineResponse, EngineError> {
        let (Some(collector), Some(navigator)) = (&self.collector, &self.navigator) else {
            return self.resume_without_pages().await;
        };

        let outcome = self
            .machine
            .tick(collector.as_ref(), navigator.as_ref())
            .await?;
        match outcome {
            TickOutcome::Idle => Ok(EngineResponse::Idle),
            TickOutcome::StaleCleared => {
                self.notify(ProgressEvent::StateCleared);
                Ok(EngineResponse::StaleCleared)
            }
            TickOutcome::Navigated {
                page,
                added,
                collected,
            } => {
                self.notify(ProgressEvent::PageCollected {
                    page: page.saturating_sub(1),
                    added,
                    collected,
                });
                Ok(EngineResponse::Collecting(outcome))
            }
            TickOutcome::Completed { collected, .. } => {
                self.notify(ProgressEvent::CollectionComplete { collected });
                Ok(EngineResponse::Collecting(outcome))
            }
            TickOutcome::ReadyForHandoff(state) => {
                Ok(EngineResponse::SessionFinished(self.handoff(state).await?))
            }
        }
    }

    /// A finished run can be handed off without a listing host
    async fn resume_without_pages(&self) -> Result<EngineResponse, EngineError> {
        let Some(state) = self.machine.load().await? else {
            return Ok(EngineResponse::Idle);
        };
        match state.phase() {
            Phase::Complete => Ok(EngineResponse::SessionFinished(self.handoff(state).await?)),
            Phase::Stale => {
                self.machine.clear().await?;
                self.notify(ProgressEvent::StateCleared);
                Ok(EngineResponse::StaleCleared)
            }
            Phase::Running => Err(EngineError::Navigation(format!(
                "No listing pages attached to continue at page {}",
                state.current_page
            ))),
        }
    }

    /// Hand the collected items to a fresh queue and run it to the end
    ///
    /// A session number is only taken once every fallible read has succeeded,
    /// so a failed hand-off leaves no gap in the numbering.
    async fn handoff(&self, state: PaginationState) -> Result<SessionRecord, EngineError> {
        let marketplace = self.settings.marketplace.clone();
        let controller = Arc::new(self.load_controller().await?);
        let (config, profile) = if self.settings.adaptive {
            let adaptive = controller.get_adaptive_settings(&self.settings.queue);
            (
                adaptive.apply_to(&self.settings.queue),
                adaptive.profile_name.to_string(),
            )
        } else {
            (self.settings.queue.clone(), "fixed".to_string())
        };
        let session_number = self.counter.next(&marketplace).await?;

        let session = SessionPath::new(
            marketplace.as_str(),
            state.window.start.to_string(),
            state.window.end.to_string(),
            state.range_label.as_str(),
            session_number,
        )
        .with_base_folder(self.settings.base_folder.as_str());

        let mut downloader = SessionDownloader::new(
            session.clone(),
            self.settings.download_root.clone(),
            self.transfer.clone(),
        );
        if let Some(mirror) = &self.mirror {
            downloader = downloader.with_mirror(mirror.clone());
        }

        let queue = TaskQueue::with_controller(config, Arc::new(downloader), controller.clone());
        queue.add_observer(Arc::new(SessionObserver {
            sink: self.sink.clone(),
            session_number,
            marketplace: marketplace.clone(),
            logs_dir: self.settings.logs_dir.clone(),
        }));

        let total = queue.enqueue(state.collected_items);
        // The queue owns the items now and the number is taken
        if let Err(e) = self.machine.finish().await {
            tracing::warn!(session = session_number, "Failed to clear collection state: {}", e);
        }

        tracing::info!(
            session = session_number,
            total,
            profile = %profile,
            "Session {} started",
            session.session_folder()
        );
        self.notify(ProgressEvent::SessionStarted {
            session_number,
            total,
            profile: profile.clone(),
        });

        *self.active() = Some(queue.clone());
        queue.start();
        let report = queue.wait().await;
        *self.active() = None;

        if let Err(e) = self.save_controller(&controller).await {
            tracing::warn!("Failed to persist failure history: {}", e);
        }

        let record = SessionRecord::from_report(&session, total, &report).with_profile(&profile);
        if let Some(path) = &self.settings.history_path {
            let saved = SessionHistory::load(path).and_then(|mut history| {
                history.add(record.clone());
                history.save(path)
            });
            if let Err(e) = saved {
                tracing::warn!("Failed to write session history: {}", e);
            }
        }

        tracing::info!(
            session = session_number,
            completed = record.completed,
            failed = record.failed,
            "Session finished: {}",
            record.status.label()
        );
        self.notify(ProgressEvent::SessionFinished(record.clone()));
        Ok(record)
    }

    fn control_queue(&self, action: fn(&TaskQueue)) -> bool {
        let queue = self.active().clone();
        match queue {
            Some(queue) => {
                action(&queue);
                true
            }
            None => false,
        }
    }

    async fn load_controller(&self) -> Result<AdaptiveController, PersistenceError> {
        let snapshot = get_json::<FailureSnapshot>(self.store.as_ref(), ADAPTIVE_KEY)
            .await?
            .unwrap_or_default();
        Ok(AdaptiveController::restore(&snapshot))
    }

    async fn save_controller(&self, controller: &AdaptiveController) -> Result<(), PersistenceError> {
        set_json(self.store.as_ref(), ADAPTIVE_KEY, &controller.snapshot()).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let pagination = self
            .machine
            .load()
            .await?
            .as_ref()
            .map(PaginationSummary::from);
        let queue = self.active().as_ref().map(TaskQueue::get_stats);
        let last_session = self.counter.peek(&self.settings.marketplace).await?;
        let controller = self.load_controller().await?;

        Ok(EngineStatus {
            marketplace: self.settings.marketplace.clone(),
            pagination,
            queue,
            last_session,
            profile: controller.current_profile().name.to_string(),
            failure_rate: controller.failure_rate(),
        })
    }

    pub fn history(&self) -> Result<Vec<SessionRecord>, EngineError> {
        let Some(path) = &self.settings.history_path else {
            return Ok(Vec::new());
        };
        let history = SessionHistory::load(path).map_err(|e| EngineError::History(e.to_string()))?;
        Ok(history.sessions)
    }
}
