//! Bounded-concurrency retrying download queue
//!
//! A single worker loop owns admission: it pulls items from the front of
//! `pending` while fewer than `max_concurrent` are active, waits for at least
//! one in-flight unit to finish, then sleeps the inter-item delay. Failed
//! attempts are pushed back to the front of `pending` so retries run before
//! fresh items. Item errors never abort the run.

use super::adaptive::AdaptiveController;
use super::errors::{ItemError, TransferError};
use super::item::{DownloadItem, ItemOutcome};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Length of the per-minute throttle window
const THROTTLE_WINDOW: Duration = Duration::from_secs(60);

/// Queue operating parameters, fixed for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_concurrent: usize,
    pub inter_item_delay: Duration,
    /// Maximum admissions per rolling minute; 0 disables the throttle
    pub per_minute_throttle: u32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub pause_on_error: bool,
    /// Give failed items still under their retry budget one more pass
    pub retry_failed: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            inter_item_delay: Duration::from_millis(1000),
            per_minute_throttle: 30,
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
            pause_on_error: false,
            retry_failed: true,
        }
    }
}

/// Result of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub destination: PathBuf,
    pub transfer_id: String,
    pub bytes: u64,
}

/// Per-item download operation plugged into the queue
///
/// Implementations should check `cancel` at convenient points; a transfer that
/// finishes without observing it is still recorded as completed.
#[async_trait]
pub trait ItemDownloader: Send + Sync {
    async fn download(
        &self,
        item: &DownloadItem,
        cancel: &CancellationToken,
    ) -> Result<CompletedTransfer, ItemError>;
}

/// Queue callbacks. All methods default to no-ops.
pub trait QueueObserver: Send + Sync {
    fn on_progress(&self, _stats: &QueueStats) {}
    fn on_item_complete(&self, _item: &DownloadItem, _outcome: &ItemOutcome) {}
    fn on_complete(&self, _completed: &[DownloadItem], _failed: &[FailedItem]) {}
    /// `pause_on_error` held back work; only `resume()` or `stop()` releases it
    fn on_paused(&self, _stats: &QueueStats) {}
}

/// Item that exhausted its attempts
#[derive(Debug, Clone, PartialEq)]
pub struct FailedItem {
    pub item: DownloadItem,
    pub error: ItemError,
}

/// Snapshot of queue progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    /// Items with a final outcome (completed + failed)
    pub current: usize,
    pub completed: usize,
    pub failed: usize,
    pub active: usize,
    pub pending: usize,
    pub percentage: u32,
    pub is_paused: bool,
    pub is_processing: bool,
    pub elapsed_ms: u64,
}

/// Final report handed back when a run ends
#[derive(Debug, Clone, Default)]
pub struct QueueReport {
    pub completed: Vec<DownloadItem>,
    pub failed: Vec<FailedItem>,
    /// Items dropped by `stop()` (cleared from pending or cancelled in flight)
    pub cancelled: Vec<DownloadItem>,
    pub duration_ms: u64,
    pub stopped: bool,
}

/// `floor(current / total * 100)`, or 0 for an empty run
pub fn progress_percentage(current: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        (current.saturating_mul(100) / total) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Paused,
    Stopped,
}

#[derive(Default)]
struct RunState {
    pending: VecDeque<DownloadItem>,
    active: HashMap<String, Instant>,
    completed: Vec<DownloadItem>,
    failed: Vec<FailedItem>,
    cancelled: Vec<DownloadItem>,
    /// Every id accepted into this run, to keep ids unique across the four sets
    known: HashSet<String>,
    is_processing: bool,
    retry_pass_done: bool,
    started_at: Option<Instant>,
    admissions: VecDeque<Instant>,
}

impl RunState {
    fn total(&self) -> usize {
        self.pending.len()
            + self.active.len()
            + self.completed.len()
            + self.failed.len()
            + self.cancelled.len()
    }

    /// Drop the results of a finished run so the next one starts clean
    fn reset_if_finished(&mut self) {
        if self.is_processing || self.started_at.is_none() {
            return;
        }
        self.completed.clear();
        self.failed.clear();
        self.cancelled.clear();
        self.admissions.clear();
        self.known = self.pending.iter().map(|i| i.id.clone()).collect();
        self.started_at = None;
    }

    fn prune_admissions(&mut self, now: Instant) {
        while self
            .admissions
            .front()
            .is_some_and(|t| now.duration_since(*t) >= THROTTLE_WINDOW)
        {
            self.admissions.pop_front();
        }
    }
}

enum UnitResult {
    Done(DownloadItem, CompletedTransfer),
    Retry(DownloadItem, ItemError),
    Failed(DownloadItem, ItemError),
    Cancelled(DownloadItem),
}

struct Inner {
    config: QueueConfig,
    state: Mutex<RunState>,
    downloader: Arc<dyn ItemDownloader>,
    observers: Mutex<Vec<Arc<dyn QueueObserver>>>,
    controller: Option<Arc<AdaptiveController>>,
    control: watch::Sender<Control>,
    cancel: Mutex<CancellationToken>,
    report: watch::Sender<Option<QueueReport>>,
}

/// Bounded-concurrency retrying task queue
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig, downloader: Arc<dyn ItemDownloader>) -> Self {
        Self::build(config, downloader, None)
    }

    /// Feed every outcome into an adaptive controller
    pub fn with_controller(
        config: QueueConfig,
        downloader: Arc<dyn ItemDownloader>,
        controller: Arc<AdaptiveController>,
    ) -> Self {
        Self::build(config, downloader, Some(controller))
    }

    fn build(
        config: QueueConfig,
        downloader: Arc<dyn ItemDownloader>,
        controller: Option<Arc<AdaptiveController>>,
    ) -> Self {
        let config = QueueConfig {
            max_concurrent: config.max_concurrent.max(1),
            ..config
        };
        let (control, _) = watch::channel(Control::Running);
        let (report, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(RunState::default()),
                downloader,
                observers: Mutex::new(Vec::new()),
                controller,
                control,
                cancel: Mutex::new(CancellationToken::new()),
                report,
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn add_observer(&self, observer: Arc<dyn QueueObserver>) {
        self.observers_lock().push(observer);
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observers_lock(&self) -> MutexGuard<'_, Vec<Arc<dyn QueueObserver>>> {
        self.inner.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observers(&self) -> Vec<Arc<dyn QueueObserver>> {
        self.observers_lock().clone()
    }

    fn cancel_token(&self) -> CancellationToken {
        self.inner
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Append items to the back of `pending`
    ///
    /// Items whose id is already part of this run are skipped. Returns the
    /// number of items accepted.
    pub fn enqueue(&self, items: impl IntoIterator<Item = DownloadItem>) -> usize {
        let mut state = self.lock();
        state.reset_if_finished();
        let mut accepted = 0;
        for item in items {
            if !state.known.insert(item.id.clone()) {
                tracing::warn!(item_id = %item.id, "Duplicate item id ignored by queue");
                continue;
            }
            state.pending.push_back(item);
            accepted += 1;
        }
        tracing::debug!("Enqueued {} items ({} pending)", accepted, state.pending.len());
        accepted
    }

    /// Start the worker loop. No-op if it is already running.
    ///
    /// Starting a finished queue begins a fresh run: results of the previous
    /// run are dropped and only items enqueued since then are processed.
    pub fn start(&self) {
        {
            let mut state = self.lock();
            if state.is_processing {
                return;
            }
            state.reset_if_finished();
            state.is_processing = true;
            state.retry_pass_done = false;
            state.started_at = Some(Instant::now());
        }
        {
            let mut cancel = self.inner.cancel.lock().unwrap_or_else(|e| e.into_inner());
            if cancel.is_cancelled() {
                *cancel = CancellationToken::new();
            }
        }
        self.inner.report.send_replace(None);
        self.inner.control.send_replace(Control::Running);

        tracing::info!(
            max_concurrent = self.inner.config.max_concurrent,
            throttle = self.inner.config.per_minute_throttle,
            "Download queue started"
        );

        let queue = self.clone();
        tokio::spawn(async move { queue.process().await });
    }

    /// Stop admitting new work; in-flight transfers keep running
    pub fn pause(&self) {
        self.inner.control.send_if_modified(|c| {
            if *c == Control::Running {
                *c = Control::Paused;
                tracing::info!("Download queue paused");
                true
            } else {
                false
            }
        });
    }

    pub fn resume(&self) {
        self.inner.control.send_if_modified(|c| {
            if *c == Control::Paused {
                *c = Control::Running;
                tracing::info!("Download queue resumed");
                true
            } else {
                false
            }
        });
    }

    /// Cancel in-flight transfers and drop all pending work
    ///
    /// `on_complete` still fires with whatever finished before the stop.
    pub fn stop(&self) {
        self.inner.control.send_replace(Control::Stopped);
        self.cancel_token().cancel();
        let mut state = self.lock();
        let dropped: Vec<DownloadItem> = state.pending.drain(..).collect();
        tracing::info!("Download queue stopped, {} pending items dropped", dropped.len());
        state.cancelled.extend(dropped);
    }

    pub fn get_stats(&self) -> QueueStats {
        let state = self.lock();
        self.stats_of(&state)
    }

    fn stats_of(&self, state: &RunState) -> QueueStats {
        let total = state.total();
        let current = state.completed.len() + state.failed.len();
        QueueStats {
            total,
            current,
            completed: state.completed.len(),
            failed: state.failed.len(),
            active: state.active.len(),
            pending: state.pending.len(),
            percentage: progress_percentage(current, total),
            is_paused: *self.inner.control.borrow() == Control::Paused,
            is_processing: state.is_processing,
            elapsed_ms: state
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
        }
    }

    /// Wait for the current run to finish
    pub async fn wait(&self) -> QueueReport {
        let mut rx = self.inner.report.subscribe();
        match rx.wait_for(|r| r.is_some()).await {
            Ok(report) => report.clone().unwrap_or_default(),
            Err(_) => QueueReport::default(),
        }
    }

    /// Enqueue, start and wait in one call
    pub async fn run(&self, items: impl IntoIterator<Item = DownloadItem>) -> QueueReport {
        self.enqueue(items);
        self.start();
        self.wait().await
    }

    fn control(&self) -> Control {
        *self.inner.control.borrow()
    }

    async fn process(self) {
        let mut control_rx = self.inner.control.subscribe();
        let mut in_flight: JoinSet<UnitResult> = JoinSet::new();

        loop {
            let control = *control_rx.borrow_and_update();
            match control {
                Control::Stopped => {
                    while let Some(joined) = in_flight.join_next().await {
                        self.handle_joined(joined);
                    }
                    break;
                }
                Control::Paused => {
                    if in_flight.is_empty() {
                        // Nothing left to hold back
                        if self.lock().pending.is_empty() {
                            break;
                        }
                        let _ = control_rx.changed().await;
                    } else {
                        tokio::select! {
                            _ = control_rx.changed() => {}
                            Some(joined) = in_flight.join_next() => self.handle_joined(joined),
                        }
                    }
                    continue;
                }
                Control::Running => {}
            }

            let has_pending = !self.lock().pending.is_empty();
            if !has_pending {
                if let Some(joined) = in_flight.join_next().await {
                    self.handle_joined(joined);
                    continue;
                }
                if self.begin_retry_pass() {
                    continue;
                }
                break;
            }

            if let Some(wait) = self.throttle_wait(Instant::now()) {
                tracing::debug!("Per-minute throttle reached, waiting {:?}", wait);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = control_rx.changed() => {}
                    Some(joined) = in_flight.join_next() => self.handle_joined(joined),
                }
                continue;
            }

            let cancel = self.cancel_token();
            for item in self.take_batch(Instant::now()) {
                tracing::debug!(item_id = %item.id, attempt = item.retry_count + 1, "Starting item");
                let downloader = self.inner.downloader.clone();
                let config = self.inner.config.clone();
                let cancel = cancel.clone();
                in_flight.spawn(run_unit(downloader, item, cancel, config));
            }

            if let Some(joined) = in_flight.join_next().await {
                self.handle_joined(joined);
            }

            let delay = self.inner.config.inter_item_delay;
            if !delay.is_zero() && !self.lock().pending.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = control_rx.changed() => {}
                }
            }
        }

        self.finish();
    }

    fn throttle_wait(&self, now: Instant) -> Option<Duration> {
        let limit = self.inner.config.per_minute_throttle as usize;
        if limit == 0 {
            return None;
        }
        let mut state = self.lock();
        state.prune_admissions(now);
        if state.admissions.len() < limit {
            return None;
        }
        let oldest = *state.admissions.front()?;
        Some((oldest + THROTTLE_WINDOW).saturating_duration_since(now))
    }

    fn take_batch(&self, now: Instant) -> Vec<DownloadItem> {
        let config = &self.inner.config;
        let mut state = self.lock();
        state.prune_admissions(now);

        let mut room = config.max_concurrent.saturating_sub(state.active.len());
        if config.per_minute_throttle > 0 {
            let left = (config.per_minute_throttle as usize).saturating_sub(state.admissions.len());
            room = room.min(left);
        }

        let mut batch = Vec::with_capacity(room);
        while batch.len() < room {
            let Some(item) = state.pending.pop_front() else {
                break;
            };
            state.active.insert(item.id.clone(), now);
            state.admissions.push_back(now);
            batch.push(item);
        }
        debug_assert!(state.active.len() <= config.max_concurrent);
        batch
    }

    /// Move under-budget failures back to pending, once per run
    fn begin_retry_pass(&self) -> bool {
        let config = &self.inner.config;
        if !config.retry_failed || self.control() != Control::Running {
            return false;
        }
        let mut state = self.lock();
        if state.retry_pass_done {
            return false;
        }
        state.retry_pass_done = true;

        let failed = std::mem::take(&mut state.failed);
        let (retry, keep): (Vec<_>, Vec<_>) = failed.into_iter().partition(|f| {
            f.item.retry_count < config.max_retries
                && !matches!(f.error, ItemError::Validation(_))
        });
        state.failed = keep;
        if retry.is_empty() {
            return false;
        }
        tracing::info!("Retry pass over {} failed items", retry.len());
        for mut failed in retry {
            failed.item.retry_count += 1;
            failed.item.log_info("Queued for retry pass".to_string());
            state.pending.push_back(failed.item);
        }
        true
    }

    fn handle_joined(&self, joined: Result<UnitResult, tokio::task::JoinError>) {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Queue unit was aborted: {}", e);
                return;
            }
        };

        let stopped = self.control() == Control::Stopped;
        let mut finished: Option<(DownloadItem, ItemOutcome)> = None;
        let mut pause = false;

        let stats = {
            let mut state = self.lock();
            match result {
                UnitResult::Done(mut item, transfer) => {
                    state.active.remove(&item.id);
                    item.log_info(format!("Saved to {}", transfer.destination.display()));
                    if let Some(controller) = &self.inner.controller {
                        controller.record_success();
                    }
                    tracing::info!(item_id = %item.id, bytes = transfer.bytes, "Item completed");
                    state.completed.push(item.clone());
                    finished = Some((
                        item,
                        ItemOutcome::Completed {
                            destination: transfer.destination,
                            transfer_id: transfer.transfer_id,
                            bytes: transfer.bytes,
                        },
                    ));
                }
                UnitResult::Retry(item, error) => {
                    state.active.remove(&item.id);
                    if let Some(controller) = &self.inner.controller {
                        controller.record_failure();
                    }
                    if stopped {
                        state.cancelled.push(item);
                    } else {
                        tracing::info!(
                            item_id = %item.id,
                            "Retrying (attempt {}/{}): {}",
                            item.retry_count + 1,
                            self.inner.config.max_retries + 1,
                            error
                        );
                        state.pending.push_front(item);
                    }
                }
                UnitResult::Failed(mut item, error) => {
                    state.active.remove(&item.id);
                    if let Some(controller) = &self.inner.controller {
                        controller.record_failure();
                    }
                    item.log_error(format!("Failed: {}", error));
                    tracing::warn!(item_id = %item.id, "Item failed: {}", error);
                    state.failed.push(FailedItem {
                        item: item.clone(),
                        error: error.clone(),
                    });
                    let attempts = item.retry_count + 1;
                    finished = Some((item, ItemOutcome::Failed { error, attempts }));
                    pause = self.inner.config.pause_on_error && !stopped;
                }
                UnitResult::Cancelled(item) => {
                    state.active.remove(&item.id);
                    tracing::debug!(item_id = %item.id, "Item cancelled");
                    state.cancelled.push(item);
                }
            }
            self.stats_of(&state)
        };

        let observers = self.observers();
        if pause {
            tracing::warn!(pending = stats.pending, "Pausing queue after failure (pause_on_error)");
            self.pause();
            if stats.pending > 0 {
                let stats = self.get_stats();
                for observer in &observers {
                    observer.on_paused(&stats);
                }
            }
        }

        if let Some((item, outcome)) = finished {
            for observer in &observers {
                observer.on_item_complete(&item, &outcome);
            }
        }
        for observer in &observers {
            observer.on_progress(&stats);
        }
    }

    fn finish(&self) {
        let report = {
            let mut state = self.lock();
            state.is_processing = false;
            QueueReport {
                completed: state.completed.clone(),
                failed: state.failed.clone(),
                cancelled: state.cancelled.clone(),
                duration_ms: state
                    .started_at
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(0),
                stopped: self.control() == Control::Stopped,
            }
        };

        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            cancelled = report.cancelled.len(),
            "Download queue finished in {}",
            super::item::format_duration(report.duration_ms)
        );

        for observer in self.observers() {
            observer.on_complete(&report.completed, &report.failed);
        }
        self.inner.report.send_replace(Some(report));
    }
}

/// One attempt for one item
async fn run_unit(
    downloader: Arc<dyn ItemDownloader>,
    item: DownloadItem,
    cancel: CancellationToken,
    config: QueueConfig,
) -> UnitResult {
    if let Err(e) = item.validate() {
        return UnitResult::Failed(item, e.into());
    }

    let fallback = item.clone();
    let attempt = AssertUnwindSafe(attempt_item(downloader, item, cancel, config))
        .catch_unwind()
        .await;
    attempt.unwrap_or_else(|_| {
        tracing::error!(item_id = %fallback.id, "Download operation panicked");
        UnitResult::Failed(
            fallback,
            TransferError::Network("download operation panicked".to_string()).into(),
        )
    })
}

async fn attempt_item(
    downloader: Arc<dyn ItemDownloader>,
    mut item: DownloadItem,
    cancel: CancellationToken,
    config: QueueConfig,
) -> UnitResult {
    match downloader.download(&item, &cancel).await {
        Ok(transfer) => UnitResult::Done(item, transfer),
        Err(ItemError::Transfer(TransferError::Cancelled)) => UnitResult::Cancelled(item),
        Err(error) => {
            item.log_warn(format!("Attempt {} failed: {}", item.retry_count + 1, error));
            if !error.is_retryable() || item.retry_count >= config.max_retries {
                return UnitResult::Failed(item, error);
            }
            if cancel.is_cancelled() {
                return UnitResult::Cancelled(item);
            }
            item.retry_count += 1;
            tokio::select! {
                _ = tokio::time::sleep(config.retry_delay) => UnitResult::Retry(item, error),
                _ = cancel.cancelled() => UnitResult::Cancelled(item),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::errors::TransferError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every attempt for the listed ids, tracks peak concurrency
    struct ScriptedDownloader {
        fail_ids: Vec<String>,
        status: u16,
        active: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        /// Item ids in admission order, one entry per attempt
        order: Mutex<Vec<String>>,
    }

    impl ScriptedDownloader {
        fn new(fail_ids: &[&str]) -> Self {
            Self::with_status(fail_ids, 503)
        }

        fn with_status(fail_ids: &[&str], status: u16) -> Self {
            Self {
                fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
                status,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
            }
        }

        fn order(&self) -> Vec<String> {
            self.order.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ItemDownloader for ScriptedDownloader {
        async fn download(
            &self,
            item: &DownloadItem,
            _cancel: &CancellationToken,
        ) -> Result<CompletedTransfer, ItemError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().unwrap().push(item.id.clone());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail_ids.contains(&item.id) {
                return Err(TransferError::from_status(self.status).into());
            }
            Ok(CompletedTransfer {
                destination: PathBuf::from(format!("/tmp/{}", item.destination_name)),
                transfer_id: format!("t-{}", item.id),
                bytes: 10,
            })
        }
    }

    fn items(n: usize) -> Vec<DownloadItem> {
        (1..=n)
            .map(|i| {
                let mut item = DownloadItem::new(
                    i.to_string(),
                    format!("https://example.com/{}", i),
                    format!("{}.pdf", i),
                );
                item.sequence_index = i - 1;
                item
            })
            .collect()
    }

    fn fast_config(max_concurrent: usize) -> QueueConfig {
        QueueConfig {
            max_concurrent,
            inter_item_delay: Duration::from_millis(10),
            per_minute_throttle: 0,
            max_retries: 2,
            retry_delay: Duration::from_millis(10),
            pause_on_error: false,
            retry_failed: true,
        }
    }

    #[test]
    fn test_progress_percentage() {
        assert_eq!(progress_percentage(0, 0), 0);
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(2, 3), 66);
        assert_eq!(progress_percentage(3, 3), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_permanent_failures_out_of_five() {
        let downloader = Arc::new(ScriptedDownloader::new(&["2", "4"]));
        let queue = TaskQueue::new(fast_config(2), downloader.clone());

        let report = queue.run(items(5)).await;

        assert_eq!(report.completed.len(), 3);
        assert_eq!(report.failed.len(), 2);
        assert!(downloader.peak.load(Ordering::SeqCst) <= 2);
        // 3 successes + 2 items * (1 + max_retries) attempts
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 3 + 2 * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_count_never_exceeds_budget() {
        let downloader = Arc::new(ScriptedDownloader::new(&["1"]));
        let queue = TaskQueue::new(fast_config(1), downloader);

        let report = queue.run(items(1)).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].item.retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bound_respected() {
        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let queue = TaskQueue::new(fast_config(3), downloader.clone());

        let report = queue.run(items(12)).await;

        assert_eq!(report.completed.len(), 12);
        assert!(downloader.peak.load(Ordering::SeqCst) <= 3);
        assert!(downloader.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_failure_not_retried() {
        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let queue = TaskQueue::new(fast_config(2), downloader.clone());

        let mut batch = items(2);
        batch[1].source_location = String::new();
        let report = queue.run(batch).await;

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].error, ItemError::Validation(_)));
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_pass_for_non_retryable_failures() {
        // 404 is not retried in the main pass, so it is still under budget
        let downloader = Arc::new(ScriptedDownloader::with_status(&["1"], 404));
        let queue = TaskQueue::new(fast_config(1), downloader.clone());

        let report = queue.run(items(1)).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_rejected() {
        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let queue = TaskQueue::new(fast_config(2), downloader);

        let mut batch = items(2);
        batch.push(batch[0].clone());
        assert_eq!(queue.enqueue(batch), 2);
        assert_eq!(queue.get_stats().pending, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_throttle_spreads_admissions() {
        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let config = QueueConfig {
            per_minute_throttle: 2,
            inter_item_delay: Duration::ZERO,
            ..fast_config(5)
        };
        let queue = TaskQueue::new(config, downloader);

        let started = Instant::now();
        let report = queue.run(items(5)).await;

        assert_eq!(report.completed.len(), 5);
        // 2 per minute: items 3-4 wait one window, item 5 a second
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_run_completes() {
        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let queue = TaskQueue::new(fast_config(2), downloader);

        let report = queue.run(Vec::new()).await;

        assert!(report.completed.is_empty());
        assert!(report.failed.is_empty());
        assert_eq!(queue.get_stats().percentage, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_sees_outcomes() {
        let downloader = Arc::new(ScriptedDownloader::new(&["1"]));
        let controller = Arc::new(AdaptiveController::new());
        let queue = TaskQueue::with_controller(fast_config(1), downloader, controller.clone());

        queue.run(items(2)).await;

        assert_eq!(controller.successes(), 1);
        // one failure per attempt of item 1
        assert_eq!(controller.snapshot().failures.len(), 3);
    }

    #[derive(Default)]
    struct RecordingObserver {
        completed: Mutex<Option<Vec<String>>>,
        paused: Mutex<Vec<QueueStats>>,
    }

    impl QueueObserver for RecordingObserver {
        fn on_complete(&self, completed: &[DownloadItem], _failed: &[FailedItem]) {
            let ids = completed.iter().map(|i| i.id.clone()).collect();
            *self.completed.lock().unwrap() = Some(ids);
        }

        fn on_paused(&self, stats: &QueueStats) {
            self.paused.lock().unwrap().push(stats.clone());
        }
    }

    fn single_attempt_config(max_concurrent: usize) -> QueueConfig {
        QueueConfig {
            max_retries: 0,
            retry_failed: false,
            ..fast_config(max_concurrent)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_admission_until_resume() {
        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let queue = TaskQueue::new(fast_config(1), downloader.clone());
        queue.enqueue(items(3));
        queue.start();

        // Item 1 is in flight when the pause lands
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.pause();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let stats = queue.get_stats();
        assert!(stats.is_paused);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.active, 0);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);

        queue.resume();
        let report = queue.wait().await;
        assert_eq!(report.completed.len(), 3);
        assert!(!report.stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_in_flight_completions() {
        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let observer = Arc::new(RecordingObserver::default());
        let queue = TaskQueue::new(fast_config(2), downloader);
        queue.add_observer(observer.clone());
        queue.enqueue(items(5));
        queue.start();

        // Items 1 and 2 are in flight and do not watch the cancel token
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.stop();
        assert_eq!(queue.get_stats().pending, 0);

        let report = queue.wait().await;
        assert!(report.stopped);
        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.cancelled.len(), 3);
        assert!(report.failed.is_empty());
        let mut notified = observer.completed.lock().unwrap().clone().unwrap_or_default();
        notified.sort();
        assert_eq!(notified, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_admitted_before_fresh_items() {
        let downloader = Arc::new(ScriptedDownloader::new(&["1"]));
        let config = QueueConfig {
            retry_failed: false,
            ..fast_config(1)
        };
        let queue = TaskQueue::new(config, downloader.clone());

        let report = queue.run(items(3)).await;

        assert_eq!(downloader.order(), vec!["1", "1", "1", "2", "3"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.completed.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_on_error_with_nothing_left_finishes() {
        let downloader = Arc::new(ScriptedDownloader::new(&["2"]));
        let observer = Arc::new(RecordingObserver::default());
        let config = QueueConfig {
            pause_on_error: true,
            ..single_attempt_config(1)
        };
        let queue = TaskQueue::new(config, downloader);
        queue.add_observer(observer.clone());

        let report = tokio::time::timeout(Duration::from_secs(3600), queue.run(items(2)))
            .await
            .expect("queue should finish once nothing is pending");

        assert_eq!(report.completed.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.stopped);
        assert!(observer.completed.lock().unwrap().is_some());
        assert!(observer.paused.lock().unwrap().is_empty());
        assert!(!queue.get_stats().is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_on_error_waits_for_resume() {
        let downloader = Arc::new(ScriptedDownloader::new(&["1"]));
        let observer = Arc::new(RecordingObserver::default());
        let config = QueueConfig {
            pause_on_error: true,
            ..single_attempt_config(1)
        };
        let queue = TaskQueue::new(config, downloader.clone());
        queue.add_observer(observer.clone());
        queue.enqueue(items(3));
        queue.start();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let paused = observer.paused.lock().unwrap().clone();
        assert_eq!(paused.len(), 1);
        assert!(paused[0].is_paused);
        assert_eq!(paused[0].pending, 2);
        assert_eq!(downloader.calls.load(Ordering::SeqCst), 1);

        queue.resume();
        let report = queue.wait().await;
        assert_eq!(report.completed.len(), 2);
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_begins_fresh_run() {
        let downloader = Arc::new(ScriptedDownloader::new(&[]));
        let queue = TaskQueue::new(fast_config(2), downloader);

        let first = queue.run(items(2)).await;
        assert_eq!(first.completed.len(), 2);

        // Same ids again are accepted in the new run
        let second = queue.run(items(3)).await;
        assert_eq!(second.completed.len(), 3);
        let stats = queue.get_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.percentage, 100);
    }
}
