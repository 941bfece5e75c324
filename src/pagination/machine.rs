//! Resumable pagination over order listing pages
//!
//! Every navigation tears down the executing context, so nothing survives
//! between pages except the persisted `PaginationState`. The driver is split
//! in two:
//!
//! - [`step`] is a pure transition from a state and one page's extraction to
//!   the next state plus the action the host must perform.
//! - [`PaginationMachine::tick`] is one context lifetime: load, step, persist,
//!   then navigate or reload. The host re-invokes it after each reload.
//!
//! The early stop assumes listing pages are ordered newest first. Once a page
//! reaches back past the window start, later pages are never visited.

use super::source::{Navigator, PageCollector};
use super::state::{DateWindow, PaginationState, Phase, STATE_KEY};
use crate::download::errors::{EngineError, PersistenceError};
use crate::download::item::DownloadItem;
use crate::store::{KeyValueStore, get_json, set_json};
use chrono::NaiveDate;
use std::sync::Arc;

/// Upper bound on pages visited in one run
pub const DEFAULT_MAX_PAGES: u32 = 100;

/// What one listing page yielded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageExtraction {
    /// Every candidate visible on the page, before window and duplicate filtering
    pub items: Vec<DownloadItem>,
    pub has_next_page: bool,
    /// Oldest order date on the page, if any item carried one
    pub earliest_date: Option<NaiveDate>,
    pub total_pages: Option<u32>,
}

impl PageExtraction {
    /// The page reaches back before the window start
    pub fn predates(&self, window: &DateWindow) -> bool {
        self.earliest_date.is_some_and(|d| d < window.start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Save state, then load this page
    PersistAndNavigate(u32),
    /// Save the completed state, then reload so hand-off runs in a clean context
    PersistAndComplete,
    /// Collection is done; give the items to the queue
    Handoff,
}

/// Pure transition for one page
///
/// A completed state always yields `Handoff` and ignores `page`.
pub fn step(
    mut state: PaginationState,
    page: PageExtraction,
    max_pages: u32,
) -> (PaginationState, NextAction) {
    if state.is_complete {
        return (state, NextAction::Handoff);
    }

    let early_stop = page.predates(&state.window);
    let has_next_page = page.has_next_page;
    if page.total_pages.is_some() {
        state.total_pages = page.total_pages;
    }
    state.absorb(page.items);
    state.last_page = Some(state.current_page);

    if early_stop || !has_next_page || state.current_page >= max_pages {
        state.is_complete = true;
        state.is_running = false;
        return (state, NextAction::PersistAndComplete);
    }

    state.current_page += 1;
    let next = state.current_page;
    (state, NextAction::PersistAndNavigate(next))
}

/// Result of one context lifetime
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No persisted run
    Idle,
    /// An empty, non-terminal state was found and removed
    StaleCleared,
    /// State saved; the context is moving to `page`
    Navigated { page: u32, added: usize, collected: usize },
    /// State saved as complete; the context is reloading
    Completed { added: usize, collected: usize },
    /// Completed state ready for the queue; cleared by `finish` once accepted
    ReadyForHandoff(PaginationState),
}

impl TickOutcome {
    /// The host has to start another context lifetime and tick again
    pub fn needs_another_tick(&self) -> bool {
        matches!(self, Self::Navigated { .. } | Self::Completed { .. })
    }
}

/// Host-side driver around [`step`]
#[derive(Clone)]
pub struct PaginationMachine {
    store: Arc<dyn KeyValueStore>,
    max_pages: u32,
}

impl PaginationMachine {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Persisted state, repaired if its id set drifted from its items
    pub async fn load(&self) -> Result<Option<PaginationState>, PersistenceError> {
        let state = get_json::<PaginationState>(self.store.as_ref(), STATE_KEY).await?;
        Ok(state.map(|mut state| {
            if !state.is_consistent() {
                tracing::warn!("Persisted pagination state was inconsistent, repairing");
                state.repair();
            }
            state
        }))
    }

    pub async fn save(&self, state: &PaginationState) -> Result<(), PersistenceError> {
        set_json(self.store.as_ref(), STATE_KEY, state).await
    }

    pub async fn clear(&self) -> Result<(), PersistenceError> {
        self.store.remove(STATE_KEY).await
    }

    /// Start a new run on page 1
    ///
    /// Fails if a live run is already persisted; a stale one is replaced.
    pub async fn begin(
        &self,
        window: DateWindow,
        account_context: &str,
        range_label: &str,
    ) -> Result<PaginationState, EngineError> {
        if let Some(existing) = self.load().await? {
            if !existing.is_stale() {
                return Err(EngineError::AlreadyRunning(existing.current_page));
            }
            tracing::info!("Replacing stale pagination state");
            self.clear().await?;
        }

        let state = PaginationState::new(window, account_context, range_label);
        self.save(&state).await?;
        tracing::info!(
            account = account_context,
            start = %window.start,
            end = %window.end,
            "Pagination run started"
        );
        Ok(state)
    }

    /// Run one context lifetime against the currently loaded page
    pub async fn tick(
        &self,
        collector: &dyn PageCollector,
        navigator: &dyn Navigator,
    ) -> Result<TickOutcome, EngineError> {
        let Some(state) = self.load().await? else {
            return Ok(TickOutcome::Idle);
        };

        match state.phase() {
            Phase::Stale => {
                self.clear().await?;
                tracing::info!("Cleared stale pagination state");
                return Ok(TickOutcome::StaleCleared);
            }
            Phase::Complete => return Ok(TickOutcome::ReadyForHandoff(state)),
            Phase::Running => {}
        }

        let page_number = state.current_page;
        let page = match collector.extract().await {
            Ok(page) => page,
            Err(e) => {
                tracing::error!(page = page_number, "Page collection failed: {}", e);
                self.clear().await?;
                return Err(EngineError::Collection {
                    page: page_number,
                    message: e.to_string(),
                });
            }
        };

        let before = state.collected();
        let (state, action) = step(state, page, self.max_pages);
        let added = state.collected() - before;
        let collected = state.collected();
        tracing::debug!(page = page_number, added, collected, ?action, "Page absorbed");

        // Navigation destroys everything in memory, so the save must land first
        self.save(&state).await?;

        match action {
            NextAction::PersistAndNavigate(next) => {
                navigator
                    .go_to_page(next)
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
                Ok(TickOutcome::Navigated {
                    page: next,
                    added,
                    collected,
                })
            }
            NextAction::PersistAndComplete => {
                tracing::info!(collected, pages = page_number, "Collection complete");
                navigator
                    .reload()
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
                Ok(TickOutcome::Completed { added, collected })
            }
            NextAction::Handoff => Ok(TickOutcome::ReadyForHandoff(state)),
        }
    }

    /// Clear state after the queue accepted the collected items
    pub async fn finish(&self) -> Result<(), PersistenceError> {
        self.clear().await
    }

    /// Drop any persisted run. Returns whether there was one.
    pub async fn abort(&self) -> Result<bool, PersistenceError> {
        let existed = self.store.get(STATE_KEY).await?.is_some();
        if existed {
            self.clear().await?;
            tracing::info!("Pagination state cleared");
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::source::SourceError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn window() -> DateWindow {
        DateWindow::parse("2025-08-01", "2025-10-31").unwrap()
    }

    fn item(id: &str, d: &str) -> DownloadItem {
        DownloadItem::new(id, format!("/doc/{}", id), format!("{}.pdf", id)).with_date(date(d))
    }

    fn extraction(items: Vec<DownloadItem>, has_next_page: bool) -> PageExtraction {
        PageExtraction {
            earliest_date: items.iter().filter_map(|i| i.order_date).min(),
            items,
            has_next_page,
            total_pages: None,
        }
    }

    /// In-memory listing; navigation moves the cursor
    struct FakeListing {
        pages: HashMap<u32, PageExtraction>,
        current: Mutex<u32>,
        visited: Mutex<Vec<u32>>,
        fail_navigation: bool,
    }

    impl FakeListing {
        fn new(pages: Vec<PageExtraction>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| (i as u32 + 1, p))
                    .collect(),
                current: Mutex::new(1),
                visited: Mutex::new(vec![1]),
                fail_navigation: false,
            }
        }
    }

    #[async_trait]
    impl PageCollector for FakeListing {
        async fn extract(&self) -> Result<PageExtraction, SourceError> {
            let page = *self.current.lock().unwrap();
            self.pages
                .get(&page)
                .cloned()
                .ok_or_else(|| SourceError(format!("no page {}", page)))
        }
    }

    #[async_trait]
    impl Navigator for FakeListing {
        async fn go_to_page(&self, page: u32) -> Result<(), SourceError> {
            if self.fail_navigation {
                return Err(SourceError("tab closed".into()));
            }
            *self.current.lock().unwrap() = page;
            self.visited.lock().unwrap().push(page);
            Ok(())
        }

        async fn reload(&self) -> Result<(), SourceError> {
            Ok(())
        }
    }

    #[test]
    fn test_step_navigates_then_completes() {
        let state = PaginationState::new(window(), "DE", "");
        let (state, action) = step(
            state,
            extraction(vec![item("a", "2025-10-01")], true),
            DEFAULT_MAX_PAGES,
        );
        assert_eq!(action, NextAction::PersistAndNavigate(2));
        assert_eq!(state.current_page, 2);

        let (state, action) = step(
            state,
            extraction(vec![item("b", "2025-09-01")], false),
            DEFAULT_MAX_PAGES,
        );
        assert_eq!(action, NextAction::PersistAndComplete);
        assert!(state.is_complete);
        assert!(!state.is_running);
        assert_eq!(state.collected(), 2);

        let (_, action) = step(state, PageExtraction::default(), DEFAULT_MAX_PAGES);
        assert_eq!(action, NextAction::Handoff);
    }

    #[test]
    fn test_step_early_stop_keeps_in_window_items() {
        let state = PaginationState::new(window(), "DE", "");
        let (state, action) = step(
            state,
            extraction(vec![item("a", "2025-08-03"), item("b", "2025-07-20")], true),
            DEFAULT_MAX_PAGES,
        );

        assert_eq!(action, NextAction::PersistAndComplete);
        assert_eq!(state.collected(), 1);
        assert_eq!(state.collected_items[0].id, "a");
    }

    #[test]
    fn test_step_revisit_adds_nothing() {
        let page = extraction(vec![item("a", "2025-10-01"), item("b", "2025-10-02")], true);
        let state = PaginationState::new(window(), "DE", "");
        let (mut state, _) = step(state, page.clone(), DEFAULT_MAX_PAGES);
        state.current_page = 1;
        let (state, _) = step(state, page, DEFAULT_MAX_PAGES);

        assert_eq!(state.collected(), 2);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_step_max_pages_bound() {
        let mut state = PaginationState::new(window(), "DE", "");
        state.current_page = 3;
        let (_, action) = step(state, extraction(vec![], true), 3);
        assert_eq!(action, NextAction::PersistAndComplete);
    }

    #[tokio::test]
    async fn test_tick_without_state_is_idle() {
        let machine = PaginationMachine::new(Arc::new(MemoryStore::new()));
        let listing = FakeListing::new(vec![]);
        assert_eq!(
            machine.tick(&listing, &listing).await.unwrap(),
            TickOutcome::Idle
        );
    }

    #[tokio::test]
    async fn test_three_pages_stop_after_second() {
        let machine = PaginationMachine::new(Arc::new(MemoryStore::new()));
        let listing = FakeListing::new(vec![
            extraction(vec![item("a", "2025-10-20"), item("b", "2025-09-15")], true),
            extraction(vec![item("c", "2025-08-05"), item("d", "2025-07-28")], true),
            extraction(vec![item("e", "2025-07-01")], false),
        ]);
        machine.begin(window(), "DE", "").await.unwrap();

        let mut ticks = 0;
        let state = loop {
            ticks += 1;
            match machine.tick(&listing, &listing).await.unwrap() {
                TickOutcome::ReadyForHandoff(state) => break state,
                outcome => assert!(outcome.needs_another_tick()),
            }
        };

        assert_eq!(ticks, 3);
        assert!(state.is_complete);
        assert_eq!(state.last_page, Some(2));
        let ids: Vec<_> = state.collected_items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(*listing.visited.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_stale_state_cleared_not_resumed() {
        let store = Arc::new(MemoryStore::new());
        let machine = PaginationMachine::new(store.clone());
        let mut stale = PaginationState::new(window(), "DE", "");
        stale.is_running = false;
        machine.save(&stale).await.unwrap();

        let listing = FakeListing::new(vec![extraction(vec![item("a", "2025-10-01")], false)]);
        assert_eq!(
            machine.tick(&listing, &listing).await.unwrap(),
            TickOutcome::StaleCleared
        );
        assert!(machine.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_begin_refuses_live_run() {
        let machine = PaginationMachine::new(Arc::new(MemoryStore::new()));
        machine.begin(window(), "DE", "").await.unwrap();
        assert!(matches!(
            machine.begin(window(), "DE", "").await,
            Err(EngineError::AlreadyRunning(1))
        ));
    }

    #[tokio::test]
    async fn test_persist_failure_blocks_navigation() {
        let store = Arc::new(MemoryStore::new());
        let machine = PaginationMachine::new(store.clone());
        machine.begin(window(), "DE", "").await.unwrap();
        store.set_fail_writes(true);

        let listing = FakeListing::new(vec![
            extraction(vec![item("a", "2025-10-01")], true),
            extraction(vec![], false),
        ]);
        let result = machine.tick(&listing, &listing).await;

        assert!(matches!(result, Err(EngineError::Persistence(_))));
        assert_eq!(*listing.visited.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_collection_failure_clears_state() {
        let machine = PaginationMachine::new(Arc::new(MemoryStore::new()));
        machine.begin(window(), "DE", "").await.unwrap();
        let listing = FakeListing::new(vec![]);

        let result = machine.tick(&listing, &listing).await;

        assert!(matches!(result, Err(EngineError::Collection { page: 1, .. })));
        assert!(machine.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_navigation_failure_keeps_saved_state() {
        let machine = PaginationMachine::new(Arc::new(MemoryStore::new()));
        machine.begin(window(), "DE", "").await.unwrap();
        let mut listing = FakeListing::new(vec![extraction(vec![item("a", "2025-10-01")], true)]);
        listing.fail_navigation = true;

        let result = machine.tick(&listing, &listing).await;

        assert!(matches!(result, Err(EngineError::Navigation(_))));
        let saved = machine.load().await.unwrap().unwrap();
        assert_eq!(saved.current_page, 2);
        assert_eq!(saved.collected(), 1);
    }
}
