//! Durable pagination state
//!
//! The only state that survives a context teardown. It is written to the
//! key-value store before every navigation and read back on the next start.

use crate::download::errors::EngineError;
use crate::download::item::DownloadItem;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Store key holding the serialized `PaginationState`
pub const STATE_KEY: &str = "pagination_state";

/// Inclusive order-date window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::InvalidWindow(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse two `YYYY-MM-DD` strings
    pub fn parse(start: &str, end: &str) -> Result<Self, EngineError> {
        let parse = |value: &str| {
            NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .map_err(|e| EngineError::InvalidWindow(format!("'{}': {}", value, e)))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Undated items cannot be judged and are kept
    pub fn admits(&self, item: &DownloadItem) -> bool {
        item.order_date.is_none_or(|d| self.contains(d))
    }
}

/// Where a persisted state sits in the collection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Complete,
    /// Neither running nor complete and nothing collected; never resumed
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationState {
    /// Page the hosting context is showing (or about to show after a reload)
    pub current_page: u32,
    #[serde(default)]
    pub total_pages: Option<u32>,
    /// Last page whose items were absorbed
    #[serde(default)]
    pub last_page: Option<u32>,
    pub collected_items: Vec<DownloadItem>,
    pub collected_ids: BTreeSet<String>,
    pub is_running: bool,
    pub is_complete: bool,
    pub window: DateWindow,
    /// Opaque account/marketplace key the run belongs to
    pub account_context: String,
    #[serde(default)]
    pub range_label: String,
    pub started_at: DateTime<Utc>,
}

impl PaginationState {
    /// Fresh running state positioned on the first page
    pub fn new(
        window: DateWindow,
        account_context: impl Into<String>,
        range_label: impl Into<String>,
    ) -> Self {
        Self {
            current_page: 1,
            total_pages: None,
            last_page: None,
            collected_items: Vec::new(),
            collected_ids: BTreeSet::new(),
            is_running: true,
            is_complete: false,
            window,
            account_context: account_context.into(),
            range_label: range_label.into(),
            started_at: Utc::now(),
        }
    }

    pub fn phase(&self) -> Phase {
        if self.is_complete {
            Phase::Complete
        } else if self.is_running {
            Phase::Running
        } else if self.collected_items.is_empty() {
            Phase::Stale
        } else {
            // Items but no run flag: finish with what we have
            Phase::Complete
        }
    }

    pub fn is_stale(&self) -> bool {
        self.phase() == Phase::Stale
    }

    /// Append new in-window items, returning how many were added
    ///
    /// Keeps `collected_ids` equal to the set of ids in `collected_items`.
    pub fn absorb(&mut self, items: impl IntoIterator<Item = DownloadItem>) -> usize {
        let mut added = 0;
        for mut item in items {
            if !self.window.admits(&item) {
                continue;
            }
            if !self.collected_ids.insert(item.id.clone()) {
                continue;
            }
            item.sequence_index = self.collected_items.len();
            item.retry_count = 0;
            self.collected_items.push(item);
            added += 1;
        }
        added
    }

    pub fn collected(&self) -> usize {
        self.collected_items.len()
    }

    /// Check the ids invariant; used when loading untrusted state
    pub fn is_consistent(&self) -> bool {
        self.collected_ids.len() == self.collected_items.len()
            && self
                .collected_items
                .iter()
                .all(|item| self.collected_ids.contains(&item.id))
    }

    /// Rebuild `collected_ids` and drop duplicate items
    pub fn repair(&mut self) {
        let mut seen = BTreeSet::new();
        self.collected_items.retain(|item| seen.insert(item.id.clone()));
        for (index, item) in self.collected_items.iter_mut().enumerate() {
            item.sequence_index = index;
        }
        self.collected_ids = seen;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn window() -> DateWindow {
        DateWindow::parse("2025-08-01", "2025-10-31").unwrap()
    }

    fn item(id: &str, d: Option<&str>) -> DownloadItem {
        let item = DownloadItem::new(id, format!("/doc/{}", id), format!("{}.pdf", id));
        match d {
            Some(d) => item.with_date(date(d)),
            None => item,
        }
    }

    #[test]
    fn test_window_rejects_inverted() {
        assert!(matches!(
            DateWindow::parse("2025-10-31", "2025-08-01"),
            Err(EngineError::InvalidWindow(_))
        ));
        assert!(DateWindow::parse("2025-13-01", "2025-12-01").is_err());
    }

    #[test]
    fn test_window_is_inclusive() {
        let w = window();
        assert!(w.contains(date("2025-08-01")));
        assert!(w.contains(date("2025-10-31")));
        assert!(!w.contains(date("2025-07-31")));
    }

    #[test]
    fn test_absorb_filters_duplicates_and_window() {
        let mut state = PaginationState::new(window(), "DE", "");
        let added = state.absorb(vec![
            item("a", Some("2025-09-01")),
            item("b", Some("2025-07-01")),
            item("c", None),
            item("a", Some("2025-09-01")),
        ]);

        assert_eq!(added, 2);
        assert_eq!(state.collected(), 2);
        assert_eq!(state.collected_items[1].id, "c");
        assert_eq!(state.collected_items[1].sequence_index, 1);
        assert!(state.is_consistent());

        assert_eq!(state.absorb(vec![item("a", Some("2025-09-01"))]), 0);
    }

    #[test]
    fn test_phases() {
        let mut state = PaginationState::new(window(), "DE", "");
        assert_eq!(state.phase(), Phase::Running);

        state.is_running = false;
        assert!(state.is_stale());

        state.absorb(vec![item("a", None)]);
        assert_eq!(state.phase(), Phase::Complete);

        state.is_complete = true;
        assert_eq!(state.phase(), Phase::Complete);
    }

    #[test]
    fn test_repair_restores_invariant() {
        let mut state = PaginationState::new(window(), "DE", "");
        state.collected_items = vec![item("a", None), item("a", None), item("b", None)];
        assert!(!state.is_consistent());

        state.repair();

        assert!(state.is_consistent());
        assert_eq!(state.collected(), 2);
        assert_eq!(state.collected_items[1].sequence_index, 1);
    }

    #[test]
    fn test_state_serde() {
        let mut state = PaginationState::new(window(), "DE", "Q1");
        state.absorb(vec![item("a", Some("2025-09-01"))]);

        let value = serde_json::to_value(&state).unwrap();
        let back: PaginationState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }
}
