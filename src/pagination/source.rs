//! Page collection and navigation collaborators
//!
//! `PageDirectory` is a host for offline runs: each `page-NNN.json` file in a
//! directory stands in for one listing page, and navigating just moves the
//! cursor that the next context lifetime will read.

use super::machine::PageExtraction;
use crate::download::item::DownloadItem;
use crate::session::naming::document_file_name;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Failure reported by a page source
#[derive(Error, Debug)]
#[error("{0}")]
pub struct SourceError(pub String);

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

#[async_trait]
pub trait PageCollector: Send + Sync {
    /// Extract candidates from the currently loaded listing page
    async fn extract(&self) -> Result<PageExtraction, SourceError>;
}

/// Both operations destroy and recreate the executing context
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn go_to_page(&self, page: u32) -> Result<(), SourceError>;
    async fn reload(&self) -> Result<(), SourceError>;
}

/// One order row as written in a page file
#[derive(Debug, Clone, Deserialize)]
pub struct PageEntry {
    pub id: String,
    #[serde(default)]
    pub source_location: String,
    #[serde(default)]
    pub destination_name: Option<String>,
    #[serde(default)]
    pub order_date: Option<NaiveDate>,
}

impl From<PageEntry> for DownloadItem {
    fn from(entry: PageEntry) -> Self {
        let name = entry
            .destination_name
            .unwrap_or_else(|| document_file_name(&entry.id));
        let mut item = DownloadItem::new(entry.id, entry.source_location, name);
        item.order_date = entry.order_date;
        item
    }
}

#[derive(Debug, Deserialize)]
struct PageFile {
    #[serde(default)]
    items: Vec<PageEntry>,
    /// Defaults to whether the next page file exists
    #[serde(default)]
    has_next_page: Option<bool>,
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Default)]
struct Cursor {
    page: u32,
    /// Pages visited through `go_to_page`, in order
    visited: Vec<u32>,
    reloads: u32,
}

/// Directory of `page-001.json`, `page-002.json`, ...
#[derive(Debug)]
pub struct PageDirectory {
    dir: PathBuf,
    cursor: Mutex<Cursor>,
}

impl PageDirectory {
    /// Open a context showing `page`
    pub fn open(dir: impl Into<PathBuf>, page: u32) -> Self {
        Self {
            dir: dir.into(),
            cursor: Mutex::new(Cursor {
                page,
                ..Cursor::default()
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn page_path(&self, page: u32) -> PathBuf {
        self.dir.join(format!("page-{:03}.json", page))
    }

    fn cursor(&self) -> std::sync::MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current_page(&self) -> u32 {
        self.cursor().page
    }

    pub fn visited(&self) -> Vec<u32> {
        self.cursor().visited.clone()
    }

    pub fn reloads(&self) -> u32 {
        self.cursor().reloads
    }

    /// Number of consecutive page files starting at page 1
    pub fn page_count(&self) -> u32 {
        let mut count = 0;
        while self.page_path(count + 1).exists() {
            count += 1;
        }
        count
    }
}

#[async_trait]
impl PageCollector for PageDirectory {
    async fn extract(&self) -> Result<PageExtraction, SourceError> {
        let page = self.current_page();
        let path = self.page_path(page);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SourceError(format!("{}: {}", path.display(), e)))?;
        let file: PageFile = serde_json::from_str(&content)?;

        let has_next_page = match file.has_next_page {
            Some(next) => next,
            None => tokio::fs::try_exists(self.page_path(page + 1)).await?,
        };
        let items: Vec<DownloadItem> = file.items.into_iter().map(DownloadItem::from).collect();
        tracing::trace!(page, items = items.len(), has_next_page, "Extracted page file");

        Ok(PageExtraction {
            earliest_date: items.iter().filter_map(|i| i.order_date).min(),
            items,
            has_next_page,
            total_pages: file.total_pages,
        })
    }
}

#[async_trait]
impl Navigator for PageDirectory {
    async fn go_to_page(&self, page: u32) -> Result<(), SourceError> {
        if page == 0 {
            return Err(SourceError("Page numbers start at 1".to_string()));
        }
        let mut cursor = self.cursor();
        cursor.page = page;
        cursor.visited.push(page);
        Ok(())
    }

    async fn reload(&self) -> Result<(), SourceError> {
        self.cursor().reloads += 1;
        Ok(())
    }
}
