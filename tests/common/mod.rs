#![allow(dead_code)]

use invoice_grabber::download::queue::QueueConfig;
use invoice_grabber::download::transfer::HttpTransfer;
use invoice_grabber::engine::{EngineSettings, Orchestrator};
use invoice_grabber::pagination::PageDirectory;
use invoice_grabber::store::{FileStore, KeyValueStore};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Initialize logging once for all tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// One listing row: (order id, order date)
pub type Row<'a> = (&'a str, &'a str);

/// Write `page-{n:03}.json` with rows pointing at `/doc/{id}`
///
/// `has_next_page` is left out when `None`, so the directory decides.
pub fn write_page(dir: &Path, page: u32, rows: &[Row<'_>], has_next_page: Option<bool>) {
    let items: Vec<_> = rows
        .iter()
        .map(|(id, date)| {
            json!({
                "id": id,
                "source_location": format!("/doc/{}", id),
                "order_date": date,
            })
        })
        .collect();
    let mut page_json = json!({ "items": items });
    if let Some(next) = has_next_page {
        page_json["has_next_page"] = json!(next);
    }
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join(format!("page-{:03}.json", page)),
        serde_json::to_string_pretty(&page_json).unwrap(),
    )
    .unwrap();
}

/// Three listing pages, newest first; page 2 reaches before August
pub fn write_quarter_listing(dir: &Path) {
    write_page(
        dir,
        1,
        &[("302-1", "2025-11-03"), ("302-2", "2025-10-20"), ("302-3", "2025-09-15")],
        None,
    );
    write_page(dir, 2, &[("302-4", "2025-08-10"), ("302-5", "2025-07-28")], None);
    write_page(dir, 3, &[("302-6", "2025-06-01")], None);
}

/// Queue settings with no pacing so tests finish quickly
pub fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        max_concurrent: 2,
        inter_item_delay: Duration::ZERO,
        per_minute_throttle: 0,
        max_retries: 0,
        retry_delay: Duration::ZERO,
        pause_on_error: false,
        retry_failed: false,
    }
}

pub fn test_settings(root: &Path) -> EngineSettings {
    EngineSettings {
        marketplace: "DE".to_string(),
        download_root: root.join("downloads"),
        queue: fast_queue_config(),
        adaptive: false,
        logs_dir: Some(root.join("logs")),
        history_path: Some(root.join("history.toml")),
        ..EngineSettings::default()
    }
}

pub fn state_store(root: &Path) -> Arc<dyn KeyValueStore> {
    Arc::new(FileStore::new(root.join("state.json")))
}

/// Engine over a file store in `root`, fetching documents from `server`
pub fn build_engine(root: &Path, server: &MockServer, pages: Option<PageDirectory>) -> Orchestrator {
    let transfer = HttpTransfer::new()
        .unwrap()
        .with_base_url(&server.uri())
        .unwrap();
    let engine = Orchestrator::new(test_settings(root), state_store(root), Arc::new(transfer));
    match pages {
        Some(pages) => engine.with_pages(Arc::new(pages)),
        None => engine,
    }
}

/// Serve `/doc/{id}` for every id; ids in `missing` answer 404
pub async fn setup_document_server(ids: &[&str], missing: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    for id in ids {
        let response = if missing.contains(id) {
            ResponseTemplate::new(404)
        } else {
            ResponseTemplate::new(200)
                .set_body_bytes(format!("%PDF-1.4 invoice {}", id).into_bytes())
                .append_header("Content-Type", "application/pdf")
        };
        Mock::given(method("GET"))
            .and(path(format!("/doc/{}", id)))
            .respond_with(response)
            .mount(&server)
            .await;
    }
    server
}

/// Expected location of a document for session 1 of the Aug-Oct window
pub fn session_file(root: &Path, label: &str, month: &str, id: &str) -> PathBuf {
    let session = if label.is_empty() {
        "Session_001_2025-08-01_to_2025-10-31".to_string()
    } else {
        format!("Session_001_2025-08-01_to_2025-10-31_{}", label)
    };
    root.join("downloads")
        .join("Amazon_Invoices")
        .join("Amazon-DE")
        .join(session)
        .join(month)
        .join(format!("Invoice_{}.pdf", id))
}
