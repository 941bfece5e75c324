mod common;

use common::*;
use invoice_grabber::download::completion_log;
use invoice_grabber::download::history::{SessionHistory, SessionStatus};
use invoice_grabber::engine::{EngineRequest, EngineResponse};
use invoice_grabber::pagination::{DateWindow, PageDirectory, PaginationMachine, PaginationState, TickOutcome};
use pretty_assertions::assert_eq;

fn start_request(label: &str) -> EngineRequest {
    EngineRequest::StartCollection {
        window: DateWindow::parse("2025-08-01", "2025-10-31").unwrap(),
        range_label: label.to_string(),
    }
}

#[tokio::test]
async fn test_collect_and_download_quarter() {
    init_logging();
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let listing = root.join("pages");
    write_quarter_listing(&listing);
    let server = setup_document_server(&["302-2", "302-3", "302-4"], &[]).await;

    let engine = build_engine(root, &server, Some(PageDirectory::open(&listing, 1)));
    engine.handle(start_request("Q1")).await.unwrap();
    let response = engine.drive().await.unwrap();

    let EngineResponse::SessionFinished(record) = response else {
        panic!("expected a finished session, got {:?}", response);
    };
    assert_eq!(record.session_number, 1);
    assert_eq!(record.status, SessionStatus::Success);
    assert_eq!((record.total, record.completed, record.failed), (3, 3, 0));
    assert_eq!(record.profile.as_deref(), Some("fixed"));

    let october = session_file(root, "Q1", "2025-10_October", "302-2");
    assert_eq!(
        std::fs::read(&october).unwrap(),
        b"%PDF-1.4 invoice 302-2".to_vec()
    );
    assert!(session_file(root, "Q1", "2025-09_September", "302-3").exists());
    assert!(session_file(root, "Q1", "2025-08_August", "302-4").exists());

    // Out-of-window rows were never requested
    let requested: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(requested.len(), 3);
    assert!(!requested.contains(&"/doc/302-1".to_string()));

    // Hand-off cleared the run
    let machine = PaginationMachine::new(state_store(root));
    assert!(machine.load().await.unwrap().is_none());

    let history = SessionHistory::load(root.join("history.toml")).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history.latest().unwrap().range_label, "Q1");
}

#[tokio::test]
async fn test_partial_failure_is_recorded() {
    init_logging();
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let listing = root.join("pages");
    write_page(
        &listing,
        1,
        &[
            ("x1", "2025-10-01"),
            ("x2", "2025-10-01"),
            ("x3", "2025-09-01"),
            ("x4", "2025-09-01"),
            ("x5", "2025-08-01"),
        ],
        Some(false),
    );
    let server = setup_document_server(&["x1", "x2", "x3", "x4", "x5"], &["x2", "x4"]).await;

    let engine = build_engine(root, &server, Some(PageDirectory::open(&listing, 1)));
    engine.handle(start_request("")).await.unwrap();
    let EngineResponse::SessionFinished(record) = engine.drive().await.unwrap() else {
        panic!("expected a finished session");
    };

    assert_eq!(record.status, SessionStatus::PartialSuccess);
    assert_eq!((record.total, record.completed, record.failed), (5, 3, 2));
    assert!(!session_file(root, "", "2025-10_October", "x2").exists());
    assert!(session_file(root, "", "2025-10_October", "x1").exists());

    let log_path = completion_log::log_file_for_today(&root.join("logs"));
    let entries = completion_log::read_entries(&log_path).unwrap();
    assert_eq!(entries.len(), 5);
    let mut failed: Vec<&str> = entries
        .iter()
        .filter(|e| e.status == "failed")
        .map(|e| e.item_id.as_str())
        .collect();
    failed.sort();
    assert_eq!(failed, vec!["x2", "x4"]);
    assert!(entries.iter().all(|e| e.session_number == 1));
}

#[tokio::test]
async fn test_resume_in_a_new_process() {
    init_logging();
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let listing = root.join("pages");
    write_quarter_listing(&listing);
    let server = setup_document_server(&["302-2", "302-3", "302-4"], &[]).await;

    {
        let engine = build_engine(root, &server, Some(PageDirectory::open(&listing, 1)));
        engine.handle(start_request("")).await.unwrap();
        let response = engine.handle(EngineRequest::ResumeCollection).await.unwrap();
        assert!(matches!(
            response,
            EngineResponse::Collecting(TickOutcome::Navigated { page: 2, .. })
        ));
    }

    let persisted = PaginationMachine::new(state_store(root))
        .load()
        .await
        .unwrap()
        .unwrap();
    let engine = build_engine(
        root,
        &server,
        Some(PageDirectory::open(&listing, persisted.current_page)),
    );
    let EngineResponse::SessionFinished(record) = engine.drive().await.unwrap() else {
        panic!("expected a finished session");
    };

    assert_eq!((record.total, record.completed), (3, 3));
    assert!(session_file(root, "", "2025-08_August", "302-4").exists());
}

#[tokio::test]
async fn test_completed_run_hands_off_without_pages() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let listing = root.join("pages");
    write_page(&listing, 1, &[("c1", "2025-09-09")], Some(false));
    let server = setup_document_server(&["c1"], &[]).await;

    {
        let engine = build_engine(root, &server, Some(PageDirectory::open(&listing, 1)));
        engine.handle(start_request("")).await.unwrap();
        let response = engine.handle(EngineRequest::ResumeCollection).await.unwrap();
        assert!(matches!(
            response,
            EngineResponse::Collecting(TickOutcome::Completed { collected: 1, .. })
        ));
    }

    let engine = build_engine(root, &server, None);
    let EngineResponse::SessionFinished(record) = engine.drive().await.unwrap() else {
        panic!("expected a finished session");
    };
    assert_eq!(record.status, SessionStatus::Success);
}

#[tokio::test]
async fn test_stale_state_is_discarded_on_resume() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let server = setup_document_server(&[], &[]).await;

    let machine = PaginationMachine::new(state_store(root));
    let mut state = PaginationState::new(
        DateWindow::parse("2025-08-01", "2025-10-31").unwrap(),
        "DE",
        "",
    );
    state.is_running = false;
    machine.save(&state).await.unwrap();

    let engine = build_engine(root, &server, None);
    assert_eq!(engine.drive().await.unwrap(), EngineResponse::StaleCleared);
    assert!(machine.load().await.unwrap().is_none());
    assert_eq!(engine.drive().await.unwrap(), EngineResponse::Idle);
}

#[tokio::test]
async fn test_session_numbers_increase_per_run() {
    let temp_dir = tempfile::tempdir().unwrap();
    let root = temp_dir.path();
    let listing = root.join("pages");
    write_page(&listing, 1, &[("s1", "2025-09-09")], Some(false));
    let server = setup_document_server(&["s1"], &[]).await;

    for expected in 1..=2u32 {
        let engine = build_engine(root, &server, Some(PageDirectory::open(&listing, 1)));
        engine.handle(start_request("")).await.unwrap();
        let EngineResponse::SessionFinished(record) = engine.drive().await.unwrap() else {
            panic!("expected a finished session");
        };
        assert_eq!(record.session_number, expected);
    }

    let engine = build_engine(root, &server, None);
    let EngineResponse::History(records) = engine.handle(EngineRequest::History).await.unwrap() else {
        panic!("expected history");
    };
    let numbers: Vec<u32> = records.iter().map(|r| r.session_number).collect();
    assert_eq!(numbers, vec![1, 2]);

    let EngineResponse::Status(status) = engine.handle(EngineRequest::Status).await.unwrap() else {
        panic!("expected status");
    };
    assert_eq!(status.last_session, 2);
    assert!(status.pagination.is_none());
}
