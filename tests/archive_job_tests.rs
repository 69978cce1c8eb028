//! Integration tests for the archive metered events job

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{FlakyStore, RecordingArchive};
use service_broker_operator::crd::{Resource, ResourceKind, ResourceState, METERED_STATE};
use service_broker_operator::jobs::{
    ArchiveJobSettings, ArchiveMeteredEventsJob, ArchiveRunSummary, FileArchiveStore,
};
use service_broker_operator::store::{InMemoryStore, ResourceStore};

// ============================================================================
// Test Helpers
// ============================================================================

fn settings(events_to_patch: usize) -> ArchiveJobSettings {
    ArchiveJobSettings {
        events_to_patch,
        sleep_duration: Duration::ZERO,
        delete_attempts: 4,
        delete_min_delay: Duration::from_millis(1),
    }
}

fn add_events(store: &InMemoryStore, count: usize, state: &str) {
    for i in 0..count {
        let name = format!("{}-event-{}", state.to_lowercase(), i);
        store.insert(
            ResourceKind::SFEVENT,
            Resource::new(&name, &json!({"id": name}), ResourceState::Succeeded)
                .with_label("state", state),
        );
    }
}

fn job(
    store: Arc<dyn ResourceStore>,
    archive: Arc<RecordingArchive>,
    settings: ArchiveJobSettings,
) -> ArchiveMeteredEventsJob {
    ArchiveMeteredEventsJob::new(store, archive, settings)
}

// ============================================================================
// Batch Tests
// ============================================================================

#[tokio::test]
async fn test_no_metered_events_opens_no_file() {
    let store = Arc::new(InMemoryStore::new());
    add_events(&store, 2, "PENDING");
    let archive = Arc::new(RecordingArchive::default());

    let summary = job(store.clone(), archive.clone(), settings(10))
        .run()
        .await
        .unwrap();

    assert_eq!(summary, ArchiveRunSummary::default());
    assert!(archive.files.lock().unwrap().is_empty());
    assert_eq!(store.count(ResourceKind::SFEVENT), 2);
}

#[tokio::test]
async fn test_only_metered_events_are_archived() {
    let store = Arc::new(InMemoryStore::new());
    add_events(&store, 2, METERED_STATE);
    add_events(&store, 3, "PENDING");
    let archive = Arc::new(RecordingArchive::default());

    let summary = job(store.clone(), archive.clone(), settings(10))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.found, 2);
    assert_eq!(summary.archived, 2);
    assert_eq!(archive.files.lock().unwrap().len(), 1);
    assert_eq!(
        *archive.events.lock().unwrap(),
        vec!["metered-event-0", "metered-event-1"]
    );
    assert_eq!(store.count(ResourceKind::SFEVENT), 3);
}

#[tokio::test]
async fn test_batch_is_capped() {
    let store = Arc::new(InMemoryStore::new());
    add_events(&store, 5, METERED_STATE);
    let archive = Arc::new(RecordingArchive::default());

    let summary = job(store.clone(), archive.clone(), settings(3))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.found, 5);
    assert_eq!(summary.archived, 3);
    assert_eq!(archive.events.lock().unwrap().len(), 3);
    assert_eq!(store.count(ResourceKind::SFEVENT), 2);
}

#[tokio::test]
async fn test_failed_archive_file_aborts_run() {
    let store = Arc::new(InMemoryStore::new());
    add_events(&store, 2, METERED_STATE);
    let archive = Arc::new(RecordingArchive {
        fail_open: true,
        ..Default::default()
    });

    let result = job(store.clone(), archive.clone(), settings(10)).run().await;

    assert!(result.is_err());
    assert!(archive.events.lock().unwrap().is_empty());
    assert_eq!(store.count(ResourceKind::SFEVENT), 2);
}

// ============================================================================
// Delete Retry Tests
// ============================================================================

#[tokio::test]
async fn test_delete_succeeds_on_last_attempt() {
    let inner = Arc::new(InMemoryStore::new());
    add_events(&inner, 1, METERED_STATE);
    let store = Arc::new(FlakyStore::failing_deletes(inner.clone(), 3));
    let archive = Arc::new(RecordingArchive::default());

    let summary = job(store.clone(), archive, settings(10)).run().await.unwrap();

    assert_eq!(summary.archived, 1);
    assert_eq!(store.delete_calls.load(Ordering::SeqCst), 4);
    assert_eq!(inner.count(ResourceKind::SFEVENT), 0);
}

#[tokio::test]
async fn test_delete_exhausting_attempts_fails_run() {
    let inner = Arc::new(InMemoryStore::new());
    add_events(&inner, 2, METERED_STATE);
    let store = Arc::new(FlakyStore::failing_deletes(inner.clone(), 4));
    let archive = Arc::new(RecordingArchive::default());

    let result = job(store.clone(), archive.clone(), settings(10)).run().await;

    assert!(result.is_err());
    assert_eq!(store.delete_calls.load(Ordering::SeqCst), 4);
    assert_eq!(archive.events.lock().unwrap().len(), 1);
    assert_eq!(inner.count(ResourceKind::SFEVENT), 2);
}

// ============================================================================
// File Archive Tests
// ============================================================================

#[tokio::test]
async fn test_run_writes_archive_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    add_events(&store, 2, METERED_STATE);
    let archive = Arc::new(FileArchiveStore::new(dir.path()));

    let summary = ArchiveMeteredEventsJob::new(store, archive.clone(), settings(10))
        .run()
        .await
        .unwrap();

    let timestamp = summary.archive_file.unwrap();
    let contents = std::fs::read_to_string(archive.archive_path(&timestamp)).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("metered-event-0"));
}
