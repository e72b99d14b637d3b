//! Reconciliation scenarios over ingest, reducer and the tracker task.

mod common;

use std::time::Duration;

use certdesk::tracking::{
    ingest, reduce, BulkOutcome, IngestDiagnostic, TaskStatus, Tracker, TrackerState,
};
use common::*;

fn tracked_state(keys: &[&str], response: certdesk::api::BatchStartResponse) -> TrackerState {
    let mut state = TrackerState::new();
    let generation = state.begin_batch();
    assert!(state.ingest(generation, ingest(&rows(keys), &response)));
    state
}

#[test]
fn test_end_to_end_batch_scenario() {
    let mut state = tracked_state(
        &["R001", "R002", "R003"],
        start_response_with_assignments("batch-7", &[(1, "t1"), (2, "t2"), (3, "t3")]),
    );

    assert_eq!(state.task_count(), 3);
    assert!(state.tasks().iter().all(|t| t.status == TaskStatus::Queued));
    let progress = state.progress();
    assert_eq!((progress.total, progress.processed), (3, 0));

    state = reduce(state, &event("t1", TaskStatus::Processing));
    assert_eq!(state.progress().processed, 0);
    assert_eq!(state.progress().success, 0);

    state = reduce(state, &event("t1", TaskStatus::Success).with_hash("0xabc"));
    assert_eq!(state.progress().processed, 1);
    assert_eq!(state.progress().success, 1);
    assert_eq!(state.task("t1").unwrap().hash.as_deref(), Some("0xabc"));

    state = reduce(state, &event("t1", TaskStatus::Success));
    assert_eq!(state.progress().processed, 1);
    assert_eq!(state.progress().success, 1);
    assert_eq!(state.task("t1").unwrap().hash.as_deref(), Some("0xabc"));

    state = reduce(state, &event("t2", TaskStatus::Failed).with_error("E1"));
    let progress = state.progress();
    assert_eq!(progress.processed, 2);
    assert_eq!(progress.failed, 1);
    assert_eq!(state.task("t2").unwrap().error.as_deref(), Some("E1"));
    assert_eq!(state.progress_view().percentage, 67);
}

#[test]
fn test_repeated_terminal_counts_once() {
    let mut state = tracked_state(&["R001"], start_response("b1", &["b1-R001"]));

    for _ in 0..5 {
        state.apply(&event("b1-R001", TaskStatus::Failed).with_error("gas"));
    }
    let progress = state.progress();
    assert_eq!((progress.processed, progress.failed, progress.success), (1, 1, 0));
    assert_eq!(state.diagnostics().repeated_terminal, 4);

    // Server-side retry that later succeeds is still one processed task
    state.apply(&event("b1-R001", TaskStatus::RetryQueued));
    state.apply(&event("b1-R001", TaskStatus::Success));
    assert_eq!(state.progress().processed, 1);
    assert_eq!(state.task("b1-R001").unwrap().status, TaskStatus::Success);
}

#[test]
fn test_sticky_hashes_and_error_clearing() {
    let mut state = tracked_state(&["R001"], start_response("b1", &["b1-R001"]));

    state.apply(
        &event("b1-R001", TaskStatus::RetryQueued)
            .with_hash("0xaaa")
            .with_error("nonce too low"),
    );
    state.apply(&event("b1-R001", TaskStatus::Processing).with_tx_hash("0xtx1"));

    let record = state.task("b1-R001").unwrap();
    assert_eq!(record.hash.as_deref(), Some("0xaaa"));
    assert_eq!(record.tx_hash.as_deref(), Some("0xtx1"));
    assert_eq!(record.error, None);

    state.apply(&event("b1-R001", TaskStatus::Processing).with_hash("0xbbb"));
    assert_eq!(state.task("b1-R001").unwrap().hash.as_deref(), Some("0xbbb"));
}

#[test]
fn test_correlation_by_suffix() {
    let state = tracked_state(
        &["R001", "R002"],
        start_response("batch1", &["batch1-R002", "batch1-R001"]),
    );

    let tasks = state.tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].task_id, "batch1-R001");
    assert_eq!(tasks[0].row.roll_no, "R001");
    assert_eq!(tasks[1].task_id, "batch1-R002");
    assert_eq!(tasks[1].row_number, 2);
}

#[test]
fn test_unmatched_row_is_not_tracked() {
    let state = tracked_state(&["R001", "R999"], start_response("batch1", &["batch1-R001"]));

    assert_eq!(state.task_count(), 1);
    assert!(state.task("batch1-R001").is_some());
    assert!(state.ingest_diagnostics().iter().any(|d| matches!(
        d,
        IngestDiagnostic::UnmatchedRow { roll_no, .. } if roll_no == "R999"
    )));
}

#[test]
fn test_batch_with_unmatched_id_can_complete() {
    let mut state = tracked_state(&["R001"], start_response("b", &["b-R001", "b-ORPHAN"]));
    assert_eq!(state.progress().total, 1);

    state.apply(&event("b-R001", TaskStatus::Success));
    state.apply(&event("b-ORPHAN", TaskStatus::Success));

    let view = state.progress_view();
    assert_eq!((view.total, view.processed), (1, 1));
    assert_eq!(view.percentage, 100);
    assert!(view.is_complete());
    assert_eq!(state.diagnostics().dropped_unknown, 1);
}

#[test]
fn test_progress_is_monotonic() {
    let keys = ["R001", "R002", "R003", "R004"];
    let ids: Vec<String> = keys.iter().map(|k| format!("b-{}", k)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut state = tracked_state(&keys, start_response("b", &id_refs));

    let script = [
        ("b-R001", TaskStatus::Processing),
        ("b-R002", TaskStatus::Failed),
        ("b-R001", TaskStatus::Success),
        ("b-R002", TaskStatus::RetryQueued),
        ("ghost", TaskStatus::Success),
        ("b-R003", TaskStatus::WaitingWallet),
        ("b-R002", TaskStatus::Success),
        ("b-R004", TaskStatus::Success),
        ("b-R001", TaskStatus::Failed),
        ("b-R003", TaskStatus::Failed),
    ];

    let mut previous = state.progress();
    for (task_id, status) in script {
        state.apply(&event(task_id, status));
        let now = state.progress();
        assert!(now.processed >= previous.processed);
        assert!(now.success >= previous.success);
        assert!(now.failed >= previous.failed);
        assert_eq!(now.processed, now.success + now.failed);
        assert!(now.processed <= now.total);
        previous = now;
    }
    assert_eq!(previous.processed, 4);
    assert!(state.progress_view().is_complete());
    assert_eq!(state.diagnostics().dropped_unknown, 1);
}

#[test]
fn test_single_and_bulk_are_isolated() {
    let mut state = tracked_state(&["R001"], start_response("b1", &["b1-R001"]));
    state.track_single("single-42");

    let applied = state.apply(
        &event("single-42", TaskStatus::Success)
            .with_hash("0xfeed")
            .with_tx_hash("0x1234567890abcdef"),
    );
    assert!(applied.single_updated);
    assert_eq!(applied.bulk, BulkOutcome::NotTracked);
    assert_eq!(state.progress().processed, 0);
    assert_eq!(state.diagnostics().dropped_unknown, 0);

    let single = state.single().unwrap();
    assert!(single.is_success);
    assert!(!single.is_loading);
    assert!(single.message.ends_with("(tx: 0x12345678...)"));
}

#[test]
fn test_reset_prevents_resurrection() {
    let mut state = tracked_state(&["R001"], start_response("old", &["old-R001"]));
    let stale_generation = state.generation();

    state.reset();
    state.apply(&event("old-R001", TaskStatus::Success));
    assert_eq!(state.task_count(), 0);
    assert_eq!(state.progress().processed, 0);

    // An ingest started before the reset is discarded
    let outcome = ingest(&rows(&["R001"]), &start_response("old", &["old-R001"]));
    assert!(!state.ingest(stale_generation, outcome));
    assert_eq!(state.task_count(), 0);
}

#[test]
fn test_events_from_previous_batch_are_stale() {
    let mut state = tracked_state(&["R001"], start_response("new", &["shared-R001"]));
    let applied = state.apply(&event("shared-R001", TaskStatus::Success).in_batch("old"));
    assert_eq!(applied.bulk, BulkOutcome::Stale);
    assert_eq!(state.progress().processed, 0);
    assert_eq!(state.diagnostics().dropped_stale, 1);
}

#[tokio::test]
async fn test_tracker_task_serializes_batch_and_events() {
    let (handle, join) = Tracker::spawn(8);
    let mut updates = handle.subscribe_updates();

    // Event racing ahead of the batch-start response is dropped, not fatal
    handle.deliver(event("b9-R001", TaskStatus::Processing)).await.unwrap();

    let generation = handle.begin_batch().await.unwrap();
    let outcome = ingest(
        &rows(&["R001", "R002"]),
        &start_response("b9", &["b9-R001", "b9-R002"]),
    );
    assert!(handle.ingest(generation, outcome).await.unwrap());

    handle.deliver(event("b9-R001", TaskStatus::Success).in_batch("b9")).await.unwrap();
    handle.deliver(event("b9-R002", TaskStatus::Failed).in_batch("b9")).await.unwrap();
    handle.deliver(event("b9-R002", TaskStatus::Failed).in_batch("b9")).await.unwrap();

    let mut snapshots = handle.subscribe_snapshots();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(2),
        snapshots.wait_for(|s| s.progress.is_complete()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    assert_eq!(snapshot.batch_id.as_deref(), Some("b9"));
    assert_eq!(snapshot.progress.processed, 2);
    assert_eq!(snapshot.progress.success, 1);
    assert_eq!(snapshot.progress.failed, 1);
    assert_eq!(snapshot.diagnostics.dropped_unknown, 1);
    assert_eq!(snapshot.diagnostics.repeated_terminal, 1);

    let first = updates.recv().await.unwrap();
    assert_eq!(first.task_id, "b9-R001");
    assert_eq!(first.status, TaskStatus::Success);

    let tasks = handle.tasks().await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].status, TaskStatus::Failed);

    drop(updates);
    drop(snapshots);
    drop(handle);
    let final_state = join.await.unwrap();
    assert_eq!(final_state.progress().processed, 2);
}
