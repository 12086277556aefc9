//! Workers without a local monitor, shutdown, cancellation and deletion.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{Script, TestHarness};

use transcriptor::error::OrchestratorError;
use transcriptor::media::{Language, MediaKind};
use transcriptor::model::{FailureReason, JobOutcome, MediaAsset, TranscriptionJob, WorkStatus};
use transcriptor::orchestrator::{OrchestratorSettings, RecoveryReport};
use transcriptor::store::StoreError;

/// Settings whose worker deadline is already over by the time they are used.
fn expired_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        timeout: Duration::from_millis(10),
        ..TestHarness::settings()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recover_adopts_live_workers() {
    let harness = TestHarness::with_script(Script::Hang);
    let running = harness.submit_mp3();
    let queued = harness.submit_mp3();
    harness.orchestrator.dispatch(&running.id).await.unwrap();
    let container = harness.container_id(&running.id);

    let restarted = harness.restarted();
    let report = restarted.recover().await.unwrap();
    assert_eq!(report, RecoveryReport { adopted: 1, failed: 0 });
    assert_eq!(restarted.active_workers().await, 1);

    // Still inside its deadline: left running, not failed
    assert!(harness.runtime.is_running(&container));
    assert_eq!(
        restarted.status(&running.id).unwrap().asset_status,
        WorkStatus::Processing
    );
    assert_eq!(
        restarted.status(&queued.id).unwrap().asset_status,
        WorkStatus::Queued
    );

    // Already watched, nothing more to do
    assert_eq!(restarted.recover().await.unwrap(), RecoveryReport::default());

    // Shutting down the adopting process does not kill a worker it never launched
    restarted.shutdown().await;
    assert!(harness.runtime.is_running(&container));
    assert_eq!(
        harness.orchestrator.status(&running.id).unwrap().asset_status,
        WorkStatus::Processing
    );

    harness.orchestrator.cancel(&running.id).await.unwrap();
    assert!(!harness.runtime.is_running(&container));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recover_fails_workers_past_deadline() {
    let harness = TestHarness::with_script(Script::Hang);
    let asset = harness.submit_mp3();
    harness.orchestrator.dispatch(&asset.id).await.unwrap();
    let container = harness.container_id(&asset.id);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let restarted = harness.restarted_with(expired_settings());
    let report = restarted.recover().await.unwrap();
    assert_eq!(report, RecoveryReport { adopted: 0, failed: 1 });

    let status = restarted.status(&asset.id).unwrap();
    assert_eq!(status.asset_status, WorkStatus::Failed);
    assert_eq!(status.job_status, WorkStatus::Failed);
    assert_eq!(status.failure_reason, Some(FailureReason::WorkerLost));
    assert!(harness.runtime.was_stopped(&container));
    assert!(harness.runtime.was_removed(&container));

    assert_eq!(restarted.recover().await.unwrap(), RecoveryReport::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recover_skips_own_workers() {
    let harness = TestHarness::with_script(Script::Hang);
    let asset = harness.submit_mp3();
    harness.orchestrator.dispatch(&asset.id).await.unwrap();

    assert_eq!(
        harness.orchestrator.recover().await.unwrap(),
        RecoveryReport::default()
    );
    assert_eq!(
        harness.orchestrator.status(&asset.id).unwrap().asset_status,
        WorkStatus::Processing
    );

    harness.orchestrator.cancel(&asset.id).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconcile_waits_for_worker_started_elsewhere() {
    let settings = OrchestratorSettings {
        auto_reconcile: false,
        ..TestHarness::settings()
    };
    let harness = TestHarness::with_settings(
        Script::after(Duration::from_millis(300), Script::transcript("late but fine")),
        settings,
    );
    let asset = harness.submit_mp3();
    harness.orchestrator.dispatch(&asset.id).await.unwrap();
    let container = harness.container_id(&asset.id);

    // A second process has no monitor for this worker and must not kill it
    let restarted = harness.restarted();
    let outcome = restarted.reconcile(&asset.id).await.unwrap();

    assert!(matches!(outcome, JobOutcome::Completed { .. }));
    assert!(!harness.runtime.was_stopped(&container));
    assert!(harness.runtime.was_removed(&container));
    assert_eq!(restarted.active_workers().await, 0);

    let report = harness.orchestrator.status(&asset.id).unwrap();
    assert_eq!(report.asset_status, WorkStatus::Completed);
    assert_eq!(report.job_status, WorkStatus::Completed);

    // The launching process agrees
    let seen = harness.orchestrator.reconcile(&asset.id).await.unwrap();
    assert_eq!(seen, outcome);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconcile_elsewhere_sees_worker_failure() {
    let settings = OrchestratorSettings {
        auto_reconcile: false,
        ..TestHarness::settings()
    };
    let harness = TestHarness::with_settings(
        Script::after(Duration::from_millis(100), Script::Exit(3)),
        settings,
    );
    let asset = harness.submit_mp3();
    harness.orchestrator.dispatch(&asset.id).await.unwrap();

    let outcome = harness.restarted().reconcile(&asset.id).await.unwrap();
    assert_eq!(outcome.failure_reason(), Some(&FailureReason::NonZeroExit(3)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconcile_after_deadline_reports_lost() {
    let harness = TestHarness::with_script(Script::Hang);
    let asset = harness.submit_mp3();
    harness.orchestrator.dispatch(&asset.id).await.unwrap();
    let container = harness.container_id(&asset.id);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let restarted = harness.restarted_with(expired_settings());
    let outcome = restarted.reconcile(&asset.id).await.unwrap();

    assert_eq!(outcome.status(), WorkStatus::Failed);
    assert_eq!(outcome.failure_reason(), Some(&FailureReason::WorkerLost));
    assert!(harness.runtime.was_stopped(&container));
    assert!(!harness.runtime.is_running(&container));

    // The first process sees the same outcome
    let seen = harness.orchestrator.reconcile(&asset.id).await.unwrap();
    assert_eq!(seen, outcome);
}

/// Marks a queued asset as running in `container_id` without launching
/// anything, as if the launching process died right after recording it.
fn mark_processing(harness: &TestHarness, asset_id: &str, container_id: Option<&str>) {
    let store = harness.orchestrator.store();
    store
        .transition_pair(asset_id, WorkStatus::Queued, WorkStatus::Processing, Utc::now())
        .unwrap();
    if let Some(container_id) = container_id {
        store.record_container(asset_id, container_id).unwrap();
    }
}

#[tokio::test]
async fn test_reconcile_unknown_container_reports_lost() {
    let harness = TestHarness::new();
    let asset = harness.submit_mp3();
    mark_processing(&harness, &asset.id, Some("ghost-1"));

    let outcome = harness.orchestrator.reconcile(&asset.id).await.unwrap();
    assert_eq!(outcome.failure_reason(), Some(&FailureReason::WorkerLost));
    assert_eq!(harness.runtime.launches(), 0);
}

#[tokio::test]
async fn test_reconcile_without_recorded_container_reports_lost() {
    let harness = TestHarness::new();
    let asset = harness.submit_mp3();
    mark_processing(&harness, &asset.id, None);

    let outcome = harness.orchestrator.reconcile(&asset.id).await.unwrap();
    assert_eq!(outcome.failure_reason(), Some(&FailureReason::WorkerLost));

    let report = harness.orchestrator.status(&asset.id).unwrap();
    assert_eq!(report.asset_status, WorkStatus::Failed);
    assert_eq!(report.job_status, WorkStatus::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_stops_workers_and_disconnects() {
    let harness = TestHarness::with_script(Script::Hang);
    let asset = harness.submit_mp3();
    harness.orchestrator.dispatch(&asset.id).await.unwrap();
    let container = harness.container_id(&asset.id);

    harness.orchestrator.shutdown().await;

    assert!(harness.runtime.was_stopped(&container));
    assert!(!harness.runtime.is_running(&container));
    assert!(harness.runtime.is_disconnected());
    assert_eq!(harness.orchestrator.active_workers().await, 0);

    let report = harness.orchestrator.status(&asset.id).unwrap();
    assert_eq!(report.asset_status, WorkStatus::Failed);
    assert_eq!(report.failure_reason, Some(FailureReason::WorkerLost));
}

#[tokio::test]
async fn test_cancel_requires_processing() {
    let harness = TestHarness::new();
    let asset = harness.submit_mp3();

    assert!(matches!(
        harness.orchestrator.cancel(&asset.id).await,
        Err(OrchestratorError::InvalidState {
            status: WorkStatus::Queued,
            ..
        })
    ));
}

#[tokio::test]
async fn test_delete_removes_files_and_retires_id() {
    let harness = TestHarness::new();
    let asset = harness.submit_mp3();
    harness.orchestrator.dispatch(&asset.id).await.unwrap();
    harness.orchestrator.reconcile(&asset.id).await.unwrap();
    let asset_dir = harness.data_dir.join(&asset.id);
    assert!(asset_dir.is_dir());

    harness.orchestrator.delete(&asset.id).await.unwrap();

    assert!(!asset_dir.exists());
    assert!(harness.data_entries().is_empty());
    assert!(matches!(
        harness.orchestrator.status(&asset.id),
        Err(OrchestratorError::NotFound(_))
    ));

    // The id can never come back
    let store = harness.orchestrator.store();
    assert!(store.is_retired(&asset.id).unwrap());
    let reused = MediaAsset::new(
        asset.id.clone(),
        MediaKind::Audio,
        asset.source_path.clone(),
        None,
        Utc::now(),
    );
    let job = TranscriptionJob::for_asset(&reused, Language::English);
    assert!(matches!(
        store.create(&reused, &job),
        Err(StoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_delete_queued_asset() {
    let harness = TestHarness::new();
    let asset = harness.submit_mp3();

    harness.orchestrator.delete(&asset.id).await.unwrap();
    assert!(harness.data_entries().is_empty());
    assert!(matches!(
        harness.orchestrator.delete(&asset.id).await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_refuses_processing() {
    let harness = TestHarness::with_script(Script::Hang);
    let asset = harness.submit_mp3();
    harness.orchestrator.dispatch(&asset.id).await.unwrap();

    assert!(matches!(
        harness.orchestrator.delete(&asset.id).await,
        Err(OrchestratorError::InvalidState {
            status: WorkStatus::Processing,
            ..
        })
    ));
    assert!(harness.data_dir.join(&asset.id).is_dir());

    harness.orchestrator.cancel(&asset.id).await.unwrap();
    harness.orchestrator.delete(&asset.id).await.unwrap();
    assert!(harness.data_entries().is_empty());
}
