//! Behavior-driven tests for multi-provider acquisition
//!
//! These tests verify which provider ends up serving bars when the preferred
//! one is broken, slow to recover, or returns data that fails the quality gate.

use std::sync::Arc;

use barvault_core::{routing::ALL_SOURCES_FAILED, Acquisition, CircuitState, JobStatus};
use barvault_tests::*;
use barvault_warehouse::layout::ACQUISITION_FAILURES;
use serde_json::Value;

fn alpaca(behavior: Behavior) -> Arc<ScriptedSource> {
    Arc::new(
        ScriptedSource::new(ProviderId::Alpaca, day("2023-01-01"), 260).with_default(behavior),
    )
}

fn yahoo(behavior: Behavior) -> Arc<ScriptedSource> {
    Arc::new(ScriptedSource::new(ProviderId::Yahoo, day("2023-01-01"), 260).with_default(behavior))
}

// =============================================================================
// Fallback: Quality Gate
// =============================================================================

#[tokio::test]
async fn when_over_thirty_percent_of_primary_bars_are_implausible_the_next_provider_serves() {
    // Given: Alpaca returns 40% broken bars, Yahoo is clean
    let dir = tempfile::tempdir().expect("tempdir");
    let primary = alpaca(Behavior::Implausible { share: 0.4 });
    let secondary = yahoo(Behavior::Clean);
    let coordinator = coordinator(vec![primary.clone(), secondary.clone()], fs_store(&dir));

    // When: Bars are acquired
    let acquisition = coordinator
        .acquire_bars(&symbol("AAPL"), day("2023-06-01"), day("2023-06-30"))
        .await;

    // Then: Yahoo's series is used and both providers were asked once
    match acquisition {
        Acquisition::Success { bars, source_used } => {
            assert_eq!(source_used, ProviderId::Yahoo);
            assert_eq!(bars.len(), 30);
            assert_eq!(bars.plausible_ratio(), 1.0);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(primary.calls(), 1);
    assert_eq!(secondary.calls(), 1);
}

#[tokio::test]
async fn when_a_few_primary_bars_are_implausible_the_primary_still_serves() {
    // Given: Alpaca returns 20% broken bars
    let dir = tempfile::tempdir().expect("tempdir");
    let primary = alpaca(Behavior::Implausible { share: 0.2 });
    let secondary = yahoo(Behavior::Clean);
    let coordinator = coordinator(vec![primary, secondary.clone()], fs_store(&dir));

    // When: Bars are acquired
    let acquisition = coordinator
        .acquire_bars(&symbol("AAPL"), day("2023-06-01"), day("2023-06-30"))
        .await;

    // Then: The primary passes the 70% gate and Yahoo is never called
    match acquisition {
        Acquisition::Success { source_used, .. } => assert_eq!(source_used, ProviderId::Alpaca),
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(secondary.calls(), 0);
}

// =============================================================================
// Fallback: Exhaustion
// =============================================================================

#[tokio::test]
async fn when_every_provider_fails_the_failure_is_logged_for_the_monitor() {
    // Given: Both providers are down
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fs_store(&dir);
    let coordinator = coordinator(
        vec![alpaca(Behavior::Unavailable), yahoo(Behavior::Unavailable)],
        store.clone(),
    );

    // When: Bars are acquired for a job
    let acquisition = coordinator
        .acquire_bars_for_job(
            &symbol("TSLA"),
            day("2023-06-01"),
            day("2023-06-30"),
            Some("job-down"),
        )
        .await;

    // Then: The result names every provider that failed
    let message = acquisition.failure_message().expect("failure message");
    assert!(message.contains("alpaca"), "{message}");
    assert!(message.contains("yahoo"), "{message}");
    match &acquisition {
        Acquisition::AllSourcesFailed { failed_sources, .. } => {
            assert_eq!(failed_sources, &vec![ProviderId::Alpaca, ProviderId::Yahoo]);
        }
        other => panic!("expected failure, got {other:?}"),
    }

    // And: One failure entry is appended under the acquisition failure area
    let logged = store.list(ACQUISITION_FAILURES).await.expect("list");
    assert_eq!(logged.len(), 1);
    let entries = store
        .get(&logged[0].key)
        .await
        .expect("get")
        .expect("present");
    let Value::Array(entries) = entries else {
        panic!("failure log should be an array");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["error_type"], ALL_SOURCES_FAILED);
    assert_eq!(entries[0]["job_id"], "job-down");
    assert_eq!(entries[0]["instrument"], "TSLA");
}

#[tokio::test]
async fn when_the_primary_keeps_failing_its_circuit_opens_and_it_is_skipped() {
    // Given: Alpaca is down and Yahoo is healthy
    let dir = tempfile::tempdir().expect("tempdir");
    let primary = alpaca(Behavior::Unavailable);
    let coordinator = coordinator(vec![primary.clone(), yahoo(Behavior::Clean)], fs_store(&dir));

    // When: Six acquisitions run back to back
    for _ in 0..6 {
        let acquisition = coordinator
            .acquire_bars(&symbol("AAPL"), day("2023-06-01"), day("2023-06-05"))
            .await;
        assert!(acquisition.is_success());
    }

    // Then: Alpaca was called until the breaker opened, then skipped
    assert_eq!(primary.calls(), 5);
    let alpaca_snapshot = coordinator
        .snapshots()
        .into_iter()
        .find(|snapshot| snapshot.id == ProviderId::Alpaca)
        .expect("alpaca registered");
    assert_eq!(alpaca_snapshot.circuit, CircuitState::Open);
}

// =============================================================================
// Fallback: Through a Job
// =============================================================================

#[tokio::test]
async fn when_the_primary_is_down_a_job_still_persists_records_from_the_fallback() {
    // Given: Alpaca is down for every instrument
    let dir = tempfile::tempdir().expect("tempdir");
    let store = fs_store(&dir);
    let orchestrator = orchestrator(
        vec![alpaca(Behavior::Unavailable), yahoo(Behavior::Clean)],
        store,
        default_engine(),
    );

    // When: A job runs
    let job = orchestrator
        .ingest(
            vec![symbol("AAPL")],
            day("2023-09-01"),
            day("2023-09-17"),
            &CancellationHandle::new(),
        )
        .await
        .expect("ingest");

    // Then: The job completes and records name Yahoo as their source
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.counts.records_persisted, 17);
    let record = orchestrator
        .record(&symbol("AAPL"), day("2023-09-17"))
        .await
        .expect("load")
        .expect("present");
    assert_eq!(record.metadata.data_source, ProviderId::Yahoo);
}
