//! Offline queue behavior end to end: connectivity changes, collector
//! outages, restarts, and the drop policies.

use std::sync::Arc;
use std::time::Duration;

use flare_core::clock::ManualClock;
use flare_core::delivery::CircuitState;
use flare_core::{DropReason, ErrorInput, Outcome};

use crate::common::{self, RecordingTransport, START_MS};

#[tokio::test(start_paused = true)]
async fn test_offline_reports_replayed_in_order() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(common::options(), transport.clone(), clock, None);

    pipeline.set_online(false).await;
    for name in ["first", "second", "third"] {
        let outcome = pipeline.submit(ErrorInput::new("Error", name)).await.unwrap();
        assert_eq!(outcome, Outcome::Queued);
    }
    assert_eq!(transport.call_count(), 0);
    assert_eq!(pipeline.health().metrics.queue_size, 3);

    pipeline.set_online(true).await;
    pipeline.flush().await;

    assert_eq!(transport.messages(), vec!["first", "second", "third"]);
    let queue = pipeline.metrics().queue.unwrap();
    assert_eq!(queue.size, 0);
    assert_eq!(queue.sent, 3);
}

#[tokio::test(start_paused = true)]
async fn test_outage_reports_delivered_after_recovery() {
    let transport = RecordingTransport::new(503);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = common::options();
    options.retry.max_retries = 0;
    let pipeline = common::build(options, transport.clone(), clock, None);

    let outcome = pipeline.submit(ErrorInput::new("Error", "during outage")).await.unwrap();
    assert_eq!(outcome, Outcome::Queued);
    assert_eq!(transport.call_count(), 1);

    transport.set_fallback(200);
    let delivered = pipeline.flush().await;

    assert_eq!(delivered, 1);
    assert_eq!(transport.messages(), vec!["during outage", "during outage"]);
    assert_eq!(pipeline.metrics().queue.unwrap().size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_report_is_not_requeued() {
    let transport = RecordingTransport::new(200);
    transport.script(&[400]);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(common::options(), transport.clone(), clock, None);

    pipeline.set_online(false).await;
    pipeline.submit(ErrorInput::new("Error", "malformed")).await.unwrap();
    pipeline.set_online(true).await;

    let queue = pipeline.metrics().queue.unwrap();
    assert_eq!(queue.size, 0);
    assert_eq!(queue.dropped_rejected, 1);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let transport = RecordingTransport::new(200);
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = common::file_store(dir.path());
        let pipeline = common::build(common::options(), transport.clone(), clock, Some(store));
        pipeline.set_online(false).await;
        pipeline.submit(ErrorInput::new("Error", "before crash 1")).await.unwrap();
        pipeline.submit(ErrorInput::new("Error", "before crash 2")).await.unwrap();
        assert_eq!(transport.call_count(), 0);
    }

    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS + 60_000));
    let store = common::file_store(dir.path());
    let pipeline = common::build(common::options(), transport.clone(), clock, Some(store));
    assert_eq!(pipeline.health().metrics.queue_size, 2);

    pipeline.flush().await;
    assert_eq!(transport.messages(), vec!["before crash 1", "before crash 2"]);
}

#[tokio::test(start_paused = true)]
async fn test_expired_reports_are_never_sent() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = common::options();
    options.offline_queue.max_age_ms = 60_000;
    let pipeline = common::build(options, transport.clone(), clock.clone(), None);

    pipeline.set_online(false).await;
    pipeline.submit(ErrorInput::new("Error", "stale")).await.unwrap();
    clock.advance(Duration::from_millis(60_000));
    pipeline.set_online(true).await;

    assert_eq!(transport.call_count(), 0);
    assert_eq!(pipeline.metrics().queue.unwrap().dropped_expired, 1);
    assert_eq!(pipeline.metrics().monitor.drops_by_reason[&DropReason::Expired], 1);
}

#[tokio::test(start_paused = true)]
async fn test_queue_overflow_drops_oldest() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = common::options();
    options.offline_queue.max_queue_size = 2;
    let pipeline = common::build(options, transport.clone(), clock, None);

    pipeline.set_online(false).await;
    for name in ["a", "b", "c"] {
        pipeline.submit(ErrorInput::new("Error", name)).await.unwrap();
    }
    pipeline.set_online(true).await;

    assert_eq!(transport.messages(), vec!["b", "c"]);
    assert_eq!(pipeline.metrics().queue.unwrap().dropped_overflow, 1);
}

#[tokio::test(start_paused = true)]
async fn test_queue_drops_are_counted_by_monitor() {
    let transport = RecordingTransport::new(503);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = common::options();
    options.retry.max_retries = 0;
    options.circuit_breaker.failure_threshold = 10;
    options.offline_queue.max_queue_size = 1;
    options.offline_queue.max_attempts = 1;
    let pipeline = common::build(options, transport.clone(), clock, None);

    pipeline.set_online(false).await;
    pipeline.submit(ErrorInput::new("Error", "pushed out")).await.unwrap();
    pipeline.submit(ErrorInput::new("Error", "kept")).await.unwrap();
    let monitor = pipeline.metrics().monitor;
    assert_eq!(monitor.errors_dropped, 1);
    assert_eq!(monitor.drops_by_reason[&DropReason::QueueOverflow], 1);

    /* first pass spends the only attempt, the flush pass exhausts it */
    pipeline.set_online(true).await;
    pipeline.flush().await;

    assert_eq!(transport.messages(), vec!["kept", "kept"]);
    let metrics = pipeline.metrics();
    assert_eq!(metrics.queue.unwrap().dropped_attempts, 1);
    assert_eq!(metrics.monitor.errors_dropped, 2);
    assert_eq!(metrics.monitor.drops_by_reason[&DropReason::MaxAttempts], 1);
    assert_eq!(pipeline.health().metrics.drop_rate(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_does_not_spend_queue_attempts() {
    let transport = RecordingTransport::new(503);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = common::options();
    options.retry.max_retries = 0;
    options.circuit_breaker.failure_threshold = 1;
    options.circuit_breaker.timeout_ms = 60_000;
    let pipeline = common::build(options, transport.clone(), clock.clone(), None);

    let outcome = pipeline.submit(ErrorInput::new("Error", "held")).await.unwrap();
    assert_eq!(outcome, Outcome::Queued);
    assert_eq!(pipeline.metrics().circuit.state, CircuitState::Open);

    for _ in 0..6 {
        pipeline.run_maintenance().await;
    }
    assert_eq!(transport.call_count(), 1);
    let metrics = pipeline.metrics();
    assert_eq!(metrics.queue.unwrap().size, 1);
    assert_eq!(metrics.queue.unwrap().dropped_attempts, 0);
    assert_eq!(metrics.monitor.errors_dropped, 0);

    transport.set_fallback(200);
    clock.advance(Duration::from_millis(60_000));
    assert_eq!(pipeline.flush().await, 1);

    assert_eq!(transport.messages(), vec!["held", "held"]);
    assert_eq!(pipeline.metrics().queue.unwrap().size, 0);
    assert_eq!(pipeline.metrics().circuit.state, CircuitState::Closed);
}
