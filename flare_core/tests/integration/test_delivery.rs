//! The send path through the pipeline: batching, compression, the circuit
//! breaker, and how collector responses are classified.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use flate2::read::GzDecoder;
use serde_json::Value;

use flare_core::clock::ManualClock;
use flare_core::delivery::CircuitState;
use flare_core::{DropReason, ErrorInput, Outcome};

use crate::common::{self, RecordingTransport, START_MS};

fn batching_options(batch_size: usize) -> flare_core::Options {
    let mut options = common::options();
    options.enable_batching = true;
    options.batch.batch_size = batch_size;
    options
}

#[tokio::test(start_paused = true)]
async fn test_batch_sent_when_full() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(batching_options(4), transport.clone(), clock, None);

    for i in 0..4 {
        let outcome = pipeline
            .submit(ErrorInput::new("Error", format!("batched {i}")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Batched);
    }

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, "https://collector.example.com/api/errors/batch");
    assert_eq!(requests[0].header("X-Batch-Size"), Some("4"));

    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let messages: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["batched 0", "batched 1", "batched 2", "batched 3"]);
}

#[tokio::test(start_paused = true)]
async fn test_batch_sent_after_timeout() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(batching_options(10), transport.clone(), clock, None);

    pipeline.submit(ErrorInput::new("Error", "lonely")).await.unwrap();
    assert_eq!(transport.call_count(), 0);

    tokio::time::sleep(Duration::from_millis(5_100)).await;

    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.requests()[0].header("X-Batch-Size"), Some("1"));
    assert_eq!(pipeline.metrics().batch.unwrap().batches_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_large_batch_is_gzipped() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = batching_options(3);
    options.compression.threshold_bytes = 256;
    let pipeline = common::build(options, transport.clone(), clock, None);

    for i in 0..3 {
        let message = format!("{i}: {}", "repetitive text ".repeat(40));
        pipeline.submit(ErrorInput::new("Error", message)).await.unwrap();
    }

    let request = &transport.requests()[0];
    assert_eq!(request.header("Content-Encoding"), Some("gzip"));

    let envelope: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(envelope["compressed"], true);
    let gz = base64::engine::general_purpose::STANDARD
        .decode(envelope["data"].as_str().unwrap())
        .unwrap();
    let mut json = String::new();
    GzDecoder::new(gz.as_slice()).read_to_string(&mut json).unwrap();
    let reports: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(reports.as_array().unwrap().len(), 3);

    let compression = pipeline.metrics().compression;
    assert_eq!(compression.total_compressions, 1);
    assert!(compression.bytes_saved > 0);
}

#[tokio::test(start_paused = true)]
async fn test_small_batch_is_plain() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(batching_options(2), transport.clone(), clock, None);

    pipeline.submit(ErrorInput::new("Error", "a")).await.unwrap();
    pipeline.submit(ErrorInput::new("Error", "b")).await.unwrap();

    let request = &transport.requests()[0];
    assert_eq!(request.header("Content-Encoding"), None);
    assert!(serde_json::from_slice::<Value>(&request.body).unwrap().is_array());
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_parks_reports_in_queue() {
    let transport = RecordingTransport::new(503);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = batching_options(2);
    options.retry.max_retries = 0;
    let pipeline = common::build(options, transport.clone(), clock, None);

    pipeline.submit(ErrorInput::new("Error", "x")).await.unwrap();
    pipeline.submit(ErrorInput::new("Error", "y")).await.unwrap();
    assert_eq!(pipeline.metrics().queue.unwrap().size, 2);

    transport.set_fallback(200);
    pipeline.flush().await;
    assert_eq!(pipeline.metrics().queue.unwrap().size, 0);
    assert_eq!(transport.messages(), vec!["x", "y"]);
}

#[tokio::test(start_paused = true)]
async fn test_retries_then_succeeds() {
    let transport = RecordingTransport::new(200);
    transport.script(&[503, 503, 503]);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(common::options(), transport.clone(), clock, None);

    let outcome = pipeline.submit(ErrorInput::new("Error", "eventually")).await.unwrap();

    assert_eq!(outcome, Outcome::Sent);
    assert_eq!(transport.call_count(), 4);
    let metrics = pipeline.metrics();
    assert_eq!(metrics.retry.total_retries, 3);
    assert_eq!(metrics.circuit.state, CircuitState::Closed);
    assert_eq!(metrics.monitor.successful_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_and_recovers() {
    let transport = RecordingTransport::new(500);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = common::options();
    options.retry.max_retries = 0;
    options.circuit_breaker.failure_threshold = 3;
    options.circuit_breaker.timeout_ms = 30_000;
    let pipeline = common::build(options, transport.clone(), clock.clone(), None);

    for i in 0..5 {
        pipeline
            .submit(ErrorInput::new("Error", format!("outage {i}")))
            .await
            .unwrap();
    }
    assert_eq!(transport.call_count(), 3);
    assert_eq!(pipeline.metrics().circuit.state, CircuitState::Open);

    transport.set_fallback(200);
    clock.advance(Duration::from_millis(30_000));
    let outcome = pipeline.submit(ErrorInput::new("Error", "recovered")).await.unwrap();

    assert_eq!(outcome, Outcome::Sent);
    assert_eq!(pipeline.metrics().circuit.state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_stops_all_traffic() {
    let transport = RecordingTransport::new(403);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(common::options(), transport.clone(), clock, None);

    pipeline.submit(ErrorInput::new("Error", "first")).await.unwrap();
    assert!(!pipeline.is_enabled());

    for i in 0..3 {
        let outcome = pipeline
            .submit(ErrorInput::new("Error", format!("after {i}")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Dropped(DropReason::Disabled));
    }
    assert_eq!(transport.call_count(), 1);
    assert_eq!(pipeline.metrics().queue.unwrap().size, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_after_sustained_failures() {
    let transport = RecordingTransport::new(500);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = common::options();
    options.retry.max_retries = 0;
    options.enable_offline_queue = false;
    let pipeline = common::build(options, transport, clock, None);

    for i in 0..4 {
        let result = pipeline.submit(ErrorInput::new("Error", format!("down {i}"))).await;
        assert!(result.is_err());
    }

    let health = pipeline.health();
    assert_eq!(health.status, flare_core::HealthStatus::Unhealthy);
    assert!(!health.issues.is_empty());
}
