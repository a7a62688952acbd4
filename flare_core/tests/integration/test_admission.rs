//! Admission through the full pipeline: duplicates, the request window,
//! and quotas that survive a restart.

use std::sync::Arc;
use std::time::Duration;

use flare_core::clock::ManualClock;
use flare_core::{DropReason, ErrorInput, Outcome};

use crate::common::{self, RecordingTransport, START_MS};

#[tokio::test(start_paused = true)]
async fn test_identical_errors_are_sent_once() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(common::options(), transport.clone(), clock, None);

    let mut outcomes = Vec::new();
    for _ in 0..10 {
        let input = ErrorInput::new("TypeError", "cart is undefined")
            .with_stack_trace("at checkout (src/cart.rs:42:7)");
        outcomes.push(pipeline.submit(input).await.unwrap());
    }

    assert_eq!(outcomes[0], Outcome::Sent);
    assert!(outcomes[1..]
        .iter()
        .all(|o| *o == Outcome::Dropped(DropReason::Duplicate)));
    assert_eq!(transport.call_count(), 1);

    let monitor = pipeline.metrics().monitor;
    assert_eq!(monitor.errors_reported, 10);
    assert_eq!(monitor.drops_by_reason[&DropReason::Duplicate], 9);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_allowed_after_window() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(common::options(), transport.clone(), clock.clone(), None);

    pipeline.submit(ErrorInput::new("Error", "flaky")).await.unwrap();
    clock.advance(Duration::from_millis(5_000));
    let outcome = pipeline.submit(ErrorInput::new("Error", "flaky")).await.unwrap();

    assert_eq!(outcome, Outcome::Sent);
    assert_eq!(transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_same_error_at_different_lines_is_duplicate() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(common::options(), transport.clone(), clock, None);

    pipeline
        .submit(ErrorInput::new("Error", "boom").with_stack_trace("at run (src/app.rs:10:1)"))
        .await
        .unwrap();
    let outcome = pipeline
        .submit(ErrorInput::new("Error", "boom").with_stack_trace("at run (src/app.rs:99:4)"))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Dropped(DropReason::Duplicate));
}

#[tokio::test(start_paused = true)]
async fn test_request_window_caps_distinct_errors() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let pipeline = common::build(common::options(), transport.clone(), clock.clone(), None);

    for i in 0..10 {
        let outcome = pipeline
            .submit(ErrorInput::new("Error", format!("distinct {i}")))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Sent);
    }
    let outcome = pipeline
        .submit(ErrorInput::new("Error", "one too many"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Dropped(DropReason::RateLimited));

    /* the window slides */
    clock.advance(Duration::from_millis(60_000));
    let outcome = pipeline
        .submit(ErrorInput::new("Error", "after the window"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Sent);
    assert_eq!(transport.call_count(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_quota_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = common::options();
    options.quota.daily_limit = 2;

    {
        let transport = RecordingTransport::new(200);
        let clock = Arc::new(ManualClock::new(START_MS));
        let store = common::file_store(dir.path());
        let pipeline = common::build(options.clone(), transport.clone(), clock, Some(store));
        pipeline.submit(ErrorInput::new("Error", "first")).await.unwrap();
        pipeline.submit(ErrorInput::new("Error", "second")).await.unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS + 1_000));
    let store = common::file_store(dir.path());
    let pipeline = common::build(options, transport.clone(), clock, Some(store));

    let outcome = pipeline.submit(ErrorInput::new("Error", "third")).await.unwrap();
    assert_eq!(outcome, Outcome::Dropped(DropReason::Quota));
    assert_eq!(transport.call_count(), 0);
    assert_eq!(pipeline.metrics().quota.daily_used, 2);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_pipeline_drops_everything() {
    let transport = RecordingTransport::new(200);
    let clock = Arc::new(ManualClock::new(START_MS));
    let mut options = common::options();
    options.enabled = false;
    let pipeline = common::build(options, transport.clone(), clock, None);

    let outcome = pipeline.submit(ErrorInput::new("Error", "ignored")).await.unwrap();
    assert_eq!(outcome, Outcome::Dropped(DropReason::Disabled));

    pipeline.enable();
    let outcome = pipeline.submit(ErrorInput::new("Error", "sent")).await.unwrap();
    assert_eq!(outcome, Outcome::Sent);
    assert_eq!(transport.call_count(), 1);
}
