/**
 * Self-monitoring of the reporting pipeline.
 *
 * The `SdkMonitor` counts what happened to every submitted error (sent,
 * dropped and why), how requests to the collector fared, and how big the
 * offline queue is. `health()` turns those numbers into a coarse
 * `HealthStatus`: each threshold escalates on its own and the most severe
 * result wins.
 */
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::clock::Clock;
use crate::config::MonitorConfig;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Why a submitted error never reached the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The pipeline is disabled (explicitly, or after an auth failure).
    Disabled,
    /// The same fingerprint was reported inside the duplicate window.
    Duplicate,
    /// The request window is full.
    RateLimited,
    /// A burst, daily or monthly quota was exhausted.
    Quota,
    /// The serialized report exceeds the payload size limit.
    PayloadTooLarge,
    /// The collector refused the report (4xx other than rate limiting).
    Rejected,
    /// Delivery failed and the offline queue is disabled.
    Delivery,
    /// Pushed out of a full offline queue by a newer report.
    QueueOverflow,
    /// Sat in the offline queue longer than `max_age_ms`.
    Expired,
    /// Failed again after using every offline queue attempt.
    MaxAttempts,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Disabled => "disabled",
            DropReason::Duplicate => "duplicate",
            DropReason::RateLimited => "rate_limited",
            DropReason::Quota => "quota",
            DropReason::PayloadTooLarge => "payload_too_large",
            DropReason::Rejected => "rejected",
            DropReason::Delivery => "delivery",
            DropReason::QueueOverflow => "queue_overflow",
            DropReason::Expired => "expired",
            DropReason::MaxAttempts => "max_attempts",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub errors_reported: u64,
    pub errors_dropped: u64,
    pub drops_by_reason: BTreeMap<DropReason, u64>,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub bytes_sent: u64,
    pub average_response_time_ms: f64,
    pub queue_size: usize,
    pub last_error: Option<String>,
    pub uptime_ms: u64,
}

impl MonitorSnapshot {
    /// Failed requests over all requests; 0 before the first request.
    pub fn error_rate(&self) -> f64 {
        let total = self.successful_requests + self.failed_requests;
        if total == 0 {
            0.0
        } else {
            self.failed_requests as f64 / total as f64
        }
    }

    /// Dropped errors over reported errors; 0 before the first report.
    pub fn drop_rate(&self) -> f64 {
        if self.errors_reported == 0 {
            0.0
        } else {
            self.errors_dropped as f64 / self.errors_reported as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,

    /// One line per threshold that was crossed.
    pub issues: Vec<String>,

    pub metrics: MonitorSnapshot,
}

// ---------------------------------------------------------------------------
// SdkMonitor
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    errors_reported: u64,
    errors_dropped: u64,
    drops_by_reason: BTreeMap<DropReason, u64>,
    successful_requests: u64,
    failed_requests: u64,
    bytes_sent: u64,
    response_times: VecDeque<f64>,
    average_response_time_ms: f64,
    queue_size: usize,
    last_error: Option<String>,
}

#[derive(Debug)]
pub struct SdkMonitor {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    started_at: u64,
    counters: Mutex<Counters>,
}

impl SdkMonitor {
    pub fn new(config: MonitorConfig, clock: Arc<dyn Clock>) -> Self {
        let started_at = clock.now_ms();
        Self {
            config,
            clock,
            started_at,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn record_error_reported(&self) {
        self.with(|c| c.errors_reported += 1);
    }

    pub fn record_error_dropped(&self, reason: DropReason) {
        self.with(|c| {
            c.errors_dropped += 1;
            *c.drops_by_reason.entry(reason).or_default() += 1;
        });
    }

    pub fn record_request_success(&self, response_time_ms: f64, bytes: usize) {
        let window = self.config.max_response_times.max(1);
        self.with(|c| {
            c.successful_requests += 1;
            c.bytes_sent += bytes as u64;
            push_response_time(c, response_time_ms, window);
        });
    }

    pub fn record_request_failure(&self, response_time_ms: f64, error: &str) {
        let window = self.config.max_response_times.max(1);
        self.with(|c| {
            c.failed_requests += 1;
            c.last_error = Some(error.to_string());
            push_response_time(c, response_time_ms, window);
        });
    }

    pub fn set_queue_size(&self, size: usize) {
        self.with(|c| c.queue_size = size);
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let uptime_ms = self.clock.now_ms().saturating_sub(self.started_at);
        match self.counters.lock() {
            Ok(c) => MonitorSnapshot {
                errors_reported: c.errors_reported,
                errors_dropped: c.errors_dropped,
                drops_by_reason: c.drops_by_reason.clone(),
                successful_requests: c.successful_requests,
                failed_requests: c.failed_requests,
                bytes_sent: c.bytes_sent,
                average_response_time_ms: c.average_response_time_ms,
                queue_size: c.queue_size,
                last_error: c.last_error.clone(),
                uptime_ms,
            },
            Err(_) => MonitorSnapshot {
                errors_reported: 0,
                errors_dropped: 0,
                drops_by_reason: BTreeMap::new(),
                successful_requests: 0,
                failed_requests: 0,
                bytes_sent: 0,
                average_response_time_ms: 0.0,
                queue_size: 0,
                last_error: None,
                uptime_ms,
            },
        }
    }

    pub fn health(&self) -> HealthReport {
        let metrics = self.snapshot();
        let cfg = &self.config;
        let mut status = HealthStatus::Healthy;
        let mut issues = Vec::new();

        let mut check = |name: &str, value: f64, degraded: f64, unhealthy: f64| {
            let level = if value >= unhealthy {
                HealthStatus::Unhealthy
            } else if value >= degraded {
                HealthStatus::Degraded
            } else {
                return;
            };
            issues.push(format!("{name} {value:.2} exceeds {degraded:.2}"));
            status = status.max(level);
        };

        check(
            "error rate",
            metrics.error_rate(),
            cfg.error_rate_degraded,
            cfg.error_rate_unhealthy,
        );
        check(
            "average response time (ms)",
            metrics.average_response_time_ms,
            cfg.response_time_degraded_ms,
            cfg.response_time_unhealthy_ms,
        );
        check(
            "queue size",
            metrics.queue_size as f64,
            cfg.queue_size_degraded as f64,
            cfg.queue_size_unhealthy as f64,
        );
        check(
            "drop rate",
            metrics.drop_rate(),
            cfg.drop_rate_degraded,
            cfg.drop_rate_unhealthy,
        );

        HealthReport {
            status,
            issues,
            metrics,
        }
    }

    pub fn reset(&self) {
        self.with(|c| *c = Counters::default());
    }

    fn with(&self, f: impl FnOnce(&mut Counters)) {
        if let Ok(mut counters) = self.counters.lock() {
            f(&mut counters);
        }
    }
}

fn push_response_time(c: &mut Counters, ms: f64, window: usize) {
    c.response_times.push_back(ms);
    while c.response_times.len() > window {
        c.response_times.pop_front();
    }
    c.average_response_time_ms =
        c.response_times.iter().sum::<f64>() / c.response_times.len() as f64;
}
