/**
 * Configuration options for the Flare pipeline.
 *
 * `Options` is passed to `ReportingPipeline::builder()` / `Client::new()`.
 * Every field has a sensible default via `Default`, and the whole tree can
 * be parsed from JSON (missing fields fall back to defaults):
 *
 * ```ignore
 * let options = flare_core::Options {
 *     endpoint: "https://collector.example.com/api/errors".into(),
 *     project_token: "my-project-token".into(),
 *     enable_batching: true,
 *     ..Default::default()
 * };
 *
 * let from_file = flare_core::Options::from_json_str(r#"{
 *     "endpoint": "https://collector.example.com/api/errors",
 *     "project_token": "my-project-token",
 *     "retry": { "max_retries": 5 }
 * }"#)?;
 * ```
 *
 * All durations are expressed in milliseconds.
 */
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::protocol::constants::SDK_VERSION;
use crate::security::SecurityValidator;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Collector URL for single reports.
    pub endpoint: String,

    /// Collector URL for batches. Defaults to `<endpoint>/batch`.
    pub batch_endpoint: Option<String>,

    /// Project token sent with every report and as the bearer credential.
    pub project_token: String,

    /// Deployment environment, e.g. `"production"`, `"staging"`.
    pub environment: String,

    /// Source revision attached as `commitHash`.
    pub commit_hash: Option<String>,

    /// Value reported in the context `user_agent` field.
    pub user_agent: String,

    /// Master switch. Auth failures flip this to `false` at runtime.
    pub enabled: bool,

    /// Group reports into batch requests instead of sending one by one.
    pub enable_batching: bool,

    /// Gzip batch bodies above the compression threshold.
    pub enable_compression: bool,

    /// Park undeliverable reports in the durable offline queue.
    pub enable_offline_queue: bool,

    /// Directory for the file-backed store. In-memory when `None`.
    pub storage_dir: Option<PathBuf>,

    /// Maximum time `Client::flush()` blocks.
    pub flush_timeout_ms: u64,

    /// Capacity of the channel between `Client` handles and the worker.
    pub worker_queue_capacity: usize,

    pub breadcrumbs: BreadcrumbConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub quota: QuotaConfig,
    pub compression: CompressionConfig,
    pub batch: BatchConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub offline_queue: OfflineQueueConfig,
    pub monitor: MonitorConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            batch_endpoint: None,
            project_token: String::new(),
            environment: "production".to_string(),
            commit_hash: None,
            user_agent: SDK_VERSION.to_string(),
            enabled: true,
            enable_batching: false,
            enable_compression: true,
            enable_offline_queue: true,
            storage_dir: None,
            flush_timeout_ms: 2_000,
            worker_queue_capacity: 100,
            breadcrumbs: BreadcrumbConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            quota: QuotaConfig::default(),
            compression: CompressionConfig::default(),
            batch: BatchConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            offline_queue: OfflineQueueConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl Options {
    /// Parses options from a JSON document. Does not validate.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The batch URL, derived from `endpoint` when not set explicitly.
    pub fn resolved_batch_endpoint(&self) -> String {
        match &self.batch_endpoint {
            Some(url) => url.clone(),
            None => format!("{}/batch", self.endpoint.trim_end_matches('/')),
        }
    }

    /**
     * Checks endpoints, token, and numeric limits.
     *
     * Called by every constructor, so an invalid configuration never produces
     * a running pipeline.
     */
    pub fn validate(&self) -> Result<(), ConfigError> {
        let validator = SecurityValidator::new(self.security.clone());

        validator
            .validate_url(&self.endpoint)
            .map_err(ConfigError::InvalidEndpoint)?;
        validator
            .validate_url(&self.resolved_batch_endpoint())
            .map_err(ConfigError::InvalidEndpoint)?;
        validator
            .validate_token(&self.project_token)
            .map_err(ConfigError::InvalidToken)?;

        nonzero("breadcrumbs.max_breadcrumbs", self.breadcrumbs.max_breadcrumbs as u64)?;
        nonzero("worker_queue_capacity", self.worker_queue_capacity as u64)?;
        nonzero("rate_limit.max_requests", self.rate_limit.max_requests as u64)?;
        nonzero("rate_limit.window_ms", self.rate_limit.window_ms)?;
        nonzero("quota.burst_window_ms", self.quota.burst_window_ms)?;
        nonzero("batch.batch_size", self.batch.batch_size as u64)?;
        nonzero("batch.max_payload_size", self.batch.max_payload_size as u64)?;
        nonzero("circuit_breaker.failure_threshold", self.circuit_breaker.failure_threshold as u64)?;
        nonzero("offline_queue.max_queue_size", self.offline_queue.max_queue_size as u64)?;
        nonzero("offline_queue.process_batch_size", self.offline_queue.process_batch_size as u64)?;
        nonzero("monitor.max_response_times", self.monitor.max_response_times as u64)?;

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::InvalidOption {
                field: "retry.initial_delay_ms",
                reason: "must not exceed retry.max_delay_ms".into(),
            });
        }

        Ok(())
    }
}

fn nonzero(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidOption {
            field,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Component configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreadcrumbConfig {
    pub max_breadcrumbs: usize,
}

impl Default for BreadcrumbConfig {
    fn default() -> Self {
        Self { max_breadcrumbs: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Production hardening: https only, no localhost / private hosts.
    pub require_https: bool,

    /// Largest serialized report accepted, in bytes.
    pub max_payload_size: usize,

    /// Strings longer than this (in chars) are truncated by `sanitize`.
    pub max_string_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_https: false,
            max_payload_size: 1024 * 1024,
            max_string_length: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,

    /// The same fingerprint is suppressed for this long after it was seen.
    pub duplicate_error_window_ms: u64,

    /// Period of the background maintenance pass.
    pub cleanup_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 60_000,
            duplicate_error_window_ms: 5_000,
            cleanup_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub daily_limit: u64,
    pub monthly_limit: u64,
    pub burst_limit: u64,
    pub burst_window_ms: u64,
    pub max_payload_size: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            daily_limit: 1_000,
            monthly_limit: 10_000,
            burst_limit: 50,
            burst_window_ms: 60_000,
            max_payload_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Payloads at or above this many bytes are compressed.
    pub threshold_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_payload_size: usize,
    pub batch_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_payload_size: 512 * 1024,
            batch_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial call is allowed.
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineQueueConfig {
    pub max_queue_size: usize,
    pub max_age_ms: u64,

    /// A record that fails with this many attempts already spent is dropped.
    pub max_attempts: u32,

    /// Records sent per processing pass.
    pub process_batch_size: usize,

    /// Delay before the next pass when records remain.
    pub retry_interval_ms: u64,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_age_ms: 24 * 60 * 60 * 1000,
            max_attempts: 3,
            process_batch_size: 5,
            retry_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Size of the rolling response-time window.
    pub max_response_times: usize,

    pub error_rate_degraded: f64,
    pub error_rate_unhealthy: f64,
    pub response_time_degraded_ms: f64,
    pub response_time_unhealthy_ms: f64,
    pub queue_size_degraded: usize,
    pub queue_size_unhealthy: usize,
    pub drop_rate_degraded: f64,
    pub drop_rate_unhealthy: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_response_times: 100,
            error_rate_degraded: 0.1,
            error_rate_unhealthy: 0.5,
            response_time_degraded_ms: 2_000.0,
            response_time_unhealthy_ms: 5_000.0,
            queue_size_degraded: 50,
            queue_size_unhealthy: 90,
            drop_rate_degraded: 0.2,
            drop_rate_unhealthy: 0.5,
        }
    }
}
