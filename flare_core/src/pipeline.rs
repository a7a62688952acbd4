/**
 * The reporting pipeline: turns raw errors into delivered reports.
 *
 * ```text
 *  submit(ErrorInput)
 *     │
 *     ├─ fingerprint ─▶ duplicate? ─▶ request window full? ─▶ quota? ──▶ drop (monitored)
 *     │
 *     ├─ build Report (sanitized input + Context snapshot) ─▶ payload too large? ─▶ drop
 *     │
 *     ├─ offline ─────────────────────────────────────────────▶ OfflineQueue
 *     ├─ batching ─▶ BatchAccumulator ─▶ BatchDispatch ─┐
 *     └─ direct ────────────────────────────────────────────┴─▶ Delivery
 *                                                              circuit(retry(transport))
 * ```
 *
 * Failures after retries are parked in the offline queue when it is
 * enabled. Auth failures disable the pipeline; 413 and other client errors
 * drop the report. Only transient failures with the queue disabled reach
 * the caller as `Err`.
 */
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::admission::{QuotaManager, QuotaUsage, RateLimiter, RateLimiterStats};
use crate::clock::{Clock, SystemClock};
use crate::config::Options;
use crate::context::ContextManager;
use crate::delivery::{
    BatchAccumulator, BatchDispatch, BatchStats, CircuitBreaker, CircuitStats, CompressionCodec,
    CompressionStats, Delivery, OfflineQueue, QueueStats, RetryManager, RetryStats,
};
use crate::error::{ConfigError, DeliveryError, QuotaExceeded};
use crate::monitor::{DropReason, HealthReport, MonitorSnapshot, SdkMonitor};
use crate::protocol::types::{Breadcrumb, BreadcrumbLevel, ErrorInput, Report, User};
use crate::security::SecurityValidator;
use crate::store::{FileStore, MemoryStore, Store};
use crate::transport::{HttpTransport, Transport};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What `submit` did with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Delivered to the collector.
    Sent,
    /// Handed to the batch accumulator.
    Batched,
    /// Parked in the offline queue.
    Queued,
    /// Discarded; counted in the monitor under `DropReason`.
    Dropped(DropReason),
}

/// Every component's statistics in one serializable document.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetrics {
    pub enabled: bool,
    pub online: bool,
    pub monitor: MonitorSnapshot,
    pub rate_limit: RateLimiterStats,
    pub quota: QuotaUsage,
    pub circuit: CircuitStats,
    pub retry: RetryStats,
    pub compression: CompressionStats,
    pub batch: Option<BatchStats>,
    pub queue: Option<QueueStats>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/**
 * Builds a `ReportingPipeline` from `Options` plus optional capabilities.
 *
 * Defaults: `HttpTransport`, `SystemClock`, and a `FileStore` in
 * `options.storage_dir` (or a `MemoryStore` when unset).
 */
pub struct PipelineBuilder {
    options: Options,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PipelineBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /**
     * Validates the options and wires every component together.
     *
     * If called inside a tokio runtime, a maintenance task is spawned on it.
     */
    pub fn build(self) -> Result<Arc<ReportingPipeline>, ConfigError> {
        let options = self.options;
        options.validate()?;

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store: Arc<dyn Store> = match (self.store, &options.storage_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileStore::open(dir)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new()?),
        };

        let monitor = Arc::new(SdkMonitor::new(options.monitor.clone(), clock.clone()));
        let quota = Arc::new(QuotaManager::new(
            options.quota.clone(),
            store.clone(),
            clock.clone(),
        ));

        let delivery = Arc::new(Delivery {
            endpoint: options.endpoint.clone(),
            batch_endpoint: options.resolved_batch_endpoint(),
            project_token: options.project_token.clone(),
            commit_hash: options.commit_hash.clone(),
            transport,
            circuit: CircuitBreaker::new(options.circuit_breaker.clone(), clock.clone()),
            retry: RetryManager::new(options.retry.clone()),
            codec: CompressionCodec::new(&options.compression, options.enable_compression),
            monitor: monitor.clone(),
            quota: quota.clone(),
            enabled: AtomicBool::new(options.enabled),
        });

        let queue = options.enable_offline_queue.then(|| {
            let queue = OfflineQueue::new(
                options.offline_queue.clone(),
                store.clone(),
                clock.clone(),
                monitor.clone(),
            );
            queue.set_sink(delivery.clone());
            queue
        });

        let batcher = options.enable_batching.then(|| {
            BatchAccumulator::new(
                options.batch.clone(),
                Arc::new(BatchDispatch {
                    delivery: delivery.clone(),
                    queue: queue.clone(),
                }),
            )
        });

        let pipeline = Arc::new(ReportingPipeline {
            security: SecurityValidator::new(options.security.clone()),
            context: ContextManager::new(
                options.breadcrumbs.max_breadcrumbs,
                options.user_agent.clone(),
            ),
            rate_limiter: RateLimiter::new(options.rate_limit.clone(), clock.clone()),
            quota,
            monitor,
            delivery,
            queue,
            batcher,
            clock,
            maintenance: Mutex::new(None),
            options,
        });
        pipeline.start_maintenance();
        pipeline.sync_queue_size();

        info!(
            endpoint = %pipeline.options.endpoint,
            batching = pipeline.options.enable_batching,
            offline_queue = pipeline.options.enable_offline_queue,
            "Reporting pipeline ready"
        );
        Ok(pipeline)
    }
}

// ---------------------------------------------------------------------------
// ReportingPipeline
// ---------------------------------------------------------------------------

pub struct ReportingPipeline {
    options: Options,
    clock: Arc<dyn Clock>,
    security: SecurityValidator,
    context: ContextManager,
    rate_limiter: RateLimiter,
    quota: Arc<QuotaManager>,
    monitor: Arc<SdkMonitor>,
    delivery: Arc<Delivery>,
    queue: Option<Arc<OfflineQueue>>,
    batcher: Option<Arc<BatchAccumulator<Report>>>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl ReportingPipeline {
    pub fn builder(options: Options) -> PipelineBuilder {
        PipelineBuilder {
            options,
            transport: None,
            store: None,
            clock: None,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    // -----------------------------------------------------------------------
    // Submit
    // -----------------------------------------------------------------------

    /**
     * Runs one error through admission, report building, and delivery.
     *
     * Returns `Err` only for transient delivery failures when the offline
     * queue is disabled; every other failure becomes `Outcome::Dropped`.
     */
    pub async fn submit(&self, input: ErrorInput) -> Result<Outcome, DeliveryError> {
        self.monitor.record_error_reported();

        if !self.delivery.is_enabled() {
            return Ok(self.drop_report(DropReason::Disabled));
        }

        /* Admission */
        let fingerprint = self.rate_limiter.create_fingerprint(&input);
        if !self.rate_limiter.can_report_error(&fingerprint) {
            debug!(%fingerprint, "Dropping duplicate error");
            return Ok(self.drop_report(DropReason::Duplicate));
        }
        if !self.rate_limiter.can_make_request() {
            debug!("Dropping error, request window full");
            return Ok(self.drop_report(DropReason::RateLimited));
        }
        let estimated = estimate_size(&input);
        if let Err(e) = self.quota.can_send(estimated) {
            debug!("Dropping error: {}", e);
            let reason = match e {
                QuotaExceeded::PayloadTooLarge { .. } => DropReason::PayloadTooLarge,
                _ => DropReason::Quota,
            };
            return Ok(self.drop_report(reason));
        }
        self.rate_limiter.record_request(Some(&fingerprint));

        /* Report */
        let report = self.build_report(input);
        let encoded = match self.delivery.encode(&report) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Dropping unserializable report: {}", e);
                return Ok(self.drop_report(DropReason::Rejected));
            }
        };
        if let Err(e) = self.security.validate_payload_size(&encoded) {
            warn!("Dropping report: {}", e);
            return Ok(self.drop_report(DropReason::PayloadTooLarge));
        }

        /* Delivery */
        if let Some(queue) = self.queue.as_ref().filter(|q| !q.is_online()) {
            queue.enqueue(report);
            self.sync_queue_size();
            return Ok(Outcome::Queued);
        }

        if let Some(batcher) = &self.batcher {
            if let Err(e) = batcher.add(report, encoded.len()).await {
                debug!("Batch flush triggered by submit failed: {}", e);
            }
            self.sync_queue_size();
            return Ok(Outcome::Batched);
        }

        match self.delivery.send_one(&report).await {
            Ok(()) => Ok(Outcome::Sent),
            Err(e) => self.handle_failure(report, e),
        }
    }

    fn handle_failure(&self, report: Report, error: DeliveryError) -> Result<Outcome, DeliveryError> {
        match error {
            DeliveryError::Auth { .. } | DeliveryError::Disabled => {
                Ok(self.drop_report(DropReason::Disabled))
            }
            DeliveryError::PayloadTooLarge => {
                warn!("Collector rejected report as too large, dropping");
                Ok(self.drop_report(DropReason::PayloadTooLarge))
            }
            e if e.is_transient() => match &self.queue {
                Some(queue) => {
                    debug!("Delivery failed, queueing report: {}", e);
                    queue.enqueue(report);
                    self.sync_queue_size();
                    Ok(Outcome::Queued)
                }
                None => {
                    self.monitor.record_error_dropped(DropReason::Delivery);
                    Err(e)
                }
            },
            e => {
                warn!("Collector rejected report, dropping: {}", e);
                Ok(self.drop_report(DropReason::Rejected))
            }
        }
    }

    /* Sanitizes every untrusted string and merges the context snapshot. */
    fn build_report(&self, input: ErrorInput) -> Report {
        let now = self.clock.now_ms();
        let security = &self.security;

        let event_data = input.custom_data.as_ref().map(|m| security.sanitize_map(m));
        let mut context = self.context.snapshot(now, event_data.as_ref());
        context.custom_data = context.custom_data.map(|m| security.sanitize_map(&m));
        context.url = security.sanitize_string(&context.url);
        for crumb in &mut context.breadcrumbs {
            crumb.message = security.sanitize_string(&crumb.message);
            crumb.category = security.sanitize_string(&crumb.category);
            crumb.data = crumb.data.as_ref().map(|d| security.sanitize(d));
        }

        Report {
            message: security.sanitize_string(&input.message),
            stack_trace: input.stack_trace.map(|s| security.sanitize_string(&s)),
            error_type: security.sanitize_string(&input.error_type),
            environment: self.options.environment.clone(),
            timestamp: now,
            context,
            project_token: self.options.project_token.clone(),
        }
    }

    fn drop_report(&self, reason: DropReason) -> Outcome {
        self.monitor.record_error_dropped(reason);
        Outcome::Dropped(reason)
    }

    // -----------------------------------------------------------------------
    // Context passthrough
    // -----------------------------------------------------------------------

    pub fn add_breadcrumb(
        &self,
        message: impl Into<String>,
        category: impl Into<String>,
        level: BreadcrumbLevel,
        data: Option<Value>,
    ) {
        self.context
            .add_breadcrumb(message, category, level, data, self.clock.now_ms());
    }

    pub fn push_breadcrumb(&self, breadcrumb: Breadcrumb) {
        self.context.push_breadcrumb(breadcrumb);
    }

    pub fn set_user(&self, user: Option<User>) {
        self.context.set_user(user);
    }

    pub fn set_custom(&self, key: impl Into<String>, value: Value) {
        self.context.set_custom(key, value);
    }

    pub fn set_custom_map(&self, data: Map<String, Value>) {
        for (key, value) in data {
            self.context.set_custom(key, value);
        }
    }

    pub fn remove_custom(&self, key: &str) {
        self.context.remove_custom(key);
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.context.set_url(url);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.delivery.is_enabled()
    }

    /// Re-enables delivery, e.g. after fixing credentials.
    pub fn enable(&self) {
        self.delivery.set_enabled(true);
        self.delivery.circuit.force_close();
        info!("Reporting pipeline enabled");
    }

    pub fn disable(&self) {
        self.delivery.set_enabled(false);
        info!("Reporting pipeline disabled");
    }

    pub fn is_online(&self) -> bool {
        self.queue.as_ref().is_none_or(|q| q.is_online())
    }

    /// Going online processes the offline queue before returning.
    pub async fn set_online(&self, online: bool) {
        match &self.queue {
            Some(queue) => queue.set_online(online).await,
            None => debug!(online, "Connectivity change ignored, offline queue disabled"),
        }
        self.sync_queue_size();
    }

    /**
     * Sends the pending batch, then drains the offline queue.
     *
     * Returns the number of queued reports delivered.
     */
    pub async fn flush(&self) -> usize {
        if let Some(batcher) = &self.batcher {
            if let Err(e) = batcher.flush().await {
                debug!("Batch flush failed: {}", e);
            }
        }
        let drained = match &self.queue {
            Some(queue) => queue.drain().await,
            None => 0,
        };
        self.sync_queue_size();
        drained
    }

    /**
     * Returns every admission and delivery counter to a fresh state and
     * discards the offline queue. Context (user, custom data, breadcrumbs)
     * is kept.
     */
    pub fn reset(&self) {
        self.rate_limiter.reset();
        self.quota.reset();
        self.monitor.reset();
        self.delivery.circuit.force_close();
        if let Some(queue) = &self.queue {
            queue.clear();
        }
        self.sync_queue_size();
        info!("Reporting pipeline state reset");
    }

    /// Stops the maintenance task and flushes.
    pub async fn shutdown(&self) {
        if let Ok(mut task) = self.maintenance.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        self.flush().await;
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    pub fn health(&self) -> HealthReport {
        self.sync_queue_size();
        self.monitor.health()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.sync_queue_size();
        PipelineMetrics {
            enabled: self.is_enabled(),
            online: self.is_online(),
            monitor: self.monitor.snapshot(),
            rate_limit: self.rate_limiter.stats(),
            quota: self.quota.usage(),
            circuit: self.delivery.circuit.stats(),
            retry: self.delivery.retry.stats(),
            compression: self.delivery.codec.stats(),
            batch: self.batcher.as_ref().map(|b| b.stats()),
            queue: self.queue.as_ref().map(|q| q.stats()),
        }
    }

    fn sync_queue_size(&self) {
        let size = self.queue.as_ref().map_or(0, |q| q.len());
        self.monitor.set_queue_size(size);
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /**
     * Housekeeping run every `rate_limit.cleanup_interval_ms`: evicts expired
     * rate-limit entries, rolls quota windows, and retries the offline queue
     * while online.
     */
    pub async fn run_maintenance(&self) {
        self.rate_limiter.cleanup();
        self.quota.roll_over_windows();
        if let Some(queue) = self.queue.as_ref().filter(|q| q.is_online() && !q.is_empty()) {
            queue.process_queue().await;
        }
        self.sync_queue_size();
    }

    fn start_maintenance(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            debug!("No runtime, maintenance task not started");
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = Duration::from_millis(self.options.rate_limit.cleanup_interval_ms.max(1));
        let task = handle.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(pipeline) = weak.upgrade() else {
                    return;
                };
                pipeline.run_maintenance().await;
            }
        });

        if let Ok(mut slot) = self.maintenance.lock() {
            *slot = Some(task);
        }
    }
}

impl Drop for ReportingPipeline {
    fn drop(&mut self) {
        if let Ok(mut task) = self.maintenance.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

/* Rough pre-build size: the raw input plus fixed envelope overhead. */
fn estimate_size(input: &ErrorInput) -> usize {
    const ENVELOPE_OVERHEAD: usize = 512;
    serde_json::to_string(input)
        .map(|s| s.len())
        .unwrap_or(0)
        + ENVELOPE_OVERHEAD
}
