/**
 * The Flare client: a cheap, cloneable handle to one reporting pipeline.
 *
 * Lifecycle:
 * 1. `Client::new(options)` validates the options, builds the pipeline on a
 *    private single-threaded tokio runtime, and spawns the worker thread.
 * 2. `capture_*` calls from any thread enqueue a `WorkerMsg` without
 *    blocking. When the channel is full, the report is dropped.
 * 3. `flush()` blocks (up to `flush_timeout_ms`) until everything enqueued
 *    before it has been processed and the pipeline has been flushed.
 * 4. When the last handle is dropped the channel disconnects and the worker
 *    shuts the pipeline down.
 */
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use serde_json::Value;
use tokio::runtime::Builder;
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::config::Options;
use crate::error::ConfigError;
use crate::monitor::HealthReport;
use crate::pipeline::{PipelineMetrics, ReportingPipeline};
use crate::protocol::types::{Breadcrumb, BreadcrumbLevel, ErrorInput, User};
use crate::store::Store;
use crate::transport::{FlushSignal, Transport, Worker, WorkerMsg};

#[derive(Clone)]
pub struct Client {
    sender: Sender<WorkerMsg>,
    pipeline: Arc<ReportingPipeline>,
    clock: Arc<dyn Clock>,
    flush_timeout: Duration,
}

impl Client {
    /// Creates a client with the default HTTP transport and store.
    pub fn new(options: Options) -> Result<Self, ConfigError> {
        Self::build(options, None, None)
    }

    /// Creates a client with caller-supplied capabilities, mostly for tests.
    pub fn with_transport(
        options: Options,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn Store>>,
    ) -> Result<Self, ConfigError> {
        Self::build(options, Some(transport), store)
    }

    fn build(
        options: Options,
        transport: Option<Arc<dyn Transport>>,
        store: Option<Arc<dyn Store>>,
    ) -> Result<Self, ConfigError> {
        let flush_timeout = Duration::from_millis(options.flush_timeout_ms);
        let capacity = options.worker_queue_capacity;

        /*
         * One runtime thread runs timers (batch timeout, queue retry,
         * maintenance) while the worker thread blocks on the channel.
         */
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("flare-runtime")
            .enable_all()
            .build()
            .map_err(|e| ConfigError::Worker(e.to_string()))?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pipeline = {
            let _entered = runtime.enter();
            let mut builder = ReportingPipeline::builder(options).clock(clock.clone());
            if let Some(transport) = transport {
                builder = builder.transport(transport);
            }
            if let Some(store) = store {
                builder = builder.store(store);
            }
            builder.build()?
        };

        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Worker::spawn(receiver, pipeline.clone(), runtime).map_err(ConfigError::Worker)?;

        Ok(Self {
            sender,
            pipeline,
            clock,
            flush_timeout,
        })
    }

    // -----------------------------------------------------------------------
    // Capture
    // -----------------------------------------------------------------------

    /// Reports an error value, capturing a backtrace at the call site.
    pub fn capture_error(&self, error: &(dyn Error + 'static)) {
        self.capture(ErrorInput::from_error(error));
    }

    pub fn capture_message(&self, message: impl Into<String>) {
        self.capture(ErrorInput::message(message));
    }

    /// Enqueues a report without blocking. Dropped if the channel is full.
    pub fn capture(&self, input: ErrorInput) {
        self.enqueue(WorkerMsg::Submit(input));
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    pub fn add_breadcrumb(
        &self,
        message: impl Into<String>,
        category: impl Into<String>,
        level: BreadcrumbLevel,
        data: Option<Value>,
    ) {
        self.enqueue(WorkerMsg::Breadcrumb(Breadcrumb {
            message: message.into(),
            category: category.into(),
            level,
            timestamp: self.clock.now_ms(),
            data,
        }));
    }

    pub fn set_user(&self, user: Option<User>) {
        self.enqueue(WorkerMsg::SetUser(user));
    }

    pub fn set_custom(&self, key: impl Into<String>, value: Value) {
        self.enqueue(WorkerMsg::SetCustom(key.into(), value));
    }

    pub fn remove_custom(&self, key: impl Into<String>) {
        self.enqueue(WorkerMsg::RemoveCustom(key.into()));
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.enqueue(WorkerMsg::SetUrl(url.into()));
    }

    /// Connectivity hint; going online replays the offline queue.
    pub fn set_online(&self, online: bool) {
        self.enqueue(WorkerMsg::SetOnline(online));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /**
     * Blocks until everything enqueued so far has been processed, the
     * pending batch sent and the offline queue drained, or until
     * `flush_timeout_ms` elapses.
     *
     * Returns `true` if the flush completed in time.
     */
    pub fn flush(&self) -> bool {
        let signal = Arc::new(FlushSignal::new());
        match self
            .sender
            .send_timeout(WorkerMsg::Flush(signal.clone()), self.flush_timeout)
        {
            Ok(()) => signal.wait_timeout(self.flush_timeout),
            Err(_) => false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pipeline.is_enabled()
    }

    pub fn enable(&self) {
        self.pipeline.enable();
    }

    pub fn disable(&self) {
        self.pipeline.disable();
    }

    pub fn health(&self) -> HealthReport {
        self.pipeline.health()
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.pipeline.metrics()
    }

    fn enqueue(&self, msg: WorkerMsg) {
        match self.sender.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Report queue is full, dropping message");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Worker thread has shut down, dropping message");
            }
        }
    }
}
