/**
 * Background worker thread that owns the reporting pipeline's runtime.
 *
 * Architecture overview:
 *
 * ```text
 *  ┌──────────────┐     bounded channel     ┌─────────────────┐
 *  │  User code   │ ───── WorkerMsg ──────► │  Worker thread  │
 *  │  (any thread)│                         │  (single)       │
 *  └──────────────┘                         └───────┬─────────┘
 *                                                   │ block_on
 *                                           ReportingPipeline::submit()
 *                                                   │
 *                                           ┌───────▼───────┐
 *                                           │ tokio runtime │──► batch timer,
 *                                           │  (1 thread)   │    queue retry,
 *                                           └───────────────┘    maintenance
 * ```
 *
 * Messages are handled strictly in channel order, so a `Flush` is only
 * signalled after every submit sent before it has gone through the
 * pipeline. Timers live on the runtime's own thread and keep running while
 * the worker waits on the channel.
 *
 * The loop exits when the channel disconnects (all `Client` handles
 * dropped); the pipeline is then shut down, which flushes once more.
 */
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;
use serde_json::Value;
use tokio::runtime::Runtime;
use tracing::{debug, error};

use crate::pipeline::ReportingPipeline;
use crate::protocol::types::{Breadcrumb, ErrorInput, User};

// ---------------------------------------------------------------------------
// WorkerMsg
// ---------------------------------------------------------------------------

/**
 * Messages that flow from `Client` handles to the worker.
 *
 * Context updates travel through the same channel as submits so that an
 * error captured after `set_user` always sees that user.
 */
pub enum WorkerMsg {
    Submit(ErrorInput),
    Breadcrumb(Breadcrumb),
    SetUser(Option<User>),
    SetCustom(String, Value),
    RemoveCustom(String),
    SetUrl(String),
    SetOnline(bool),

    /**
     * Signalled once everything queued before it has been processed and
     * the pipeline has been flushed.
     */
    Flush(Arc<FlushSignal>),
}

// ---------------------------------------------------------------------------
// FlushSignal
// ---------------------------------------------------------------------------

/**
 * Blocks the caller of `flush()` until the worker has drained everything
 * before the flush request.
 *
 * A `Mutex<bool>` + `Condvar` pair: the worker flips the flag and notifies,
 * the caller waits with a timeout.
 */
pub struct FlushSignal {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl Default for FlushSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl FlushSignal {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        if let Ok(mut done) = self.mutex.lock() {
            *done = true;
            self.condvar.notify_all();
        }
    }

    /// `true` if the flush completed before `timeout` elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Ok(guard) = self.mutex.lock() else {
            return false;
        };
        match self.condvar.wait_timeout_while(guard, timeout, |done| !*done) {
            Ok((_, result)) => !result.timed_out(),
            Err(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct Worker;

impl Worker {
    /**
     * Spawns the worker thread. It takes ownership of the runtime, so the
     * pipeline's background tasks stop when the worker exits.
     */
    pub fn spawn(
        receiver: Receiver<WorkerMsg>,
        pipeline: Arc<ReportingPipeline>,
        runtime: Runtime,
    ) -> Result<(), String> {
        thread::Builder::new()
            .name("flare-worker".into())
            .spawn(move || {
                /*
                 * A panic inside the pipeline must not take the host process
                 * down with it; log and stop accepting reports instead.
                 */
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    Self::run_loop(&receiver, &pipeline, &runtime);
                }));

                if result.is_err() {
                    error!("Worker thread panicked, reports will be dropped");
                }
                runtime.shutdown_timeout(Duration::from_secs(1));
            })
            .map(|_| ())
            .map_err(|e| format!("Failed to spawn worker thread: {e}"))
    }

    fn run_loop(receiver: &Receiver<WorkerMsg>, pipeline: &ReportingPipeline, runtime: &Runtime) {
        while let Ok(msg) = receiver.recv() {
            match msg {
                WorkerMsg::Submit(input) => match runtime.block_on(pipeline.submit(input)) {
                    Ok(outcome) => debug!(?outcome, "Report processed"),
                    Err(e) => debug!("Report not delivered: {}", e),
                },
                WorkerMsg::Breadcrumb(crumb) => pipeline.push_breadcrumb(crumb),
                WorkerMsg::SetUser(user) => pipeline.set_user(user),
                WorkerMsg::SetCustom(key, value) => pipeline.set_custom(key, value),
                WorkerMsg::RemoveCustom(key) => pipeline.remove_custom(&key),
                WorkerMsg::SetUrl(url) => pipeline.set_url(url),
                WorkerMsg::SetOnline(online) => runtime.block_on(pipeline.set_online(online)),
                WorkerMsg::Flush(signal) => {
                    runtime.block_on(pipeline.flush());
                    signal.notify();
                }
            }
        }

        debug!("Client handles dropped, shutting down pipeline");
        runtime.block_on(pipeline.shutdown());
    }
}
