/**
 * Durable queue for reports that could not be delivered.
 *
 * Records are kept oldest-first and persisted to the `Store` after every
 * mutation. Limits:
 *
 * - `max_queue_size`: the oldest records are dropped on overflow.
 * - `max_age_ms`: expired records are swept on every mutation.
 * - `max_attempts`: a record that already used all its attempts and fails
 *   again is dropped instead of re-queued.
 *
 * Every dropped record is also reported to the `SdkMonitor`.
 *
 * A processing pass takes up to `process_batch_size` records from the front
 * and sends them one by one. Failed records go back to the front in their
 * original order. An open circuit ends the pass early and puts the untried
 * records back without spending an attempt. If records remain afterwards and
 * the queue is still online, another pass is scheduled `retry_interval_ms`
 * later. Scheduled passes are never aborted mid-send; they stop on their own
 * once the queue is empty or offline.
 */
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::OfflineQueueConfig;
use crate::error::DeliveryError;
use crate::monitor::{DropReason, SdkMonitor};
use crate::protocol::constants::QUEUE_STORAGE_KEY;
use crate::protocol::types::Report;
use crate::store::Store;

/// Delivers a single queued report.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn send_report(&self, report: &Report) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedReport {
    pub id: String,
    pub report: Report,
    pub enqueued_at: u64,
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub enqueued: u64,
    pub sent: u64,
    pub dropped_overflow: u64,
    pub dropped_expired: u64,
    pub dropped_attempts: u64,
    pub dropped_rejected: u64,
}

/// Tally of a single processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub sent: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// Another pass was already running; nothing was attempted.
    pub busy: bool,
}

pub struct OfflineQueue {
    config: OfflineQueueConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
    monitor: Arc<SdkMonitor>,
    records: Mutex<VecDeque<QueuedReport>>,
    sink: RwLock<Option<Arc<dyn ReportSink>>>,
    online: AtomicBool,
    /* Held for the whole of a pass. */
    processing: AsyncMutex<()>,
    next_id: AtomicU64,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    stats: Mutex<QueueStats>,
}

impl OfflineQueue {
    /// Restores persisted records; records that fail to parse are discarded.
    pub fn new(
        config: OfflineQueueConfig,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        monitor: Arc<SdkMonitor>,
    ) -> Arc<Self> {
        let records = load_records(store.as_ref());
        let next_id = next_sequence(&records);
        let queue = Arc::new(Self {
            config,
            clock,
            store,
            monitor,
            records: Mutex::new(records),
            sink: RwLock::new(None),
            online: AtomicBool::new(true),
            processing: AsyncMutex::new(()),
            next_id: AtomicU64::new(next_id),
            retry_timer: Mutex::new(None),
            stats: Mutex::new(QueueStats::default()),
        });
        queue.mutate(|_| ());
        queue
    }

    pub fn set_sink(&self, sink: Arc<dyn ReportSink>) {
        if let Ok(mut slot) = self.sink.write() {
            *slot = Some(sink);
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records connectivity; going online runs a processing pass immediately.
    pub async fn set_online(self: &Arc<Self>, online: bool) {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!(queued = self.len(), "Offline queue: back online");
            self.process_queue().await;
        } else if !online && was_online {
            info!("Offline queue: went offline");
        }
    }

    pub fn enqueue(&self, report: Report) {
        let now = self.clock.now_ms();
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = QueuedReport {
            id: format!("{now}-{seq}"),
            report,
            enqueued_at: now,
            attempts: 0,
            last_attempt: None,
        };

        let max = self.config.max_queue_size;
        let overflow = self.mutate(|records| {
            records.push_back(record);
            let mut dropped = 0u64;
            while records.len() > max {
                records.pop_front();
                dropped += 1;
            }
            dropped
        });

        self.bump(|s| {
            s.enqueued += 1;
            s.dropped_overflow += overflow;
        });
        if overflow > 0 {
            warn!(dropped = overflow, "Offline queue full, oldest reports dropped");
            self.record_drops(DropReason::QueueOverflow, overflow);
        }
    }

    /**
     * Runs one processing pass.
     *
     * No-op while another pass is running, without a sink, or while offline.
     */
    pub async fn process_queue(self: &Arc<Self>) -> PassOutcome {
        let outcome = self.run_pass().await;
        if !self.is_empty() && self.is_online() && self.has_sink() {
            self.schedule_retry();
        }
        outcome
    }

    /**
     * Runs passes back to back until the queue is empty or a pass makes no
     * progress. Used by `flush`.
     *
     * Waits for a pass that is already in flight instead of skipping it.
     */
    pub async fn drain(self: &Arc<Self>) -> usize {
        let mut total = 0;
        loop {
            let outcome = {
                let _pass = self.processing.lock().await;
                self.pass().await
            };
            total += outcome.sent;
            if self.is_empty() || outcome.sent == 0 {
                break;
            }
        }
        total
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<QueuedReport> {
        self.records
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.mutate(|records| records.clear());
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = self.stats.lock().map(|s| *s).unwrap_or_default();
        stats.size = self.len();
        stats
    }

    // -----------------------------------------------------------------------
    // Processing
    // -----------------------------------------------------------------------

    async fn run_pass(&self) -> PassOutcome {
        let Ok(_pass) = self.processing.try_lock() else {
            return PassOutcome {
                busy: true,
                ..PassOutcome::default()
            };
        };
        self.pass().await
    }

    /* Caller holds `processing`. */
    async fn pass(&self) -> PassOutcome {
        if !self.is_online() {
            return PassOutcome::default();
        }
        let Some(sink) = self.sink.read().ok().and_then(|s| s.clone()) else {
            return PassOutcome::default();
        };

        let slice_len = self.config.process_batch_size.max(1);
        let slice: Vec<QueuedReport> = self.mutate(|records| {
            let n = slice_len.min(records.len());
            records.drain(..n).collect()
        });
        if slice.is_empty() {
            return PassOutcome::default();
        }

        debug!(count = slice.len(), "Offline queue: processing");
        let mut outcome = PassOutcome::default();
        let mut failed = Vec::new();

        let mut pending = slice.into_iter();
        while let Some(mut record) = pending.next() {
            match sink.send_report(&record.report).await {
                Ok(()) => outcome.sent += 1,
                Err(DeliveryError::CircuitOpen) => {
                    debug!(
                        untried = pending.len() + 1,
                        "Offline queue: circuit open, ending pass"
                    );
                    failed.push(record);
                    failed.extend(pending.by_ref());
                }
                Err(e) if !e.is_transient() => {
                    warn!(id = %record.id, "Offline queue: report rejected, dropping: {}", e);
                    self.bump(|s| s.dropped_rejected += 1);
                    let reason = match e {
                        DeliveryError::Auth { .. } | DeliveryError::Disabled => {
                            DropReason::Disabled
                        }
                        _ => DropReason::Rejected,
                    };
                    self.record_drops(reason, 1);
                    outcome.dropped += 1;
                }
                Err(e) if record.attempts >= self.config.max_attempts => {
                    warn!(
                        id = %record.id,
                        attempts = record.attempts,
                        "Offline queue: attempts exhausted, dropping: {}",
                        e
                    );
                    self.bump(|s| s.dropped_attempts += 1);
                    self.record_drops(DropReason::MaxAttempts, 1);
                    outcome.dropped += 1;
                }
                Err(e) => {
                    debug!(id = %record.id, "Offline queue: send failed: {}", e);
                    record.attempts += 1;
                    record.last_attempt = Some(self.clock.now_ms());
                    failed.push(record);
                }
            }
        }

        outcome.requeued = failed.len();
        self.mutate(|records| {
            for record in failed.into_iter().rev() {
                records.push_front(record);
            }
        });
        self.bump(|s| s.sent += outcome.sent as u64);
        outcome
    }

    fn has_sink(&self) -> bool {
        self.sink.read().map(|s| s.is_some()).unwrap_or(false)
    }

    fn schedule_retry(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let Ok(mut timer) = self.retry_timer.lock() else {
            return;
        };
        if timer.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = Duration::from_millis(self.config.retry_interval_ms);
        *timer = Some(handle.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(queue) = weak.upgrade() else {
                    return;
                };
                queue.run_pass().await;
                if queue.is_empty() || !queue.is_online() {
                    if let Ok(mut timer) = queue.retry_timer.lock() {
                        timer.take();
                    }
                    return;
                }
            }
        }));
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /* Sweeps expired records, applies `f`, and persists. */
    fn mutate<R>(&self, f: impl FnOnce(&mut VecDeque<QueuedReport>) -> R) -> R {
        let now = self.clock.now_ms();
        let max_age = self.config.max_age_ms;

        let Ok(mut records) = self.records.lock() else {
            let mut scratch = VecDeque::new();
            return f(&mut scratch);
        };
        let before = records.len();
        records.retain(|r| now.saturating_sub(r.enqueued_at) < max_age);
        let expired = (before - records.len()) as u64;

        let result = f(&mut records);

        let json = serde_json::to_string(&*records);
        drop(records);

        if expired > 0 {
            debug!(expired, "Offline queue: expired reports swept");
            self.bump(|s| s.dropped_expired += expired);
            self.record_drops(DropReason::Expired, expired);
        }
        match json {
            Ok(json) => {
                if let Err(e) = self.store.set(QUEUE_STORAGE_KEY, &json) {
                    warn!("Offline queue: failed to persist: {}", e);
                }
            }
            Err(e) => warn!("Offline queue: failed to serialize: {}", e),
        }
        result
    }

    fn bump(&self, f: impl FnOnce(&mut QueueStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn record_drops(&self, reason: DropReason, count: u64) {
        for _ in 0..count {
            self.monitor.record_error_dropped(reason);
        }
    }
}

impl Drop for OfflineQueue {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.retry_timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

/* Ids are `<enqueued_at>-<seq>`; continue after the highest restored seq. */
fn next_sequence(records: &VecDeque<QueuedReport>) -> u64 {
    records
        .iter()
        .filter_map(|r| r.id.rsplit_once('-')?.1.parse::<u64>().ok())
        .max()
        .map_or(0, |seq| seq + 1)
}

fn load_records(store: &dyn Store) -> VecDeque<QueuedReport> {
    let Some(raw) = store.get(QUEUE_STORAGE_KEY) else {
        return VecDeque::new();
    };
    let entries: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Offline queue: discarding unreadable persisted queue: {}", e);
            return VecDeque::new();
        }
    };

    let total = entries.len();
    let records: VecDeque<QueuedReport> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect();
    if records.len() < total {
        warn!(
            discarded = total - records.len(),
            "Offline queue: discarded malformed persisted records"
        );
    }
    records
}
