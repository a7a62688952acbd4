/**
 * Size-, byte- and time-bounded batching.
 *
 * `add` appends to the current batch and flushes inline once `batch_size`
 * items or `max_payload_size` bytes are reached. Otherwise a one-shot timer
 * flushes the partial batch `batch_timeout_ms` after the first item arrived.
 *
 * A flush swaps the current batch out under the lock before sending, so adds
 * that race with an in-flight send land in a fresh batch. The accumulator
 * never retries: the `BatchSink` owns the items it is handed and decides what
 * to do with them on failure.
 */
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::DeliveryError;

/// Receives every non-empty batch the accumulator flushes.
#[async_trait]
pub trait BatchSink<T>: Send + Sync {
    async fn send_batch(&self, items: Vec<T>) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub batches_sent: u64,
    pub items_sent: u64,
    pub failed_batches: u64,
    pub pending_items: usize,

    /// `items_sent / batches_sent`; failed batches are not counted.
    pub average_batch_size: f64,
}

struct Pending<T> {
    items: Vec<T>,
    bytes: usize,
}

impl<T> Default for Pending<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            bytes: 0,
        }
    }
}

pub struct BatchAccumulator<T> {
    config: BatchConfig,
    sink: Arc<dyn BatchSink<T>>,
    pending: Mutex<Pending<T>>,
    stats: Mutex<BatchStats>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BatchAccumulator<T> {
    pub fn new(config: BatchConfig, sink: Arc<dyn BatchSink<T>>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sink,
            pending: Mutex::new(Pending::default()),
            stats: Mutex::new(BatchStats::default()),
            timer: Mutex::new(None),
        })
    }

    /**
     * Adds an item whose serialized size is `size_bytes`.
     *
     * Returns the flush result when this add crossed a threshold, `Ok(())`
     * otherwise.
     */
    pub async fn add(self: &Arc<Self>, item: T, size_bytes: usize) -> Result<(), DeliveryError> {
        let full = {
            let Ok(mut pending) = self.pending.lock() else {
                return Ok(());
            };
            pending.items.push(item);
            pending.bytes += size_bytes;
            pending.items.len() >= self.config.batch_size
                || pending.bytes >= self.config.max_payload_size
        };

        if full {
            return self.flush().await;
        }
        self.arm_timer();
        Ok(())
    }

    /// Cancels the timer and sends whatever is pending. Empty batches are skipped.
    pub async fn flush(&self) -> Result<(), DeliveryError> {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
        self.send_pending().await
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BatchStats {
        let mut stats = self.stats.lock().map(|s| *s).unwrap_or_default();
        stats.pending_items = self.len();
        stats
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /* Arms the timeout unless one is already pending for this batch. */
    fn arm_timer(self: &Arc<Self>) {
        let Ok(mut timer) = self.timer.lock() else {
            return;
        };
        if timer.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            debug!("Batch: no runtime, timeout flush disabled");
            return;
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let timeout = Duration::from_millis(self.config.batch_timeout_ms);
        *timer = Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(acc) = weak.upgrade() else {
                return;
            };
            /* detach ourselves; aborting here would cancel this very task */
            if let Ok(mut timer) = acc.timer.lock() {
                timer.take();
            }
            if let Err(e) = acc.send_pending().await {
                warn!("Batch: timed flush failed: {}", e);
            }
        }));
    }

    async fn send_pending(&self) -> Result<(), DeliveryError> {
        let items = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending).items,
            Err(_) => return Ok(()),
        };
        if items.is_empty() {
            return Ok(());
        }

        let count = items.len();
        debug!(count, "Batch: flushing");
        let result = self.sink.send_batch(items).await;

        if let Ok(mut stats) = self.stats.lock() {
            match &result {
                Ok(()) => {
                    stats.batches_sent += 1;
                    stats.items_sent += count as u64;
                    stats.average_batch_size =
                        stats.items_sent as f64 / stats.batches_sent as f64;
                }
                Err(_) => stats.failed_batches += 1,
            }
        }
        result
    }
}

impl<T> Drop for BatchAccumulator<T> {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}
