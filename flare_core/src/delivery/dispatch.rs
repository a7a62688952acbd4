/**
 * The low-level send path shared by direct sends, batches and the offline
 * queue.
 *
 * Every request goes through `circuit.execute(retry.execute(transport))`:
 * the breaker sees one outcome per logical send, after retries are spent.
 * The outcome is then reported to the monitor and, on success, to the quota
 * counters. An auth failure switches the shared `enabled` flag off.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use super::batch::BatchSink;
use super::circuit::CircuitBreaker;
use super::compression::CompressionCodec;
use super::offline::{OfflineQueue, ReportSink};
use super::retry::RetryManager;
use crate::admission::QuotaManager;
use crate::error::DeliveryError;
use crate::monitor::{DropReason, SdkMonitor};
use crate::protocol::constants::{HEADER_BATCH_SIZE, SDK_VERSION};
use crate::protocol::types::{Report, WireReport};
use crate::transport::{Transport, TransportRequest};

pub struct Delivery {
    pub(crate) endpoint: String,
    pub(crate) batch_endpoint: String,
    pub(crate) project_token: String,
    pub(crate) commit_hash: Option<String>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) circuit: CircuitBreaker,
    pub(crate) retry: RetryManager,
    pub(crate) codec: CompressionCodec,
    pub(crate) monitor: Arc<SdkMonitor>,
    pub(crate) quota: Arc<QuotaManager>,
    pub(crate) enabled: AtomicBool,
}

impl Delivery {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Serializes a report exactly as it goes on the wire.
    pub fn encode(&self, report: &Report) -> Result<String, DeliveryError> {
        serde_json::to_string(&WireReport::from_report(report, self.commit_hash.as_deref()))
            .map_err(|e| DeliveryError::Serialization(e.to_string()))
    }

    pub async fn send_one(&self, report: &Report) -> Result<(), DeliveryError> {
        let body = self.encode(report)?.into_bytes();
        let request = TransportRequest {
            url: self.endpoint.clone(),
            headers: self.base_headers(),
            body,
        };
        self.dispatch(request, 1).await
    }

    /**
     * Sends several reports in one request to the batch endpoint.
     *
     * Bodies at or above the compression threshold are gzipped and wrapped as
     * `{"compressed": true, "data": ...}`; if compression fails the plain
     * JSON array is sent instead.
     */
    pub async fn send_many(&self, reports: &[Report]) -> Result<(), DeliveryError> {
        let commit = self.commit_hash.as_deref();
        let wire: Vec<WireReport> = reports
            .iter()
            .map(|r| WireReport::from_report(r, commit))
            .collect();
        let json =
            serde_json::to_vec(&wire).map_err(|e| DeliveryError::Serialization(e.to_string()))?;

        let mut headers = self.base_headers();
        headers.push((HEADER_BATCH_SIZE.to_string(), reports.len().to_string()));

        let mut body = json;
        if self.codec.should_compress(&body) {
            match self.codec.encode_body(&body) {
                Ok(envelope) => match serde_json::to_vec(&envelope) {
                    Ok(encoded) => {
                        body = encoded;
                        headers.push(("Content-Encoding".to_string(), "gzip".to_string()));
                    }
                    Err(e) => warn!("Batch: compressed body not serializable, sending plain: {}", e),
                },
                Err(e) => warn!("Batch: compression failed, sending plain: {}", e),
            }
        }

        let request = TransportRequest {
            url: self.batch_endpoint.clone(),
            headers,
            body,
        };
        self.dispatch(request, reports.len()).await
    }

    fn base_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.project_token),
            ),
            ("User-Agent".to_string(), SDK_VERSION.to_string()),
        ]
    }

    async fn dispatch(&self, request: TransportRequest, count: usize) -> Result<(), DeliveryError> {
        if !self.is_enabled() {
            return Err(DeliveryError::Disabled);
        }

        let bytes = request.body.len();
        let started = Instant::now();
        let result: Result<(), DeliveryError> = self
            .circuit
            .execute(|| self.retry.execute(|| self.attempt(&request)))
            .await
            .map_err(DeliveryError::from);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(()) => {
                debug!(count, bytes, "Delivered");
                self.monitor.record_request_success(elapsed_ms, bytes);
                let per_report = bytes / count.max(1);
                for _ in 0..count {
                    self.quota.record_sent(per_report);
                }
            }
            Err(DeliveryError::CircuitOpen) => {
                debug!("Delivery skipped, circuit open");
            }
            Err(e) => {
                self.monitor.record_request_failure(elapsed_ms, &e.to_string());
                if e.is_auth() {
                    error!("Collector rejected credentials, disabling pipeline: {}", e);
                    self.set_enabled(false);
                }
            }
        }
        result
    }

    async fn attempt(&self, request: &TransportRequest) -> Result<(), DeliveryError> {
        let response = self.transport.send(request.clone()).await?;
        match DeliveryError::from_status(response.status) {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[async_trait]
impl ReportSink for Delivery {
    async fn send_report(&self, report: &Report) -> Result<(), DeliveryError> {
        self.send_one(report).await
    }
}

/**
 * Batch sink used by the pipeline: sends through `Delivery` and parks a
 * failed batch's reports in the offline queue when the failure is transient.
 */
pub struct BatchDispatch {
    pub(crate) delivery: Arc<Delivery>,
    pub(crate) queue: Option<Arc<OfflineQueue>>,
}

#[async_trait]
impl BatchSink<Report> for BatchDispatch {
    async fn send_batch(&self, items: Vec<Report>) -> Result<(), DeliveryError> {
        let result = self.delivery.send_many(&items).await;
        if let Err(e) = &result {
            match &self.queue {
                Some(queue) if e.is_transient() => {
                    warn!(count = items.len(), "Batch failed, queueing reports: {}", e);
                    for report in items {
                        queue.enqueue(report);
                    }
                }
                _ => {
                    warn!(count = items.len(), "Batch failed, reports dropped: {}", e);
                    let reason = if e.is_transient() {
                        DropReason::Delivery
                    } else {
                        DropReason::Rejected
                    };
                    for _ in 0..items.len() {
                        self.delivery.monitor.record_error_dropped(reason);
                    }
                }
            }
        }
        result
    }
}
