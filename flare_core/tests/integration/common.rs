//! Shared helpers: a scripted, recording `Transport` and pipeline builders.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use flare_core::clock::{Clock, ManualClock};
use flare_core::error::TransportError;
use flare_core::store::{FileStore, Store};
use flare_core::transport::{Transport, TransportRequest, TransportResponse};
use flare_core::{Options, ReportingPipeline};

pub const START_MS: u64 = 1_717_200_000_000;

/// Replies with scripted statuses in order, then with `fallback`.
pub struct RecordingTransport {
    script: Mutex<VecDeque<u16>>,
    fallback: Mutex<u16>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl RecordingTransport {
    pub fn new(fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, statuses: &[u16]) {
        self.script.lock().unwrap().extend(statuses.iter().copied());
    }

    pub fn set_fallback(&self, status: u16) {
        *self.fallback.lock().unwrap() = status;
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// `message` of every single-report request, in send order.
    pub fn messages(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
            .filter_map(|body| body["message"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        let scripted = self.script.lock().unwrap().pop_front();
        let status = scripted.unwrap_or_else(|| *self.fallback.lock().unwrap());
        Ok(TransportResponse {
            status,
            body: String::new(),
        })
    }
}

/// Valid options with fast retries.
pub fn options() -> Options {
    let mut options = Options {
        endpoint: "https://collector.example.com/api/errors".into(),
        project_token: "project-token-123".into(),
        environment: "test".into(),
        ..Default::default()
    };
    options.retry.initial_delay_ms = 10;
    options.retry.max_delay_ms = 20;
    options
}

pub fn build(
    options: Options,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
    store: Option<Arc<dyn Store>>,
) -> Arc<ReportingPipeline> {
    let clock: Arc<dyn Clock> = clock;
    let mut builder = ReportingPipeline::builder(options)
        .transport(transport)
        .clock(clock);
    if let Some(store) = store {
        builder = builder.store(store);
    }
    builder.build().unwrap()
}

pub fn file_store(dir: &Path) -> Arc<dyn Store> {
    Arc::new(FileStore::open(dir).unwrap())
}
