/**
 * Transport layer: the HTTP capability and the background worker thread.
 *
 * - `Transport`: the injected "send bytes to a URL" capability. The core
 *   never talks to the network directly, so tests swap in a recording fake.
 * - `http`: the production implementation on top of `reqwest`.
 * - `worker`: background thread, bounded channel, flush signaling.
 */
use async_trait::async_trait;

use crate::error::TransportError;

pub mod http;
pub mod worker;

pub use http::HttpTransport;
pub use worker::{FlushSignal, Worker, WorkerMsg};

/// A fully prepared POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: String,
    pub body: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What came back from the collector. Non-2xx statuses are not errors here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/**
 * Delivers a request and reports the HTTP status.
 *
 * Implementations return `Err` only when no status exists (timeouts,
 * connection failures). Status interpretation belongs to the caller.
 */
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
