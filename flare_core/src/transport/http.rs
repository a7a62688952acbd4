/*!
 * HTTP transport for sending reports to the Flare collector.
 *
 * Uses the async `reqwest` client. The pipeline runs on a small tokio runtime
 * owned by the background worker, so requests never block the host
 * application's threads.
 *
 * Design decisions:
 * - **Status passthrough**: any HTTP status is returned as a
 *   `TransportResponse`; the pipeline decides what 401/413/429/5xx mean.
 * - **Timeouts are errors**: a request that hits the connect or total
 *   timeout surfaces as `TransportError::Timeout`, which the retry layer
 *   treats like a 408.
 */

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Transport, TransportRequest, TransportResponse};
use crate::error::{ConfigError, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/**
 * Thin wrapper around `reqwest::Client`.
 *
 * A single instance is created when the pipeline is built and shared by the
 * direct, batch and offline-queue send paths.
 */
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /**
     * Creates a transport with:
     * - 10 s connect timeout
     * - 30 s total per request
     *
     * Connection pooling and keep-alive are handled by the client internally.
     */
    pub fn new() -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self.http.post(&request.url).body(request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".into());

        if !(200..300).contains(&status) {
            debug!(status, "Collector responded with HTTP {}: {}", status, body);
        }
        Ok(TransportResponse { status, body })
    }
}
