/*!
 * Error taxonomy for the Flare pipeline.
 *
 * Every stage has its own error type so callers can match on exactly the
 * failures that stage produces:
 *
 * - `ConfigError`: raised at construction time; initialization must fail.
 * - `ValidationError`: untrusted input rejected by the `SecurityValidator`.
 * - `QuotaExceeded`: admission denied by the `QuotaManager`.
 * - `DeliveryError`: anything that went wrong on the send path.
 * - `CompressionError`, `StoreError`, `TransportError`: capability failures.
 */
use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Errors raised while building a pipeline or client from `Options`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The collector endpoint failed URL validation.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(ValidationError),

    /// The project token failed validation.
    #[error("invalid project token: {0}")]
    InvalidToken(ValidationError),

    /// A numeric limit was out of range (zero capacity, zero threshold, ...).
    #[error("invalid option `{field}`: {reason}")]
    InvalidOption { field: &'static str, reason: String },

    /// The options document could not be parsed.
    #[error("failed to parse options: {0}")]
    Parse(#[from] serde_json::Error),

    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    HttpClient(String),

    /// The configured storage directory could not be opened.
    #[error("failed to open storage: {0}")]
    Storage(#[from] StoreError),

    /// The background worker could not be started.
    #[error("failed to spawn worker: {0}")]
    Worker(String),
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Failure result of a `SecurityValidator` check, carrying a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

/// Why the `QuotaManager` refused a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QuotaExceeded {
    #[error("Burst limit exceeded")]
    Burst,

    #[error("Daily limit exceeded")]
    Daily,

    #[error("Monthly limit exceeded")]
    Monthly,

    #[error("Payload too large")]
    PayloadTooLarge { size: usize, limit: usize },
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Failures on the send path (transport, circuit breaker, pipeline state).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// 401/403: never retried; disables the pipeline.
    #[error("collector rejected credentials (HTTP {status})")]
    Auth { status: u16 },

    /// 413: never retried; the report is dropped.
    #[error("collector rejected payload as too large (HTTP 413)")]
    PayloadTooLarge,

    /// 429: retried with backoff.
    #[error("collector is rate limiting requests (HTTP 429)")]
    RateLimited,

    /// 408 or a transport-level timeout: retried with backoff.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure: retried with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// Any 5xx: retried with backoff.
    #[error("collector server error (HTTP {status})")]
    Server { status: u16 },

    /// Any other non-success status: not retried.
    #[error("collector rejected request (HTTP {status})")]
    Rejected { status: u16 },

    /// The circuit breaker refused the call without touching the network.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The pipeline was disabled (e.g. after an auth failure).
    #[error("pipeline is disabled")]
    Disabled,

    /// The report could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialization(String),
}

impl DeliveryError {
    /**
     * Classifies a non-success HTTP status code.
     *
     * Returns `None` for 2xx statuses.
     */
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            401 | 403 => Some(Self::Auth { status }),
            408 => Some(Self::Timeout),
            413 => Some(Self::PayloadTooLarge),
            429 => Some(Self::RateLimited),
            500..=599 => Some(Self::Server { status }),
            _ => Some(Self::Rejected { status }),
        }
    }

    /// Whether the `RetryManager` may attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Timeout | Self::Network(_) | Self::Server { .. }
        )
    }

    /// Whether the failure is worth parking in the offline queue.
    pub fn is_transient(&self) -> bool {
        self.is_retryable() || matches!(self, Self::CircuitOpen)
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => Self::Timeout,
            TransportError::Network(msg) => Self::Network(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Errors raised by a `Transport` implementation before any HTTP status exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Network(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressionError {
    /// Compression is disabled for this codec.
    #[error("compression is not supported")]
    Unsupported,

    /// The input could not be decompressed.
    #[error("corrupt compressed data: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
