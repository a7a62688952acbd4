/*!
 * Delivery: everything between an admitted `Report` and the collector.
 *
 * - `compression`: gzip + base64 envelope for large batches
 * - `batch`: size/byte/time bounded accumulation
 * - `circuit`: fail-fast when the collector keeps failing
 * - `retry`: exponential backoff with jitter
 * - `offline`: durable queue for reports that could not be sent
 * - `dispatch`: the shared send path wiring the above together
 */

pub mod batch;
pub mod circuit;
pub mod compression;
pub mod dispatch;
pub mod offline;
pub mod retry;

pub use batch::{BatchAccumulator, BatchSink, BatchStats};
pub use circuit::{CircuitBreaker, CircuitError, CircuitState, CircuitStats};
pub use compression::{CompressionCodec, CompressionStats};
pub use dispatch::{BatchDispatch, Delivery};
pub use offline::{OfflineQueue, QueueStats, QueuedReport, ReportSink};
pub use retry::{RetryManager, RetryStats, Retryable};
