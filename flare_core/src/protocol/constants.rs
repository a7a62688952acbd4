/**
 * SDK-wide constants.
 *
 * These values identify the SDK to the collector and name the keys used
 * in the durable store.
 */

/// SDK version string sent as the `User-Agent` of every request.
/// Derived at compile time from the `flare_core` package version in `Cargo.toml`.
pub const SDK_VERSION: &str = concat!("flare-rust/", env!("CARGO_PKG_VERSION"));

/// Header carrying the number of reports in a batch request.
pub const HEADER_BATCH_SIZE: &str = "X-Batch-Size";

/// Store key for the persisted quota counters.
pub const QUOTA_STORAGE_KEY: &str = "flare_quota_state";

/// Store key for the persisted offline queue.
pub const QUEUE_STORAGE_KEY: &str = "flare_offline_queue";
