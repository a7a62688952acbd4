/*!
 * Admission control: decides whether a report may be sent at all.
 *
 * - `rate_limit`: sliding-window request cap and duplicate suppression
 * - `quota`: persisted burst / daily / monthly counters
 */

pub mod quota;
pub mod rate_limit;

pub use quota::{QuotaManager, QuotaUsage};
pub use rate_limit::{fingerprint, RateLimiter, RateLimiterStats};
