/*!
 * Flare Core: the error-reporting engine.
 *
 * Takes raw errors from the host application and gets them to the
 * collector despite flaky networks, collector outages and abusive error
 * loops. End users should depend on the `flare` facade crate, which
 * re-exports this crate and wires up addons (panic hook, etc.).
 *
 * # Module structure
 *
 * - `protocol/`: reports, the wire shape, stack traces
 * - `security`: URL/token validation and input sanitization
 * - `breadcrumbs`, `context`: ambient state attached to every report
 * - `admission/`: duplicate suppression, request window, quotas
 * - `delivery/`: compression, batching, circuit breaker, retry, offline queue
 * - `monitor`: self-health of the pipeline
 * - `pipeline`: the orchestrator tying the above together
 * - `transport/`: HTTP capability and the background worker
 * - `client`, `guard`: the handle applications hold, and flush-on-drop
 */

pub mod admission;
pub mod breadcrumbs;
mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
mod guard;
pub mod monitor;
pub mod pipeline;
pub mod protocol;
pub mod security;
pub mod store;
pub mod transport;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use breadcrumbs::BreadcrumbRing;
pub use client::Client;
pub use config::Options;
pub use error::{ConfigError, DeliveryError, ValidationError};
pub use guard::Guard;
pub use monitor::{DropReason, HealthReport, HealthStatus};
pub use pipeline::{Outcome, PipelineMetrics, ReportingPipeline};
pub use protocol::constants::SDK_VERSION;
pub use protocol::types::{Breadcrumb, BreadcrumbLevel, ErrorInput, Report, User};
pub use security::SecurityValidator;
