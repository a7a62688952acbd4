/**
 * Flare: error reporting SDK for Rust.
 *
 * This is the crate applications depend on. It re-exports the core API,
 * keeps one process-wide `Client`, and wires up addons (panic hook) through
 * a single `init` call.
 *
 * # Quick start
 *
 * ```ignore
 * fn main() -> Result<(), flare::ConfigError> {
 *     let _guard = flare::init(flare::CoreOptions {
 *         endpoint: "https://collector.example.com/api/errors".into(),
 *         project_token: "YOUR_PROJECT_TOKEN".into(),
 *         ..Default::default()
 *     })?;
 *
 *     flare::capture_message("Application started");
 *
 *     // panics are captured automatically (catch_panics defaults to true)
 *     Ok(())
 *     // _guard is dropped here → flush() is called automatically
 * }
 * ```
 */

use std::sync::OnceLock;

use serde_json::Value;

// ---------------------------------------------------------------------------
// Re-exports from flare_core: the public surface area
// ---------------------------------------------------------------------------

pub use flare_core::{
    Breadcrumb, BreadcrumbLevel, Client, ConfigError, DropReason, ErrorInput, Guard,
    HealthReport, HealthStatus, Outcome, PipelineMetrics, User, SDK_VERSION,
};
pub use flare_core::Options as CoreOptions;

/// Full configuration surface, for callers who need a component knob.
pub use flare_core::config;

static GLOBAL_CLIENT: OnceLock<Client> = OnceLock::new();

/// The client installed by `init`, if any.
pub fn client() -> Option<&'static Client> {
    GLOBAL_CLIENT.get()
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/**
 * SDK options: the core pipeline options plus addon flags.
 *
 * Implements `From<CoreOptions>`, so `init` accepts either.
 */
pub struct Options {
    pub core: CoreOptions,

    /// Install a panic hook that reports panics. Defaults to `true`.
    pub catch_panics: bool,
}

impl From<CoreOptions> for Options {
    fn from(core: CoreOptions) -> Self {
        Self {
            core,
            catch_panics: true,
        }
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

/**
 * Initializes the SDK.
 *
 * Fails if the options are invalid or `init` already succeeded in this
 * process. Returns a `Guard` that flushes pending reports when dropped;
 * keep it alive for the lifetime of the application.
 */
pub fn init(options: impl Into<Options>) -> Result<Guard, ConfigError> {
    let opts = options.into();

    if GLOBAL_CLIENT.get().is_some() {
        return Err(already_initialized());
    }

    let client = Client::new(opts.core)?;
    GLOBAL_CLIENT
        .set(client.clone())
        .map_err(|_| already_initialized())?;

    if opts.catch_panics {
        flare_panic::install(client.clone());
    }

    tracing::info!("Flare initialized");
    Ok(Guard::new(client))
}

fn already_initialized() -> ConfigError {
    ConfigError::InvalidOption {
        field: "init",
        reason: "Flare is already initialized".into(),
    }
}

// ---------------------------------------------------------------------------
// Free functions: silent no-ops before `init`
// ---------------------------------------------------------------------------

pub fn capture_error(error: &(dyn std::error::Error + 'static)) {
    if let Some(client) = client() {
        client.capture_error(error);
    }
}

pub fn capture_message(message: impl Into<String>) {
    if let Some(client) = client() {
        client.capture_message(message);
    }
}

pub fn capture(input: ErrorInput) {
    if let Some(client) = client() {
        client.capture(input);
    }
}

pub fn add_breadcrumb(
    message: impl Into<String>,
    category: impl Into<String>,
    level: BreadcrumbLevel,
    data: Option<Value>,
) {
    if let Some(client) = client() {
        client.add_breadcrumb(message, category, level, data);
    }
}

pub fn set_user(user: Option<User>) {
    if let Some(client) = client() {
        client.set_user(user);
    }
}

pub fn set_custom(key: impl Into<String>, value: Value) {
    if let Some(client) = client() {
        client.set_custom(key, value);
    }
}

pub fn set_online(online: bool) {
    if let Some(client) = client() {
        client.set_online(online);
    }
}

/**
 * Manually flushes pending reports, blocking until drained or timeout.
 *
 * Normally unnecessary: the `Guard` flushes on drop.
 */
pub fn flush() -> bool {
    client().is_none_or(|client| client.flush())
}

pub fn health() -> Option<HealthReport> {
    client().map(|client| client.health())
}
