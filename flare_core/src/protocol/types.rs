/**
 * Core type definitions for the Flare pipeline.
 *
 * `Report` is the immutable unit the pipeline delivers. It is built once from
 * an `ErrorInput` plus a `Context` snapshot, and serialized for the wire as a
 * `WireReport`, the exact JSON body the collector expects:
 *
 * ```json
 * {
 *   "message": "...", "exception_class": "TypeError", "stack_trace": "...",
 *   "file": "src/main.rs", "line": 42, "project": "<token>",
 *   "environment": "production", "timestamp": "2024-01-01T00:00:00.000Z",
 *   "user_agent": "...", "url": "...", "custom_data": { "breadcrumbs": [] }
 * }
 * ```
 */
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::stack;

// ---------------------------------------------------------------------------
// Breadcrumbs
// ---------------------------------------------------------------------------

/**
 * Severity level of a breadcrumb.
 *
 * Serialized as lowercase strings: `"debug"`, `"info"`, `"warning"`, `"error"`.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreadcrumbLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl BreadcrumbLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreadcrumbLevel::Debug => "debug",
            BreadcrumbLevel::Info => "info",
            BreadcrumbLevel::Warning => "warning",
            BreadcrumbLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for BreadcrumbLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single contextual event recorded before an error happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub message: String,

    /// Free-form grouping, e.g. `"navigation"`, `"http"`, `"console"`.
    pub category: String,

    pub level: BreadcrumbLevel,

    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ---------------------------------------------------------------------------
// User / Context
// ---------------------------------------------------------------------------

/// The affected user at the time of the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/**
 * Ambient state captured at report-creation time.
 *
 * Breadcrumbs are copied into the snapshot, so later additions to the ring
 * never alter an in-flight report.
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub url: String,

    pub user_agent: String,

    pub timestamp: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,

    #[serde(default)]
    pub breadcrumbs: Vec<Breadcrumb>,
}

// ---------------------------------------------------------------------------
// ErrorInput: what the embedding application hands to `submit`
// ---------------------------------------------------------------------------

/**
 * A raw error as supplied by the embedding application.
 *
 * Nothing here is trusted: the pipeline sanitizes every string and custom
 * data value before it becomes part of a `Report`.
 */
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorInput {
    pub message: String,

    /// Error class name, e.g. `"TypeError"`, `"io::Error"`, `"panic"`.
    pub error_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    /// Per-event data merged over the ambient custom data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<Map<String, Value>>,

    /// Extra discriminator mixed into the fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint_extra: Option<String>,
}

impl ErrorInput {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            ..Default::default()
        }
    }

    /// A plain message report with no stack trace.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new("message", message)
    }

    /**
     * Builds an input from any `std::error::Error`, capturing a backtrace at
     * the call site.
     */
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            message: error.to_string(),
            error_type: short_type_name(error),
            stack_trace: stack::capture(),
            ..Default::default()
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_custom_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_data
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_fingerprint_extra(mut self, extra: impl Into<String>) -> Self {
        self.fingerprint_extra = Some(extra.into());
        self
    }
}

/// `std::io::Error` → `"io::Error"`; falls back to `"Error"`.
fn short_type_name(error: &(dyn std::error::Error + 'static)) -> String {
    if error.is::<std::io::Error>() {
        return "io::Error".to_string();
    }
    if error.is::<std::fmt::Error>() {
        return "fmt::Error".to_string();
    }
    "Error".to_string()
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// The immutable unit of delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    pub error_type: String,

    pub environment: String,

    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,

    pub context: Context,

    pub project_token: String,
}

// ---------------------------------------------------------------------------
// WireReport: the request body
// ---------------------------------------------------------------------------

/// JSON body for a single report, as accepted by the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireReport {
    pub message: String,

    pub exception_class: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    pub project: String,

    pub environment: String,

    /// ISO-8601, UTC, millisecond precision.
    pub timestamp: String,

    #[serde(rename = "commitHash", skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,

    pub user_agent: String,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,

    pub custom_data: Map<String, Value>,
}

impl WireReport {
    pub fn from_report(report: &Report, commit_hash: Option<&str>) -> Self {
        let location = report
            .stack_trace
            .as_deref()
            .and_then(stack::top_frame_location);

        let mut custom_data = report.context.custom_data.clone().unwrap_or_default();
        custom_data.insert(
            "breadcrumbs".to_string(),
            serde_json::to_value(&report.context.breadcrumbs).unwrap_or(Value::Array(Vec::new())),
        );

        let user = report.context.user.as_ref();

        Self {
            message: report.message.clone(),
            exception_class: report.error_type.clone(),
            stack_trace: report.stack_trace.clone(),
            file: location.as_ref().map(|(file, _)| file.clone()),
            line: location.map(|(_, line)| line),
            project: report.project_token.clone(),
            environment: report.environment.clone(),
            timestamp: iso_timestamp(report.timestamp),
            commit_hash: commit_hash.map(str::to_string),
            user_agent: report.context.user_agent.clone(),
            url: report.context.url.clone(),
            user_id: user.and_then(|u| u.id.clone()),
            user_email: user.and_then(|u| u.email.clone()),
            custom_data,
        }
    }
}

/// Formats epoch milliseconds as `2024-01-01T00:00:00.000Z`.
pub fn iso_timestamp(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/**
 * Compressed batch body: `{"compressed": true, "data": "<base64 gzip>"}`.
 */
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedBody {
    pub compressed: bool,
    pub data: String,
}
