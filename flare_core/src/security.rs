/*!
 * Validation and sanitization of untrusted input.
 *
 * Validators return `Result<(), ValidationError>` with a human-readable
 * reason; bad input is an expected outcome, never a panic.
 *
 * `sanitize` walks a `serde_json::Value` tree:
 * - strings have injection patterns replaced by `[FILTERED]` and are then
 *   truncated to `max_string_length` chars;
 * - object entries whose key looks sensitive are dropped entirely;
 * - numbers, booleans and null pass through unchanged;
 * - containers nested deeper than `MAX_DEPTH` collapse to a marker string.
 *
 * The walk is idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
 */
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use url::{Host, Url};

use crate::config::SecurityConfig;
use crate::error::ValidationError;

pub const FILTERED_MARKER: &str = "[FILTERED]";
pub const DEPTH_MARKER: &str = "[MAX_DEPTH_EXCEEDED]";
pub const MAX_DEPTH: usize = 10;

const MIN_TOKEN_LENGTH: usize = 10;
const MAX_TOKEN_LENGTH: usize = 1000;

static INJECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<script|javascript:|vbscript:|\bon[a-z]+\s*=|eval\s*\(|exec\s*\(")
        .expect("injection pattern is valid")
});

/// Keys containing any of these (case-insensitive) are dropped.
const SENSITIVE_SUBSTRINGS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "key",
    "auth",
    "cookie",
    "session",
    "csrf",
    "xsrf",
    "ssn",
    "credit_card",
    "creditcard",
    "card_number",
    "cardnumber",
    "cvv",
    "cvc",
];

/// Keys equal to one of these (case-insensitive) are dropped. `pin` is
/// matched exactly since it is a substring of many harmless words.
const SENSITIVE_EXACT: &[&str] = &["pin", "pincode", "pin_code", "card_pin", "cardpin"];

#[derive(Debug, Clone)]
pub struct SecurityValidator {
    config: SecurityConfig,
}

impl SecurityValidator {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Validators
    // -----------------------------------------------------------------------

    /**
     * Accepts http(s) URLs. With `require_https`, also rejects plain http and
     * hosts that are localhost, loopback, private, or link-local.
     */
    pub fn validate_url(&self, url: &str) -> Result<(), ValidationError> {
        let parsed = Url::parse(url).map_err(|e| ValidationError::new(format!("Invalid URL format: {e}")))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ValidationError::new(format!(
                    "Unsupported protocol `{other}`: only http and https are allowed"
                )))
            }
        }

        let host = parsed
            .host()
            .ok_or_else(|| ValidationError::new("URL must include a host"))?;

        if self.config.require_https {
            if parsed.scheme() != "https" {
                return Err(ValidationError::new("HTTPS is required"));
            }
            if is_private_host(&host) {
                return Err(ValidationError::new(format!(
                    "Host `{host}` is local or private and not allowed"
                )));
            }
        }

        Ok(())
    }

    pub fn validate_token(&self, token: &str) -> Result<(), ValidationError> {
        if token.is_empty() {
            return Err(ValidationError::new("Token is required"));
        }

        let len = token.chars().count();
        if len < MIN_TOKEN_LENGTH {
            return Err(ValidationError::new(format!(
                "Token must be at least {MIN_TOKEN_LENGTH} characters"
            )));
        }
        if len > MAX_TOKEN_LENGTH {
            return Err(ValidationError::new(format!(
                "Token must be at most {MAX_TOKEN_LENGTH} characters"
            )));
        }

        if contains_injection(token) {
            return Err(ValidationError::new("Token contains forbidden content"));
        }

        Ok(())
    }

    /// Checks the UTF-8 byte length of an already-serialized payload.
    pub fn validate_payload_size(&self, serialized: &str) -> Result<(), ValidationError> {
        let size = serialized.len();
        if size > self.config.max_payload_size {
            return Err(ValidationError::new(format!(
                "Payload size {size} bytes exceeds limit of {} bytes",
                self.config.max_payload_size
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sanitization
    // -----------------------------------------------------------------------

    pub fn sanitize(&self, value: &Value) -> Value {
        self.sanitize_at(value, 0)
    }

    pub fn sanitize_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        self.sanitize_object(map, 0)
    }

    /// Neutralizes injection patterns, then truncates to `max_string_length` chars.
    pub fn sanitize_string(&self, input: &str) -> String {
        let mut neutralized = INJECTION_RE.replace_all(input, FILTERED_MARKER).into_owned();
        /* A marker can put a word boundary in front of a handler name. */
        while INJECTION_RE.is_match(&neutralized) {
            neutralized = INJECTION_RE
                .replace_all(&neutralized, FILTERED_MARKER)
                .into_owned();
        }
        truncate_chars(&neutralized, self.config.max_string_length)
    }

    fn sanitize_at(&self, value: &Value, depth: usize) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize_string(s)),
            Value::Array(_) | Value::Object(_) if depth > MAX_DEPTH => {
                Value::String(DEPTH_MARKER.to_string())
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.sanitize_at(item, depth + 1))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(self.sanitize_object(map, depth)),
            Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
        }
    }

    fn sanitize_object(&self, map: &Map<String, Value>, depth: usize) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in map {
            if is_sensitive_key(key) {
                continue;
            }
            out.insert(self.sanitize_string(key), self.sanitize_at(value, depth + 1));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn contains_injection(input: &str) -> bool {
    INJECTION_RE.is_match(input)
}

pub fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_SUBSTRINGS.iter().any(|s| lower.contains(s))
        || SENSITIVE_EXACT.iter().any(|s| lower == *s)
}

fn truncate_chars(input: &str, max: usize) -> String {
    match input.char_indices().nth(max) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let d = domain.to_ascii_lowercase();
            d == "localhost" || d.ends_with(".localhost")
        }
        Host::Ipv4(ip) => is_private_v4(ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}
