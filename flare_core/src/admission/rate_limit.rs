//! Sliding-window rate limiting and fingerprint-based duplicate suppression.
//!
//! Two independent checks guard the pipeline:
//!
//! - [`RateLimiter::can_make_request`]: at most `max_requests` recorded
//!   requests inside the trailing `window_ms`.
//! - [`RateLimiter::can_report_error`]: the same fingerprint is suppressed for
//!   `duplicate_error_window_ms` after it was last recorded.
//!
//! Expiry is evaluated lazily on every read, so correctness never depends on
//! [`RateLimiter::cleanup`] running; cleanup only reclaims memory.
//!
//! ## Fingerprints
//!
//! A fingerprint is the first 128 bits (hex) of a SHA-256 over the error type,
//! the first 100 chars of the message, the top three stack frames with line
//! and column numbers replaced by `?`, and an optional caller-supplied extra.
//! Two occurrences of the same logical error thrown from different lines of
//! the same functions therefore collapse to one key.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::protocol::types::ErrorInput;

const MESSAGE_PREFIX_CHARS: usize = 100;
const STACK_SIGNATURE_DEPTH: usize = 3;

static LINE_COL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\d+").expect("line/column pattern is valid"));
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("address pattern is valid"));

// ============================================================================
// Fingerprinting
// ============================================================================

/// Computes the canonical fingerprint for an error.
pub fn fingerprint(
    error_type: &str,
    message: &str,
    stack_trace: Option<&str>,
    extra: Option<&str>,
) -> String {
    let message_prefix: String = message.chars().take(MESSAGE_PREFIX_CHARS).collect();
    let signature = stack_trace.map(stack_signature).unwrap_or_default();

    let mut hasher = Sha256::new();
    for part in [error_type, &message_prefix, &signature, extra.unwrap_or("")] {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// Top frames of a textual stack trace with dynamic numbers normalized away.
fn stack_signature(stack_trace: &str) -> String {
    let lines: Vec<&str> = stack_trace
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let frames: Vec<&str> = {
        let framed: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| l.starts_with("at ") || l.contains('@'))
            .collect();
        if framed.is_empty() {
            lines
        } else {
            framed
        }
    };

    frames
        .into_iter()
        .take(STACK_SIGNATURE_DEPTH)
        .map(|frame| {
            let without_lines = LINE_COL_RE.replace_all(frame, ":?");
            ADDRESS_RE.replace_all(&without_lines, "0x?").into_owned()
        })
        .collect::<Vec<_>>()
        .join("|")
}

// ============================================================================
// RateLimiter
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    /* timestamps of recorded requests, oldest first */
    window: VecDeque<u64>,
    last_seen: HashMap<String, u64>,
}

impl Inner {
    fn evict_window(&mut self, now: u64, window_ms: u64) {
        while let Some(&front) = self.window.front() {
            if now.saturating_sub(front) >= window_ms {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub requests_in_window: usize,
    pub max_requests: usize,
    pub tracked_fingerprints: usize,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn create_fingerprint(&self, input: &ErrorInput) -> String {
        fingerprint(
            &input.error_type,
            &input.message,
            input.stack_trace.as_deref(),
            input.fingerprint_extra.as_deref(),
        )
    }

    /// True while fewer than `max_requests` were recorded in the trailing window.
    pub fn can_make_request(&self) -> bool {
        let now = self.clock.now_ms();
        let Ok(mut inner) = self.inner.lock() else {
            return true;
        };
        inner.evict_window(now, self.config.window_ms);
        inner.window.len() < self.config.max_requests
    }

    /// True if `fingerprint` was never recorded or its suppression window has passed.
    pub fn can_report_error(&self, fingerprint: &str) -> bool {
        let now = self.clock.now_ms();
        let Ok(inner) = self.inner.lock() else {
            return true;
        };
        match inner.last_seen.get(fingerprint) {
            None => true,
            Some(&seen) => now.saturating_sub(seen) >= self.config.duplicate_error_window_ms,
        }
    }

    pub fn record_request(&self, fingerprint: Option<&str>) {
        let now = self.clock.now_ms();
        if let Ok(mut inner) = self.inner.lock() {
            inner.window.push_back(now);
            if let Some(fp) = fingerprint {
                inner.last_seen.insert(fp.to_string(), now);
            }
        }
    }

    /// Evicts expired window entries and fingerprints. Idempotent.
    pub fn cleanup(&self) {
        let now = self.clock.now_ms();
        if let Ok(mut inner) = self.inner.lock() {
            inner.evict_window(now, self.config.window_ms);

            let before = inner.last_seen.len();
            let dup_window = self.config.duplicate_error_window_ms;
            inner
                .last_seen
                .retain(|_, seen| now.saturating_sub(*seen) < dup_window);

            let removed = before - inner.last_seen.len();
            if removed > 0 {
                debug!(removed, "Rate limiter: expired fingerprints evicted");
            }
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = self.clock.now_ms();
        let (requests_in_window, tracked_fingerprints) = match self.inner.lock() {
            Ok(mut inner) => {
                inner.evict_window(now, self.config.window_ms);
                (inner.window.len(), inner.last_seen.len())
            }
            Err(_) => (0, 0),
        };
        RateLimiterStats {
            requests_in_window,
            max_requests: self.config.max_requests,
            tracked_fingerprints,
        }
    }

    pub fn reset(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.window.clear();
            inner.last_seen.clear();
        }
    }
}
