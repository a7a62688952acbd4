/**
 * Exponential backoff with jitter.
 *
 * `max_retries` counts retries after the first attempt, so an operation runs
 * at most `max_retries + 1` times. The delay before retry `k` (0-based) is
 * `min(initial_delay_ms * 2^k, max_delay_ms)` scaled by a random factor in
 * `[0.75, 1.25]`.
 *
 * Only failures that report themselves as retryable are retried; anything
 * else (auth, 413, other 4xx) is returned after the first attempt. On
 * exhaustion the error of the final attempt is returned.
 */
use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::DeliveryError;

/// Failure classes the `RetryManager` may try again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for DeliveryError {
    fn is_retryable(&self) -> bool {
        DeliveryError::is_retryable(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub total_attempts: u64,
    pub total_retries: u64,
    pub successes: u64,
    pub exhausted: u64,
}

#[derive(Debug)]
pub struct RetryManager {
    config: RetryConfig,
    stats: Mutex<RetryStats>,
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RetryStats::default()),
        }
    }

    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt: u32 = 0;
        loop {
            self.bump(|s| s.total_attempts += 1);

            match op().await {
                Ok(value) => {
                    self.bump(|s| s.successes += 1);
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!("Retry: not retrying non-retryable failure: {}", e);
                    return Err(e);
                }
                Err(e) if attempt >= self.config.max_retries => {
                    warn!(attempts = attempt + 1, "Retry: giving up: {}", e);
                    self.bump(|s| s.exhausted += 1);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retry: attempt failed, backing off: {}",
                        e
                    );
                    self.bump(|s| s.total_retries += 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff before retry number `attempt` (0-based), jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt) as f64;
        Duration::from_millis((base * jitter_factor()).round() as u64)
    }

    fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.config
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms)
    }

    pub fn stats(&self) -> RetryStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    fn bump(&self, f: impl FnOnce(&mut RetryStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

/* Uniform in [0.75, 1.25]; 1.0 if the OS RNG is unavailable. */
fn jitter_factor() -> f64 {
    let mut bytes = [0u8; 4];
    match getrandom::fill(&mut bytes) {
        Ok(()) => {
            let unit = u32::from_le_bytes(bytes) as f64 / u32::MAX as f64;
            0.75 + unit * 0.5
        }
        Err(_) => 1.0,
    }
}
