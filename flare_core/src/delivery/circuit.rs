/**
 * Circuit breaker around the send path.
 *
 * ```text
 *   CLOSED ──(failure_threshold failures)──▶ OPEN
 *      ▲                                      │
 *      │                               (timeout_ms elapsed)
 *      │                                      ▼
 *      └──────────(trial succeeds)──────── HALF_OPEN ──(trial fails)──▶ OPEN
 * ```
 *
 * While OPEN every call is rejected without running the operation. In
 * HALF_OPEN exactly one trial call runs; concurrent callers are rejected until
 * it settles. A success resets every counter.
 */
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::error::DeliveryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Result of `CircuitBreaker::execute` when the operation itself may fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitError<E> {
    /// Rejected without running the operation.
    Open,
    /// The operation ran and failed.
    Inner(E),
}

impl From<CircuitError<DeliveryError>> for DeliveryError {
    fn from(err: CircuitError<DeliveryError>) -> Self {
        match err {
            CircuitError::Open => DeliveryError::CircuitOpen,
            CircuitError::Inner(e) => e,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub last_failure_time: Option<u64>,
    pub next_attempt_time: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    trial_in_flight: bool,
    last_failure_time: Option<u64>,
    next_attempt_time: Option<u64>,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                trial_in_flight: false,
                last_failure_time: None,
                next_attempt_time: None,
                total_calls: 0,
                total_failures: 0,
                total_rejections: 0,
            }),
        }
    }

    /**
     * Runs `op` if the circuit admits it and records the outcome.
     *
     * Returns `CircuitError::Open` without calling `op` when rejected.
     */
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            return Err(CircuitError::Open);
        }

        let mut trial = TrialGuard {
            breaker: self,
            settled: false,
        };
        let result = op().await;
        trial.settled = true;

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Opens the circuit for a fresh `timeout_ms`, regardless of counters.
    pub fn force_open(&self) {
        let now = self.clock.now_ms();
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = CircuitState::Open;
            inner.trial_in_flight = false;
            inner.next_attempt_time = Some(now.saturating_add(self.config.timeout_ms));
        }
        info!("Circuit breaker forced open");
    }

    /// Closes the circuit and clears the failure counter.
    pub fn force_close(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            inner.next_attempt_time = None;
        }
        info!("Circuit breaker forced closed");
    }

    pub fn stats(&self) -> CircuitStats {
        match self.inner.lock() {
            Ok(inner) => CircuitStats {
                state: inner.state,
                failure_count: inner.failure_count,
                total_calls: inner.total_calls,
                total_failures: inner.total_failures,
                total_rejections: inner.total_rejections,
                last_failure_time: inner.last_failure_time,
                next_attempt_time: inner.next_attempt_time,
            },
            Err(_) => CircuitStats {
                state: CircuitState::Closed,
                failure_count: 0,
                total_calls: 0,
                total_failures: 0,
                total_rejections: 0,
                last_failure_time: None,
                next_attempt_time: None,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn try_acquire(&self) -> bool {
        let now = self.clock.now_ms();
        let Ok(mut inner) = self.inner.lock() else {
            return true;
        };

        let admitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let ready = inner.next_attempt_time.is_none_or(|t| now >= t);
                if ready {
                    debug!("Circuit breaker half-open, allowing trial call");
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                }
                ready
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        };

        if admitted {
            inner.total_calls += 1;
        } else {
            inner.total_rejections += 1;
        }
        admitted
    }

    fn on_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state != CircuitState::Closed {
                info!("Circuit breaker closed after successful trial");
            }
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.trial_in_flight = false;
            inner.next_attempt_time = None;
        }
    }

    fn on_failure(&self) {
        let now = self.clock.now_ms();
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };

        inner.failure_count += 1;
        inner.total_failures += 1;
        inner.last_failure_time = Some(now);

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        inner.trial_in_flight = false;

        if trip {
            inner.state = CircuitState::Open;
            inner.next_attempt_time = Some(now.saturating_add(self.config.timeout_ms));
            warn!(
                failures = inner.failure_count,
                timeout_ms = self.config.timeout_ms,
                "Circuit breaker opened"
            );
        }
    }
}

/* Releases the half-open slot if the trial future is dropped mid-flight. */
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            if let Ok(mut inner) = self.breaker.inner.lock() {
                inner.trial_in_flight = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 3,
                timeout_ms: 1_000,
            },
            clock,
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CircuitError<&'static str>> {
        cb.execute(|| async { Err::<(), _>("boom") }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_calling() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock);

        for _ in 0..3 {
            assert_eq!(fail(&cb).await, Err(CircuitError::Inner("boom")));
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result = cb
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert_eq!(result, Err(CircuitError::Open));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cb.stats().total_rejections, 1);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }

        clock.advance(Duration::from_millis(1_000));
        let result = cb.execute(|| async { Ok::<_, &str>(42) }).await;
        assert_eq!(result, Ok(42));

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_with_fresh_timeout() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock.clone());
        for _ in 0..3 {
            let _ = fail(&cb).await;
        }

        clock.advance(Duration::from_millis(1_500));
        assert_eq!(fail(&cb).await, Err(CircuitError::Inner("boom")));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().next_attempt_time, Some(2_500));

        clock.advance(Duration::from_millis(999));
        assert_eq!(fail(&cb).await, Err(CircuitError::Open));
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock);
        let _ = fail(&cb).await;
        let _ = fail(&cb).await;
        let _ = cb.execute(|| async { Ok::<_, &str>(()) }).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_open_and_close() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = breaker(clock);

        cb.force_open();
        assert_eq!(
            cb.execute(|| async { Ok::<_, &str>(()) }).await,
            Err(CircuitError::Open)
        );

        cb.force_close();
        assert_eq!(cb.execute(|| async { Ok::<_, &str>(1) }).await, Ok(1));
    }

    #[tokio::test]
    async fn test_unbounded_timeout_stays_open() {
        let clock = Arc::new(ManualClock::new(1_000));
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                timeout_ms: u64::MAX,
            },
            clock.clone(),
        );

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        clock.advance(Duration::from_millis(365 * 24 * 60 * 60 * 1000));
        assert_eq!(
            cb.execute(|| async { Ok::<_, &str>(()) }).await,
            Err(CircuitError::Open)
        );

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_maps_to_delivery_error() {
        let open: DeliveryError = CircuitError::<DeliveryError>::Open.into();
        assert_eq!(open, DeliveryError::CircuitOpen);

        let inner: DeliveryError = CircuitError::Inner(DeliveryError::Timeout).into();
        assert_eq!(inner, DeliveryError::Timeout);
    }
}
