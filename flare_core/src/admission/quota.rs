/**
 * Persisted send quotas.
 *
 * Three counters bound how much a client may send:
 *
 * - **burst**: resets `burst_window_ms` after the window opened.
 * - **daily**: resets at the next local midnight.
 * - **monthly**: resets at local midnight on the first of the next month.
 *
 * Resets happen lazily: every read first rolls over any counter whose reset
 * time has passed. State is written to the `Store` after every change so the
 * limits survive restarts. A missing or unreadable persisted state is replaced
 * by a fresh one.
 */
use std::sync::{Arc, Mutex};

use chrono::{Datelike, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::QuotaConfig;
use crate::error::{QuotaExceeded, StoreError};
use crate::protocol::constants::QUOTA_STORAGE_KEY;
use crate::store::Store;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    pub used: u64,

    /// Epoch ms at which `used` returns to zero.
    pub reset_time: u64,

    /// Payload bytes sent in the current period.
    #[serde(default)]
    pub bytes: u64,
}

impl QuotaCounter {
    fn record(&mut self, size: usize) {
        self.used += 1;
        self.bytes += size as u64;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub daily: QuotaCounter,
    pub monthly: QuotaCounter,
    pub burst: QuotaCounter,
}

/// Read-only view of the counters for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub daily_used: u64,
    pub daily_limit: u64,
    pub daily_reset: u64,
    pub monthly_used: u64,
    pub monthly_limit: u64,
    pub monthly_reset: u64,
    pub burst_used: u64,
    pub burst_limit: u64,
    pub burst_reset: u64,
    pub bytes_today: u64,
}

// ---------------------------------------------------------------------------
// QuotaManager
// ---------------------------------------------------------------------------

pub struct QuotaManager {
    config: QuotaConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn Store>,
    state: Mutex<QuotaState>,
}

impl QuotaManager {
    /// Loads persisted state (if any) and rolls over expired counters.
    pub fn new(config: QuotaConfig, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let mut state = load_state(store.as_ref());
        let now = clock.now_ms();
        roll_over(&mut state, now, config.burst_window_ms);

        let manager = Self {
            config,
            clock,
            store,
            state: Mutex::new(state),
        };
        manager.persist(&state);
        manager
    }

    /**
     * Checks whether a report of `estimated_size` bytes may be sent.
     *
     * Limits are checked in order burst, daily, monthly, payload size; the
     * first one hit is returned.
     */
    pub fn can_send(&self, estimated_size: usize) -> Result<(), QuotaExceeded> {
        let (state, _) = self.refresh();

        if state.burst.used >= self.config.burst_limit {
            return Err(QuotaExceeded::Burst);
        }
        if state.daily.used >= self.config.daily_limit {
            return Err(QuotaExceeded::Daily);
        }
        if state.monthly.used >= self.config.monthly_limit {
            return Err(QuotaExceeded::Monthly);
        }
        if estimated_size > self.config.max_payload_size {
            return Err(QuotaExceeded::PayloadTooLarge {
                size: estimated_size,
                limit: self.config.max_payload_size,
            });
        }
        Ok(())
    }

    /// Counts one successfully delivered report against every counter.
    pub fn record_sent(&self, size: usize) {
        let now = self.clock.now_ms();
        let snapshot = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            roll_over(&mut state, now, self.config.burst_window_ms);
            state.burst.record(size);
            state.daily.record(size);
            state.monthly.record(size);
            *state
        };
        debug!(
            size,
            daily = snapshot.daily.used,
            monthly = snapshot.monthly.used,
            "Quota: report counted"
        );
        self.persist(&snapshot);
    }

    pub fn usage(&self) -> QuotaUsage {
        let (state, _) = self.refresh();
        QuotaUsage {
            daily_used: state.daily.used,
            daily_limit: self.config.daily_limit,
            daily_reset: state.daily.reset_time,
            monthly_used: state.monthly.used,
            monthly_limit: self.config.monthly_limit,
            monthly_reset: state.monthly.reset_time,
            burst_used: state.burst.used,
            burst_limit: self.config.burst_limit,
            burst_reset: state.burst.reset_time,
            bytes_today: state.daily.bytes,
        }
    }

    /// Zeroes every counter and starts fresh periods from now.
    pub fn reset(&self) {
        let now = self.clock.now_ms();
        let snapshot = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            *state = QuotaState::default();
            roll_over(&mut state, now, self.config.burst_window_ms);
            *state
        };
        self.persist(&snapshot);
    }

    /**
     * Resets every counter whose period has ended and persists the result.
     *
     * Returns whether any counter was reset. Every other operation does this
     * lazily; maintenance calls it so idle periods still roll over on disk.
     */
    pub fn roll_over_windows(&self) -> bool {
        self.refresh().1
    }

    /* Rolls over expired counters, persisting if anything changed. */
    fn refresh(&self) -> (QuotaState, bool) {
        let now = self.clock.now_ms();
        let (snapshot, changed) = match self.state.lock() {
            Ok(mut state) => {
                let changed = roll_over(&mut state, now, self.config.burst_window_ms);
                (*state, changed)
            }
            Err(_) => return (QuotaState::default(), false),
        };
        if changed {
            self.persist(&snapshot);
        }
        (snapshot, changed)
    }

    fn persist(&self, state: &QuotaState) {
        let result = serde_json::to_string(state)
            .map_err(StoreError::from)
            .and_then(|json| self.store.set(QUOTA_STORAGE_KEY, &json));
        if let Err(e) = result {
            warn!("Quota: failed to persist state: {}", e);
        }
    }
}

impl std::fmt::Debug for QuotaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaManager")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_state(store: &dyn Store) -> QuotaState {
    let Some(raw) = store.get(QUOTA_STORAGE_KEY) else {
        return QuotaState::default();
    };
    match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(e) => {
            warn!("Quota: discarding unreadable persisted state: {}", e);
            QuotaState::default()
        }
    }
}

/* Returns true if any counter was reset. */
fn roll_over(state: &mut QuotaState, now: u64, burst_window_ms: u64) -> bool {
    let mut changed = false;

    if now >= state.burst.reset_time {
        state.burst = QuotaCounter {
            reset_time: now.saturating_add(burst_window_ms),
            ..Default::default()
        };
        changed = true;
    }
    if now >= state.daily.reset_time {
        state.daily = QuotaCounter {
            reset_time: next_local_midnight(now),
            ..Default::default()
        };
        changed = true;
    }
    if now >= state.monthly.reset_time {
        state.monthly = QuotaCounter {
            reset_time: next_month_start(now),
            ..Default::default()
        };
        changed = true;
    }

    changed
}

fn local_date(now_ms: u64) -> Option<NaiveDate> {
    Local
        .timestamp_millis_opt(now_ms as i64)
        .earliest()
        .map(|dt| dt.date_naive())
}

fn local_start_of(date: NaiveDate) -> Option<u64> {
    date.and_hms_opt(0, 0, 0)?
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.timestamp_millis() as u64)
}

/// Epoch ms of the next local midnight after `now_ms`.
pub fn next_local_midnight(now_ms: u64) -> u64 {
    local_date(now_ms)
        .and_then(|d| d.succ_opt())
        .and_then(local_start_of)
        .unwrap_or(now_ms + DAY_MS)
}

/// Epoch ms of local midnight on the first day of the month after `now_ms`.
pub fn next_month_start(now_ms: u64) -> u64 {
    local_date(now_ms)
        .and_then(|d| {
            if d.month() == 12 {
                NaiveDate::from_ymd_opt(d.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(d.year(), d.month() + 1, 1)
            }
        })
        .and_then(local_start_of)
        .unwrap_or(now_ms + 31 * DAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::time::Duration;

    /* 2024-03-10T12:00:00Z */
    const START: u64 = 1_710_072_000_000;

    fn manager(config: QuotaConfig) -> (QuotaManager, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(START));
        let store = Arc::new(MemoryStore::new());
        let qm = QuotaManager::new(config, store.clone(), clock.clone());
        (qm, clock, store)
    }

    #[test]
    fn test_burst_limit_and_window_reset() {
        let (qm, clock, _) = manager(QuotaConfig {
            burst_limit: 3,
            ..Default::default()
        });

        for _ in 0..3 {
            assert!(qm.can_send(100).is_ok());
            qm.record_sent(100);
        }
        let err = qm.can_send(100).unwrap_err();
        assert_eq!(err, QuotaExceeded::Burst);
        assert_eq!(err.to_string(), "Burst limit exceeded");

        clock.advance(Duration::from_millis(60_000));
        assert!(qm.can_send(100).is_ok());
    }

    #[test]
    fn test_daily_limit_resets_after_midnight() {
        let (qm, clock, _) = manager(QuotaConfig {
            daily_limit: 2,
            ..Default::default()
        });
        qm.record_sent(10);
        qm.record_sent(10);
        assert_eq!(qm.can_send(10), Err(QuotaExceeded::Daily));

        clock.advance(Duration::from_millis(DAY_MS + 60_000));
        assert!(qm.can_send(10).is_ok());
        assert_eq!(qm.usage().daily_used, 0);
    }

    #[test]
    fn test_monthly_limit() {
        let (qm, clock, _) = manager(QuotaConfig {
            monthly_limit: 1,
            ..Default::default()
        });
        qm.record_sent(10);
        assert_eq!(qm.can_send(10), Err(QuotaExceeded::Monthly));

        clock.advance(Duration::from_millis(2 * DAY_MS));
        assert_eq!(qm.can_send(10), Err(QuotaExceeded::Monthly));

        clock.advance(Duration::from_millis(31 * DAY_MS));
        assert!(qm.can_send(10).is_ok());
    }

    #[test]
    fn test_limit_order_burst_first() {
        let (qm, _, _) = manager(QuotaConfig {
            burst_limit: 1,
            daily_limit: 1,
            monthly_limit: 1,
            ..Default::default()
        });
        qm.record_sent(1);
        assert_eq!(qm.can_send(usize::MAX), Err(QuotaExceeded::Burst));
    }

    #[test]
    fn test_payload_size_limit() {
        let (qm, _, _) = manager(QuotaConfig {
            max_payload_size: 100,
            ..Default::default()
        });
        assert!(qm.can_send(100).is_ok());
        assert_eq!(
            qm.can_send(101),
            Err(QuotaExceeded::PayloadTooLarge {
                size: 101,
                limit: 100
            })
        );
    }

    #[test]
    fn test_state_survives_restart() {
        let (qm, clock, store) = manager(QuotaConfig::default());
        qm.record_sent(50);
        qm.record_sent(70);
        drop(qm);

        let reloaded = QuotaManager::new(QuotaConfig::default(), store, clock);
        let usage = reloaded.usage();
        assert_eq!(usage.daily_used, 2);
        assert_eq!(usage.monthly_used, 2);
        assert_eq!(usage.bytes_today, 120);
    }

    #[test]
    fn test_corrupt_state_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        store.set(QUOTA_STORAGE_KEY, "{not json").unwrap();
        let clock = Arc::new(ManualClock::new(START));

        let qm = QuotaManager::new(QuotaConfig::default(), store.clone(), clock);
        assert_eq!(qm.usage().daily_used, 0);

        let persisted: QuotaState =
            serde_json::from_str(&store.get(QUOTA_STORAGE_KEY).unwrap()).unwrap();
        assert!(persisted.daily.reset_time > START);
    }

    #[test]
    fn test_roll_over_windows_persists_new_period() {
        let (qm, clock, store) = manager(QuotaConfig::default());
        qm.record_sent(10);
        assert!(!qm.roll_over_windows());

        clock.advance(Duration::from_millis(DAY_MS + 60_000));
        assert!(qm.roll_over_windows());
        let persisted: QuotaState =
            serde_json::from_str(&store.get(QUOTA_STORAGE_KEY).unwrap()).unwrap();
        assert_eq!(persisted.daily.used, 0);
        assert!(persisted.daily.reset_time > START + DAY_MS);
    }

    #[test]
    fn test_unbounded_burst_window_does_not_overflow() {
        let (qm, clock, _) = manager(QuotaConfig {
            burst_limit: 1,
            burst_window_ms: u64::MAX,
            ..Default::default()
        });
        qm.record_sent(10);
        clock.advance(Duration::from_millis(DAY_MS));
        assert_eq!(qm.can_send(10), Err(QuotaExceeded::Burst));
        assert_eq!(qm.usage().burst_reset, u64::MAX);
    }

    #[test]
    fn test_reset_boundaries_are_in_the_future() {
        let midnight = next_local_midnight(START);
        assert!(midnight > START);
        assert!(midnight <= START + DAY_MS + 60 * 60 * 1000);

        let month = next_month_start(START);
        assert!(month >= midnight);
        assert!(month <= START + 32 * DAY_MS);
    }
}
