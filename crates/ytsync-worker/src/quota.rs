//! Daily API quota accounting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use ytsync_youtube::QuotaSink;

/// Pool consumed by the sync engine's metadata calls.
pub const SYNC_POOL: &str = "sync";

/// Pool reserved by the onboarding surface; tracked here only so its usage
/// is observable next to the sync pool.
pub const SIGNUP_POOL: &str = "signup";

/// Default caps, leaving headroom under the upstream 10k daily units.
pub const DEFAULT_SYNC_CAP: u32 = 9_500;
pub const DEFAULT_SIGNUP_CAP: u32 = 500;

#[derive(Debug)]
struct PoolState {
    cap: u32,
    used: u32,
}

#[derive(Debug)]
struct State {
    day: NaiveDate,
    pools: HashMap<String, PoolState>,
}

/// Tracks consumption of the daily external-API quota, partitioned into
/// named pools that reset at UTC midnight.
///
/// Reservations are compare-and-add under the pool section and are
/// non-refundable: a cycle that aborts mid-way forfeits its units.
#[derive(Debug)]
pub struct QuotaAccountant {
    inner: Mutex<State>,
}

impl QuotaAccountant {
    pub fn new(sync_cap: u32, signup_cap: u32) -> Self {
        let mut pools = HashMap::new();
        pools.insert(SYNC_POOL.to_string(), PoolState { cap: sync_cap, used: 0 });
        pools.insert(
            SIGNUP_POOL.to_string(),
            PoolState {
                cap: signup_cap,
                used: 0,
            },
        );
        Self {
            inner: Mutex::new(State {
                day: Utc::now().date_naive(),
                pools,
            }),
        }
    }

    /// Reserve `units` from `pool` as of `now`. Returns false when the
    /// reservation would exceed the pool's cap or the pool is unknown.
    pub fn reserve_at(&self, pool: &str, units: u32, now: DateTime<Utc>) -> bool {
        let mut state = self.inner.lock().expect("quota lock poisoned");
        let today = now.date_naive();
        if today != state.day {
            info!(day = %today, "Resetting daily quota pools");
            state.day = today;
            for pool_state in state.pools.values_mut() {
                pool_state.used = 0;
            }
        }

        match state.pools.get_mut(pool) {
            Some(pool_state) => {
                if pool_state.used + units > pool_state.cap {
                    warn!(pool, units, used = pool_state.used, cap = pool_state.cap, "Quota reservation refused");
                    false
                } else {
                    pool_state.used += units;
                    true
                }
            }
            None => {
                warn!(pool, "Reservation against unknown quota pool");
                false
            }
        }
    }

    /// Reserve against the current wall clock.
    pub fn reserve(&self, pool: &str, units: u32) -> bool {
        self.reserve_at(pool, units, Utc::now())
    }

    /// Roll the accounting window forward if `now` is a new UTC day.
    ///
    /// Reservations roll lazily on their own; the scheduler calls this at
    /// midnight so the reset is logged even on idle days.
    pub fn roll_day(&self, now: DateTime<Utc>) {
        let mut state = self.inner.lock().expect("quota lock poisoned");
        let today = now.date_naive();
        if today != state.day {
            info!(day = %today, "Resetting daily quota pools");
            state.day = today;
            for pool_state in state.pools.values_mut() {
                pool_state.used = 0;
            }
        }
    }

    /// Units consumed from a pool today.
    pub fn usage(&self, pool: &str) -> u32 {
        self.inner
            .lock()
            .expect("quota lock poisoned")
            .pools
            .get(pool)
            .map(|p| p.used)
            .unwrap_or(0)
    }
}

/// Adapter reserving from the sync pool for the metadata client.
pub struct SyncQuotaSink(pub Arc<QuotaAccountant>);

impl QuotaSink for SyncQuotaSink {
    fn try_reserve(&self, units: u32) -> bool {
        self.0.reserve(SYNC_POOL, units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reservations_never_exceed_cap() {
        let quota = QuotaAccountant::new(10, 5);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let mut accepted = 0;
        for _ in 0..20 {
            if quota.reserve_at(SYNC_POOL, 1, now) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);
        assert_eq!(quota.usage(SYNC_POOL), 10);

        // An oversized reservation is refused outright.
        assert!(!quota.reserve_at(SIGNUP_POOL, 6, now));
        assert_eq!(quota.usage(SIGNUP_POOL), 0);
    }

    #[test]
    fn test_pools_are_independent() {
        let quota = QuotaAccountant::new(1, 1);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        assert!(quota.reserve_at(SYNC_POOL, 1, now));
        assert!(!quota.reserve_at(SYNC_POOL, 1, now));
        assert!(quota.reserve_at(SIGNUP_POOL, 1, now));
    }

    #[test]
    fn test_utc_midnight_reset() {
        let quota = QuotaAccountant::new(1, 1);
        let evening = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 59).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 1).unwrap();

        assert!(quota.reserve_at(SYNC_POOL, 1, evening));
        assert!(!quota.reserve_at(SYNC_POOL, 1, evening));

        assert!(quota.reserve_at(SYNC_POOL, 1, next_day));
        assert_eq!(quota.usage(SYNC_POOL), 1);
    }

    #[test]
    fn test_concurrent_reservations_serialize() {
        let quota = Arc::new(QuotaAccountant::new(100, 0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let quota = quota.clone();
            handles.push(std::thread::spawn(move || {
                let mut accepted = 0u32;
                for _ in 0..50 {
                    if quota.reserve(SYNC_POOL, 1) {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
        assert_eq!(quota.usage(SYNC_POOL), 100);
    }
}
