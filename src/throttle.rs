//! Per-driver location persistence throttle
//!
//! Every position update is forwarded live; persistence is rate-limited to at
//! most one write per window per driver. Last-write timestamps live in a
//! thread-safe DashMap with an atomic compare-and-swap, so concurrent updates
//! for one driver grant exactly one persist per window. State is in-memory
//! only; reset on restart is an accepted cost.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Sentinel for "never persisted"
const NEVER: i64 = i64::MIN;

/// Thread-safe persist-window tracker
pub struct LocationThrottle {
    window_ms: i64,
    /// Map from driver id to last persisted timestamp (ms)
    last_persist: DashMap<i64, AtomicI64>,
}

impl LocationThrottle {
    /// Create a throttle with the given persistence window
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as i64,
            last_persist: DashMap::new(),
        }
    }

    /// Claim the persist slot for this driver at `now_ms`.
    ///
    /// Returns `true` if the caller should persist (first update ever, or the
    /// window has elapsed). Returns `false` inside the window; the update is
    /// still forwarded live by the caller, just not written.
    ///
    /// # Thread Safety
    /// Uses an atomic CAS loop so exactly one concurrent caller wins the slot.
    pub fn should_persist(&self, driver_id: i64, now_ms: i64) -> bool {
        let entry = self
            .last_persist
            .entry(driver_id)
            .or_insert_with(|| AtomicI64::new(NEVER));

        loop {
            let last = entry.load(Ordering::Acquire);

            if last != NEVER && now_ms.saturating_sub(last) < self.window_ms {
                return false; // Inside the window
            }

            match entry.compare_exchange(last, now_ms, Ordering::Release, Ordering::Acquire) {
                Ok(_) => return true,
                Err(_) => continue, // Another handler claimed the slot, re-check
            }
        }
    }

    /// Last persisted timestamp for a driver, if any
    pub fn last_persisted(&self, driver_id: i64) -> Option<i64> {
        self.last_persist
            .get(&driver_id)
            .map(|entry| entry.load(Ordering::Acquire))
            .filter(|&ts| ts != NEVER)
    }

    /// Number of tracked drivers
    pub fn len(&self) -> usize {
        self.last_persist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_persist.is_empty()
    }
}
