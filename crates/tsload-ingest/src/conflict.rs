//! Timestamp conflict avoidance.
//!
//! Rows that share a timestamp would overwrite each other in the store. The cache
//! remembers every time key it handed out during a trailing window and nudges
//! colliding timestamps forward one precision unit at a time until they land on a
//! free slot.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;
use tsload_common::types::Precision;
use tsload_common::{ConfigError, EvalError};

/// Default bound on remembered keys
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Conflict cache settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// How long a handed-out key stays reserved
    pub window_ms: i64,
    #[serde(default)]
    pub precision: Precision,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl ConflictConfig {
    pub fn new(window_ms: i64, precision: Precision) -> Self {
        Self {
            window_ms,
            precision,
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Build from loosely typed arguments; an unknown precision name falls back to
    /// milliseconds.
    pub fn from_args(window_ms: i64, precision: &str) -> Self {
        let parsed = precision.parse::<Precision>().unwrap_or_else(|_| {
            warn!(precision = %precision, "Unknown conflict precision, using ms");
            Precision::Millisecond
        });
        Self::new(window_ms, parsed)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[derive(Debug, Default)]
struct Reserved {
    keys: BTreeSet<i64>,
    /// Insertion order, oldest first
    order: VecDeque<(Instant, i64)>,
}

impl Reserved {
    fn evict_expired(&mut self, now: Instant, window: Duration) {
        while let Some(&(inserted, key)) = self.order.front() {
            if now.saturating_duration_since(inserted) < window {
                break;
            }
            self.order.pop_front();
            self.keys.remove(&key);
        }
    }

    fn evict_over_capacity(&mut self, capacity: usize) {
        while self.order.len() > capacity {
            if let Some((_, key)) = self.order.pop_front() {
                self.keys.remove(&key);
            }
        }
    }
}

/// Bounded window of reserved time keys
#[derive(Debug)]
pub struct ConflictCache {
    window: Duration,
    precision: Precision,
    capacity: usize,
    reserved: Mutex<Reserved>,
}

impl ConflictCache {
    pub fn new(config: ConflictConfig) -> Result<Self, ConfigError> {
        if config.window_ms <= 0 {
            return Err(ConfigError::NonPositiveWindow(config.window_ms));
        }
        if config.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "conflict.capacity".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            window: Duration::from_millis(config.window_ms.unsigned_abs()),
            precision: config.precision,
            capacity: config.capacity,
            reserved: Mutex::new(Reserved::default()),
        })
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Reserve and return the first free slot at or after `ts`.
    ///
    /// The result differs from `ts` by a whole number of precision units and is unique
    /// among all results returned within the window.
    pub fn cache_and_get(&self, ts: DateTime<Utc>) -> Result<DateTime<Utc>, EvalError> {
        self.cache_and_get_at(ts, Instant::now())
    }

    fn cache_and_get_at(&self, ts: DateTime<Utc>, now: Instant) -> Result<DateTime<Utc>, EvalError> {
        let out_of_range = || EvalError::TimestampOutOfRange(ts.to_rfc3339());
        let start = self.precision.quantize(&ts).ok_or_else(out_of_range)?;

        let mut reserved = self.reserved.lock().unwrap_or_else(PoisonError::into_inner);
        reserved.evict_expired(now, self.window);

        let mut key = start;
        while reserved.keys.contains(&key) {
            key = key.checked_add(1).ok_or_else(out_of_range)?;
        }

        let shifted = if key == start {
            ts
        } else {
            let nanos = (key - start)
                .checked_mul(self.precision.unit_nanos())
                .ok_or_else(out_of_range)?;
            ts.checked_add_signed(ChronoDuration::nanoseconds(nanos))
                .ok_or_else(out_of_range)?
        };

        reserved.keys.insert(key);
        reserved.order.push_back((now, key));
        reserved.evict_over_capacity(self.capacity);

        Ok(shifted)
    }

    /// Number of currently reserved keys
    pub fn len(&self) -> usize {
        self.reserved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 11, 23, 9, 46, 25).unwrap()
    }

    #[test]
    fn test_identical_timestamps_spread_one_unit_apart() {
        let cache = ConflictCache::new(ConflictConfig::new(60_000, Precision::Millisecond)).unwrap();
        let out: Vec<_> = (0..5).map(|_| cache.cache_and_get(base()).unwrap()).collect();

        for (i, ts) in out.iter().enumerate() {
            assert_eq!(*ts, base() + ChronoDuration::milliseconds(i as i64));
        }
        assert_eq!(cache.len(), 5);
    }

    #[test]
    fn test_free_slot_is_returned_unchanged() {
        let cache = ConflictCache::new(ConflictConfig::new(1_000, Precision::Microsecond)).unwrap();
        let a = cache.cache_and_get(base()).unwrap();
        let b = cache.cache_and_get(base() + ChronoDuration::seconds(1)).unwrap();
        assert_eq!(a, base());
        assert_eq!(b, base() + ChronoDuration::seconds(1));
    }

    #[test]
    fn test_keys_expire_after_window() {
        let cache = ConflictCache::new(ConflictConfig::new(100, Precision::Millisecond)).unwrap();
        let t0 = Instant::now();

        assert_eq!(cache.cache_and_get_at(base(), t0).unwrap(), base());
        assert_eq!(
            cache.cache_and_get_at(base(), t0 + Duration::from_millis(50)).unwrap(),
            base() + ChronoDuration::milliseconds(1)
        );
        // both reservations have expired by now
        assert_eq!(
            cache.cache_and_get_at(base(), t0 + Duration::from_millis(200)).unwrap(),
            base()
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let config = ConflictConfig::new(60_000, Precision::Millisecond).with_capacity(2);
        let cache = ConflictCache::new(config).unwrap();

        cache.cache_and_get(base()).unwrap();
        cache.cache_and_get(base() + ChronoDuration::seconds(1)).unwrap();
        cache.cache_and_get(base() + ChronoDuration::seconds(2)).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.cache_and_get(base()).unwrap(), base());
    }

    #[test]
    fn test_sub_unit_part_is_preserved() {
        let cache = ConflictCache::new(ConflictConfig::new(60_000, Precision::Millisecond)).unwrap();
        let ts = base() + ChronoDuration::microseconds(1_500);
        cache.cache_and_get(ts).unwrap();
        assert_eq!(cache.cache_and_get(ts).unwrap(), ts + ChronoDuration::milliseconds(1));
    }

    #[test]
    fn test_invalid_config() {
        assert_eq!(
            ConflictCache::new(ConflictConfig::new(0, Precision::Millisecond)).unwrap_err(),
            ConfigError::NonPositiveWindow(0)
        );
        assert_eq!(ConflictConfig::from_args(10, "seconds").precision, Precision::Millisecond);
        assert_eq!(ConflictConfig::from_args(10, "ns").precision, Precision::Nanosecond);
    }

    #[test]
    fn test_concurrent_callers_get_distinct_keys() {
        let cache = Arc::new(ConflictCache::new(ConflictConfig::new(60_000, Precision::Millisecond)).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    (0..50).map(|_| cache.cache_and_get(base()).unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(all[199], base() + ChronoDuration::milliseconds(199));
    }
}
