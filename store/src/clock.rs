use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of `received_at` stamps.
///
/// Follows the wall clock but never issues a stamp at or before one it has
/// already issued or observed, so a clock stepping backwards cannot make fresh
/// records look stale in the cache.
#[derive(Debug)]
pub struct ReceiveClock {
    last_nanos: AtomicI64,
}

impl Default for ReceiveClock {
    fn default() -> Self {
        Self {
            last_nanos: AtomicI64::new(i64::MIN),
        }
    }
}

impl ReceiveClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.stamp(Utc::now())
    }

    /// Raises the floor to `seen`, e.g. the newest record restored from the log
    pub fn observe(&self, seen: DateTime<Utc>) {
        self.last_nanos.fetch_max(to_nanos(seen), Ordering::AcqRel);
    }

    fn stamp(&self, wall: DateTime<Utc>) -> DateTime<Utc> {
        let wall = to_nanos(wall);
        let mut last = self.last_nanos.load(Ordering::Acquire);

        loop {
            let next = wall.max(last.saturating_add(1));
            match self
                .last_nanos
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return DateTime::from_timestamp_nanos(next),
                Err(actual) => last = actual,
            }
        }
    }
}

fn to_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_follows_wall_clock() {
        let clock = ReceiveClock::new();
        assert_eq!(clock.stamp(at(0)), at(0));
        assert_eq!(clock.stamp(at(5)), at(5));
    }

    #[test]
    fn test_backwards_step_still_advances() {
        let clock = ReceiveClock::new();
        let first = clock.stamp(at(60));
        let second = clock.stamp(at(0));

        assert!(second > first);
        assert_eq!(second, first + Duration::nanoseconds(1));
    }

    #[test]
    fn test_observed_stamp_raises_floor() {
        let clock = ReceiveClock::new();
        clock.observe(at(100));

        assert!(clock.stamp(at(10)) > at(100));
        assert_eq!(clock.stamp(at(200)), at(200));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_stamps_are_unique() {
        let clock = Arc::new(ReceiveClock::new());

        let handles: Vec<_> = (0..1000)
            .map(|_| {
                let clock = clock.clone();
                tokio::spawn(async move { clock.stamp(at(0)) })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
    }
}
