//! Per-key history of rate limit violations.
//!
//! Violations are tracked per [`RateKey`] across all categories. Each record
//! is a queue of timestamps that only holds entries younger than the TTL.
//! Records are pruned when read and by a periodic sweep, and a key with no
//! recent violations has no entry at all.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::clock::Clock;
use super::key::RateKey;

/// Result of one sweep over the tracked keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Keys visited
    pub scanned: usize,
    /// Expired timestamps dropped
    pub expired: usize,
    /// Keys removed because nothing recent remained
    pub removed: usize,
}

/// Records and ages out rate limit violations.
///
/// This is the only writer of violation records. All methods are safe to call
/// concurrently; each key is locked only for as long as it takes to prune
/// its own queue.
#[derive(Debug)]
pub struct ViolationTracker {
    records: DashMap<RateKey, VecDeque<Instant>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

/// Drop timestamps that are at least `ttl` old. Returns how many went.
fn prune(record: &mut VecDeque<Instant>, now: Instant, ttl: Duration) -> usize {
    let mut dropped = 0;
    while let Some(&oldest) = record.front() {
        if now.saturating_duration_since(oldest) < ttl {
            break;
        }
        record.pop_front();
        dropped += 1;
    }
    dropped
}

fn count_of(record: &VecDeque<Instant>) -> u32 {
    u32::try_from(record.len()).unwrap_or(u32::MAX)
}

impl ViolationTracker {
    /// Create a tracker that forgets violations after `ttl`.
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a violation now and return the key's recent violation count.
    pub fn record_violation(&self, key: &RateKey) -> u32 {
        let now = self.clock.now();
        let mut record = self.records.entry(key.clone()).or_default();
        prune(&mut record, now, self.ttl);
        record.push_back(now);

        let count = count_of(&record);
        debug!(key = %key, violations = count, "Recorded rate limit violation");
        count
    }

    /// Recent violation count for a key.
    ///
    /// Reading never creates an entry; an entry that turns out to be empty
    /// after pruning is removed.
    pub fn violation_count(&self, key: &RateKey) -> u32 {
        let now = self.clock.now();
        let count = match self.records.get_mut(key) {
            Some(mut record) => {
                prune(&mut record, now, self.ttl);
                count_of(&record)
            }
            None => return 0,
        };

        if count == 0 {
            self.records.remove_if(key, |_, record| record.is_empty());
        }
        count
    }

    /// Forget every violation for a key.
    pub fn clear(&self, key: &RateKey) {
        if self.records.remove(key).is_some() {
            debug!(key = %key, "Cleared violation history");
        }
    }

    /// Number of keys with at least one recorded violation (expired entries
    /// may linger until the next read or sweep).
    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }

    /// Prune every tracked key and drop the ones left empty.
    ///
    /// Works from a snapshot of the keys, locking one key at a time, so
    /// concurrent recording for other keys is never held up for longer than
    /// a single prune.
    pub fn sweep(&self) -> SweepStats {
        let keys: Vec<RateKey> = self.records.iter().map(|entry| entry.key().clone()).collect();
        let mut stats = SweepStats {
            scanned: keys.len(),
            ..Default::default()
        };

        for key in keys {
            let now = self.clock.now();
            let emptied = match self.records.get_mut(&key) {
                Some(mut record) => {
                    stats.expired += prune(&mut record, now, self.ttl);
                    record.is_empty()
                }
                None => false,
            };

            if emptied && self.records.remove_if(&key, |_, record| record.is_empty()).is_some() {
                trace!(key = %key, "Dropped expired violation record");
                stats.removed += 1;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn tracker() -> (ViolationTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ViolationTracker::new(DAY, clock.clone()), clock)
    }

    #[test]
    fn test_record_increments() {
        let (tracker, _) = tracker();
        let key = RateKey::ip("1.2.3.4");

        assert_eq!(tracker.record_violation(&key), 1);
        assert_eq!(tracker.record_violation(&key), 2);
        assert_eq!(tracker.violation_count(&key), 2);
    }

    #[test]
    fn test_count_on_absent_key_does_not_allocate() {
        let (tracker, _) = tracker();
        let key = RateKey::user("nobody");

        assert_eq!(tracker.violation_count(&key), 0);
        assert_eq!(tracker.tracked_keys(), 0);
    }

    #[test]
    fn test_violation_expires_after_ttl() {
        let (tracker, clock) = tracker();
        let key = RateKey::ip("1.2.3.4");

        tracker.record_violation(&key);
        clock.advance(DAY + Duration::from_secs(1));

        assert_eq!(tracker.violation_count(&key), 0);
        // The emptied record is removed on read.
        assert_eq!(tracker.tracked_keys(), 0);
    }

    #[test]
    fn test_violation_retained_within_ttl() {
        let (tracker, clock) = tracker();
        let key = RateKey::ip("1.2.3.4");

        tracker.record_violation(&key);
        clock.advance(DAY - Duration::from_secs(1));
        assert_eq!(tracker.violation_count(&key), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(tracker.violation_count(&key), 0);
    }

    #[test]
    fn test_partial_expiry() {
        let (tracker, clock) = tracker();
        let key = RateKey::user("42");

        tracker.record_violation(&key);
        clock.advance(Duration::from_secs(12 * 3600));
        tracker.record_violation(&key);
        tracker.record_violation(&key);
        assert_eq!(tracker.violation_count(&key), 3);

        clock.advance(Duration::from_secs(13 * 3600));
        assert_eq!(tracker.violation_count(&key), 2);
        assert_eq!(tracker.record_violation(&key), 3);
    }

    #[test]
    fn test_count_never_decreases_without_time() {
        let (tracker, _) = tracker();
        let key = RateKey::ip("10.0.0.1");

        let mut last = 0;
        for _ in 0..20 {
            tracker.record_violation(&key);
            let count = tracker.violation_count(&key);
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, 20);
    }

    #[test]
    fn test_clear() {
        let (tracker, _) = tracker();
        let a = RateKey::ip("1.1.1.1");
        let b = RateKey::ip("2.2.2.2");

        tracker.record_violation(&a);
        tracker.record_violation(&b);
        tracker.clear(&a);

        assert_eq!(tracker.violation_count(&a), 0);
        assert_eq!(tracker.violation_count(&b), 1);
        assert_eq!(tracker.tracked_keys(), 1);
    }

    #[test]
    fn test_sweep_removes_expired_keys() {
        let (tracker, clock) = tracker();
        let old = RateKey::ip("1.1.1.1");
        let mixed = RateKey::user("mixed");
        let fresh = RateKey::user("fresh");

        tracker.record_violation(&old);
        tracker.record_violation(&mixed);
        clock.advance(Duration::from_secs(20 * 3600));
        tracker.record_violation(&mixed);
        tracker.record_violation(&fresh);
        clock.advance(Duration::from_secs(5 * 3600));

        let stats = tracker.sweep();
        assert_eq!(
            stats,
            SweepStats {
                scanned: 3,
                expired: 2,
                removed: 1,
            }
        );
        assert_eq!(tracker.tracked_keys(), 2);
        assert_eq!(tracker.violation_count(&mixed), 1);
        assert_eq!(tracker.violation_count(&fresh), 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let (tracker, _) = tracker();
        let tracker = Arc::new(tracker);
        let shared = RateKey::ip("203.0.113.9");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = tracker.clone();
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let own = RateKey::user(&format!("worker-{}", i));
                    for _ in 0..50 {
                        tracker.record_violation(&shared);
                        tracker.record_violation(&own);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.violation_count(&shared), 400);
        assert_eq!(tracker.tracked_keys(), 9);
    }
}
