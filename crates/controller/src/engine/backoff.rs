//! In-memory retry bookkeeping for failed analyses

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::store::ObjectKey;

/// Exponential delay policy: `base * 2^(attempts - 1)`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(15),
            max: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    generation: i64,
    attempts: u32,
    retry_at: Instant,
}

/// Failed attempts per object and generation
#[derive(Debug, Default)]
pub struct FailureTracker {
    records: DashMap<ObjectKey, FailureRecord>,
}

impl FailureTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before the next attempt is due, if a retry is still pending.
    ///
    /// A record for another generation is dropped.
    pub fn remaining(&self, key: &ObjectKey, generation: i64) -> Option<Duration> {
        let record = *self.records.get(key)?;
        if record.generation != generation {
            self.records.remove(key);
            return None;
        }
        let now = Instant::now();
        (record.retry_at > now).then(|| record.retry_at - now)
    }

    /// Record a failed attempt and return the delay before the next one
    pub fn record_failure(&self, key: &ObjectKey, generation: i64, policy: BackoffPolicy) -> Duration {
        let mut entry = self.records.entry(key.clone()).or_insert(FailureRecord {
            generation,
            attempts: 0,
            retry_at: Instant::now(),
        });
        if entry.generation != generation {
            entry.generation = generation;
            entry.attempts = 0;
        }
        entry.attempts = entry.attempts.saturating_add(1);
        let delay = policy.delay_for(entry.attempts);
        entry.retry_at = Instant::now() + delay;
        delay
    }

    /// Number of failed attempts recorded for the key's current record
    #[must_use]
    pub fn attempts(&self, key: &ObjectKey) -> u32 {
        self.records.get(key).map_or(0, |r| r.attempts)
    }

    pub fn clear(&self, key: &ObjectKey) {
        self.records.remove(key);
    }
}
