//! Sliding-window timestamp buckets.

use std::collections::VecDeque;
use std::time::Duration;

use super::rules::Operation;

/// Timestamps (epoch milliseconds) of attempts still inside the window.
///
/// Entries are kept in arrival order. Stale entries are purged every time an
/// attempt is recorded, never in deferred batches.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    entries: VecDeque<u64>,
}

impl Bucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Purge expired entries, append `ts` and return the resulting count.
    pub fn record(&mut self, ts: u64, window_ms: u64) -> u64 {
        self.purge(ts, window_ms);
        self.entries.push_back(ts);
        self.len()
    }

    /// Drop every entry at least `window_ms` older than `now`.
    pub fn purge(&mut self, now: u64, window_ms: u64) {
        while let Some(&oldest) = self.entries.front() {
            if now.saturating_sub(oldest) < window_ms {
                break;
            }
            self.entries.pop_front();
        }
    }

    /// Timestamp of the oldest retained attempt.
    pub fn oldest(&self) -> Option<u64> {
        self.entries.front().copied()
    }

    /// Time until the oldest entry leaves the window, floored at zero.
    pub fn time_until_slot(&self, now: u64, window_ms: u64) -> Duration {
        let wait = self
            .oldest()
            .map(|oldest| window_ms.saturating_sub(now.saturating_sub(oldest)))
            .unwrap_or(0);
        Duration::from_millis(wait)
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A `read` and a `write` bucket for one scope.
#[derive(Debug, Clone, Default)]
pub struct OpBuckets {
    read: Bucket,
    write: Bucket,
}

impl OpBuckets {
    pub fn get(&self, op: Operation) -> &Bucket {
        match op {
            Operation::Read => &self.read,
            Operation::Write => &self.write,
        }
    }

    pub fn get_mut(&mut self, op: Operation) -> &mut Bucket {
        match op {
            Operation::Read => &mut self.read,
            Operation::Write => &mut self.write,
        }
    }
}
