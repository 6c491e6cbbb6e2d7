//! Time sources for bucket timestamps.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::time::Instant;

/// Source of epoch-millisecond timestamps.
pub trait Clock: Send + Sync + Debug {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time, anchored once and advanced monotonically.
///
/// Elapsed time comes from tokio's clock, so a paused test runtime drives it
/// along with `tokio::time::sleep`.
#[derive(Debug)]
pub struct SystemClock {
    anchor_ms: u64,
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            anchor_ms: Utc::now().timestamp_millis().max(0) as u64,
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.anchor_ms + self.started.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: u64) {
        self.now.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
