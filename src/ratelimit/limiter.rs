//! Core rate limiter implementation.

use async_trait::async_trait;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::backend::Admission;
use super::bucket::OpBuckets;
use super::clock::{Clock, SystemClock};
use super::resource::{AsResource, Resource};
use super::rules::{Behavior, LimitConfig, LimitConfigUpdate, Operation, Violation};
use crate::error::LimitExceeded;

/// Outcome of counting one attempt in one scope.
#[derive(Debug, Clone, Copy)]
struct Check {
    count: u64,
    limit: Option<u64>,
}

impl Check {
    /// The exceeded ceiling, if any.
    fn exceeded(&self) -> Option<u64> {
        self.limit.filter(|&limit| self.count > limit)
    }
}

/// Two-tier sliding-window rate limiter.
///
/// Every attempt is counted against a global bucket for its operation and a
/// bucket for its resource path. Counting happens before the ceiling test, so
/// rejected attempts still occupy a slot in their window.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    config: RwLock<LimitConfig>,
    /// Global buckets, one per operation
    global: Mutex<OpBuckets>,
    /// Per-path buckets, created on first use and kept until reset
    collections: DashMap<String, OpBuckets>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter with default settings.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a rate limiter reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            config: RwLock::new(LimitConfig::default()),
            global: Mutex::new(OpBuckets::default()),
            collections: DashMap::new(),
            clock,
        }
    }

    /// Create a rate limiter and apply `update` to its defaults.
    pub fn with_config(update: LimitConfigUpdate) -> Self {
        let limiter = Self::new();
        limiter.configure(update);
        limiter
    }

    /// Merge `update` into the current configuration.
    pub fn configure(&self, update: LimitConfigUpdate) {
        let mut config = self.config.write();
        config.merge(update);
        debug!(config = ?*config, "Rate limits configured");
    }

    /// Snapshot of the effective configuration.
    pub fn config(&self) -> LimitConfig {
        self.config.read().clone()
    }

    /// Clear all buckets.
    ///
    /// This is primarily useful for testing.
    pub fn reset(&self) {
        *self.global.lock() = OpBuckets::default();
        self.collections.clear();
        debug!("Rate limit buckets cleared");
    }

    /// Register an attempt of `op` against `resource`.
    ///
    /// Returns once the attempt may proceed. Under [`Behavior::Throw`] an
    /// attempt over a ceiling fails with [`LimitExceeded`]; under
    /// [`Behavior::Queue`] it is delayed until the oldest entry of the
    /// resource's bucket leaves the window; under [`Behavior::Log`] it is let
    /// through with a warning.
    pub async fn register<R>(&self, op: Operation, resource: &R) -> Result<(), LimitExceeded>
    where
        R: AsResource + ?Sized,
    {
        let path = resource.as_resource().resolve().to_owned();
        self.admit(op, path).await
    }

    async fn admit(&self, op: Operation, path: String) -> Result<(), LimitExceeded> {
        let ts = self.clock.now_ms();

        let (window_ms, global_limit, collection_limit, behavior, hook) = {
            let config = self.config.read();
            (
                config.global.window_ms,
                config.global.limit(op),
                config.collection_limit(&path, op),
                config.behavior,
                config.on_limit_exceeded.clone(),
            )
        };

        trace!(op = %op, path = %path, ts = ts, "Registering attempt");

        let global = {
            let mut buckets = self.global.lock();
            Check {
                count: buckets.get_mut(op).record(ts, window_ms),
                limit: global_limit,
            }
        };

        let collection = {
            let mut buckets = self.buckets_for(&path);
            Check {
                count: buckets.get_mut(op).record(ts, window_ms),
                limit: collection_limit,
            }
        };

        // A global violation takes reporting precedence
        let (count, limit) = match (global.exceeded(), collection.exceeded()) {
            (Some(limit), _) => (global.count, limit),
            (None, Some(limit)) => (collection.count, limit),
            (None, None) => return Ok(()),
        };

        let violation = Violation {
            op,
            path,
            ts,
            count,
            limit,
        };

        if let Some(hook) = hook {
            hook(&violation);
        }

        match behavior {
            Behavior::Throw => {
                debug!(
                    op = %op,
                    path = %violation.path,
                    count = count,
                    limit = limit,
                    "Rate limit exceeded, rejecting"
                );
                Err(violation.into())
            }
            Behavior::Log => {
                warn!(
                    op = %op,
                    path = %violation.path,
                    count = count,
                    limit = limit,
                    "Rate limit hit, allowing"
                );
                Ok(())
            }
            Behavior::Queue => {
                let delay = self.queue_delay(op, &violation.path, window_ms);
                info!(
                    op = %op,
                    path = %violation.path,
                    count = count,
                    limit = limit,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limit hit, queueing"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
        }
    }

    /// Time until the oldest entry of `path`'s bucket leaves the window.
    fn queue_delay(&self, op: Operation, path: &str, window_ms: u64) -> Duration {
        let now = self.clock.now_ms();
        self.collections
            .get(path)
            .map(|buckets| buckets.get(op).time_until_slot(now, window_ms))
            .unwrap_or(Duration::ZERO)
    }

    fn buckets_for(&self, path: &str) -> RefMut<'_, String, OpBuckets> {
        if let Some(buckets) = self.collections.get_mut(path) {
            return buckets;
        }
        self.collections.entry(path.to_owned()).or_insert_with(|| {
            debug!(path = %path, "Creating resource buckets");
            OpBuckets::default()
        })
    }

    /// Attempts currently held in the global bucket for `op`.
    pub fn global_count(&self, op: Operation) -> u64 {
        self.global.lock().get(op).len()
    }

    /// Attempts currently held in `path`'s bucket for `op`.
    ///
    /// Returns `None` if the path has never been seen.
    pub fn collection_count(&self, path: &str, op: Operation) -> Option<u64> {
        self.collections.get(path).map(|buckets| buckets.get(op).len())
    }

    /// Number of resource paths with buckets.
    pub fn tracked_paths(&self) -> usize {
        self.collections.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Violation> for LimitExceeded {
    fn from(violation: Violation) -> Self {
        Self {
            op: violation.op,
            path: violation.path,
            count: violation.count,
            limit: violation.limit,
        }
    }
}

#[async_trait]
impl Admission for RateLimiter {
    async fn register(&self, op: Operation, resource: Resource<'_>) -> Result<(), LimitExceeded> {
        self.admit(op, resource.resolve().to_owned()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use tokio_test::{assert_err, assert_ok};

    fn manual_limiter() -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let limiter = RateLimiter::with_clock(clock.clone());
        (clock, limiter)
    }

    fn recording_hook(update: LimitConfigUpdate) -> (LimitConfigUpdate, Arc<Mutex<Vec<Violation>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let update = update.on_limit_exceeded(move |v| sink.lock().push(v.clone()));
        (update, seen)
    }

    #[tokio::test]
    async fn test_allows_up_to_global_limit() {
        let (_, limiter) = manual_limiter();
        limiter.configure(
            LimitConfigUpdate::new()
                .global_limit(Operation::Read, 2)
                .window_ms(50),
        );

        assert_ok!(limiter.register(Operation::Read, "users/1").await);
        assert_ok!(limiter.register(Operation::Read, "users/2").await);
    }

    #[tokio::test]
    async fn test_rejects_over_global_limit() {
        let (_, limiter) = manual_limiter();
        limiter.configure(
            LimitConfigUpdate::new()
                .global_limit(Operation::Read, 2)
                .window_ms(50),
        );

        limiter.register(Operation::Read, "users/1").await.unwrap();
        limiter.register(Operation::Read, "users/2").await.unwrap();
        let err = assert_err!(limiter.register(Operation::Read, "users/3").await);

        assert!(err
            .to_string()
            .contains("read limit exceeded for users/3 (3/2)"));
        assert_eq!(err.op, Operation::Read);
        assert_eq!(err.path, "users/3");
        assert_eq!(err.count, 3);
        assert_eq!(err.limit, 2);
    }

    #[tokio::test]
    async fn test_operations_are_counted_separately() {
        let (_, limiter) = manual_limiter();
        limiter.configure(LimitConfigUpdate::new().global_limit(Operation::Write, 1));

        assert_ok!(limiter.register(Operation::Write, "a").await);
        // Reads have no ceiling and do not share the write bucket
        for _ in 0..10 {
            assert_ok!(limiter.register(Operation::Read, "a").await);
        }
        assert_err!(limiter.register(Operation::Write, "a").await);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (clock, limiter) = manual_limiter();
        limiter.configure(
            LimitConfigUpdate::new()
                .global_limit(Operation::Read, 2)
                .window_ms(50),
        );

        limiter.register(Operation::Read, "users/1").await.unwrap();
        clock.advance(20);
        limiter.register(Operation::Read, "users/2").await.unwrap();
        assert_err!(limiter.register(Operation::Read, "users/3").await);

        // The first attempt has expired, but the rejected one still counts
        clock.advance(30);
        assert_err!(limiter.register(Operation::Read, "users/4").await);

        // A full window after everything, the bucket is fresh again
        clock.advance(50);
        assert_ok!(limiter.register(Operation::Read, "users/5").await);
        assert_eq!(limiter.global_count(Operation::Read), 1);
    }

    #[tokio::test]
    async fn test_rejected_attempts_consume_slots() {
        let (_, limiter) = manual_limiter();
        limiter.configure(LimitConfigUpdate::new().global_limit(Operation::Write, 1));

        limiter.register(Operation::Write, "x").await.unwrap();
        assert_err!(limiter.register(Operation::Write, "x").await);
        let err = assert_err!(limiter.register(Operation::Write, "x").await);

        assert_eq!(err.count, 3);
        assert_eq!(limiter.global_count(Operation::Write), 3);
    }

    #[tokio::test]
    async fn test_unlimited_operations_are_still_counted() {
        let (_, limiter) = manual_limiter();

        for _ in 0..5 {
            assert_ok!(limiter.register(Operation::Read, "users/1").await);
        }
        assert_eq!(limiter.global_count(Operation::Read), 5);
        assert_eq!(limiter.collection_count("users/1", Operation::Read), Some(5));

        // Lowering the ceiling later applies to the existing counts
        limiter.configure(LimitConfigUpdate::new().global_limit(Operation::Read, 5));
        assert_err!(limiter.register(Operation::Read, "users/1").await);
    }

    #[tokio::test]
    async fn test_per_collection_limits_are_independent() {
        let (_, limiter) = manual_limiter();
        limiter.configure(
            LimitConfigUpdate::new()
                .collection_limit("orders", Operation::Write, 1)
                .collection_limit("users", Operation::Write, 1),
        );

        assert_ok!(limiter.register(Operation::Write, "orders").await);
        let err = assert_err!(limiter.register(Operation::Write, "orders").await);
        assert_eq!(err.to_string(), "write limit exceeded for orders (2/1)");

        assert_ok!(limiter.register(Operation::Write, "users").await);
        // Unlisted paths face only the (absent) global ceiling
        assert_ok!(limiter.register(Operation::Write, "products").await);
        assert_ok!(limiter.register(Operation::Write, "products").await);
    }

    #[tokio::test]
    async fn test_zero_collection_limit_rejects_everything() {
        let (_, limiter) = manual_limiter();
        limiter.configure(LimitConfigUpdate::new().collection_limit("locked", Operation::Read, 0));

        let err = assert_err!(limiter.register(Operation::Read, "locked").await);
        assert_eq!(err.count, 1);
        assert_eq!(err.limit, 0);
    }

    #[tokio::test]
    async fn test_collection_violation_reports_collection_numbers() {
        let (_, limiter) = manual_limiter();
        limiter.configure(
            LimitConfigUpdate::new()
                .global_limit(Operation::Read, 100)
                .collection_limit("users/1", Operation::Read, 1),
        );

        limiter.register(Operation::Read, "users/2").await.unwrap();
        limiter.register(Operation::Read, "users/1").await.unwrap();
        let err = assert_err!(limiter.register(Operation::Read, "users/1").await);

        assert_eq!(err.count, 2);
        assert_eq!(err.limit, 1);
    }

    #[tokio::test]
    async fn test_global_violation_takes_precedence() {
        let (_, limiter) = manual_limiter();
        limiter.configure(
            LimitConfigUpdate::new()
                .global_limit(Operation::Read, 2)
                .collection_limit("users/1", Operation::Read, 1),
        );

        limiter.register(Operation::Read, "users/2").await.unwrap();
        limiter.register(Operation::Read, "users/1").await.unwrap();
        let err = assert_err!(limiter.register(Operation::Read, "users/1").await);

        // Both ceilings are exceeded, the global one is reported
        assert_eq!(err.count, 3);
        assert_eq!(err.limit, 2);
    }

    #[tokio::test]
    async fn test_hook_receives_violation() {
        let (clock, limiter) = manual_limiter();
        let (update, seen) = recording_hook(LimitConfigUpdate::new().global_limit(Operation::Write, 1));
        limiter.configure(update);

        limiter.register(Operation::Write, "orders/1").await.unwrap();
        assert!(seen.lock().is_empty());
        assert_err!(limiter.register(Operation::Write, "orders/2").await);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0],
            Violation {
                op: Operation::Write,
                path: "orders/2".to_string(),
                ts: clock.now_ms(),
                count: 2,
                limit: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_log_behavior_allows_and_notifies() {
        let (_, limiter) = manual_limiter();
        let (update, seen) = recording_hook(
            LimitConfigUpdate::new()
                .global_limit(Operation::Read, 1)
                .behavior(Behavior::Log),
        );
        limiter.configure(update);

        for _ in 0..4 {
            assert_ok!(limiter.register(Operation::Read, "users/1").await);
        }
        let counts: Vec<u64> = seen.lock().iter().map(|v| v.count).collect();
        assert_eq!(counts, vec![2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_behavior_delays_until_slot_frees() {
        let limiter = RateLimiter::new();
        let (update, seen) = recording_hook(
            LimitConfigUpdate::new()
                .collection_limit("orders", Operation::Write, 1)
                .behavior(Behavior::Queue)
                .window_ms(100),
        );
        limiter.configure(update);

        let start = tokio::time::Instant::now();
        assert_ok!(limiter.register(Operation::Write, "orders").await);
        let first = start.elapsed();
        assert_ok!(limiter.register(Operation::Write, "orders").await);
        let second = start.elapsed();

        assert_eq!(first, Duration::ZERO);
        assert!(second >= Duration::from_millis(100), "resolved after {second:?}");
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_delay_accounts_for_elapsed_time() {
        let limiter = RateLimiter::new();
        limiter.configure(
            LimitConfigUpdate::new()
                .collection_limit("orders", Operation::Write, 1)
                .behavior(Behavior::Queue)
                .window_ms(100),
        );

        limiter.register(Operation::Write, "orders").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let start = tokio::time::Instant::now();
        limiter.register(Operation::Write, "orders").await.unwrap();
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(39), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(45), "waited {waited:?}");
    }

    #[tokio::test]
    async fn test_reset_behaves_like_fresh_limiter() {
        let (_, limiter) = manual_limiter();
        limiter.configure(LimitConfigUpdate::new().global_limit(Operation::Read, 1));

        limiter.register(Operation::Read, "users/1").await.unwrap();
        assert_err!(limiter.register(Operation::Read, "users/1").await);
        assert_eq!(limiter.tracked_paths(), 1);

        limiter.reset();
        limiter.reset();
        assert_eq!(limiter.tracked_paths(), 0);
        assert_eq!(limiter.global_count(Operation::Read), 0);
        assert_eq!(limiter.collection_count("users/1", Operation::Read), None);

        assert_ok!(limiter.register(Operation::Read, "users/1").await);
        assert_err!(limiter.register(Operation::Read, "users/1").await);
    }

    #[tokio::test]
    async fn test_configure_merges_over_previous() {
        let (_, limiter) = manual_limiter();
        limiter.configure(LimitConfigUpdate::new().global_limit(Operation::Read, 2));
        limiter.configure(LimitConfigUpdate::new().window_ms(50));
        limiter.configure(LimitConfigUpdate::new().behavior(Behavior::Log));

        let config = limiter.config();
        assert_eq!(config.global.read, Some(2));
        assert_eq!(config.global.window_ms, 50);
        assert_eq!(config.behavior, Behavior::Log);
    }

    #[tokio::test]
    async fn test_admission_trait_resolves_unknown() {
        let (_, limiter) = manual_limiter();
        let admission: &dyn Admission = &limiter;

        admission
            .register(Operation::Read, Resource::Unknown)
            .await
            .unwrap();
        assert_eq!(limiter.collection_count("_unknown_", Operation::Read), Some(1));
    }
}
