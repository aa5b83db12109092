//! Per-identity token bucket rate limiting.
//!
//! One bucket per identity (public key for ingest, remote address for
//! anonymous query). The map is guarded by a single mutex that is never
//! held across I/O — lookups and bucket refills are pure arithmetic, so
//! a plain `Arc<Mutex<HashMap<...>>>` is enough without needing a richer
//! lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("rate limit exceeded")]
    RateLimited,
}

/// Injectable clock so tests can advance time deterministically instead of
/// sleeping. Production code uses `SystemClock`; tests use `FakeClock`.
pub trait Clock: Send + Sync {
    /// Monotonic-enough seconds since an arbitrary epoch.
    fn now_secs(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs_f64()
    }
}

/// Deterministic clock for tests: starts at zero and only moves when told to.
/// Cheaply cloneable (an `Arc` handle to shared state) so a test can keep a
/// handle to advance time after moving a clone into a `RateLimiter`.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone)]
pub struct FakeClock(Arc<Mutex<f64>>);

#[cfg(any(test, feature = "test-util"))]
impl FakeClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(0.0)))
    }

    pub fn advance(&self, secs: f64) {
        *self.0.lock().expect("fake clock poisoned") += secs;
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl Clock for FakeClock {
    fn now_secs(&self) -> f64 {
        *self.0.lock().expect("fake clock poisoned")
    }
}

struct Bucket {
    tokens: f64,
    last_refill: f64,
}

/// Token bucket rate limiter, continuously replenished at `rate_per_min`
/// tokens per minute up to a capacity equal to that same rate (one minute's
/// worth of burst). State is process-local; no coordination across
/// instances, so over-allow on failover is acceptable.
pub struct RateLimiter<C: Clock> {
    rate_per_min: f64,
    clock: C,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(rate_per_min: u32, clock: C) -> Self {
        Self {
            rate_per_min: rate_per_min as f64,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to consume one token for `identity`. Refills the bucket for
    /// elapsed time before checking, so a bucket that hasn't been touched in
    /// a while is topped up rather than starved.
    pub fn check(&self, identity: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now_secs();
        let mut buckets = self.buckets.lock().expect("rate limiter map poisoned");
        let bucket = buckets.entry(identity.to_string()).or_insert(Bucket {
            tokens: self.rate_per_min,
            last_refill: now,
        });

        let elapsed = (now - bucket.last_refill).max(0.0);
        let refill = elapsed / 60.0 * self.rate_per_min;
        bucket.tokens = (bucket.tokens + refill).min(self.rate_per_min);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(RateLimitError::RateLimited)
        }
    }
}
