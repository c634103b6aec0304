//! Shared request pacing via a token bucket.
//!
//! One `Pacer` is constructed by the run supervisor and handed to every
//! worker by `Arc`; it is never process-global, so concurrent runs (tests
//! included) do not interfere. A rate of zero disables pacing entirely.

use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    updated: Instant,
}

/// Token-bucket limiter shared by all workers.
///
/// `reserve` debits tokens immediately and returns the delay the caller must
/// sleep before proceeding (open-loop pacing, like the reserve-then-sleep
/// pattern of classic limiter APIs). The bucket may go negative; the debt is
/// paid by the returned delay, so over any window `t` the tokens consumed by
/// callers that honored their delays never exceed `burst + rate * t`.
pub struct Pacer {
    bucket: Option<Mutex<Bucket>>,
}

impl Pacer {
    /// `rate` in requests per second; zero means unlimited. `burst` is sized
    /// by the caller to `clients * pipeline` so all workers can issue one full
    /// round at steady state without serializing on the limiter.
    pub fn new(rate: u64, burst: u64) -> Self {
        let bucket = (rate > 0).then(|| {
            Mutex::new(Bucket {
                rate: rate as f64,
                burst: burst.max(1) as f64,
                tokens: burst.max(1) as f64,
                updated: Instant::now(),
            })
        });
        Self { bucket }
    }

    /// Reserve `n` tokens, returning how long the caller must sleep.
    pub fn reserve(&self, n: u64) -> Duration {
        self.reserve_at(Instant::now(), n)
    }

    /// Clock-parameterized reservation; tests drive this with a simulated
    /// instant instead of waiting on wall time.
    pub fn reserve_at(&self, now: Instant, n: u64) -> Duration {
        let Some(bucket) = &self.bucket else {
            return Duration::ZERO;
        };
        let mut bucket = bucket.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * bucket.rate).min(bucket.burst);
        bucket.updated = now;
        bucket.tokens -= n as f64;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / bucket.rate)
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.bucket.is_none()
    }
}
