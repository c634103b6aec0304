//! Shared run metrics: counters, latency histogram, reply-size histogram.
//!
//! One `Metrics` is constructed by the supervisor and shared by `Arc` into
//! every worker. Counters are relaxed atomics; the latency histogram is
//! internally synchronized so concurrent recordings are never lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use hdrhistogram::Histogram;

/// Lowest representable latency (microseconds).
pub const LATENCY_MIN_US: u64 = 1;
/// Highest representable latency (microseconds).
pub const LATENCY_MAX_US: u64 = 90_000_000;
/// Significant decimal digits of histogram precision.
pub const LATENCY_SIGFIG: u8 = 3;

/// Point-in-time view of the shared counters and latency quantiles.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub total_commands: u64,
    pub total_elements: u64,
    pub total_errors: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

/// Process-lifetime aggregator written by all workers.
pub struct Metrics {
    total_commands: AtomicU64,
    total_elements: AtomicU64,
    total_errors: AtomicU64,
    latency: Mutex<Histogram<u64>>,
    reply_sizes: Vec<AtomicU64>,
}

impl Metrics {
    /// `max_reply_cardinality` sizes the reply-size histogram; cardinalities
    /// beyond it are clamped into the last bucket rather than dropped.
    pub fn new(max_reply_cardinality: usize) -> anyhow::Result<Self> {
        let latency = Histogram::new_with_bounds(LATENCY_MIN_US, LATENCY_MAX_US, LATENCY_SIGFIG)
            .context("create latency histogram")?;
        let buckets = max_reply_cardinality.max(1) + 1;
        let reply_sizes = (0..buckets).map(|_| AtomicU64::new(0)).collect();
        Ok(Self {
            total_commands: AtomicU64::new(0),
            total_elements: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            latency: Mutex::new(latency),
            reply_sizes,
        })
    }

    pub fn add_commands(&self, n: u64) {
        self.total_commands.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_elements(&self, n: u64) {
        self.total_elements.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_errors(&self, n: u64) {
        self.total_errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total_commands(&self) -> u64 {
        self.total_commands.load(Ordering::Relaxed)
    }

    /// Record one batch round-trip time. A value outside the histogram domain
    /// is an error; callers treat it as fatal (runaway request or
    /// misconfigured domain).
    pub fn record_latency(&self, us: u64) -> anyhow::Result<()> {
        let mut latency = self
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        latency
            .record(us)
            .with_context(|| format!("latency {us}us outside histogram domain"))
    }

    /// Record one reply's cardinality (query mode only).
    pub fn record_reply_size(&self, cardinality: usize) {
        let idx = cardinality.min(self.reply_sizes.len() - 1);
        self.reply_sizes[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency = self
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        MetricsSnapshot {
            total_commands: self.total_commands.load(Ordering::Relaxed),
            total_elements: self.total_elements.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            p50_us: latency.value_at_quantile(0.50),
            p95_us: latency.value_at_quantile(0.95),
            p99_us: latency.value_at_quantile(0.99),
        }
    }

    /// Non-empty reply-size buckets as `(cardinality, count)` pairs.
    pub fn reply_size_buckets(&self) -> Vec<(usize, u64)> {
        self.reply_sizes
            .iter()
            .enumerate()
            .filter_map(|(size, count)| {
                let count = count.load(Ordering::Relaxed);
                (count > 0).then_some((size, count))
            })
            .collect()
    }
}
