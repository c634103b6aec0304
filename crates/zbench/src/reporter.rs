//! Live progress reporting, completion detection, and the final summary.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Mode;
use crate::metrics::Metrics;

/// Why the reporter stopped the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The configured total command count was reached.
    Completed,
    /// The external interrupt was observed.
    Interrupted,
    /// A worker tripped the cancellation token (fatal dispatch failure).
    Aborted,
}

/// Reporter outcome handed back to the supervisor.
pub struct ReporterReport {
    pub end: RunEnd,
    pub elapsed: Duration,
}

/// Poll metrics on a fixed one-second tick, printing one progress line per
/// tick, until the run completes, the interrupt fires, or a worker aborts.
///
/// The measured duration starts at the first tick that observes traffic, so
/// connection setup does not dilute the throughput figure.
pub async fn run_reporter(
    metrics: Arc<Metrics>,
    total_expected: u64,
    interrupt: CancellationToken,
    cancel: CancellationToken,
) -> ReporterReport {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick fires immediately; consume it.
    ticker.tick().await;

    println!(
        "{:>12} {:>8} {:>18} {:>14} {:>8} {:>16} {:>16}",
        "Test time", "", "Total Commands", "Total Errors", "", "Command Rate", "p50 lat. (msec)"
    );

    let mut started = Instant::now();
    let mut prev_at = started;
    let mut prev_commands = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let snap = metrics.snapshot();
                let window = now.saturating_duration_since(prev_at).as_secs_f64();
                let rate = if window > 0.0 {
                    (snap.total_commands - prev_commands) as f64 / window
                } else {
                    0.0
                };
                let completion = if total_expected > 0 {
                    snap.total_commands as f64 / total_expected as f64 * 100.0
                } else {
                    0.0
                };
                let error_pct = if snap.total_commands > 0 {
                    snap.total_errors as f64 / snap.total_commands as f64 * 100.0
                } else {
                    0.0
                };

                // Reset the duration origin when traffic first appears.
                if prev_commands == 0 && snap.total_commands != 0 {
                    started = Instant::now();
                }
                prev_commands = snap.total_commands;
                prev_at = now;

                print!(
                    "{:>11.0}s [{:>5.1}%] {:>18} {:>14} [{:>4.1}%] {:>16.2} {:>16.2}\r",
                    started.elapsed().as_secs_f64(),
                    completion,
                    snap.total_commands,
                    snap.total_errors,
                    error_pct,
                    rate,
                    snap.p50_us as f64 / 1000.0,
                );
                let _ = std::io::stdout().flush();

                if total_expected > 0 && snap.total_commands >= total_expected {
                    return ReporterReport { end: RunEnd::Completed, elapsed: started.elapsed() };
                }
            }
            _ = interrupt.cancelled() => {
                println!("\nreceived interrupt - shutting down");
                return ReporterReport { end: RunEnd::Interrupted, elapsed: started.elapsed() };
            }
            _ = cancel.cancelled() => {
                return ReporterReport { end: RunEnd::Aborted, elapsed: started.elapsed() };
            }
        }
    }
}

/// One reply-size histogram bucket in the final summary.
#[derive(Debug, Clone, Serialize)]
pub struct ReplySizeBucket {
    pub size: usize,
    pub count: u64,
    pub percent: f64,
}

/// Final run summary, printed and optionally written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub duration_secs: f64,
    pub total_commands: u64,
    pub total_errors: u64,
    pub throughput_rps: f64,
    /// Average elements per issued command; ingest mode only.
    pub avg_cardinality: Option<f64>,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub interrupted: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reply_sizes: Vec<ReplySizeBucket>,
}

impl RunSummary {
    pub fn build(metrics: &Metrics, mode: Mode, elapsed: Duration, interrupted: bool) -> Self {
        let snap = metrics.snapshot();
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            snap.total_commands as f64 / secs
        } else {
            0.0
        };
        let avg_cardinality = (mode == Mode::Ingest && snap.total_commands > 0)
            .then(|| snap.total_elements as f64 / snap.total_commands as f64);
        let reply_sizes = if mode == Mode::Query {
            metrics
                .reply_size_buckets()
                .into_iter()
                .map(|(size, count)| ReplySizeBucket {
                    size,
                    count,
                    percent: if snap.total_commands > 0 {
                        count as f64 / snap.total_commands as f64 * 100.0
                    } else {
                        0.0
                    },
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            duration_secs: secs,
            total_commands: snap.total_commands,
            total_errors: snap.total_errors,
            throughput_rps: throughput,
            avg_cardinality,
            p50_ms: snap.p50_us as f64 / 1000.0,
            p95_ms: snap.p95_us as f64 / 1000.0,
            p99_ms: snap.p99_us as f64 / 1000.0,
            interrupted,
            reply_sizes,
        }
    }

    pub fn print(&self, print_reply_histogram: bool) {
        println!();
        println!("#################################################");
        println!("Total Duration {:.3} Seconds", self.duration_secs);
        println!("Total Issued commands {}", self.total_commands);
        println!("Total Errors {}", self.total_errors);
        println!(
            "Throughput summary: {:.0} requests per second",
            self.throughput_rps
        );
        if let Some(avg) = self.avg_cardinality {
            println!("Average zcard {avg:.0} elements");
        }
        println!("Latency summary (msec):");
        println!("    {:>9} {:>9} {:>9}", "p50", "p95", "p99");
        println!(
            "    {:>9.3} {:>9.3} {:>9.3}",
            self.p50_ms, self.p95_ms, self.p99_ms
        );
        if print_reply_histogram && !self.reply_sizes.is_empty() {
            println!("#################################################");
            println!("Printing reply histogram");
            let mut total_replies = 0u64;
            for bucket in &self.reply_sizes {
                println!(
                    "Size: {}\tCount: {}. (% {:.2})",
                    bucket.size, bucket.count, bucket.percent
                );
                total_replies += bucket.count;
            }
            println!("--------------------------------------------------");
            println!("Total processed replies {total_replies}");
        }
    }
}
