//! End-to-end engine scenarios driven through a mock dispatcher.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use clap::Parser;
use redis_protocol::resp2::types::BytesFrame;
use tokio_util::sync::CancellationToken;

use zbench::client::Dispatcher;
use zbench::config::Config;
use zbench::runner;

/// Scripted dispatcher: records batches, optionally delays, optionally fails
/// a specific call.
struct MockDispatcher {
    batches: Mutex<Vec<Vec<BytesFrame>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    /// 1-based call number that fails; every later call also fails.
    fail_from_call: Option<usize>,
    /// Number of elements in each query reply array.
    reply_cardinality: usize,
}

impl MockDispatcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: None,
            fail_from_call: None,
            reply_cardinality: 0,
        })
    }

    fn with(delay: Option<Duration>, fail_from_call: Option<usize>, cardinality: usize) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay,
            fail_from_call,
            reply_cardinality: cardinality,
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn recorded(&self) -> Vec<Vec<BytesFrame>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn dispatch(&self, batch: &[BytesFrame]) -> anyhow::Result<Vec<BytesFrame>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fail_from) = self.fail_from_call {
            if call >= fail_from {
                anyhow::bail!("injected dispatch failure on call {call}");
            }
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(batch
            .iter()
            .map(|_| {
                BytesFrame::Array(vec![
                    BytesFrame::BulkString(Bytes::from_static(b"x"));
                    self.reply_cardinality
                ])
            })
            .collect())
    }
}

fn config(args: &[&str]) -> Config {
    let mut full = vec!["zbench"];
    full.extend_from_slice(args);
    Config::parse_from(full)
}

fn command_name(frame: &BytesFrame) -> String {
    let BytesFrame::Array(parts) = frame else {
        panic!("expected array frame");
    };
    let BytesFrame::BulkString(name) = &parts[0] else {
        panic!("expected bulk string command name");
    };
    String::from_utf8_lossy(name).into_owned()
}

/// Scenario A: one client, pipeline 1, keyspace of 10, one element per key
/// issues exactly 10 single-element ZADD commands.
#[tokio::test]
async fn ingest_covers_keyspace_exactly() {
    let cfg = config(&[
        "--mode", "ingest",
        "--clients", "1",
        "--pipeline", "1",
        "--keyspace-len", "10",
        "--key-elements-min", "1",
        "--key-elements-max", "2",
    ]);
    let mock = MockDispatcher::new();
    let summary = runner::run(cfg, mock.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total_commands, 10);
    assert!(!summary.interrupted);
    assert_eq!(summary.avg_cardinality, Some(1.0));

    let batches = mock.recorded();
    assert_eq!(batches.len(), 10);
    for batch in &batches {
        assert_eq!(batch.len(), 1);
        assert_eq!(command_name(&batch[0]), "ZADD");
        let BytesFrame::Array(parts) = &batch[0] else {
            unreachable!()
        };
        // ZADD key score member: exactly one element per key.
        assert_eq!(parts.len(), 4);
    }
}

/// Scenario B: a 100 rps cap across 10 clients keeps aggregate throughput at
/// or below the cap plus the startup burst.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rate_cap_bounds_aggregate_throughput() {
    let cfg = config(&[
        "--mode", "query",
        "--clients", "10",
        "--pipeline", "1",
        "--rps", "100",
        "--requests", "100000",
        "--keyspace-len", "1000",
    ]);
    let mock = MockDispatcher::new();
    let interrupt = CancellationToken::new();
    let trigger = interrupt.clone();
    let window = Duration::from_millis(1500);
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        trigger.cancel();
    });
    let summary = runner::run(cfg, mock.clone(), interrupt).await.unwrap();

    assert!(summary.interrupted);
    // Burst of clients*pipeline = 10 plus 100 rps over ~1.5s, with headroom
    // for scheduling jitter.
    assert!(
        summary.total_commands <= 200,
        "issued {} commands under a 100 rps cap",
        summary.total_commands
    );
}

/// Scenario C: an interrupt mid-run stops the process cleanly with totals
/// strictly below the configured target and no error.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupt_drains_and_reports_partial_totals() {
    let cfg = config(&[
        "--mode", "query",
        "--clients", "2",
        "--pipeline", "1",
        "--requests", "10000000",
        "--keyspace-len", "1000",
    ]);
    let mock = MockDispatcher::with(Some(Duration::from_millis(1)), None, 2);
    let interrupt = CancellationToken::new();
    let trigger = interrupt.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });
    let summary = runner::run(cfg, mock.clone(), interrupt).await.unwrap();

    assert!(summary.interrupted);
    assert!(summary.total_commands > 0);
    assert!(summary.total_commands < 10_000_000);
    // Only fully-completed batches were counted.
    assert_eq!(summary.total_commands, mock.call_count() as u64);
}

/// Scenario D: one failed dispatch aborts the run; no worker starts a new
/// batch afterwards (in-flight batches may still finish).
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatch_failure_aborts_every_worker() {
    let clients = 4usize;
    let cfg = config(&[
        "--mode", "query",
        "--clients", "4",
        "--pipeline", "1",
        "--requests", "1000000",
        "--keyspace-len", "1000",
    ]);
    let fail_from = 10;
    let mock = MockDispatcher::with(Some(Duration::from_millis(1)), Some(fail_from), 0);
    let err = runner::run(cfg, mock.clone(), CancellationToken::new())
        .await
        .expect_err("run must abort on dispatch failure");
    assert!(format!("{err:#}").contains("injected dispatch failure"));

    // Every call past the failure point came from a batch already in flight
    // when the failing worker tripped cancellation.
    assert!(
        mock.call_count() < fail_from + clients,
        "workers kept dispatching after the abort: {} calls",
        mock.call_count()
    );
}

/// Query replies feed the reply-size histogram; bucket counts sum to the
/// number of recorded replies.
#[tokio::test]
async fn query_replies_populate_size_histogram() {
    let cfg = config(&[
        "--mode", "query",
        "--clients", "2",
        "--pipeline", "4",
        "--requests", "40",
        "--keyspace-len", "1000",
        "--key-elements-max", "20",
    ]);
    let mock = MockDispatcher::with(None, None, 3);
    let summary = runner::run(cfg, mock.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total_commands, 40);
    let total_replies: u64 = summary.reply_sizes.iter().map(|b| b.count).sum();
    assert_eq!(total_replies, 40);
    assert!(summary
        .reply_sizes
        .iter()
        .all(|bucket| bucket.size == 3));
    assert!(summary.p50_ms <= summary.p95_ms && summary.p95_ms <= summary.p99_ms);
}

/// The JSON summary artifact round-trips the printed totals.
#[tokio::test]
async fn json_out_writes_summary_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    let cfg = config(&[
        "--mode", "ingest",
        "--clients", "1",
        "--pipeline", "1",
        "--keyspace-len", "5",
        "--key-elements-min", "1",
        "--key-elements-max", "2",
        "--json-out", path.to_str().unwrap(),
    ]);
    let mock = MockDispatcher::new();
    let summary = runner::run(cfg, mock, CancellationToken::new())
        .await
        .unwrap();

    let written: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(written["total_commands"], summary.total_commands);
    assert_eq!(written["interrupted"], false);
    assert_eq!(written["avg_cardinality"], 1.0);
}

/// Remainders: when clients do not divide the request total, the run still
/// reaches the configured total exactly.
#[tokio::test]
async fn query_total_reached_with_uneven_split() {
    let cfg = config(&[
        "--mode", "query",
        "--clients", "3",
        "--pipeline", "1",
        "--requests", "103",
        "--keyspace-len", "100",
    ]);
    let mock = MockDispatcher::new();
    let summary = runner::run(cfg, mock.clone(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.total_commands, 103);
}
