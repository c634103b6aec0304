//! Run supervisor: owns the shared state, spawns workers, joins them, and
//! produces the final summary.

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::Dispatcher;
use crate::config::{Config, Mode};
use crate::keyspace;
use crate::metrics::Metrics;
use crate::pacer::Pacer;
use crate::reporter::{self, RunEnd, RunSummary};
use crate::slots::SlotTable;
use crate::worker::{run_worker, WorkerContext, WorkerOutcome};

/// Execute a full benchmark run.
///
/// `interrupt` is the external stop signal (Ctrl-C in the binary; tests
/// trigger it directly). Returns the final summary on completion or
/// interrupt; a dispatch or histogram failure aborts with the worker's error
/// after every worker has reached a terminal state.
pub async fn run(
    config: Config,
    dispatcher: Arc<dyn Dispatcher>,
    interrupt: CancellationToken,
) -> anyhow::Result<RunSummary> {
    config.validate()?;
    let config = Arc::new(config);
    let table = SlotTable::build();
    let metrics = Arc::new(Metrics::new(config.max_reply_cardinality())?);
    let pacer = Arc::new(Pacer::new(config.rps, config.burst()));
    let cancel = CancellationToken::new();

    let partitions = keyspace::partitions(
        config.keyspace_start,
        config.keyspace_len,
        config.clients,
    );

    let mut workers = JoinSet::new();
    for (worker_id, partition) in partitions.into_iter().enumerate() {
        // Ingest walks its partition to the end; query splits the configured
        // request total, with the last worker absorbing the remainder.
        let samples = match config.mode {
            Mode::Ingest => partition.len(),
            Mode::Query => config.query_samples(worker_id),
        };
        let ctx = WorkerContext {
            worker_id,
            partition,
            samples,
            config: Arc::clone(&config),
            table: Arc::clone(&table),
            pacer: Arc::clone(&pacer),
            metrics: Arc::clone(&metrics),
            dispatcher: Arc::clone(&dispatcher),
            cancel: cancel.clone(),
        };
        workers.spawn(run_worker(ctx));
    }

    let report = reporter::run_reporter(
        Arc::clone(&metrics),
        config.total_commands(),
        interrupt,
        cancel.clone(),
    )
    .await;

    // Stop the workers and wait for every one to reach a terminal state;
    // in-flight batches complete before cancellation is observed.
    cancel.cancel();
    let mut first_error: Option<anyhow::Error> = None;
    let mut cancelled = 0usize;
    while let Some(joined) = workers.join_next().await {
        match joined.context("worker task panicked")? {
            Ok(WorkerOutcome::Exhausted) => {}
            Ok(WorkerOutcome::Cancelled) => cancelled += 1,
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }
    if cancelled > 0 {
        tracing::debug!(cancelled, "workers stopped before exhausting their samples");
    }

    let summary = RunSummary::build(
        &metrics,
        config.mode,
        report.elapsed,
        report.end == RunEnd::Interrupted,
    );

    if let Some(path) = &config.json_out {
        write_summary(path, &summary)?;
        tracing::info!(path = %path.display(), "wrote summary json");
    }

    Ok(summary)
}

/// Serialize and write the final summary JSON.
fn write_summary(path: &std::path::Path, summary: &RunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
    }
    let data = serde_json::to_vec_pretty(summary).context("serialize summary")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
