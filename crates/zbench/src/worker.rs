//! Worker loop: pace, build, dispatch, measure.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use redis_protocol::resp2::types::BytesFrame;
use tokio_util::sync::CancellationToken;

use crate::batch;
use crate::client::Dispatcher;
use crate::config::{Config, Mode};
use crate::keyspace::Partition;
use crate::metrics::Metrics;
use crate::pacer::Pacer;
use crate::slots::SlotTable;

/// Terminal state a worker ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The per-worker sample count was reached.
    Exhausted,
    /// The cancellation token was observed set.
    Cancelled,
}

/// Everything a worker owns or shares, assembled by the supervisor.
pub struct WorkerContext {
    pub worker_id: usize,
    pub partition: Partition,
    /// Commands this worker will issue before exhausting.
    pub samples: u64,
    pub config: Arc<Config>,
    pub table: Arc<SlotTable>,
    pub pacer: Arc<Pacer>,
    pub metrics: Arc<Metrics>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub cancel: CancellationToken,
}

/// Deterministic per-worker seed from the global seed and worker index.
pub fn worker_seed(global_seed: u64, worker_id: usize) -> u64 {
    global_seed ^ (worker_id as u64 + 1).wrapping_mul(0x9e3779b97f4a7c15)
}

/// Drive one worker to a terminal state.
///
/// The cancellation token is checked at exactly one point, before a new batch
/// is built; an in-flight batch always completes. A dispatch or histogram
/// failure is fatal: the worker trips the shared token so every other worker
/// stops at its next check, and the error propagates to the supervisor with
/// no metrics recorded for the failed batch.
pub async fn run_worker(ctx: WorkerContext) -> anyhow::Result<WorkerOutcome> {
    let cfg = &ctx.config;
    let mut rng = SmallRng::seed_from_u64(worker_seed(cfg.seed, ctx.worker_id));
    let mut cursor = ctx.partition.start;
    let mut issued = 0u64;

    while issued < ctx.samples {
        if ctx.cancel.is_cancelled() {
            return Ok(WorkerOutcome::Cancelled);
        }

        let delay = ctx.pacer.reserve(cfg.pipeline);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (frames, batch_elements) = match cfg.mode {
            Mode::Ingest => {
                let built = batch::ingest_batch(
                    &mut rng,
                    &ctx.table,
                    cursor,
                    cfg.pipeline,
                    cfg.key_elements_min,
                    cfg.key_elements_max,
                    cfg.data_size,
                );
                cursor = built.next_cursor;
                (built.frames, built.elements)
            }
            Mode::Query => {
                let frames = batch::query_batch(
                    &mut rng,
                    &ctx.table,
                    cfg.keyspace_start,
                    cfg.keyspace_len,
                    cfg.pipeline,
                    cfg.query,
                    cfg.multi,
                );
                (frames, 0)
            }
        };

        let started = Instant::now();
        let replies = match ctx.dispatcher.dispatch(&frames).await {
            Ok(replies) => replies,
            Err(err) => {
                ctx.cancel.cancel();
                return Err(err).with_context(|| {
                    format!("worker {} dispatch failed, aborting run", ctx.worker_id)
                });
            }
        };
        let elapsed_us = started.elapsed().as_micros().min(u128::from(u64::MAX)) as u64;

        if let Err(err) = ctx.metrics.record_latency(elapsed_us) {
            ctx.cancel.cancel();
            return Err(err)
                .with_context(|| format!("worker {} latency record failed", ctx.worker_id));
        }

        if cfg.mode == Mode::Query {
            record_replies(&ctx.metrics, &replies, cfg.multi);
        } else {
            ctx.metrics.add_elements(batch_elements);
            count_error_replies(&ctx.metrics, &replies);
        }
        ctx.metrics.add_commands(cfg.pipeline);
        issued += cfg.pipeline;
    }

    Ok(WorkerOutcome::Exhausted)
}

/// Record reply cardinalities and per-reply errors for a query round trip.
///
/// With MULTI/EXEC wrapping, the per-command replies live inside the final
/// EXEC array; the MULTI/QUEUED acknowledgements carry no cardinality.
fn record_replies(metrics: &Metrics, replies: &[BytesFrame], multi: bool) {
    if multi {
        match replies.last() {
            Some(BytesFrame::Array(inner)) => {
                for reply in inner {
                    record_one_reply(metrics, reply);
                }
            }
            Some(BytesFrame::Error(_)) => metrics.add_errors(1),
            _ => {}
        }
    } else {
        for reply in replies {
            record_one_reply(metrics, reply);
        }
    }
}

fn record_one_reply(metrics: &Metrics, reply: &BytesFrame) {
    match reply {
        BytesFrame::Array(items) => metrics.record_reply_size(items.len()),
        BytesFrame::Error(_) => metrics.add_errors(1),
        BytesFrame::Null => metrics.record_reply_size(0),
        _ => {}
    }
}

fn count_error_replies(metrics: &Metrics, replies: &[BytesFrame]) {
    let errors = replies
        .iter()
        .filter(|r| matches!(r, BytesFrame::Error(_)))
        .count();
    if errors > 0 {
        metrics.add_errors(errors as u64);
    }
}
