//! CLI surface and run configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Benchmark mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Populate the keyspace with sorted sets (ZADD).
    Ingest,
    /// Run range queries against a populated keyspace.
    Query,
}

/// Query variant used in `--mode query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryKind {
    /// Forward score range: `ZRANGE <key> 0 1 BYSCORE`.
    ZrangeByscore,
    /// Reverse score range: `ZREVRANGEBYSCORE <key> 1 0`.
    ZrangeByscoreRev,
    /// Reverse lexical range from a random letter: `ZREVRANGEBYLEX <key> [<c> -`.
    Zrevrangebylex,
}

/// Sorted-set workload generator for RESP key-value stores.
///
/// Immutable after parse; every sizing decision downstream derives from it.
#[derive(Debug, Clone, Parser)]
#[command(name = "zbench", version)]
pub struct Config {
    /// Server hostname.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port.
    #[arg(long, default_value_t = 12000)]
    pub port: u16,

    /// Password for AUTH (empty disables).
    #[arg(long, default_value = "")]
    pub auth: String,

    /// Max aggregate requests per second. 0 applies no limit.
    #[arg(long, default_value_t = 0)]
    pub rps: u64,

    /// Random seed.
    #[arg(long, default_value_t = 12345)]
    pub seed: u64,

    /// Number of concurrent clients.
    #[arg(long, default_value_t = 50)]
    pub clients: u64,

    /// Keyspace length.
    #[arg(long = "keyspace-len", default_value_t = 1_000_000)]
    pub keyspace_len: u64,

    /// Keyspace start offset.
    #[arg(long = "keyspace-start", default_value_t = 0)]
    pub keyspace_start: u64,

    /// Total number of requests (query mode only; ingest covers the keyspace).
    #[arg(long = "requests", default_value_t = 10_000_000)]
    pub requests: u64,

    /// Debug verbosity (0 = info, 1 = debug, 2+ = trace).
    #[arg(long, default_value_t = 0)]
    pub debug: u8,

    /// Wrap each query batch in MULTI/EXEC.
    #[arg(long, default_value_t = false)]
    pub multi: bool,

    /// Benchmark mode.
    #[arg(long, value_enum)]
    pub mode: Mode,

    /// Query variant.
    #[arg(long, value_enum, default_value_t = QueryKind::ZrangeByscore)]
    pub query: QueryKind,

    /// Minimum elements per sorted set (inclusive).
    #[arg(long = "key-elements-min", default_value_t = 10)]
    pub key_elements_min: u64,

    /// Maximum elements per sorted set (exclusive).
    #[arg(long = "key-elements-max", default_value_t = 100)]
    pub key_elements_max: u64,

    /// Payload size of each sorted-set element.
    #[arg(long = "data-size", default_value_t = 10)]
    pub data_size: usize,

    /// Commands per pipelined round trip.
    #[arg(long, default_value_t = 1)]
    pub pipeline: u64,

    /// Print the reply-size histogram after a query run.
    #[arg(long = "print-reply-histogram", default_value_t = false)]
    pub print_reply_histogram: bool,

    /// Route commands through cluster hash slots.
    #[arg(long, default_value_t = false)]
    pub cluster: bool,

    /// Write the final summary as JSON to this path.
    #[arg(long = "json-out")]
    pub json_out: Option<PathBuf>,
}

impl Config {
    /// Validate invariants clap cannot express. Runs before any worker starts.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.clients > 0, "--clients must be > 0");
        anyhow::ensure!(self.pipeline > 0, "--pipeline must be > 0");
        anyhow::ensure!(self.keyspace_len > 0, "--keyspace-len must be > 0");
        anyhow::ensure!(
            self.key_elements_min < self.key_elements_max,
            "--key-elements-min ({}) must be < --key-elements-max ({})",
            self.key_elements_min,
            self.key_elements_max
        );
        if self.mode == Mode::Query {
            anyhow::ensure!(self.requests > 0, "--requests must be > 0 in query mode");
        }
        Ok(())
    }

    /// Resolve the configured server address. Accepts IP literals and
    /// hostnames alike; the first resolved address wins.
    pub async fn addr(&self) -> anyhow::Result<SocketAddr> {
        use anyhow::Context;
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("resolve server address {}:{}", self.host, self.port))?
            .next()
            .with_context(|| {
                format!("server address {}:{} resolved to nothing", self.host, self.port)
            })
    }

    /// Total commands the run is expected to issue.
    pub fn total_commands(&self) -> u64 {
        match self.mode {
            Mode::Ingest => self.keyspace_len,
            Mode::Query => self.requests,
        }
    }

    /// Pacer burst: one full round for every worker.
    pub fn burst(&self) -> u64 {
        self.clients * self.pipeline
    }

    /// Largest reply cardinality the reply-size histogram must represent.
    pub fn max_reply_cardinality(&self) -> usize {
        (self.key_elements_max as usize).saturating_mul(100)
    }

    /// Per-worker command budget in query mode; the last worker absorbs the
    /// remainder so the per-worker budgets sum to the configured total.
    pub fn query_samples(&self, worker_id: usize) -> u64 {
        let per_client = self.requests / self.clients;
        if worker_id as u64 + 1 == self.clients {
            self.requests - per_client * (self.clients - 1)
        } else {
            per_client
        }
    }
}
