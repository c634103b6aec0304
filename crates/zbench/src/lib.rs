//! Workload engine for benchmarking sorted-set stores over RESP.
//!
//! The core pieces are the keyspace partitioner, the shared token-bucket
//! pacer, the batch generators, the per-client workers, the metrics
//! aggregator, and the reporter/shutdown supervisor. Wire dispatch is behind
//! the [`client::Dispatcher`] trait so tests can drive the engine without a
//! server.

pub mod batch;
pub mod client;
pub mod config;
pub mod keyspace;
pub mod metrics;
pub mod pacer;
pub mod reporter;
pub mod runner;
pub mod slots;
pub mod worker;

pub use config::{Config, Mode, QueryKind};
pub use runner::run;
