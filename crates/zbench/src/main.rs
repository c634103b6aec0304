//! `zbench` binary: CLI parsing, logging setup, and run wiring.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use zbench::client;
use zbench::config::{Config, Mode};
use zbench::runner;

fn init_tracing(debug: u8) {
    let default_level = match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_banner(config: &Config) {
    let total = config.total_commands();
    println!("zbench {}", env!("CARGO_PKG_VERSION"));
    println!(
        "Total clients: {}. Commands per client: {} Total commands: {}",
        config.clients,
        total / config.clients,
        total
    );
    println!("Using random seed: {}", config.seed);
    if config.mode == Mode::Ingest {
        println!(
            "Each ZSET contains between {} and {} elements.",
            config.key_elements_min, config.key_elements_max
        );
        println!(
            "Keyspace range: {} keys. [{} ; {}]",
            config.keyspace_len,
            config.keyspace_start,
            config.keyspace_start + config.keyspace_len
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(config.debug);
    config.validate()?;
    print_banner(&config);

    let dispatcher = client::build_dispatcher(
        config.addr().await?,
        &config.auth,
        config.clients as usize,
        config.cluster,
    )
    .await?;

    // Ctrl-C trips the interrupt token; the reporter drains the run cleanly.
    let interrupt = CancellationToken::new();
    let interrupt_signal = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt_signal.cancel();
        }
    });

    let print_reply_histogram = config.print_reply_histogram;
    let summary = runner::run(config, Arc::clone(&dispatcher), interrupt).await?;
    summary.print(print_reply_histogram);
    Ok(())
}
