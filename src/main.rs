//! # News Relay
//!
//! Scrapes news sites into a deduplicated store and relays one summarized
//! article per run to a Telegram channel.
//!
//! ## Features
//!
//! - Fetches HTML pages (CSS selectors) and RSS feeds listed in a YAML config
//! - Stops each scan at the previous run's newest article (last-known marker)
//! - Stores articles in SQLite keyed by a SHA-256 fingerprint of title and link
//! - Summarizes the next unsent article through an OpenAI-compatible chat API,
//!   optionally illustrates it, and posts it to Telegram
//! - Alternatively publishes from plain-text result files, tracking delivered
//!   records in a persisted sent-set
//!
//! ## Usage
//!
//! ```sh
//! news_relay --config news_relay.yaml ingest
//! news_relay publish
//! news_relay publish-files --results-dir ./results
//! ```
//!
//! ## Architecture
//!
//! Each invocation performs one pass and exits:
//! 1. **Ingest**: fetch sites, split off new items, insert, report
//! 2. **Publish**: select the next unsent article, summarize, illustrate,
//!    deliver, then mark it posted

use clap::Parser;
use std::error::Error;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod fingerprint;
mod illustrator;
mod incremental;
mod models;
mod pipeline;
mod results;
mod scrapers;
mod state;
mod store;
mod summarizer;
mod telegram;
mod utils;

use cli::{Cli, Command};
use config::AppConfig;
use utils::ensure_writable_dir;

/// Console logging, plus an append-only copy in `log_file` when given.
fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tfmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();
    Ok(())
}

fn log_delivered(fingerprint: Option<String>) {
    match fingerprint {
        Some(fingerprint) => info!(%fingerprint, "Published one item"),
        None => info!("Nothing to publish"),
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let config = AppConfig::from_cli(cli).await?;
    debug!(?config, "Resolved configuration");

    match &cli.command {
        Command::Ingest => {
            if let Some(dir) = &config.file.results_dir {
                ensure_writable_dir(dir).await?;
            }
            let report = pipeline::ingest(&config).await?;
            info!(
                added = report.added,
                results_file = ?report.results_file,
                "Ingest pass complete"
            );
        }
        Command::Publish => {
            log_delivered(pipeline::publish(&config).await?);
        }
        Command::PublishFiles { results_dir } => {
            log_delivered(pipeline::publish_files(&config, results_dir.as_deref()).await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_file.as_deref())?;

    let start_time = Instant::now();
    info!(command = ?cli.command, config = %cli.config.display(), "news_relay starting up");

    let result = run(&cli).await;
    let elapsed_ms = start_time.elapsed().as_millis() as u64;
    match &result {
        Ok(()) => info!(elapsed_ms, "news_relay finished"),
        Err(e) => error!(elapsed_ms, error = %e, "news_relay failed"),
    }
    result
}
