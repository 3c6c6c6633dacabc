//! Command-line interface definitions.
//!
//! Each invocation performs exactly one pass (ingest or publish) and exits.
//! Secrets are read from the environment so scheduled jobs can inject them.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments for news_relay.
///
/// # Examples
///
/// ```sh
/// # Scrape every configured site into the database
/// news_relay --config news_relay.yaml ingest
///
/// # Summarize and post the next unsent article
/// TELEGRAM_BOT_TOKEN=... TELEGRAM_CHAT_ID=... LLM_API_KEY=... news_relay publish
///
/// # Post the next unsent record from result files
/// news_relay publish-files
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "news_relay.yaml")]
    pub config: PathBuf,

    /// Also append logs to this file
    #[arg(long, env = "NEWS_RELAY_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Destination channel or chat for published articles
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Chat that receives ingestion run reports
    #[arg(long, env = "TELEGRAM_REPORT_CHAT_ID")]
    pub telegram_report_chat_id: Option<String>,

    /// API key for the summarization and image endpoints
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Scrape configured sites and store new articles
    Ingest,
    /// Publish the next unsent article from the database
    Publish,
    /// Publish the next unsent record from result files
    PublishFiles {
        /// Override the configured results directory
        #[arg(long)]
        results_dir: Option<PathBuf>,
    },
}
