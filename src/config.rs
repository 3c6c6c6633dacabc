//! Runtime configuration.
//!
//! Settings come from a YAML file (every field defaulted) plus secrets taken
//! from the environment through the CLI. [`AppConfig`] is assembled once in
//! `main` and passed by reference to the pipelines and collaborators.

use crate::cli::Cli;
use crate::incremental::{DEFAULT_SIMILARITY_THRESHOLD, MatchPolicy};
use crate::results::RecordOrder;
use crate::store::SelectionOrder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// How a site's items are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// HTML page queried with CSS selectors.
    Html,
    /// RSS 2.0 feed.
    Rss,
    /// Recognised but not implemented; the site is skipped.
    Api,
}

/// One news source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: FetchMode,
    /// Selector for headline elements (html mode).
    #[serde(default)]
    pub title_selector: Option<String>,
    /// Selector for the date element inside a headline's containing block.
    #[serde(default)]
    pub date_selector: Option<String>,
    /// Selector for the link inside the headline, when the headline itself
    /// is not an anchor. Defaults to `a[href]`.
    #[serde(default)]
    pub link_selector: Option<String>,
    /// Stop at the last-known marker instead of offering the whole page.
    #[serde(default = "default_true")]
    pub incremental: bool,
    /// Headlines shorter than this many characters are ignored.
    #[serde(default = "default_min_title_len")]
    pub min_title_len: usize,
}

fn default_mode() -> FetchMode {
    FetchMode::Html
}

fn default_true() -> bool {
    true
}

fn default_min_title_len() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub similarity_threshold: f64,
    /// How many ancestor levels to climb from a headline looking for its date.
    pub ancestor_depth: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            ancestor_depth: 3,
        }
    }
}

impl MatchingConfig {
    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy {
            similarity_threshold: self.similarity_threshold,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub database_order: SelectionOrder,
    pub file_order: RecordOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    pub model: String,
    pub system_prompt: String,
    /// Language the post is written in.
    pub language: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub leading_markers: Vec<String>,
    pub trailing_markers: Vec<String>,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            system_prompt: "You are a professional editor of an AI news channel.".to_string(),
            language: "Russian".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            leading_markers: vec!["🚀".to_string()],
            trailing_markers: vec!["🔖".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IllustratorConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub size: String,
}

impl Default for IllustratorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/images/generations".to_string(),
            model: "dall-e-3".to_string(),
            size: "1024x1024".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

/// Contents of the YAML configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub database_path: PathBuf,
    pub marker_path: PathBuf,
    pub sent_set_path: PathBuf,
    /// Directory for block-layout result files; unset disables them on ingest.
    pub results_dir: Option<PathBuf>,
    pub results_prefix: String,
    pub request_timeout_secs: u64,
    pub matching: MatchingConfig,
    pub selection: SelectionConfig,
    pub summarizer: SummarizerConfig,
    pub illustrator: IllustratorConfig,
    pub telegram: TelegramConfig,
    pub sites: BTreeMap<String, SiteConfig>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("news.db"),
            marker_path: PathBuf::from("last_news.json"),
            sent_set_path: PathBuf::from("sent_news.json"),
            results_dir: None,
            results_prefix: "news_".to_string(),
            request_timeout_secs: 15,
            matching: MatchingConfig::default(),
            selection: SelectionConfig::default(),
            summarizer: SummarizerConfig::default(),
            illustrator: IllustratorConfig::default(),
            telegram: TelegramConfig::default(),
            sites: BTreeMap::new(),
        }
    }
}

/// Secrets taken from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_report_chat_id: Option<String>,
    pub llm_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("telegram_bot_token", &self.telegram_bot_token.as_ref().map(|_| "***"))
            .field("telegram_chat_id", &self.telegram_chat_id)
            .field("telegram_report_chat_id", &self.telegram_report_chat_id)
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Everything a run needs, built once at start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub file: FileConfig,
    pub secrets: Secrets,
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.file.request_timeout_secs)
    }

    /// Load the YAML file named on the command line and merge CLI secrets.
    pub async fn from_cli(cli: &Cli) -> Result<Self, Box<dyn Error>> {
        let file = load_file_config(&cli.config).await?;
        Ok(Self {
            file,
            secrets: Secrets {
                telegram_bot_token: cli.telegram_bot_token.clone(),
                telegram_chat_id: cli.telegram_chat_id.clone(),
                telegram_report_chat_id: cli.telegram_report_chat_id.clone(),
                llm_api_key: cli.llm_api_key.clone(),
            },
        })
    }
}

/// Read a YAML config file. A missing file yields defaults; a malformed one is an error.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_file_config(path: &Path) -> Result<FileConfig, Box<dyn Error>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let config: FileConfig = serde_yaml::from_str(&raw)?;
            info!(sites = config.sites.len(), "Loaded configuration");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Configuration file not found; using defaults");
            Ok(FileConfig::default())
        }
        Err(e) => Err(Box::new(e)),
    }
}
