//! One-shot ingestion and publishing passes.
//!
//! - [`ingest`]: fetch every configured site, stop at each site's last-known
//!   marker, insert new articles into the store and report the run
//! - [`publish`]: deliver the next unsent article from the store
//! - [`publish_files`]: deliver the next unsent record from result files
//!
//! An item is marked posted or sent only after the publisher confirms
//! delivery. Summarizer and publisher failures leave it unsent for the next run.

use crate::config::{AppConfig, FileConfig};
use crate::illustrator::{Illustrate, Illustrator};
use crate::incremental::split_new_items;
use crate::models::{LastKnownMarker, NewArticle, ScrapedItem};
use crate::results::{self, RecordOrder};
use crate::scrapers::Fetcher;
use crate::state::{SentSet, StateError, load_marker, save_marker};
use crate::store::{DedupStore, InsertOutcome, SelectionOrder, StoreError};
use crate::summarizer::{AskAsync, ChatClient, Summarizer};
use crate::telegram::{ChannelPublisher, Publish, TelegramClient};
use crate::utils::{estimate_tokens, normalize_date, truncate_for_log, utc_timestamp};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Counters and failures of one ingestion pass.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub started: String,
    /// Headlines present on the fetched pages before any filtering.
    pub found: usize,
    pub added: usize,
    pub duplicates: usize,
    /// Articles added per configured site (zero for sites that added nothing).
    pub per_site: BTreeMap<String, usize>,
    pub errors: Vec<String>,
    pub elapsed: Duration,
    pub results_file: Option<PathBuf>,
}

impl IngestReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Human-readable summary, ending with a rough token count of itself.
    pub fn message(&self) -> String {
        let status = if self.has_errors() {
            "⚠️ Ingestion finished with errors"
        } else {
            "✅ Ingestion finished"
        };
        let mut msg = String::new();
        let _ = writeln!(msg, "📰 New articles: {} ({status})", self.added);
        let _ = writeln!(msg, "🗓 Started: {}", self.started);
        let _ = writeln!(msg, "⏱ Elapsed: {} s", self.elapsed.as_secs());
        let _ = writeln!(msg, "Found on pages: {}", self.found);
        let _ = writeln!(msg, "Added: {}", self.added);
        for (site, added) in &self.per_site {
            let _ = writeln!(msg, "- {site}: {added}");
        }
        let _ = write!(msg, "Duplicates: {}", self.duplicates);
        if self.has_errors() {
            msg.push_str("\n\nErrors:");
            for e in &self.errors {
                let _ = write!(msg, "\n- {e}");
            }
        }
        let tokens = estimate_tokens(&msg);
        let _ = write!(msg, "\n\n[Approx. tokens in message: ~{tokens}]");
        msg
    }
}

/// Marker file for one site: `last_news.json` becomes `last_news.forbes.json`.
pub fn site_marker_path(base: &Path, site: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "last_news".to_string());
    let ext = base
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "json".to_string());
    base.with_file_name(format!("{stem}.{site}.{ext}"))
}

/// Fetch and store every configured site.
///
/// Fetch failures are recorded per site and do not stop the others; a store
/// failure aborts the pass. Returns the report and the articles added, newest
/// first within each site.
#[instrument(level = "info", skip_all, fields(sites = file.sites.len()))]
pub async fn ingest_sites(
    file: &FileConfig,
    store: &DedupStore,
    fetcher: &Fetcher,
    now: DateTime<Local>,
) -> Result<(IngestReport, Vec<ScrapedItem>), StoreError> {
    let policy = file.matching.policy();
    let parsed_date = utc_timestamp(&now);
    let mut report = IngestReport {
        started: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        ..Default::default()
    };
    let mut added_items = Vec::new();

    for (name, site) in &file.sites {
        report.per_site.insert(name.clone(), 0);
        let page = match fetcher.fetch_site(name, site).await {
            Ok(page) => page,
            Err(e) => {
                error!(site = %name, error = %e, "Fetch failed");
                report.errors.push(format!("{name}: {e}"));
                continue;
            }
        };
        report.found += page.found;

        let marker_path = site_marker_path(&file.marker_path, name);
        let candidates = if site.incremental {
            let marker = load_marker(&marker_path).await;
            split_new_items(&page.items, marker.as_ref(), &policy).new_items
        } else {
            page.items.clone()
        };
        debug!(site = %name, candidates = candidates.len(), "Selected candidates");

        // Oldest first so insertion ids follow publication order.
        let mut site_added = Vec::new();
        for item in candidates.iter().rev() {
            let article = NewArticle::new(
                name,
                &item.title,
                &item.link,
                normalize_date(&item.date, now),
                parsed_date.clone(),
            );
            match store.insert(&article).await? {
                InsertOutcome::Inserted => site_added.push(item.clone()),
                InsertOutcome::Duplicate => report.duplicates += 1,
            }
        }

        if site.incremental {
            if let Some(newest) = page.items.first() {
                let marker = LastKnownMarker::from_item(newest, &parsed_date);
                if let Err(e) = save_marker(&marker_path, &marker).await {
                    error!(site = %name, error = %e, "Failed to save marker");
                    report.errors.push(format!("{name}: {e}"));
                }
            }
        }

        info!(site = %name, added = site_added.len(), "Site ingested");
        report.added += site_added.len();
        report.per_site.insert(name.clone(), site_added.len());
        added_items.extend(site_added.into_iter().rev());
    }

    Ok((report, added_items))
}

async fn send_report(config: &AppConfig, report: &IngestReport) {
    let (Some(token), Some(chat_id)) = (
        config.secrets.telegram_bot_token.as_deref(),
        config.secrets.telegram_report_chat_id.as_deref(),
    ) else {
        debug!("No report chat configured; not sending run report");
        return;
    };
    match TelegramClient::new(&config.file.telegram.api_base, token, config.request_timeout()) {
        Ok(bot) => {
            if !bot.send_message(chat_id, &report.message(), false).await {
                warn!("Run report not sent");
            }
        }
        Err(e) => warn!(error = %e, "Could not build Telegram client for run report"),
    }
}

/// Run one ingestion pass. Fails when the store cannot be opened or used, or
/// when any site failed (after every other site has been processed and the
/// report sent).
#[instrument(level = "info", skip_all)]
pub async fn ingest(config: &AppConfig) -> Result<IngestReport, Box<dyn Error>> {
    let t0 = Instant::now();
    let now = Local::now();
    if config.file.sites.is_empty() {
        warn!("No sites configured");
    }

    let store = DedupStore::open(&config.file.database_path).await?;
    let fetcher = Fetcher::new(config.request_timeout(), config.file.matching.ancestor_depth)?;
    let result = ingest_sites(&config.file, &store, &fetcher, now).await;
    store.close().await;
    let (mut report, added) = result?;

    if let Some(dir) = &config.file.results_dir {
        match results::write_results_file(dir, &config.file.results_prefix, &added, now).await {
            Ok(path) => report.results_file = path,
            Err(e) => {
                error!(error = %e, "Failed to write result file");
                report.errors.push(format!("results: {e}"));
            }
        }
    }

    report.elapsed = t0.elapsed();
    info!(
        found = report.found,
        added = report.added,
        duplicates = report.duplicates,
        per_site = ?report.per_site,
        elapsed_s = report.elapsed.as_secs(),
        "Ingestion finished"
    );
    send_report(config, &report).await;

    if report.has_errors() {
        return Err(format!("ingestion finished with {} error(s)", report.errors.len()).into());
    }
    Ok(report)
}

/// Result of one publish pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Nothing is waiting to be sent.
    Idle,
    Posted { fingerprint: String, tokens_est: usize },
    /// A collaborator failed; the item stays unsent.
    NotSent { reason: String },
}

async fn compose_and_send<A, I, P>(
    title: &str,
    link: &str,
    summarizer: &Summarizer<A>,
    illustrator: &I,
    publisher: &P,
) -> Result<String, String>
where
    A: AskAsync<Response = String>,
    I: Illustrate,
    P: Publish,
{
    let post = summarizer
        .summarize(title, link)
        .await
        .map_err(|e| format!("summarizer failed: {e}"))?;
    let image = illustrator.illustrate(title).await;
    if publisher.publish(&post, image.as_deref()).await {
        Ok(post)
    } else {
        Err("publisher failed".to_string())
    }
}

/// Summarize, illustrate and deliver the next unsent article, then mark it posted.
#[instrument(level = "info", skip_all, fields(?order))]
pub async fn publish_next_article<A, I, P>(
    store: &DedupStore,
    order: SelectionOrder,
    summarizer: &Summarizer<A>,
    illustrator: &I,
    publisher: &P,
) -> Result<PublishOutcome, StoreError>
where
    A: AskAsync<Response = String>,
    I: Illustrate,
    P: Publish,
{
    let Some(article) = store.next_unsent(order).await? else {
        info!("No unsent articles");
        return Ok(PublishOutcome::Idle);
    };
    info!(
        id = article.id,
        site = %article.site,
        title = %truncate_for_log(&article.title, 100),
        "Publishing article"
    );

    let outcome = compose_and_send(
        &article.title,
        &article.link,
        summarizer,
        illustrator,
        publisher,
    )
    .await;
    match outcome {
        Ok(post) => {
            store.mark_posted(article.id).await?;
            let tokens_est = estimate_tokens(&post);
            info!(id = article.id, tokens_est, "Article posted");
            Ok(PublishOutcome::Posted {
                fingerprint: article.fingerprint,
                tokens_est,
            })
        }
        Err(reason) => {
            error!(id = article.id, %reason, "Article not sent");
            Ok(PublishOutcome::NotSent { reason })
        }
    }
}

/// Deliver the next unsent result-file record, then mark it sent and prune it.
#[instrument(level = "info", skip_all, fields(dir = %dir.display(), ?order))]
pub async fn publish_next_record<A, I, P>(
    dir: &Path,
    prefix: &str,
    order: RecordOrder,
    sent: &mut SentSet,
    summarizer: &Summarizer<A>,
    illustrator: &I,
    publisher: &P,
) -> Result<PublishOutcome, StateError>
where
    A: AskAsync<Response = String>,
    I: Illustrate,
    P: Publish,
{
    let Some(pending) = results::next_unsent(dir, prefix, order, sent).await? else {
        info!("No unsent records");
        return Ok(PublishOutcome::Idle);
    };

    let record = &pending.record;
    match compose_and_send(&record.title, &record.link, summarizer, illustrator, publisher).await {
        Ok(post) => {
            let outcome = results::mark_sent_and_prune(sent, &pending).await?;
            let tokens_est = estimate_tokens(&post);
            info!(?outcome, tokens_est, "Record posted");
            Ok(PublishOutcome::Posted {
                fingerprint: pending.fingerprint,
                tokens_est,
            })
        }
        Err(reason) => {
            error!(title = %record.title, %reason, "Record not sent");
            Ok(PublishOutcome::NotSent { reason })
        }
    }
}

struct Collaborators {
    summarizer: Summarizer<ChatClient>,
    illustrator: Illustrator,
    publisher: ChannelPublisher,
}

fn collaborators(config: &AppConfig) -> Result<Collaborators, Box<dyn Error>> {
    let secrets = &config.secrets;
    let (Some(token), Some(chat_id)) = (
        secrets.telegram_bot_token.as_deref(),
        secrets.telegram_chat_id.as_deref(),
    ) else {
        return Err("TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set to publish".into());
    };
    if secrets.llm_api_key.is_none() {
        warn!("LLM_API_KEY is not set; calling the summarizer without credentials");
    }

    let timeout = config.request_timeout();
    let chat = ChatClient::new(&config.file.summarizer, secrets.llm_api_key.clone(), timeout)?;
    let bot = TelegramClient::new(&config.file.telegram.api_base, token, timeout)?;
    Ok(Collaborators {
        summarizer: Summarizer::new(chat, &config.file.summarizer),
        illustrator: Illustrator::from_config(
            &config.file.illustrator,
            secrets.llm_api_key.clone(),
            timeout,
        )?,
        publisher: ChannelPublisher::new(bot, chat_id),
    })
}

/// Fingerprint of the delivered item, `None` when idle, `Err` when not sent.
fn delivered(outcome: PublishOutcome) -> Result<Option<String>, Box<dyn Error>> {
    match outcome {
        PublishOutcome::Idle => Ok(None),
        PublishOutcome::Posted { fingerprint, .. } => Ok(Some(fingerprint)),
        PublishOutcome::NotSent { reason } => Err(reason.into()),
    }
}

/// Run one publish pass over the article store. Returns the fingerprint of
/// the posted article, if any.
#[instrument(level = "info", skip_all)]
pub async fn publish(config: &AppConfig) -> Result<Option<String>, Box<dyn Error>> {
    let parts = collaborators(config)?;
    let store = DedupStore::open(&config.file.database_path).await?;
    let outcome = publish_next_article(
        &store,
        config.file.selection.database_order,
        &parts.summarizer,
        &parts.illustrator,
        &parts.publisher,
    )
    .await;
    store.close().await;
    delivered(outcome?)
}

/// Run one publish pass over result files.
#[instrument(level = "info", skip_all)]
pub async fn publish_files(
    config: &AppConfig,
    results_dir: Option<&Path>,
) -> Result<Option<String>, Box<dyn Error>> {
    let dir = results_dir
        .or(config.file.results_dir.as_deref())
        .ok_or("no results directory configured")?;
    let parts = collaborators(config)?;
    let mut sent = SentSet::load(&config.file.sent_set_path).await?;
    let outcome = publish_next_record(
        dir,
        &config.file.results_prefix,
        config.file.selection.file_order,
        &mut sent,
        &parts.summarizer,
        &parts.illustrator,
        &parts.publisher,
    )
    .await?;
    delivered(outcome)
}
