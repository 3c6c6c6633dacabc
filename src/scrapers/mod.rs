//! Fetching configured news sources.
//!
//! Every site yields an ordered list of [`ScrapedItem`]s, newest first as the
//! source renders them. Two modes are supported:
//!
//! | Mode | Module | Notes |
//! |------|--------|-------|
//! | `html` | [`html`] | CSS selectors; date found by climbing ancestors |
//! | `rss` | [`rss`] | RSS 2.0 `<item>` elements |
//!
//! `api` sites are recognised in configuration but skipped with a warning.
//! Items repeated within one page (same title and link) are collapsed to the
//! first occurrence.

pub mod html;
pub mod rss;

use crate::config::{FetchMode, SiteConfig};
use crate::models::ScrapedItem;
use html::HtmlRules;
use itertools::Itertools;
use reqwest::Client;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Items extracted from one site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    /// Headline elements or feed entries present before filtering.
    pub found: usize,
    /// Usable items, newest first.
    pub items: Vec<ScrapedItem>,
}

/// HTTP client shared across the sites of one ingestion run.
pub struct Fetcher {
    client: Client,
    ancestor_depth: usize,
}

impl Fetcher {
    pub fn new(timeout: Duration, ancestor_depth: usize) -> Result<Self, Box<dyn Error>> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            ancestor_depth,
        })
    }

    async fn get_text(&self, url: &str) -> Result<String, Box<dyn Error>> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    /// Fetch one site and return its items, newest first.
    #[instrument(level = "info", skip(self, site), fields(url = %site.url, mode = ?site.mode))]
    pub async fn fetch_site(
        &self,
        name: &str,
        site: &SiteConfig,
    ) -> Result<FetchedPage, Box<dyn Error>> {
        let (found, items) = match site.mode {
            FetchMode::Html => {
                let title = site
                    .title_selector
                    .as_deref()
                    .ok_or_else(|| format!("site {name} has no title_selector"))?;
                let rules = HtmlRules::new(
                    title,
                    site.date_selector.as_deref(),
                    site.link_selector.as_deref(),
                    self.ancestor_depth,
                    site.min_title_len,
                )?;
                let base = Url::parse(&site.url)?;
                let body = self.get_text(&site.url).await?;
                html::extract_items(&body, &base, &rules)
            }
            FetchMode::Rss => {
                let body = self.get_text(&site.url).await?;
                rss::parse_feed(&body, site.min_title_len)?
            }
            FetchMode::Api => {
                warn!("api mode is not supported; skipping site");
                return Ok(FetchedPage::default());
            }
        };

        let total = items.len();
        let items: Vec<ScrapedItem> = items.into_iter().unique_by(|i| i.fingerprint()).collect();
        if items.len() < total {
            debug!(collapsed = total - items.len(), "Collapsed repeated items on page");
        }
        info!(found, kept = items.len(), "Fetched site");
        Ok(FetchedPage { found, items })
    }
}
