//! Data models shared by the ingestion and publishing paths.
//!
//! - [`ScrapedItem`]: a raw `(title, link, date)` tuple as rendered by a source
//! - [`NewArticle`]: a candidate ready for insertion into the store
//! - [`Article`]: a persisted row with its delivery [`ArticleStatus`]
//! - [`LastKnownMarker`]: the newest item seen by the previous ingestion run

use crate::fingerprint::fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw item scraped from a page or feed, newest first as rendered.
///
/// `date` is whatever text the source displayed and may be empty, relative
/// ("5 hours ago") or partial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapedItem {
    /// Headline text.
    pub title: String,
    /// Absolute article URL.
    pub link: String,
    /// Raw date text shown next to the headline.
    pub date: String,
}

impl ScrapedItem {
    /// Fingerprint of this item's title and link.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title, &self.link)
    }
}

/// Delivery state of a stored article. `New` may only move to `Posted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    New,
    Posted,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::New => "new",
            ArticleStatus::Posted => "posted",
        }
    }

    /// Parse the column value; anything unknown is treated as posted so it is
    /// never selected for delivery again.
    pub fn from_column(s: &str) -> Self {
        match s {
            "new" => ArticleStatus::New,
            _ => ArticleStatus::Posted,
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An article about to be inserted into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    /// Key into the `sites` section of the configuration.
    pub site: String,
    pub title: String,
    pub link: String,
    /// Normalized publication timestamp (RFC 3339).
    pub pub_date: String,
    /// Ingestion timestamp (RFC 3339).
    pub parsed_date: String,
    pub fingerprint: String,
}

impl NewArticle {
    /// Build a candidate, deriving its fingerprint from title and link.
    pub fn new(site: &str, title: &str, link: &str, pub_date: String, parsed_date: String) -> Self {
        Self {
            site: site.to_string(),
            title: title.to_string(),
            link: link.to_string(),
            pub_date,
            parsed_date,
            fingerprint: fingerprint(title, link),
        }
    }
}

/// A persisted article row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: i64,
    pub site: String,
    pub title: String,
    pub link: String,
    pub pub_date: String,
    pub parsed_date: String,
    pub fingerprint: String,
    pub status: ArticleStatus,
}

/// The newest item of the previous ingestion run, used to stop rescanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastKnownMarker {
    pub title: String,
    pub link: String,
    pub fingerprint: String,
    /// When the marker was written (RFC 3339).
    pub last_updated: String,
}

impl LastKnownMarker {
    /// Build a marker from a scraped item, stamping it with `now`.
    pub fn from_item(item: &ScrapedItem, now: &str) -> Self {
        Self {
            title: item.title.clone(),
            link: item.link.clone(),
            fingerprint: item.fingerprint(),
            last_updated: now.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_article_derives_fingerprint() {
        let article = NewArticle::new(
            "forbes",
            "Title",
            "https://example.com/a",
            "2025-01-01T00:00:00+00:00".to_string(),
            "2025-01-01T01:00:00+00:00".to_string(),
        );
        assert_eq!(article.fingerprint, fingerprint("Title", "https://example.com/a"));
    }

    #[test]
    fn test_status_round_trips_through_column() {
        assert_eq!(ArticleStatus::from_column("new"), ArticleStatus::New);
        assert_eq!(ArticleStatus::from_column("posted"), ArticleStatus::Posted);
        assert_eq!(ArticleStatus::from_column("garbage"), ArticleStatus::Posted);
        assert_eq!(ArticleStatus::New.to_string(), "new");
    }

    #[test]
    fn test_marker_serialization() {
        let item = ScrapedItem {
            title: "A headline".to_string(),
            link: "https://example.com/a".to_string(),
            date: "5 hours ago".to_string(),
        };
        let marker = LastKnownMarker::from_item(&item, "2025-05-06T10:00:00+00:00");
        let json = serde_json::to_string(&marker).unwrap();
        assert!(json.contains("\"fingerprint\""));
        let back: LastKnownMarker = serde_json::from_str(&json).unwrap();
        assert_eq!(back, marker);
        assert_eq!(back.fingerprint, item.fingerprint());
    }
}
