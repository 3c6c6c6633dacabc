//! Incremental fetch-stop logic.
//!
//! A freshly scraped page is listed newest first. The previous run's
//! [`LastKnownMarker`] is located in that list with a graduated match
//! (fingerprint, link, normalized title, then title-word Jaccard similarity);
//! everything above it is new. If the marker is absent, or cannot be found,
//! the whole list is new. The store's fingerprint uniqueness remains the
//! authoritative duplicate filter, so erring towards "new" is safe.

use crate::models::{LastKnownMarker, ScrapedItem};
use std::collections::HashSet;
use tracing::{debug, info};

/// Default similarity above which two titles are considered the same article.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Parameters for the "is-same-article" decision.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    /// Strict lower bound on title-word Jaccard similarity.
    pub similarity_threshold: f64,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Lower-cased, trimmed title.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn title_words(title: &str) -> HashSet<String> {
    title
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard similarity of the lower-cased whitespace-separated word sets.
///
/// Leading and trailing punctuation is stripped from each word so that
/// "model." and "model" count as the same token. Returns 0.0 when either
/// title has no words.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let wa = title_words(a);
    let wb = title_words(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    inter as f64 / union as f64
}

/// Whether a scraped item and the marker describe the same article.
pub fn is_same_article(item: &ScrapedItem, marker: &LastKnownMarker, policy: &MatchPolicy) -> bool {
    if !marker.fingerprint.is_empty() && item.fingerprint() == marker.fingerprint {
        return true;
    }
    if item.link == marker.link {
        return true;
    }
    let ta = normalize_title(&item.title);
    let tb = normalize_title(&marker.title);
    if ta == tb {
        return true;
    }
    title_similarity(&ta, &tb) > policy.similarity_threshold
}

/// Outcome of splitting a scraped page against the previous marker.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalScan {
    /// Items above the marker, in scraped (newest-first) order.
    pub new_items: Vec<ScrapedItem>,
    /// 0-based position of the marker in the scraped list, if found.
    pub marker_position: Option<usize>,
    /// The newest scraped item, which becomes the next marker.
    pub next_marker: Option<ScrapedItem>,
}

/// Split a newest-first list into genuinely new items and already-seen ones.
pub fn split_new_items(
    items: &[ScrapedItem],
    marker: Option<&LastKnownMarker>,
    policy: &MatchPolicy,
) -> IncrementalScan {
    let next_marker = items.first().cloned();

    let Some(marker) = marker else {
        debug!(count = items.len(), "No previous marker; taking every item");
        return IncrementalScan {
            new_items: items.to_vec(),
            marker_position: None,
            next_marker,
        };
    };

    match items.iter().position(|item| is_same_article(item, marker, policy)) {
        Some(pos) => {
            info!(position = pos + 1, new = pos, "Found last known article");
            IncrementalScan {
                new_items: items[..pos].to_vec(),
                marker_position: Some(pos),
                next_marker,
            }
        }
        None => {
            info!(
                count = items.len(),
                marker = %marker.title,
                "Last known article not on page; taking every item"
            );
            IncrementalScan {
                new_items: items.to_vec(),
                marker_position: None,
                next_marker,
            }
        }
    }
}
