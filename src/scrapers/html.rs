//! HTML page extraction with CSS selectors.
//!
//! Headlines are located with the site's `title_selector`. For each headline
//! the containing block is found by climbing at most `ancestor_depth` levels
//! until an element with a `date_selector` match appears; that match supplies
//! the date text. Links come from the headline itself when it is an anchor,
//! otherwise from its first `link_selector` descendant, resolved against the
//! page URL.

use crate::models::ScrapedItem;
use scraper::{ElementRef, Html, Selector};
use std::error::Error;
use tracing::debug;
use url::Url;

/// Parsed selectors and limits for one site.
#[derive(Debug)]
pub struct HtmlRules {
    pub title: Selector,
    pub date: Option<Selector>,
    pub link: Selector,
    pub ancestor_depth: usize,
    pub min_title_len: usize,
}

fn parse_selector(s: &str) -> Result<Selector, Box<dyn Error>> {
    Selector::parse(s).map_err(|e| format!("invalid selector {s:?}: {e:?}").into())
}

impl HtmlRules {
    pub fn new(
        title: &str,
        date: Option<&str>,
        link: Option<&str>,
        ancestor_depth: usize,
        min_title_len: usize,
    ) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            title: parse_selector(title)?,
            date: date.map(parse_selector).transpose()?,
            link: parse_selector(link.unwrap_or("a[href]"))?,
            ancestor_depth,
            min_title_len,
        })
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Walks the headlines of a parsed page one at a time.
///
/// [`ItemCursor::next_item`] returns `None` once the page is exhausted;
/// headlines that do not yield a usable item are skipped, not treated as the end.
pub struct ItemCursor<'a> {
    headlines: Vec<ElementRef<'a>>,
    pos: usize,
    base: &'a Url,
    rules: &'a HtmlRules,
}

impl<'a> ItemCursor<'a> {
    pub fn new(document: &'a Html, base: &'a Url, rules: &'a HtmlRules) -> Self {
        Self {
            headlines: document.select(&rules.title).collect(),
            pos: 0,
            base,
            rules,
        }
    }

    /// Number of headline elements on the page.
    pub fn found(&self) -> usize {
        self.headlines.len()
    }

    pub fn next_item(&mut self) -> Option<ScrapedItem> {
        while let Some(el) = self.headlines.get(self.pos).copied() {
            self.pos += 1;
            if let Some(item) = self.extract(el) {
                return Some(item);
            }
        }
        None
    }

    fn extract(&self, el: ElementRef<'a>) -> Option<ScrapedItem> {
        let title = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
        if title.chars().count() < self.rules.min_title_len {
            debug!(%title, "Headline too short; skipping");
            return None;
        }

        let href = if el.value().name() == "a" {
            el.value().attr("href")
        } else {
            el.select(&self.rules.link)
                .next()
                .and_then(|a| a.value().attr("href"))
        };
        let link = match href.and_then(|h| self.base.join(h.trim()).ok()) {
            Some(link) => link.to_string(),
            None => {
                debug!(%title, "Headline without link; skipping");
                return None;
            }
        };

        Some(ScrapedItem {
            title,
            link,
            date: self.find_date(el).unwrap_or_default(),
        })
    }

    fn find_date(&self, el: ElementRef<'a>) -> Option<String> {
        let selector = self.rules.date.as_ref()?;
        let mut node = Some(el);
        for _ in 0..=self.rules.ancestor_depth {
            let current = node?;
            if let Some(date_el) = current.select(selector).next() {
                let text = collapse_whitespace(&date_el.text().collect::<Vec<_>>().join(" "));
                if !text.is_empty() {
                    return Some(text);
                }
                return date_el.value().attr("datetime").map(str::to_string);
            }
            node = current.parent().and_then(ElementRef::wrap);
        }
        None
    }
}

/// Extract every item from a page, newest first as rendered.
pub fn extract_items(html: &str, base: &Url, rules: &HtmlRules) -> (usize, Vec<ScrapedItem>) {
    let document = Html::parse_document(html);
    let mut cursor = ItemCursor::new(&document, base, rules);
    let found = cursor.found();
    let items = std::iter::from_fn(|| cursor.next_item()).collect();
    (found, items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
<div class="row">
  <article class="card">
    <div class="meta"><time datetime="2025-10-01T09:00:00Z">3 hours ago</time></div>
    <div class="body"><h3><a href="/ai/story-one">OpenAI launches a new reasoning model</a></h3></div>
  </article>
  <article class="card">
    <div class="meta"><time>Sep 30, 2025</time></div>
    <div class="body"><h3><a href="https://other.example.com/two">Nvidia unveils faster chips for AI</a></h3></div>
  </article>
  <article class="card">
    <div class="body"><h3><a href="/ai/short">Tiny</a></h3></div>
  </article>
  <article class="card">
    <div class="meta"><time></time></div>
    <div class="body"><h3>Headline with no anchor at all</h3></div>
  </article>
</div>
</body></html>
"#;

    fn rules(depth: usize) -> HtmlRules {
        HtmlRules::new("article h3", Some("time"), None, depth, 10).unwrap()
    }

    #[test]
    fn test_extract_items_with_ancestor_dates() {
        let base = Url::parse("https://www.example.com/ai/").unwrap();
        let (found, items) = extract_items(PAGE, &base, &rules(3));
        assert_eq!(found, 4);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "OpenAI launches a new reasoning model");
        assert_eq!(items[0].link, "https://www.example.com/ai/story-one");
        assert_eq!(items[0].date, "3 hours ago");
        assert_eq!(items[1].link, "https://other.example.com/two");
        assert_eq!(items[1].date, "Sep 30, 2025");
    }

    #[test]
    fn test_ancestor_depth_bounds_date_search() {
        let base = Url::parse("https://www.example.com/").unwrap();
        // h3 -> div.body -> article: the date lives two levels up.
        let (_, shallow) = extract_items(PAGE, &base, &rules(1));
        assert_eq!(shallow[0].date, "");
        let (_, deep) = extract_items(PAGE, &base, &rules(2));
        assert_eq!(deep[0].date, "3 hours ago");
    }

    #[test]
    fn test_headline_anchor_used_directly() {
        let base = Url::parse("https://www.example.com/").unwrap();
        let rules = HtmlRules::new("h3 > a", Some("time"), None, 3, 10).unwrap();
        let (_, items) = extract_items(PAGE, &base, &rules);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link, "https://www.example.com/ai/story-one");
    }

    #[test]
    fn test_cursor_reports_exhaustion() {
        let base = Url::parse("https://www.example.com/").unwrap();
        let document = Html::parse_document("<html><body><p>nothing</p></body></html>");
        let rules = rules(3);
        let mut cursor = ItemCursor::new(&document, &base, &rules);
        assert_eq!(cursor.found(), 0);
        assert!(cursor.next_item().is_none());
    }

    #[test]
    fn test_invalid_selector_is_error() {
        assert!(HtmlRules::new("h3[", None, None, 3, 10).is_err());
    }
}
