//! RSS 2.0 feed parsing.

use crate::models::ScrapedItem;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

/// Parse feed items in document order. Items missing a title or link, or
/// with a title shorter than `min_title_len` characters, are dropped.
pub fn parse_feed(
    xml: &str,
    min_title_len: usize,
) -> Result<(usize, Vec<ScrapedItem>), Box<dyn Error>> {
    let rss: Rss = from_str(xml)?;
    let found = rss.channel.item.len();
    let items = rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let title = it.title?.split_whitespace().collect::<Vec<_>>().join(" ");
            let link = it.link?.trim().to_string();
            if link.is_empty() || title.chars().count() < min_title_len {
                return None;
            }
            Some(ScrapedItem {
                title,
                link,
                date: it.pub_date.unwrap_or_default().trim().to_string(),
            })
        })
        .collect();
    Ok((found, items))
}
