//! Line layout: one record per line, a headline followed by its URL.
//!
//! ```text
//! Some headline | https://example.com/story
//! - Another headline https://example.com/other
//! ```
//!
//! Lines without a URL (headers, count lines, blanks) are not records.

use super::{ParsedRecord, ResultRecord};
use once_cell::sync::Lazy;
use regex::Regex;

static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("url regex"));

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+[.)]|[-*•])\s+").expect("list marker regex"));

fn parse_line(line: &str) -> Option<ResultRecord> {
    let line = line.trim();
    let m = URL.find(line)?;
    let link = m.as_str().trim_end_matches(['.', ',', ')']).to_string();
    let head = LIST_MARKER.replace(&line[..m.start()], "");
    let title = head
        .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '|' | '-' | '—' | ':' | '\t'))
        .trim()
        .to_string();
    if title.is_empty() {
        return None;
    }
    Some(ResultRecord {
        title,
        link,
        date: None,
    })
}

pub fn parse(lines: &[&str]) -> Vec<ParsedRecord> {
    lines
        .iter()
        .enumerate()
        .filter_map(|(i, l)| {
            parse_line(l).map(|record| ParsedRecord {
                record,
                lines: i..i + 1,
            })
        })
        .collect()
}
