//! Block layout: numbered records with labeled fields, separated by dash rules.
//!
//! ```text
//! 1. DATE: 5 hours ago
//!    TITLE: Some headline
//!    LINK: https://example.com/story
//! --------------------------------------------------
//! ```

use super::{ParsedRecord, ResultRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+\.\s*)?(DATE|TITLE|LINK):\s*(.*)$").expect("block field regex")
});

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-{3,}$").expect("separator regex"));

/// Whether `content` carries labeled block fields.
pub fn detect(content: &str) -> bool {
    content
        .lines()
        .any(|l| FIELD.captures(l.trim()).is_some_and(|c| &c[2] == "TITLE"))
}

#[derive(Default)]
struct Builder {
    start: usize,
    title: Option<String>,
    link: Option<String>,
    date: Option<String>,
}

impl Builder {
    fn finish(self, end: usize, out: &mut Vec<ParsedRecord>) {
        match (self.title, self.link) {
            (Some(title), Some(link)) if !title.is_empty() && !link.is_empty() => {
                out.push(ParsedRecord {
                    record: ResultRecord { title, link, date: self.date },
                    lines: self.start..end,
                });
            }
            _ => debug!(line = self.start + 1, "Skipping block without title and link"),
        }
    }
}

/// Parse every complete block. A block spans from its first field line through
/// its closing dash rule (or up to the next numbered block).
pub fn parse(lines: &[&str]) -> Vec<ParsedRecord> {
    let mut out = Vec::new();
    let mut current: Option<Builder> = None;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if SEPARATOR.is_match(line) {
            if let Some(b) = current.take() {
                b.finish(i + 1, &mut out);
            }
            continue;
        }
        let Some(caps) = FIELD.captures(line) else {
            continue;
        };
        let numbered = caps.get(1).is_some();
        if numbered || current.is_none() {
            if let Some(b) = current.take() {
                b.finish(i, &mut out);
            }
            current = Some(Builder {
                start: i,
                ..Default::default()
            });
        }
        if let Some(b) = current.as_mut() {
            let value = caps[3].trim().to_string();
            match &caps[2] {
                "TITLE" => b.title = Some(value),
                "LINK" => b.link = Some(value),
                _ => b.date = Some(value),
            }
        }
    }
    if let Some(b) = current.take() {
        b.finish(lines.len(), &mut out);
    }
    out
}

/// Render one record as a numbered block with its closing rule.
pub fn render(index: usize, record: &ResultRecord) -> String {
    format!(
        "{}. DATE: {}\n   TITLE: {}\n   LINK: {}\n{}\n",
        index,
        record.date.as_deref().unwrap_or(""),
        record.title,
        record.link,
        "-".repeat(50)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "NEWS RELAY - RESULTS
==================================================
Time: 2025-10-01 12:00:00
New articles: 2

1. DATE: 5 hours ago
   TITLE: First headline here
   LINK: https://e.com/1
--------------------------------------------------
2. DATE: Sep 30, 2025
   TITLE: Second headline here
   LINK: https://e.com/2
--------------------------------------------------
";

    #[test]
    fn test_detect() {
        assert!(detect(SAMPLE));
        assert!(!detect("Title | https://e.com/1\n"));
    }

    #[test]
    fn test_parse_blocks_with_spans() {
        let lines: Vec<&str> = SAMPLE.lines().collect();
        let parsed = parse(&lines);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].record.title, "First headline here");
        assert_eq!(parsed[0].record.link, "https://e.com/1");
        assert_eq!(parsed[0].record.date.as_deref(), Some("5 hours ago"));
        assert_eq!(parsed[0].lines, 5..9);
        assert_eq!(parsed[1].lines, 9..13);
    }

    #[test]
    fn test_parse_skips_incomplete_block() {
        let text = "1. DATE: today\n   TITLE: No link here\n-----\n2. DATE: x\n   TITLE: Has link\n   LINK: https://e.com/ok\n";
        let lines: Vec<&str> = text.lines().collect();
        let parsed = parse(&lines);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].record.title, "Has link");
        assert_eq!(parsed[0].lines, 3..6);
    }

    #[test]
    fn test_render_parses_back() {
        let record = ResultRecord {
            title: "Rendered".to_string(),
            link: "https://e.com/r".to_string(),
            date: Some("1h".to_string()),
        };
        let text = render(1, &record);
        let lines: Vec<&str> = text.lines().collect();
        let parsed = parse(&lines);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].record, record);
    }
}
