//! Flat result files as a delivery queue.
//!
//! Ingestion can write each pass's new items to a timestamped text file. The
//! file-based publisher then treats those files as a FIFO: files are visited
//! oldest first, records inside a file in the configured [`RecordOrder`], and
//! any record whose fingerprint is already in the [`SentSet`] is pruned.
//!
//! Two on-disk layouts are understood and detected per file:
//!
//! | Layout | Module | Shape |
//! |--------|--------|-------|
//! | Block | [`block`] | numbered `DATE:`/`TITLE:`/`LINK:` blocks closed by a dash rule |
//! | Line | [`line`] | one `headline  URL` record per line |
//!
//! After a record is delivered it is removed from its file (the whole block or
//! the single line), the file's count line is decremented, and the file is
//! deleted once no records remain.

pub mod block;
pub mod line;

use crate::fingerprint::fingerprint;
use crate::models::ScrapedItem;
use crate::state::{SentSet, StateError, write_atomic};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

/// Name of the file recording how many items the last ingestion pass wrote.
pub const NEWS_COUNT_FILE: &str = "news_count.txt";

static COUNT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\s*(?:#\s*)?(?:new articles|count)\s*:\s*)(\d+)(\s*)$").expect("count regex")
});

/// Scan direction inside a single result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrder {
    /// Bottom of the file first (files are written newest first).
    #[default]
    OldestFirst,
    /// Top of the file first.
    NewestFirst,
}

/// A `(title, link)` record read from a result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    pub title: String,
    pub link: String,
    pub date: Option<String>,
}

impl ResultRecord {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.title, &self.link)
    }
}

/// A record together with the line range it occupies in its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub record: ResultRecord,
    pub lines: Range<usize>,
}

/// On-disk layout of a result file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultLayout {
    Block,
    Line,
}

impl ResultLayout {
    pub fn detect(content: &str) -> Self {
        if block::detect(content) {
            ResultLayout::Block
        } else {
            ResultLayout::Line
        }
    }

    pub fn parse(self, content: &str) -> Vec<ParsedRecord> {
        let lines: Vec<&str> = content.lines().collect();
        match self {
            ResultLayout::Block => block::parse(&lines),
            ResultLayout::Line => line::parse(&lines),
        }
    }
}

/// Detect the layout and parse every record in `content`.
pub fn parse_records(content: &str) -> (ResultLayout, Vec<ParsedRecord>) {
    let layout = ResultLayout::detect(content);
    (layout, layout.parse(content))
}

/// Remove every record with `fp` from `content` and decrement the count line
/// once per removed record. Returns the new content and how many were removed.
pub fn remove_record(content: &str, fp: &str) -> (String, usize) {
    let (_, records) = parse_records(content);
    let doomed: Vec<&Range<usize>> = records
        .iter()
        .filter(|r| r.record.fingerprint() == fp)
        .map(|r| &r.lines)
        .collect();
    if doomed.is_empty() {
        return (content.to_string(), 0);
    }

    let mut kept: Vec<String> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| !doomed.iter().any(|range| range.contains(i)))
        .map(|(_, l)| l.to_string())
        .collect();

    let removed = doomed.len();
    for l in kept.iter_mut() {
        if let Some(caps) = COUNT_LINE.captures(l) {
            let n: usize = caps[2].parse().unwrap_or(0);
            *l = format!("{}{}{}", &caps[1], n.saturating_sub(removed), &caps[3]);
            break;
        }
    }

    let mut out = kept.join("\n");
    if content.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    (out, removed)
}

/// A record selected for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub record: ResultRecord,
    pub file: PathBuf,
    pub fingerprint: String,
}

/// Outcome of [`mark_sent_and_prune`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PruneOutcome {
    /// The fingerprint was not yet in the sent-set.
    pub newly_marked: bool,
    /// Records removed from the source file.
    pub records_removed: usize,
    /// The source file was deleted because it became empty.
    pub file_deleted: bool,
}

fn file_time(meta: &std::fs::Metadata) -> SystemTime {
    meta.created()
        .or_else(|_| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Result files in `dir` named `{prefix}*.txt`, oldest first.
///
/// Files are ordered by creation time (modification time where the platform
/// does not record creation), then by name. A missing directory is empty.
#[instrument(level = "debug", skip_all, fields(dir = %dir.display(), %prefix))]
pub async fn list_candidate_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, StateError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StateError::io(dir, e)),
    };

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StateError::io(dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(prefix) || !name.ends_with(".txt") || name == NEWS_COUNT_FILE {
            continue;
        }
        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) => {
                warn!(file = %name, error = %e, "Skipping unreadable result file");
                continue;
            }
        };
        files.push((file_time(&meta), entry.path()));
    }
    files.sort();
    debug!(count = files.len(), "Listed result files");
    Ok(files.into_iter().map(|(_, p)| p).collect())
}

/// Replace `file` with `pruned`, or delete it when no records remain.
/// Returns `true` if the file was deleted.
async fn rewrite_or_delete(file: &Path, pruned: &str) -> Result<bool, StateError> {
    let (_, remaining) = parse_records(pruned);
    if remaining.is_empty() {
        fs::remove_file(file)
            .await
            .map_err(|e| StateError::io(file, e))?;
        info!(file = %file.display(), "Result file exhausted; deleted");
        Ok(true)
    } else {
        write_atomic(file, pruned.as_bytes()).await?;
        info!(file = %file.display(), remaining = remaining.len(), "Pruned result file");
        Ok(false)
    }
}

/// Find the first record not yet delivered, visiting files oldest first.
///
/// Records already in the sent-set (left behind by a crash between marking
/// and pruning) are pruned from their file on the way, and a file left with
/// no records is deleted.
#[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
pub async fn next_unsent(
    dir: &Path,
    prefix: &str,
    order: RecordOrder,
    sent: &SentSet,
) -> Result<Option<PendingRecord>, StateError> {
    for file in list_candidate_files(dir, prefix).await? {
        let content = match fs::read_to_string(&file).await {
            Ok(c) => c,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Could not read result file; skipping");
                continue;
            }
        };
        let (layout, records) = parse_records(&content);
        debug!(file = %file.display(), ?layout, count = records.len(), "Parsed result file");

        let ordered: Box<dyn Iterator<Item = &ParsedRecord>> = match order {
            RecordOrder::OldestFirst => Box::new(records.iter().rev()),
            RecordOrder::NewestFirst => Box::new(records.iter()),
        };
        let mut stale = Vec::new();
        let mut selected = None;
        for parsed in ordered {
            let fp = parsed.record.fingerprint();
            if sent.contains(&fp) {
                stale.push(fp);
                continue;
            }
            selected = Some(PendingRecord {
                record: parsed.record.clone(),
                file: file.clone(),
                fingerprint: fp,
            });
            break;
        }

        if !stale.is_empty() {
            let mut pruned = content.clone();
            for fp in &stale {
                pruned = remove_record(&pruned, fp).0;
            }
            warn!(file = %file.display(), count = stale.len(), "Pruning records already sent");
            rewrite_or_delete(&file, &pruned).await?;
        }

        if let Some(pending) = selected {
            info!(file = %file.display(), title = %pending.record.title, "Selected unsent record");
            return Ok(Some(pending));
        }
    }
    Ok(None)
}

/// Record a delivery and prune it from its source file.
///
/// The fingerprint is persisted to the sent-set first, then the record is
/// removed from the file. Calling this again for the same record changes
/// nothing; a call after a crash between the two steps completes the prune.
#[instrument(level = "info", skip_all, fields(file = %pending.file.display()))]
pub async fn mark_sent_and_prune(
    sent: &mut SentSet,
    pending: &PendingRecord,
) -> Result<PruneOutcome, StateError> {
    let mut outcome = PruneOutcome {
        newly_marked: sent.insert(&pending.fingerprint).await?,
        ..Default::default()
    };

    let content = match fs::read_to_string(&pending.file).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Source file already gone");
            return Ok(outcome);
        }
        Err(e) => return Err(StateError::io(&pending.file, e)),
    };

    let (pruned, removed) = remove_record(&content, &pending.fingerprint);
    if removed == 0 {
        return Ok(outcome);
    }
    outcome.records_removed = removed;
    outcome.file_deleted = rewrite_or_delete(&pending.file, &pruned).await?;
    Ok(outcome)
}

/// Write one ingestion pass's new items as a block-layout result file and
/// update the count file. Nothing but the count file is written for an empty pass.
#[instrument(level = "info", skip_all, fields(dir = %dir.display(), count = items.len()))]
pub async fn write_results_file(
    dir: &Path,
    prefix: &str,
    items: &[ScrapedItem],
    now: DateTime<Local>,
) -> Result<Option<PathBuf>, StateError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StateError::io(dir, e))?;
    write_atomic(&dir.join(NEWS_COUNT_FILE), items.len().to_string().as_bytes()).await?;
    if items.is_empty() {
        return Ok(None);
    }

    let stamp = now.format("%Y%m%d_%H%M%S");
    let mut path = dir.join(format!("{prefix}{stamp}.txt"));
    let mut n = 1;
    while fs::try_exists(&path).await.unwrap_or(false) {
        path = dir.join(format!("{prefix}{stamp}_{n}.txt"));
        n += 1;
    }

    let mut body = String::new();
    body.push_str("NEWS RELAY - RESULTS\n");
    body.push_str(&"=".repeat(50));
    body.push('\n');
    body.push_str(&format!("Time: {}\n", now.format("%Y-%m-%d %H:%M:%S")));
    body.push_str(&format!("New articles: {}\n\n", items.len()));
    for (i, item) in items.iter().enumerate() {
        let record = ResultRecord {
            title: item.title.clone(),
            link: item.link.clone(),
            date: Some(item.date.clone()),
        };
        body.push_str(&block::render(i + 1, &record));
    }

    write_atomic(&path, body.as_bytes()).await?;
    info!(path = %path.display(), "Wrote result file");
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn items(n: usize) -> Vec<ScrapedItem> {
        (1..=n)
            .map(|i| ScrapedItem {
                title: format!("Headline number {i}"),
                link: format!("https://e.com/{i}"),
                date: format!("{i} hours ago"),
            })
            .collect()
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap()
    }

    async fn sent_set(dir: &Path) -> SentSet {
        SentSet::load(&dir.join("sent.json")).await.unwrap()
    }

    #[test]
    fn test_remove_record_line_layout_and_count() {
        let content = "# count: 2\nFirst one | https://e.com/1\nSecond one | https://e.com/2\n";
        let fp = fingerprint("First one", "https://e.com/1");
        let (out, removed) = remove_record(content, &fp);
        assert_eq!(removed, 1);
        assert_eq!(out, "# count: 1\nSecond one | https://e.com/2\n");

        let (again, removed) = remove_record(&out, &fp);
        assert_eq!(removed, 0);
        assert_eq!(again, out);
    }

    #[test]
    fn test_remove_record_block_layout_removes_whole_block() {
        let mut content = String::from("HEADER\nNew articles: 2\n\n");
        content.push_str(&block::render(1, &ResultRecord {
            title: "Alpha story".into(),
            link: "https://e.com/a".into(),
            date: Some("1h".into()),
        }));
        content.push_str(&block::render(2, &ResultRecord {
            title: "Beta story".into(),
            link: "https://e.com/b".into(),
            date: Some("2h".into()),
        }));

        let alpha = fingerprint("Alpha story", "https://e.com/a");
        let (out, removed) = remove_record(&content, &alpha);
        assert_eq!(removed, 1);
        assert!(out.contains("New articles: 1"));
        assert!(!out.contains("Alpha story"));
        assert!(!out.contains("1. DATE"));
        assert!(out.contains("Beta story"));
        let (layout, left) = parse_records(&out);
        assert_eq!(layout, ResultLayout::Block);
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn test_write_results_file_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_results_file(dir.path(), "news_", &items(3), now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "news_20251001_120000.txt");
        let count = std::fs::read_to_string(dir.path().join(NEWS_COUNT_FILE)).unwrap();
        assert_eq!(count, "3");

        let content = std::fs::read_to_string(&path).unwrap();
        let (layout, records) = parse_records(&content);
        assert_eq!(layout, ResultLayout::Block);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].record.title, "Headline number 1");

        let second = write_results_file(dir.path(), "news_", &items(1), now())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(second, path);

        assert!(write_results_file(dir.path(), "news_", &[], now()).await.unwrap().is_none());
        let count = std::fs::read_to_string(dir.path().join(NEWS_COUNT_FILE)).unwrap();
        assert_eq!(count, "0");
    }

    #[tokio::test]
    async fn test_list_candidate_files_filters_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("news_1.txt"), "a").unwrap();
        std::fs::write(dir.path().join("other_1.txt"), "a").unwrap();
        std::fs::write(dir.path().join("news_2.log"), "a").unwrap();
        std::fs::write(dir.path().join(NEWS_COUNT_FILE), "1").unwrap();
        let files = list_candidate_files(dir.path(), "news_").await.unwrap();
        assert_eq!(files, vec![dir.path().join("news_1.txt")]);

        let missing = list_candidate_files(&dir.path().join("nope"), "news_").await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_select_mark_and_prune_keeps_nonempty_file() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("results");
        let file = write_results_file(&results, "news_", &items(3), now())
            .await
            .unwrap()
            .unwrap();
        let mut sent = sent_set(dir.path()).await;

        let pending = next_unsent(&results, "news_", RecordOrder::OldestFirst, &sent)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.record.title, "Headline number 3");
        assert_eq!(pending.file, file);

        let outcome = mark_sent_and_prune(&mut sent, &pending).await.unwrap();
        assert!(outcome.newly_marked);
        assert_eq!(outcome.records_removed, 1);
        assert!(!outcome.file_deleted);

        let content = std::fs::read_to_string(&file).unwrap();
        let (_, left) = parse_records(&content);
        assert_eq!(left.len(), 2);
        assert!(content.contains("New articles: 2"));
        assert!(sent.contains(&pending.fingerprint));
    }

    #[tokio::test]
    async fn test_newest_first_order_within_file() {
        let dir = tempfile::tempdir().unwrap();
        write_results_file(dir.path(), "news_", &items(3), now()).await.unwrap();
        let sent = sent_set(dir.path()).await;
        let pending = next_unsent(dir.path(), "news_", RecordOrder::NewestFirst, &sent)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.record.title, "Headline number 1");
    }

    #[tokio::test]
    async fn test_last_record_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_results_file(dir.path(), "news_", &items(1), now())
            .await
            .unwrap()
            .unwrap();
        let mut sent = sent_set(dir.path()).await;
        let pending = next_unsent(dir.path(), "news_", RecordOrder::OldestFirst, &sent)
            .await
            .unwrap()
            .unwrap();
        let outcome = mark_sent_and_prune(&mut sent, &pending).await.unwrap();
        assert!(outcome.file_deleted);
        assert!(!file.exists());
        assert!(
            next_unsent(dir.path(), "news_", RecordOrder::OldestFirst, &sent)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_mark_sent_and_prune_twice_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_results_file(dir.path(), "news_", &items(2), now())
            .await
            .unwrap()
            .unwrap();
        let mut sent = sent_set(dir.path()).await;
        let pending = next_unsent(dir.path(), "news_", RecordOrder::OldestFirst, &sent)
            .await
            .unwrap()
            .unwrap();

        mark_sent_and_prune(&mut sent, &pending).await.unwrap();
        let after_once = std::fs::read_to_string(&file).unwrap();
        let sent_once = std::fs::read_to_string(dir.path().join("sent.json")).unwrap();

        let second = mark_sent_and_prune(&mut sent, &pending).await.unwrap();
        assert_eq!(second, PruneOutcome::default());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), after_once);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("sent.json")).unwrap(),
            sent_once
        );
    }

    #[tokio::test]
    async fn test_prune_completes_after_crash_between_steps() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_results_file(dir.path(), "news_", &items(2), now())
            .await
            .unwrap()
            .unwrap();
        let mut sent = sent_set(dir.path()).await;
        let pending = next_unsent(dir.path(), "news_", RecordOrder::OldestFirst, &sent)
            .await
            .unwrap()
            .unwrap();

        // Marked but never pruned.
        sent.insert(&pending.fingerprint).await.unwrap();

        let outcome = mark_sent_and_prune(&mut sent, &pending).await.unwrap();
        assert!(!outcome.newly_marked);
        assert_eq!(outcome.records_removed, 1);
        let (_, left) = parse_records(&std::fs::read_to_string(&file).unwrap());
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn test_next_unsent_skips_sent_and_moves_to_next_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("news_a.txt"),
            "Old story | https://e.com/old\n",
        )
        .unwrap();
        let mut sent = sent_set(dir.path()).await;
        sent.insert(&fingerprint("Old story", "https://e.com/old")).await.unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(
            dir.path().join("news_b.txt"),
            "Fresh story | https://e.com/fresh\n",
        )
        .unwrap();

        let pending = next_unsent(dir.path(), "news_", RecordOrder::OldestFirst, &sent)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.record.title, "Fresh story");
        assert_eq!(pending.file, dir.path().join("news_b.txt"));
        assert!(!dir.path().join("news_a.txt").exists());
    }

    #[tokio::test]
    async fn test_next_unsent_cleans_up_fully_sent_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("news_a.txt");
        std::fs::write(&file, "Left behind | https://e.com/left\n").unwrap();
        let mut sent = sent_set(dir.path()).await;
        sent.insert(&fingerprint("Left behind", "https://e.com/left"))
            .await
            .unwrap();

        let first = next_unsent(dir.path(), "news_", RecordOrder::OldestFirst, &sent)
            .await
            .unwrap();
        assert!(first.is_none());
        assert!(!file.exists());
        let second = next_unsent(dir.path(), "news_", RecordOrder::OldestFirst, &sent)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_next_unsent_prunes_sent_records_it_passes() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_results_file(dir.path(), "news_", &items(3), now())
            .await
            .unwrap()
            .unwrap();
        let mut sent = sent_set(dir.path()).await;
        // Oldest record delivered, but the process died before pruning.
        sent.insert(&fingerprint("Headline number 3", "https://e.com/3"))
            .await
            .unwrap();

        let pending = next_unsent(dir.path(), "news_", RecordOrder::OldestFirst, &sent)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pending.record.title, "Headline number 2");

        let content = std::fs::read_to_string(&file).unwrap();
        assert!(!content.contains("Headline number 3"));
        assert!(content.contains("New articles: 2"));
        let (_, left) = parse_records(&content);
        assert_eq!(left.len(), 2);
    }
}
