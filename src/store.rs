//! SQLite-backed dedup store.
//!
//! One `news` table keyed by a unique `fingerprint` column holds every article
//! ever ingested. Inserts never overwrite: a second insert of the same
//! fingerprint reports [`InsertOutcome::Duplicate`] and leaves the existing row
//! untouched, so a `posted` article can never be reset to `new`. Rows are never
//! deleted.
//!
//! Across processes the unique index is the only concurrency guard; a racing
//! insert of the same fingerprint simply loses and is reported as a duplicate.

use crate::models::{Article, ArticleStatus, NewArticle};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors surfaced by the store. Duplicates are not errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Connect(String),

    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Which end of the unsent backlog to deliver first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

#[derive(Debug, FromRow)]
struct ArticleRow {
    id: i64,
    site: String,
    title: String,
    link: String,
    pub_date: String,
    parsed_date: String,
    fingerprint: String,
    status: String,
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: row.id,
            site: row.site,
            title: row.title,
            link: row.link,
            pub_date: row.pub_date,
            parsed_date: row.parsed_date,
            fingerprint: row.fingerprint,
            status: ArticleStatus::from_column(&row.status),
        }
    }
}

/// Durable record of ingested and delivered articles.
#[derive(Debug, Clone)]
pub struct DedupStore {
    pool: SqlitePool,
}

impl DedupStore {
    /// Open (creating if missing) the database at `path` and ensure the schema.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        let store = Self { pool };
        store.initialize().await?;
        info!("Dedup store ready");
        Ok(store)
    }

    /// Idempotently create the `news` table and its indexes.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                site TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                pub_date TEXT NOT NULL,
                parsed_date TEXT NOT NULL,
                fingerprint TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'new'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_news_status_dates
            ON news (status, pub_date, parsed_date)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a new article with status `new` unless its fingerprint exists.
    #[instrument(level = "debug", skip_all, fields(fingerprint = %article.fingerprint))]
    pub async fn insert(&self, article: &NewArticle) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO news (site, title, link, pub_date, parsed_date, fingerprint, status)
            VALUES (?, ?, ?, ?, ?, ?, 'new')
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(&article.site)
        .bind(&article.title)
        .bind(&article.link)
        .bind(&article.pub_date)
        .bind(&article.parsed_date)
        .bind(&article.fingerprint)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Duplicate fingerprint; insert skipped");
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    /// The next article still `new`, ordered by `(pub_date, parsed_date)`.
    #[instrument(level = "debug", skip(self))]
    pub async fn next_unsent(&self, order: SelectionOrder) -> Result<Option<Article>> {
        let sql = match order {
            SelectionOrder::OldestFirst => {
                r#"
                SELECT id, site, title, link, pub_date, parsed_date, fingerprint, status
                FROM news
                WHERE status = 'new'
                ORDER BY pub_date ASC, parsed_date ASC, id ASC
                LIMIT 1
                "#
            }
            SelectionOrder::NewestFirst => {
                r#"
                SELECT id, site, title, link, pub_date, parsed_date, fingerprint, status
                FROM news
                WHERE status = 'new'
                ORDER BY pub_date DESC, parsed_date DESC, id DESC
                LIMIT 1
                "#
            }
        };

        let row = sqlx::query_as::<_, ArticleRow>(sql)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Article::from))
    }

    /// Mark one article as posted. Returns `true` if this call changed it;
    /// repeating the call on a posted (or unknown) id is a no-op.
    #[instrument(level = "debug", skip(self))]
    pub async fn mark_posted(&self, id: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE news SET status = 'posted' WHERE id = ? AND status = 'new'")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Look an article up by fingerprint.
    pub async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT id, site, title, link, pub_date, parsed_date, fingerprint, status
            FROM news
            WHERE fingerprint = ?
            LIMIT 1
            "#,
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Article::from))
    }

    /// Number of stored articles with the given status.
    pub async fn count_by_status(&self, status: ArticleStatus) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM news WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get(0))
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{normalize_date, utc_timestamp};
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, DedupStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DedupStore::open(&dir.path().join("news.db")).await.unwrap();
        (dir, store)
    }

    fn article(title: &str, link: &str, pub_date: &str, parsed_date: &str) -> NewArticle {
        NewArticle::new(
            "forbes",
            title,
            link,
            pub_date.to_string(),
            parsed_date.to_string(),
        )
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (_dir, store) = open_temp().await;
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert_eq!(store.count_by_status(ArticleStatus::New).await.unwrap(), 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_fingerprint() {
        let (_dir, store) = open_temp().await;
        let a = article(
            "Title",
            "https://e.com/a",
            "2025-01-01T00:00:00+00:00",
            "2025-01-01T00:00:00+00:00",
        );

        assert_eq!(store.insert(&a).await.unwrap(), InsertOutcome::Inserted);

        let mut again = a.clone();
        again.site = "other".to_string();
        again.pub_date = "2030-01-01T00:00:00+00:00".to_string();
        assert_eq!(store.insert(&again).await.unwrap(), InsertOutcome::Duplicate);

        assert_eq!(store.count_by_status(ArticleStatus::New).await.unwrap(), 1);
        let stored = store.find_by_fingerprint(&a.fingerprint).await.unwrap().unwrap();
        assert_eq!(stored.site, "forbes");
        assert_eq!(stored.pub_date, "2025-01-01T00:00:00+00:00");
        assert_eq!(stored.status, ArticleStatus::New);
        store.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_insert_does_not_reset_posted() {
        let (_dir, store) = open_temp().await;
        let a = article(
            "Title",
            "https://e.com/a",
            "2025-01-01T00:00:00+00:00",
            "2025-01-01T00:00:00+00:00",
        );
        store.insert(&a).await.unwrap();
        let stored = store.find_by_fingerprint(&a.fingerprint).await.unwrap().unwrap();
        assert!(store.mark_posted(stored.id).await.unwrap());

        assert_eq!(store.insert(&a).await.unwrap(), InsertOutcome::Duplicate);
        let stored = store.find_by_fingerprint(&a.fingerprint).await.unwrap().unwrap();
        assert_eq!(stored.status, ArticleStatus::Posted);
        assert!(store.next_unsent(SelectionOrder::OldestFirst).await.unwrap().is_none());
        store.close().await;
    }

    #[tokio::test]
    async fn test_mark_posted_is_idempotent() {
        let (_dir, store) = open_temp().await;
        let a = article(
            "Title",
            "https://e.com/a",
            "2025-01-01T00:00:00+00:00",
            "2025-01-01T00:00:00+00:00",
        );
        store.insert(&a).await.unwrap();
        let id = store.find_by_fingerprint(&a.fingerprint).await.unwrap().unwrap().id;

        assert!(store.mark_posted(id).await.unwrap());
        assert!(!store.mark_posted(id).await.unwrap());
        assert!(!store.mark_posted(9999).await.unwrap());

        assert_eq!(store.count_by_status(ArticleStatus::Posted).await.unwrap(), 1);
        assert_eq!(store.count_by_status(ArticleStatus::New).await.unwrap(), 0);
        store.close().await;
    }

    #[tokio::test]
    async fn test_next_unsent_respects_order_and_skips_posted() {
        let (_dir, store) = open_temp().await;
        let old = article(
            "Old",
            "https://e.com/old",
            "2025-01-01T00:00:00+00:00",
            "2025-01-03T00:00:00+00:00",
        );
        let mid_a = article(
            "Mid A",
            "https://e.com/mid-a",
            "2025-01-02T00:00:00+00:00",
            "2025-01-03T00:00:00+00:00",
        );
        let mid_b = article(
            "Mid B",
            "https://e.com/mid-b",
            "2025-01-02T00:00:00+00:00",
            "2025-01-03T05:00:00+00:00",
        );
        let new = article(
            "New",
            "https://e.com/new",
            "2025-01-03T00:00:00+00:00",
            "2025-01-03T00:00:00+00:00",
        );
        for a in [&mid_b, &new, &old, &mid_a] {
            store.insert(a).await.unwrap();
        }

        let first = store.next_unsent(SelectionOrder::OldestFirst).await.unwrap().unwrap();
        assert_eq!(first.title, "Old");
        let newest = store.next_unsent(SelectionOrder::NewestFirst).await.unwrap().unwrap();
        assert_eq!(newest.title, "New");

        store.mark_posted(first.id).await.unwrap();
        let next = store.next_unsent(SelectionOrder::OldestFirst).await.unwrap().unwrap();
        assert_eq!(next.title, "Mid A");
        store.mark_posted(next.id).await.unwrap();
        let next = store.next_unsent(SelectionOrder::OldestFirst).await.unwrap().unwrap();
        assert_eq!(next.title, "Mid B");
        store.close().await;
    }

    #[tokio::test]
    async fn test_next_unsent_orders_mixed_offsets_by_instant() {
        let (_dir, store) = open_temp().await;
        let now = Local.with_ymd_and_hms(2025, 10, 1, 18, 0, 0).unwrap();
        let parsed = utc_timestamp(&now);
        // 09:00 at -04:00 is 13:00Z, later than 11:00Z.
        let later = article(
            "Newer story",
            "https://e.com/newer",
            &normalize_date("Wed, 01 Oct 2025 09:00:00 -0400", now),
            &parsed,
        );
        let earlier = article(
            "Older story",
            "https://e.com/older",
            &normalize_date("Wed, 01 Oct 2025 11:00:00 +0000", now),
            &parsed,
        );
        store.insert(&later).await.unwrap();
        store.insert(&earlier).await.unwrap();

        let first = store.next_unsent(SelectionOrder::OldestFirst).await.unwrap().unwrap();
        assert_eq!(first.title, "Older story");
        let newest = store.next_unsent(SelectionOrder::NewestFirst).await.unwrap().unwrap();
        assert_eq!(newest.title, "Newer story");
        store.close().await;
    }

    #[tokio::test]
    async fn test_next_unsent_empty_store() {
        let (_dir, store) = open_temp().await;
        assert!(store.next_unsent(SelectionOrder::OldestFirst).await.unwrap().is_none());
        store.close().await;
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/news.db");
        let a = article(
            "Title",
            "https://e.com/a",
            "2025-01-01T00:00:00+00:00",
            "2025-01-01T00:00:00+00:00",
        );
        {
            let store = DedupStore::open(&path).await.unwrap();
            store.insert(&a).await.unwrap();
            store.close().await;
        }
        let store = DedupStore::open(&path).await.unwrap();
        assert_eq!(store.insert(&a).await.unwrap(), InsertOutcome::Duplicate);
        store.close().await;
    }
}
