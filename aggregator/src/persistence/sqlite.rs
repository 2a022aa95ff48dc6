//! Concrete `PersistencePort` backed by `sqlx::SqlitePool`. Owns the
//! `feeds`/`items`/`errors` schema — the core only ever reaches the store
//! through the `PersistencePort` trait.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::error;

use super::{InsertedItem, NewItemRow, PersistencePort};
use crate::error::ErrorRecord;
use crate::types::FeedConfig;

pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Opens (creating if necessary) the sqlite database at `path` and runs
    /// migrations.
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create DB parent directory: {}", parent.display()))?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite database at path: {path}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run sqlx migrations")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl PersistencePort for SqlitePersistence {
    async fn feeds_get_all(&self) -> Result<Vec<FeedConfig>> {
        let rows = sqlx::query(
            "SELECT id, name, url, category, refresh, created_at FROM feeds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load feeds")?;

        Ok(rows.into_iter().map(row_to_feed_config).collect())
    }

    async fn feeds_get_by_url(&self, url: &str) -> Result<Option<FeedConfig>> {
        let row = sqlx::query(
            "SELECT id, name, url, category, refresh, created_at FROM feeds WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .context("failed to query feed by url")?;

        Ok(row.map(row_to_feed_config))
    }

    async fn feeds_insert(&self, config: &FeedConfig) -> Result<i64> {
        let id: i64 = sqlx::query(
            "INSERT INTO feeds (name, url, category, refresh, created_at) VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&config.name)
        .bind(&config.url)
        .bind(config.category)
        .bind(config.refresh as i64)
        .bind(config.created_at)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert feed")?
        .get(0);

        Ok(id)
    }

    async fn feeds_update(&self, config: &FeedConfig) -> Result<()> {
        sqlx::query(
            "UPDATE feeds SET name = ?, category = ?, refresh = ? WHERE id = ?",
        )
        .bind(&config.name)
        .bind(config.category)
        .bind(config.refresh as i64)
        .bind(config.id)
        .execute(&self.pool)
        .await
        .context("failed to update feed")?;

        Ok(())
    }

    async fn feeds_remove_by_url(&self, url: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&self.pool)
            .await
            .context("failed to delete feed")?;

        Ok(result.rows_affected())
    }

    async fn items_bulk_upsert_ignoring_duplicates(&self, rows: &[NewItemRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        for row in rows {
            sqlx::query(
                "INSERT OR IGNORE INTO items (title, url, category, website, date, inserted_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.title)
            .bind(&row.url)
            .bind(row.category)
            .bind(row.website)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("failed to upsert item")?;
        }

        tx.commit().await.context("failed to commit item upsert")?;
        Ok(())
    }

    async fn items_find_inserted_since(
        &self,
        website: i64,
        url_set: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<InsertedItem>> {
        if url_set.is_empty() {
            return Ok(Vec::new());
        }

        // sqlx's query macros can't expand a dynamic IN-list at compile time;
        // build the placeholder list explicitly instead.
        let placeholders = url_set.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT id, url FROM items WHERE website = ? AND inserted_at >= ? AND url IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(website).bind(since);
        for url in url_set {
            query = query.bind(url);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .context("failed to query inserted items")?;

        Ok(rows
            .into_iter()
            .map(|r| InsertedItem {
                id: r.get("id"),
                url: r.get("url"),
            })
            .collect())
    }

    async fn errors_log(&self, record: &ErrorRecord) {
        let result = sqlx::query(
            "INSERT INTO errors (type, feed_id, message, date) VALUES (?, ?, ?, ?)",
        )
        .bind(record.kind.as_tag())
        .bind(record.feed_id)
        .bind(&record.message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            eprintln!("failed to log error record to store: {e}");
        }
    }
}

fn row_to_feed_config(row: sqlx::sqlite::SqliteRow) -> FeedConfig {
    FeedConfig {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        category: row.get::<i64, _>("category") as u32,
        refresh: row.get::<i64, _>("refresh") as u64,
        created_at: row.get("created_at"),
    }
}
