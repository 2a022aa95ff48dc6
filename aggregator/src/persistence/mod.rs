//! Persistence Port. Abstract contract over the relational store;
//! the core depends only on this trait, never on a concrete driver.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ErrorRecord;
use crate::types::FeedConfig;

/// One row submitted to `bulk_upsert_ignoring_duplicates`.
#[derive(Debug, Clone)]
pub struct NewItemRow {
    pub title: String,
    pub url: String,
    pub category: u32,
    pub website: i64,
}

/// One row returned by the post-insert probe. The outbound `new-item` event
/// must carry the store-assigned id; this port returns `id` alongside `url`
/// to close that gap rather than issuing a second round-trip per item.
#[derive(Debug, Clone)]
pub struct InsertedItem {
    pub id: i64,
    pub url: String,
}

#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn feeds_get_all(&self) -> anyhow::Result<Vec<FeedConfig>>;
    async fn feeds_get_by_url(&self, url: &str) -> anyhow::Result<Option<FeedConfig>>;
    async fn feeds_insert(&self, config: &FeedConfig) -> anyhow::Result<i64>;
    async fn feeds_update(&self, config: &FeedConfig) -> anyhow::Result<()>;
    async fn feeds_remove_by_url(&self, url: &str) -> anyhow::Result<u64>;

    /// Submits all rows in one call; the store silently discards rows that
    /// violate the `(website, url)` unique constraint.
    async fn items_bulk_upsert_ignoring_duplicates(&self, rows: &[NewItemRow]) -> anyhow::Result<()>;

    /// The post-insert linearization probe. Returns the canonical
    /// urls, among `url_set`, that this worker's own insert actually created.
    async fn items_find_inserted_since(
        &self,
        website: i64,
        url_set: &[String],
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<InsertedItem>>;

    /// Never fails observably: internal failures are swallowed after a
    /// stderr-level complaint.
    async fn errors_log(&self, record: &ErrorRecord);
}
