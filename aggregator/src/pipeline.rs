//! Item Pipeline. Runs once per successful tick of one feed:
//! normalize → sort → bulk-upsert → identify-new → emit.

use std::sync::Arc;

use chrono::Utc;

use crate::canonical::canonicalize;
use crate::error::AggregatorError;
use crate::persistence::{InsertedItem, NewItemRow, PersistencePort};
use crate::types::{FeedConfig, FeedItem, PersistedItem};

/// Runs the pipeline for one tick and returns the newly identified items, in
/// ascending publication-date order.
pub async fn run(
    config: &FeedConfig,
    items: Vec<FeedItem>,
    store: &Arc<dyn PersistencePort>,
) -> Result<Vec<PersistedItem>, AggregatorError> {
    // Step 1: record startTime before any write.
    let start_time = Utc::now();

    // Step 2: canonicalize, dropping items whose URL can't be canonicalized.
    let mut canonical_items: Vec<FeedItem> = items
        .into_iter()
        .filter_map(|mut item| {
            let canonical = canonicalize(&item.url)?;
            item.url = canonical;
            Some(item)
        })
        .collect();

    if canonical_items.is_empty() {
        return Ok(Vec::new());
    }

    // Step 3: sort by date ascending; invalid dates sort last.
    canonical_items.sort_by(|a, b| match (a.date, b.date) {
        (Some(da), Some(db)) => da.cmp(&db),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    // Step 4: bulk idempotent upsert.
    let rows: Vec<NewItemRow> = canonical_items
        .iter()
        .map(|item| NewItemRow {
            title: item.title.clone(),
            url: item.url.clone(),
            category: item.category,
            website: item.website,
        })
        .collect();

    store
        .items_bulk_upsert_ignoring_duplicates(&rows)
        .await
        .map_err(AggregatorError::Db)?;

    // Step 5: identify truly new items via the post-insert probe.
    let submitted_urls: Vec<String> = canonical_items.iter().map(|i| i.url.clone()).collect();
    let inserted_urls = store
        .items_find_inserted_since(config.id, &submitted_urls, start_time)
        .await
        .map_err(AggregatorError::Db)?;

    let inserted: std::collections::HashMap<&str, i64> = inserted_urls
        .iter()
        .map(|i| (i.url.as_str(), i.id))
        .collect();

    // Step 6: project new items in sorted order for emission.
    let new_items: Vec<PersistedItem> = canonical_items
        .into_iter()
        .filter_map(|item| {
            let id = *inserted.get(item.url.as_str())?;
            Some(PersistedItem {
                id,
                title: item.title,
                url: item.url,
                date: item.date.unwrap_or(start_time),
                category: item.category,
                website: item.website,
            })
        })
        .collect();

    Ok(new_items)
}
