//! Feed Source: encapsulates one feed's configuration and performs a single
//! HTTP fetch + parse. The retry loop inside one fetch attempt distinguishes
//! 5xx/429 (retryable) from 4xx (not); it sits a layer below, and is
//! orthogonal to, the Scheduler's cross-tick backoff. The retry count is a
//! parameter rather than a constant so tests can drive it down to 1.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use feed_rs::parser;
use reqwest::Client;

use crate::error::AggregatorError;
use crate::types::{FeedConfig, FeedItem};

const ACCEPT_HEADER: &str =
    "text/html, application/xhtml+xml, application/xml, text/xml, application/atom+xml, application/rss+xml";

/// Fetches and normalizes the items of one feed. `max_retries` bounds the
/// inner retry loop (see `fetch_body`); callers outside of tests should pass
/// the configured default.
pub async fn fetch(
    config: &FeedConfig,
    client: &Client,
    user_agent: &str,
    max_retries: u32,
) -> Result<Vec<FeedItem>, AggregatorError> {
    let body = fetch_body(&config.url, client, user_agent, max_retries)
        .await
        .map_err(AggregatorError::FetchUrl)?;

    let feed = parser::parse(body.as_ref())
        .map_err(|e| AggregatorError::ParseUrl(anyhow::anyhow!(e)))?;

    if feed.entries.is_empty() {
        return Err(AggregatorError::ParseUrl(anyhow::anyhow!(
            "feed at {} yielded zero items",
            config.url
        )));
    }

    let cutoff = Utc::now() - ChronoDuration::hours(24);
    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| normalize_entry(entry, config, cutoff))
        .collect();

    Ok(items)
}

fn normalize_entry(
    entry: feed_rs::model::Entry,
    config: &FeedConfig,
    cutoff: DateTime<Utc>,
) -> Option<FeedItem> {
    let title = entry.title.map(|t| t.content).unwrap_or_default();
    let url = entry.links.first()?.href.clone();
    let date = entry.published.or(entry.updated)?;

    if date < cutoff {
        return None;
    }

    Some(FeedItem {
        title,
        url,
        date: Some(date),
        category: config.category,
        website: config.id,
    })
}

async fn fetch_body(url: &str, client: &Client, user_agent: &str, max_retries: u32) -> anyhow::Result<Vec<u8>> {
    let mut last_error = None;

    for attempt in 1..=max_retries.max(1) {
        if attempt > 1 {
            let backoff = Duration::from_secs(2u64.pow(attempt - 2));
            tracing::info!(url, attempt, ?backoff, "retrying feed fetch");
            tokio::time::sleep(backoff).await;
        }

        match client.get(url).header("User-Agent", user_agent).header("Accept", ACCEPT_HEADER).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .bytes()
                        .await
                        .map(|b| b.to_vec())
                        .map_err(|e| anyhow::anyhow!("failed to read response body: {e}"));
                } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    last_error = Some(anyhow::anyhow!("retryable status: {status}"));
                    continue;
                } else {
                    return Err(anyhow::anyhow!("feed fetch failed with status: {status}"));
                }
            }
            Err(e) => {
                last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("unknown error after retries")))
}
