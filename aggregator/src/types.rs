//! Shared data types for the aggregation worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistent configuration of one feed source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub category: u32,
    /// Polling interval in milliseconds, as currently applied (reflects backoff).
    pub refresh: u64,
    pub created_at: DateTime<Utc>,
}

/// One parsed entry before persistence, already normalized by the feed source.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub title: String,
    /// Canonicalized URL (set by the pipeline before any store interaction).
    pub url: String,
    pub date: Option<DateTime<Utc>>,
    pub category: u32,
    pub website: i64,
}

/// An item that has been assigned identity by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedItem {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub date: DateTime<Utc>,
    pub category: u32,
    pub website: i64,
}

/// An inbound command received on the `aggregator` channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Command {
    Add {
        url: String,
        name: String,
        category: u32,
        refresh: u64,
    },
    Remove {
        url: String,
    },
    Replace {
        url: String,
        name: String,
        category: u32,
        refresh: u64,
    },
}

/// Outbound event payloads. The scheduler matches on this exhaustively when
/// turning an event into a pubsub publish, rather than branching on a
/// string tag at each call site.
#[derive(Debug, Clone)]
pub enum Event {
    NewItem(PersistedItem),
    Error(crate::error::ErrorRecord),
}
