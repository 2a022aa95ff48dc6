//! Error taxonomy. Each core component surfaces failures tagged with one
//! of these kinds; the Scheduler inspects the tag to decide whether to back
//! off, evict, or merely log.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TypeError,
    FetchUrlError,
    ParseUrlError,
    DbError,
    ItemSaveError,
    PermanentFailure,
    InternalError,
    DbConnectError,
}

impl ErrorKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            ErrorKind::TypeError => "type_error",
            ErrorKind::FetchUrlError => "fetch_url_error",
            ErrorKind::ParseUrlError => "parse_url_error",
            ErrorKind::DbError => "db_error",
            ErrorKind::ItemSaveError => "item_save_error",
            ErrorKind::PermanentFailure => "permanent_failure",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::DbConnectError => "db_connect_error",
        }
    }

    /// Whether this kind should drive the Scheduler's backoff counter.
    pub fn is_transient_fetch_failure(&self) -> bool {
        matches!(self, ErrorKind::FetchUrlError | ErrorKind::ParseUrlError)
    }

    /// Whether this kind should trigger graceful shutdown of the whole worker.
    pub fn is_critical(&self) -> bool {
        matches!(self, ErrorKind::DbConnectError)
    }
}

/// Structured error record published alongside every logged failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
    pub feed: Option<String>,
    #[serde(rename = "feedId")]
    pub feed_id: Option<i64>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            feed: None,
            feed_id: None,
        }
    }

    pub fn with_feed(mut self, url: impl Into<String>, id: Option<i64>) -> Self {
        self.feed = Some(url.into());
        self.feed_id = id;
        self
    }
}

/// Typed error surfaced by core components at the library boundary, paired with
/// `anyhow::Result` for ad-hoc propagation deeper inside each component.
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("invalid feed config: {0}")]
    TypeError(String),
    #[error("feed fetch failed: {0}")]
    FetchUrl(#[source] anyhow::Error),
    #[error("feed parse failed: {0}")]
    ParseUrl(#[source] anyhow::Error),
    #[error("store error: {0}")]
    Db(#[source] anyhow::Error),
    #[error("failed to persist new item: {0}")]
    ItemSave(#[source] anyhow::Error),
}

impl AggregatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AggregatorError::TypeError(_) => ErrorKind::TypeError,
            AggregatorError::FetchUrl(_) => ErrorKind::FetchUrlError,
            AggregatorError::ParseUrl(_) => ErrorKind::ParseUrlError,
            AggregatorError::Db(_) => ErrorKind::DbError,
            AggregatorError::ItemSave(_) => ErrorKind::ItemSaveError,
        }
    }

    pub fn into_record(self, feed_url: Option<&str>, feed_id: Option<i64>) -> ErrorRecord {
        let kind = self.kind();
        let mut record = ErrorRecord::new(kind, self.to_string());
        if let Some(url) = feed_url {
            record = record.with_feed(url, feed_id);
        }
        record
    }
}
