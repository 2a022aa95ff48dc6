//! Scheduler / Emitter. Owns the set of live feeds, one task per feed with
//! its own timer, and the failure/backoff tracker: one task holding a timer,
//! cancellation cooperative at await points (`tokio_util::sync::CancellationToken`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{AggregatorError, ErrorKind, ErrorRecord};
use crate::feed_source;
use crate::persistence::PersistencePort;
use crate::pipeline;
use crate::pubsub::Publisher;
use crate::types::{Event, FeedConfig};

const MAX_BACKOFF_FLOOR_MS: u64 = 86_400_000;

struct FailureState {
    consecutive_failures: u32,
    original_refresh: u64,
}

struct ActiveFeed {
    config: FeedConfig,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Shared dependencies every per-feed task needs; cloned (as `Arc`s) into
/// each spawned task rather than referencing the `Scheduler` itself, so a
/// feed task never has to reach back through a lock to do its work.
struct TaskDeps {
    store: Arc<dyn PersistencePort>,
    http_client: Client,
    user_agent: String,
    fetch_max_retries: u32,
}

pub struct SchedulerConfig {
    pub max_backoff_ms: u64,
    pub max_consecutive_failures: u32,
    pub fetch_timeout_secs: u64,
    pub fetch_max_retries: u32,
    pub user_agent: String,
    pub item_channel_prefix: String,
    pub error_channel: String,
}

pub struct Scheduler {
    store: Arc<dyn PersistencePort>,
    publisher: Arc<dyn Publisher>,
    http_client: Client,
    user_agent: String,
    max_backoff_ms: u64,
    max_consecutive_failures: u32,
    fetch_max_retries: u32,
    item_channel_prefix: String,
    error_channel: String,
    active_feeds: Mutex<HashMap<String, ActiveFeed>>,
    failure_tracker: Mutex<HashMap<i64, FailureState>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn PersistencePort>,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
    ) -> anyhow::Result<Arc<Self>> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;

        Ok(Arc::new(Self {
            store,
            publisher,
            http_client,
            user_agent: config.user_agent,
            max_backoff_ms: if config.max_backoff_ms > 0 {
                config.max_backoff_ms
            } else {
                MAX_BACKOFF_FLOOR_MS
            },
            max_consecutive_failures: config.max_consecutive_failures,
            fetch_max_retries: config.fetch_max_retries,
            item_channel_prefix: config.item_channel_prefix,
            error_channel: config.error_channel,
            active_feeds: Mutex::new(HashMap::new()),
            failure_tracker: Mutex::new(HashMap::new()),
        }))
    }

    /// Loads all `FeedConfig` rows from the store and starts each.
    /// Returns the count started, or 0 on a store failure (emitting `db_error`).
    pub async fn init(self: &Arc<Self>) -> usize {
        let configs = match self.store.feeds_get_all().await {
            Ok(configs) => configs,
            Err(e) => {
                self.emit_error(AggregatorError::Db(e).into_record(None, None)).await;
                return 0;
            }
        };

        let mut started = 0;
        for config in configs {
            self.start_feed(config);
            started += 1;
        }
        started
    }

    /// Validates, upserts into the store (insert on new url, update preserving
    /// id otherwise) and (re)starts the feed's timer.
    pub async fn add(self: &Arc<Self>, mut config: FeedConfig) {
        if config.url.trim().is_empty() || config.refresh == 0 {
            self.emit_error(
                AggregatorError::TypeError(format!("invalid feed config for url {:?}", config.url))
                    .into_record(Some(&config.url), None),
            )
            .await;
            return;
        }

        let existing = self.store.feeds_get_by_url(&config.url).await.ok().flatten();
        let result = if let Some(existing) = &existing {
            config.id = existing.id;
            self.store.feeds_update(&config).await
        } else {
            match self.store.feeds_insert(&config).await {
                Ok(id) => {
                    config.id = id;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };

        if let Err(e) = result {
            self.emit_error(AggregatorError::Db(e).into_record(Some(&config.url), Some(config.id)))
                .await;
            return;
        }

        self.stop_feed(&config.url);
        self.start_feed(config);
    }

    /// Cancels the feed's timer, clears its runtime entry, deletes its store
    /// row. Idempotent: an unknown url is a no-op that still attempts the
    /// store delete.
    pub async fn remove(self: &Arc<Self>, url: &str) {
        let feed_id = self.active_feeds.lock().unwrap().get(url).map(|f| f.config.id);
        self.stop_feed(url);
        if let Some(id) = feed_id {
            self.failure_tracker.lock().unwrap().remove(&id);
        }
        if let Err(e) = self.store.feeds_remove_by_url(url).await {
            self.emit_error(AggregatorError::Db(e).into_record(Some(url), None)).await;
        }
    }

    /// `remove(config.url)` followed by `add(config)`, observing the
    /// two-phase ordering.
    pub async fn replace(self: &Arc<Self>, config: FeedConfig) {
        self.remove(&config.url).await;
        self.add(config).await;
    }

    /// Persists the new `refresh` and restarts the timer at the new period.
    pub async fn update_interval(self: &Arc<Self>, url: &str, new_ms: u64) {
        let Some(mut config) = self.get_feed_config(url) else {
            return;
        };
        config.refresh = new_ms;

        if let Err(e) = self.store.feeds_update(&config).await {
            self.emit_error(AggregatorError::Db(e).into_record(Some(url), Some(config.id)))
                .await;
            return;
        }

        self.stop_feed(url);
        self.start_feed(config);
    }

    /// Stops all timers, clears runtime state, then `init()`.
    pub async fn reload_feeds(self: &Arc<Self>) -> usize {
        self.destroy();
        self.init().await
    }

    /// Cancels every timer and clears all runtime state; used in graceful
    /// shutdown.
    pub fn destroy(&self) {
        let mut active = self.active_feeds.lock().unwrap();
        for (_, feed) in active.drain() {
            feed.cancel.cancel();
        }
        self.failure_tracker.lock().unwrap().clear();
    }

    /// The runtime view of a feed's config, including the currently applied
    /// `refresh`, or `None` if it isn't active.
    pub fn get_feed_config(&self, url: &str) -> Option<FeedConfig> {
        self.active_feeds
            .lock()
            .unwrap()
            .get(url)
            .map(|f| f.config.clone())
    }

    fn start_feed(self: &Arc<Self>, config: FeedConfig) {
        let cancel = CancellationToken::new();
        let deps = TaskDeps {
            store: self.store.clone(),
            http_client: self.http_client.clone(),
            user_agent: self.user_agent.clone(),
            fetch_max_retries: self.fetch_max_retries,
        };
        let scheduler = self.clone();
        let task_config = config.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            feed_task(scheduler, task_config, deps, task_cancel).await;
        });

        info!(url = %config.url, refresh_ms = config.refresh, "feed started");
        self.active_feeds.lock().unwrap().insert(
            config.url.clone(),
            ActiveFeed {
                config,
                cancel,
                handle,
            },
        );
    }

    fn stop_feed(&self, url: &str) {
        if let Some(feed) = self.active_feeds.lock().unwrap().remove(url) {
            feed.cancel.cancel();
            feed.handle.abort();
        }
    }

    /// Invoked from the per-feed task after a transient fetch/parse failure
    /// backoff algorithm.
    async fn on_transient_failure(self: &Arc<Self>, feed_id: i64, url: &str, original_refresh: u64) {
        let (failures, original_refresh) = {
            let mut tracker = self.failure_tracker.lock().unwrap();
            let state = tracker.entry(feed_id).or_insert(FailureState {
                consecutive_failures: 0,
                original_refresh,
            });
            state.consecutive_failures += 1;
            (state.consecutive_failures, state.original_refresh)
        };

        if failures >= self.max_consecutive_failures {
            self.failure_tracker.lock().unwrap().remove(&feed_id);
            self.emit_error(
                ErrorRecord::new(ErrorKind::PermanentFailure, format!("feed {url} exceeded failure threshold"))
                    .with_feed(url, Some(feed_id)),
            )
            .await;
            self.remove(url).await;
            return;
        }

        let new_interval = std::cmp::min(
            original_refresh.saturating_mul(1u64 << (failures - 1)),
            self.max_backoff_ms,
        );
        self.update_interval(url, new_interval).await;
    }

    /// On the first successful cycle the tracker entry is evicted.
    fn on_success(&self, feed_id: i64) {
        self.failure_tracker.lock().unwrap().remove(&feed_id);
    }

    async fn emit_error(&self, record: ErrorRecord) {
        self.emit(Event::Error(record)).await;
    }

    /// Single point through which every outbound `Event` is turned into a
    /// pubsub payload.
    async fn emit(&self, event: Event) {
        match event {
            Event::NewItem(item) => {
                let channel = format!("{}:{}", self.item_channel_prefix, item.category);
                let envelope = serde_json::json!({ "event": channel, "data": &item });
                self.publisher.publish(&channel, &envelope.to_string()).await;
            }
            Event::Error(record) => {
                warn!(kind = record.kind.as_tag(), message = %record.message, "aggregator error");
                self.store.errors_log(&record).await;
                self.publisher
                    .publish(&self.error_channel, &serde_json::to_string(&record).unwrap_or_default())
                    .await;
            }
        }
    }
}

async fn feed_task(
    scheduler: Arc<Scheduler>,
    config: FeedConfig,
    deps: TaskDeps,
    cancel: CancellationToken,
) {
    let original_refresh = config.refresh;
    loop {
        tick(&scheduler, &config, &deps, original_refresh).await;

        let wait = scheduler
            .get_feed_config(&config.url)
            .map(|c| c.refresh)
            .unwrap_or(config.refresh);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
        }

        if cancel.is_cancelled() {
            break;
        }
    }
}

async fn tick(scheduler: &Arc<Scheduler>, config: &FeedConfig, deps: &TaskDeps, original_refresh: u64) {
    let fetch_result = feed_source::fetch(config, &deps.http_client, &deps.user_agent, deps.fetch_max_retries).await;

    let items = match fetch_result {
        Ok(items) => items,
        Err(e) => {
            let kind = e.kind();
            let record = e.into_record(Some(&config.url), Some(config.id));
            scheduler.emit_error(record).await;
            if kind.is_transient_fetch_failure() {
                scheduler
                    .on_transient_failure(config.id, &config.url, original_refresh)
                    .await;
            }
            return;
        }
    };

    match pipeline::run(config, items, &deps.store).await {
        Ok(new_items) => {
            for item in new_items {
                scheduler.emit(Event::NewItem(item)).await;
            }
            scheduler.on_success(config.id);
        }
        Err(e) => {
            let record = e.into_record(Some(&config.url), Some(config.id));
            scheduler.emit_error(record).await;
        }
    }
}
