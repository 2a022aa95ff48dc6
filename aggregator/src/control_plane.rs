//! Control Plane. Inbound: a command subscriber translating JSON
//! messages on the `aggregator` channel into Scheduler operations. The
//! dynamic, schemaless wire format is validated at this boundary into the
//! tagged-variant `Command` type before anything passes inward.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::pubsub::Subscriber;
use crate::scheduler::Scheduler;
use crate::types::{Command, FeedConfig};

/// Subscribes to `channel` and routes every well-formed command to the
/// scheduler. Malformed JSON is logged and dropped; an unrecognized `cmd`
/// value is logged as a warning.
pub async fn spawn_command_subscriber(
    scheduler: Arc<Scheduler>,
    subscriber: Arc<dyn Subscriber>,
    channel: &str,
) {
    subscriber
        .subscribe(
            channel,
            Box::new(move |_channel, payload| {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    handle_command_message(&scheduler, &payload).await;
                });
            }),
        )
        .await;
}

async fn handle_command_message(scheduler: &Arc<Scheduler>, payload: &str) {
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping malformed command message");
            return;
        }
    };

    let Some(cmd) = value.get("cmd").and_then(Value::as_str) else {
        warn!(payload, "dropping command message with no cmd field");
        return;
    };

    match cmd {
        "add" | "replace" => match serde_json::from_value::<Command>(value) {
            Ok(Command::Add { url, name, category, refresh }) => {
                let config = bootstrap_config(url, name, category, refresh);
                scheduler.add(config).await;
            }
            Ok(Command::Replace { url, name, category, refresh }) => {
                let config = bootstrap_config(url, name, category, refresh);
                scheduler.replace(config).await;
            }
            Ok(Command::Remove { .. }) => unreachable!("matched on cmd == add|replace"),
            Err(e) => warn!(error = %e, "dropping malformed {} command", cmd),
        },
        "remove" => match serde_json::from_value::<Command>(value) {
            Ok(Command::Remove { url }) => scheduler.remove(&url).await,
            Ok(_) => unreachable!("matched on cmd == remove"),
            Err(e) => warn!(error = %e, "dropping malformed remove command"),
        },
        other => warn!(cmd = other, "unknown command"),
    }
}

fn bootstrap_config(url: String, name: String, category: u32, refresh: u64) -> FeedConfig {
    FeedConfig {
        id: 0,
        name,
        url,
        category,
        refresh,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorRecord;
    use crate::persistence::{InsertedItem, NewItemRow, PersistencePort};
    use crate::pubsub::local::LocalPubSub;
    use crate::pubsub::Publisher;
    use crate::scheduler::SchedulerConfig;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;

    struct NullStore {
        added: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PersistencePort for NullStore {
        async fn feeds_get_all(&self) -> anyhow::Result<Vec<FeedConfig>> {
            Ok(vec![])
        }
        async fn feeds_get_by_url(&self, _url: &str) -> anyhow::Result<Option<FeedConfig>> {
            Ok(None)
        }
        async fn feeds_insert(&self, config: &FeedConfig) -> anyhow::Result<i64> {
            self.added.lock().unwrap().push(config.url.clone());
            Ok(1)
        }
        async fn feeds_update(&self, _config: &FeedConfig) -> anyhow::Result<()> {
            Ok(())
        }
        async fn feeds_remove_by_url(&self, _url: &str) -> anyhow::Result<u64> {
            Ok(0)
        }
        async fn items_bulk_upsert_ignoring_duplicates(&self, _rows: &[NewItemRow]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn items_find_inserted_since(
            &self,
            _website: i64,
            _url_set: &[String],
            _since: DateTime<Utc>,
        ) -> anyhow::Result<Vec<InsertedItem>> {
            Ok(vec![])
        }
        async fn errors_log(&self, _record: &ErrorRecord) {}
    }

    #[tokio::test]
    async fn add_command_starts_a_feed() {
        let store: Arc<dyn PersistencePort> = Arc::new(NullStore { added: Mutex::new(vec![]) });
        let publisher: Arc<dyn Publisher> = Arc::new(LocalPubSub::new());
        let scheduler = Scheduler::new(
            store,
            publisher,
            SchedulerConfig {
                max_backoff_ms: 86_400_000,
                max_consecutive_failures: 5,
                fetch_timeout_secs: 10,
                fetch_max_retries: 3,
                user_agent: "test/1.0".to_string(),
                item_channel_prefix: "feed:wire".to_string(),
                error_channel: "aggregator-errors".to_string(),
            },
        )
        .unwrap();

        let payload = r#"{"cmd":"add","url":"https://ex.test/feed.xml","name":"Ex","category":3,"refresh":60000}"#;
        handle_command_message(&scheduler, payload).await;

        assert!(scheduler.get_feed_config("https://ex.test/feed.xml").is_some());
    }

    #[tokio::test]
    async fn malformed_json_is_dropped_without_panicking() {
        let store: Arc<dyn PersistencePort> = Arc::new(NullStore { added: Mutex::new(vec![]) });
        let publisher: Arc<dyn Publisher> = Arc::new(LocalPubSub::new());
        let scheduler = Scheduler::new(
            store,
            publisher,
            SchedulerConfig {
                max_backoff_ms: 86_400_000,
                max_consecutive_failures: 5,
                fetch_timeout_secs: 10,
                fetch_max_retries: 3,
                user_agent: "test/1.0".to_string(),
                item_channel_prefix: "feed:wire".to_string(),
                error_channel: "aggregator-errors".to_string(),
            },
        )
        .unwrap();

        handle_command_message(&scheduler, "not json").await;
    }

    #[tokio::test]
    async fn unknown_cmd_is_logged_and_ignored() {
        let store: Arc<dyn PersistencePort> = Arc::new(NullStore { added: Mutex::new(vec![]) });
        let publisher: Arc<dyn Publisher> = Arc::new(LocalPubSub::new());
        let scheduler = Scheduler::new(
            store,
            publisher,
            SchedulerConfig {
                max_backoff_ms: 86_400_000,
                max_consecutive_failures: 5,
                fetch_timeout_secs: 10,
                fetch_max_retries: 3,
                user_agent: "test/1.0".to_string(),
                item_channel_prefix: "feed:wire".to_string(),
                error_channel: "aggregator-errors".to_string(),
            },
        )
        .unwrap();

        handle_command_message(&scheduler, r#"{"cmd":"frobnicate"}"#).await;
    }
}
