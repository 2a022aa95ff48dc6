/*!
common/src/lib.rs

Shared configuration types for the feed aggregation worker.

This file provides:
- `Config` data structures (deserialized from TOML)
- An async loader that merges a default config file with an operator override
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Database configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/aggregator.db").
    pub path: String,
}

/// Scheduler defaults applied to feeds that don't override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default refresh interval in milliseconds for a feed with no explicit value.
    #[serde(default = "default_refresh_ms")]
    pub default_refresh_ms: u64,
    /// Ceiling applied to backoff-lengthened intervals.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive transient failures before a feed is permanently removed.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
    /// HTTP fetch timeout; must stay below the shortest supported refresh.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Retry attempts within a single fetch, before the failure counts
    /// against the feed's consecutive-failure backoff.
    #[serde(default = "default_fetch_max_retries")]
    pub fetch_max_retries: u32,
    /// User-Agent header sent with every feed fetch.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_refresh_ms() -> u64 {
    15 * 60 * 1000
}
fn default_max_backoff_ms() -> u64 {
    86_400_000
}
fn default_max_failures() -> u32 {
    5
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_fetch_max_retries() -> u32 {
    3
}
fn default_user_agent() -> String {
    "feed-aggregator/0.1".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_refresh_ms: default_refresh_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_consecutive_failures: default_max_failures(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_max_retries: default_fetch_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

/// Pub/Sub channel naming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubConfig {
    #[serde(default = "default_command_channel")]
    pub command_channel: String,
    #[serde(default = "default_error_channel")]
    pub error_channel: String,
    #[serde(default = "default_status_channel")]
    pub status_channel: String,
    #[serde(default = "default_item_channel_prefix")]
    pub item_channel_prefix: String,
}

fn default_command_channel() -> String {
    "aggregator".to_string()
}
fn default_error_channel() -> String {
    "aggregator-errors".to_string()
}
fn default_status_channel() -> String {
    "aggregator-status".to_string()
}
fn default_item_channel_prefix() -> String {
    "feed:wire".to_string()
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            command_channel: default_command_channel(),
            error_channel: default_error_channel(),
            status_channel: default_status_channel(),
            item_channel_prefix: default_item_channel_prefix(),
        }
    }
}

/// A feed seeded at first boot when the store has no `FeedConfig` rows yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapFeed {
    pub name: String,
    pub url: String,
    pub category: u32,
    #[serde(default = "default_refresh_ms")]
    pub refresh: u64,
}

/// Top-level application configuration (deserialized from config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub feeds: Vec<BootstrapFeed>,
}

impl Config {
    /// Load configuration from a single TOML file asynchronously.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        if let Some(path) = default_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read default config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("failed to parse default configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        if let Some(path) = override_path {
            if path.exists() {
                let data = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read override config: {}", path.display()))?;
                let val: toml::Value =
                    toml::from_str(&data).context("failed to parse override configuration")?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value
            .try_into()
            .context("failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_string() {
        let toml = r#"
            [database]
            path = "data/test.db"

            [scheduler]
            default_refresh_ms = 60000

            [[feeds]]
            name = "Example"
            url = "https://example.com/feed.xml"
            category = 1
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.scheduler.default_refresh_ms, 60000);
        assert_eq!(cfg.feeds.len(), 1);
        assert_eq!(cfg.pubsub.command_channel, "aggregator");
    }

    #[tokio::test]
    async fn load_with_defaults_merges_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        let default_path = dir.path().join("config.default.toml");
        let override_path = dir.path().join("config.toml");

        tokio::fs::write(
            &default_path,
            r#"
                [database]
                path = "default.db"
                [scheduler]
                default_refresh_ms = 900000
            "#,
        )
        .await
        .unwrap();

        tokio::fs::write(
            &override_path,
            r#"
                [database]
                path = "override.db"
            "#,
        )
        .await
        .unwrap();

        let cfg = Config::load_with_defaults(Some(&default_path), Some(&override_path))
            .await
            .expect("load config");

        assert_eq!(cfg.database.path, "override.db");
        assert_eq!(cfg.scheduler.default_refresh_ms, 900000);
    }
}
