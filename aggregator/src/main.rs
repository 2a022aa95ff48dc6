/*
aggregator - stateless RSS/Atom aggregation worker.

Top-level wrapper: config loading, store + pub/sub lifecycle, Scheduler
bootstrap, inbound command subscription, and graceful shutdown. Pure
plumbing around the core components in `lib.rs`.
*/

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use common::Config;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use aggregator::control_plane;
use aggregator::error::{ErrorKind, ErrorRecord};
use aggregator::persistence::sqlite::SqlitePersistence;
use aggregator::persistence::PersistencePort;
use aggregator::pubsub::local::LocalPubSub;
use aggregator::pubsub::{Publisher, Subscriber};
use aggregator::scheduler::{Scheduler, SchedulerConfig};
use aggregator::types::FeedConfig;

#[derive(Parser, Debug)]
#[command(name = "aggregator", about = "RSS/Atom aggregation worker")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let store: Arc<dyn PersistencePort> = match SqlitePersistence::connect(&config.database.path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            let record = ErrorRecord::new(ErrorKind::DbConnectError, e.to_string());
            if record.kind.is_critical() {
                error!(%e, "failed to initialize database, halting worker");
            }
            return Err(e);
        }
    };

    bootstrap_feeds(&store, &config).await;

    // Subscriber and publisher should be distinct connections; the
    // local in-process adapter has no physical connection to duplicate, so
    // one shared instance satisfies both roles (a Redis/NATS adapter would
    // open two clients here instead).
    let pubsub = Arc::new(LocalPubSub::new());
    let publisher: Arc<dyn Publisher> = pubsub.clone();
    let subscriber: Arc<dyn Subscriber> = pubsub;

    let scheduler = Scheduler::new(
        store,
        publisher.clone(),
        SchedulerConfig {
            max_backoff_ms: config.scheduler.max_backoff_ms,
            max_consecutive_failures: config.scheduler.max_consecutive_failures,
            fetch_timeout_secs: config.scheduler.fetch_timeout_secs,
            fetch_max_retries: config.scheduler.fetch_max_retries,
            user_agent: config.scheduler.user_agent.clone(),
            item_channel_prefix: config.pubsub.item_channel_prefix.clone(),
            error_channel: config.pubsub.error_channel.clone(),
        },
    )?;

    let started = scheduler.init().await;
    info!(started, "scheduler initialized from store");

    control_plane::spawn_command_subscriber(
        scheduler.clone(),
        subscriber,
        &config.pubsub.command_channel,
    )
    .await;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    scheduler.destroy();
    publisher
        .publish(&config.pubsub.status_channel, r#"{"status":"stopped"}"#)
        .await;

    info!("shutdown complete");
    Ok(())
}

/// Seeds the store with `[[feeds]]` from config on first boot only (when the
/// store has no `FeedConfig` rows yet); a non-empty store is always the
/// source of truth (Invariant 2).
async fn bootstrap_feeds(store: &Arc<dyn PersistencePort>, config: &Config) {
    if config.feeds.is_empty() {
        return;
    }

    let existing = match store.feeds_get_all().await {
        Ok(feeds) => feeds,
        Err(e) => {
            error!(%e, "failed to check existing feeds before bootstrap");
            return;
        }
    };
    if !existing.is_empty() {
        return;
    }

    for feed in &config.feeds {
        let config = FeedConfig {
            id: 0,
            name: feed.name.clone(),
            url: feed.url.clone(),
            category: feed.category,
            refresh: feed.refresh,
            created_at: chrono::Utc::now(),
        };
        if let Err(e) = store.feeds_insert(&config).await {
            error!(%e, url = %config.url, "failed to bootstrap feed");
        }
    }
    info!(count = config.feeds.len(), "bootstrap feeds seeded into empty store");
}
