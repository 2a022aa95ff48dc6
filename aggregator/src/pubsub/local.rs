//! Concrete `Publisher`/`Subscriber` backed by `tokio::sync::broadcast`, one
//! channel per name. Keeps the worker runnable and testable as a single
//! process without fabricating a dependency on a specific external broker —
//! the transport is intentionally out of scope here. A production
//! deployment swaps this for a Redis- or NATS-backed adapter without
//! touching the core.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use super::{MessageHandler, Publisher, Subscriber};

const CHANNEL_CAPACITY: usize = 256;

pub struct LocalPubSub {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl LocalPubSub {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().expect("pubsub channel map poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for LocalPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for LocalPubSub {
    async fn publish(&self, channel: &str, payload: &str) {
        let sender = self.sender_for(channel);
        // Fire-and-forget: no subscribers is not an error.
        let _ = sender.send(payload.to_string());
    }
}

#[async_trait]
impl Subscriber for LocalPubSub {
    async fn subscribe(&self, channel: &str, on_message: MessageHandler) {
        let mut receiver = self.sender_for(channel).subscribe();
        let channel = channel.to_string();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => on_message(channel.clone(), payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn published_message_reaches_subscriber() {
        let pubsub = LocalPubSub::new();
        let received = Arc::new(Mutex::new(None));
        let notify = Arc::new(Notify::new());

        let received_clone = received.clone();
        let notify_clone = notify.clone();
        pubsub
            .subscribe(
                "aggregator",
                Box::new(move |_channel, payload| {
                    *received_clone.lock().unwrap() = Some(payload);
                    notify_clone.notify_one();
                }),
            )
            .await;

        pubsub.publish("aggregator", "hello").await;
        notify.notified().await;

        assert_eq!(received.lock().unwrap().as_deref(), Some("hello"));
    }
}
