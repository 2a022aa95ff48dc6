//! Pub/Sub Port. Abstract contract over the messaging transport;
//! the core never depends on a specific broker.

pub mod local;

use async_trait::async_trait;

/// Callback invoked for every message received on a subscribed channel,
/// as `onMessage(channel, payloadString)`.
pub type MessageHandler = Box<dyn Fn(String, String) + Send + Sync>;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Fire-and-forget, best-effort.
    async fn publish(&self, channel: &str, payload: &str);
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Persistent subscription; `on_message` runs for every message received
    /// on `channel` for the lifetime of the worker.
    async fn subscribe(&self, channel: &str, on_message: MessageHandler);
}
