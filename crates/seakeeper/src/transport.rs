//! Transport contract consumed by the session.
//!
//! The session only needs four things from a pub/sub client: connect,
//! subscribe with a handler, publish with an acknowledgment, and
//! disconnect. Reconnection, handshake details and QoS stay behind this
//! trait.
//!
//! ```text
//! Session                      Transport                 Broker
//! ┌────────────┐  subscribe   ┌────────────┐  status    ┌────────┐
//! │            │─────────────▶│            │◀───────────│        │
//! │  Cache  ◀──│── handler ───│   MQTT /   │            │ device │
//! │            │   publish    │   mock     │  request   │        │
//! │ Dispatcher │─────────────▶│            │───────────▶│        │
//! └────────────┘              └────────────┘            └────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Transport error types.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The broker refused or failed a subscription.
    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// The publish could not be handed to the broker.
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// The connection dropped while an acknowledgment was pending.
    #[error("Connection lost: {0}")]
    Disconnected(String),

    /// Operation attempted before `connect` or after `disconnect`.
    #[error("Transport not connected")]
    NotConnected,

    /// Timeout occurred.
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),
}

/// Callback invoked for every inbound message on a subscribed topic.
///
/// Called from the transport's own delivery task with `(topic, payload)`.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Pub/sub client used by a session.
///
/// Implementations must be safe to share between the delivery task and
/// caller tasks. `publish` resolves once the transport acknowledges the
/// message; it never waits for the device to act on it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and wait for the broker to accept it.
    async fn connect(&self) -> TransportResult<()>;

    /// Subscribe to `topic` and route its messages to `handler`.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> TransportResult<()>;

    /// Publish `payload` to `topic` and wait for the acknowledgment.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()>;

    /// Disconnect, giving in-flight work up to `grace` to finish.
    async fn disconnect(&self, grace: Duration);
}

/// Shared transports, e.g. `Arc<dyn Transport>`.
#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self) -> TransportResult<()> {
        (**self).connect().await
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> TransportResult<()> {
        (**self).subscribe(topic, handler).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()> {
        (**self).publish(topic, payload).await
    }

    async fn disconnect(&self, grace: Duration) {
        (**self).disconnect(grace).await
    }
}

/// Match a topic against an MQTT filter with `+` and `#` wildcards.
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    let mut topic_parts = topic.split('/');
    let mut filter_parts = filter.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
