//! Session and broker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SeakeeperError};

/// Default topics and bounds.
pub mod defaults {
    /// Inbound telemetry topic
    pub const STATUS_TOPIC: &str = "seakeeper/status/1";
    /// Outbound command topic
    pub const COMMAND_TOPIC: &str = "seakeeper/request/1";
    /// The device serves MQTT over WebSocket on this port
    pub const PORT: u16 = 9001;
    pub const KEEP_ALIVE_SECS: u64 = 60;
    /// Status older than this is never read or acted on
    pub const STALE_AFTER_SECS: u64 = 60;
    pub const PUBLISH_TIMEOUT_MS: u64 = 30_000;
    pub const CONNECT_TIMEOUT_SECS: u64 = 30;
    pub const DISCONNECT_GRACE_MS: u64 = 250;
}

/// Configuration for a Seakeeper session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeakeeperConfig {
    /// Host of the device's broker
    pub host: String,

    /// Broker port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect with MQTT over WebSocket (`ws://host:port`)
    #[serde(default = "default_websocket")]
    pub websocket: bool,

    /// Client ID (auto-generated if not provided)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_status_topic")]
    pub status_topic: String,

    #[serde(default = "default_command_topic")]
    pub command_topic: String,

    /// Freshness threshold in seconds
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Bound on waiting for a command acknowledgment, in milliseconds
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,

    /// Bound on waiting for the broker to accept the connection, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Grace period for a graceful disconnect, in milliseconds
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_ms: u64,
}

fn default_port() -> u16 {
    defaults::PORT
}
fn default_websocket() -> bool {
    true
}
fn default_keep_alive() -> u64 {
    defaults::KEEP_ALIVE_SECS
}
fn default_status_topic() -> String {
    defaults::STATUS_TOPIC.to_string()
}
fn default_command_topic() -> String {
    defaults::COMMAND_TOPIC.to_string()
}
fn default_stale_after() -> u64 {
    defaults::STALE_AFTER_SECS
}
fn default_publish_timeout() -> u64 {
    defaults::PUBLISH_TIMEOUT_MS
}
fn default_connect_timeout() -> u64 {
    defaults::CONNECT_TIMEOUT_SECS
}
fn default_disconnect_grace() -> u64 {
    defaults::DISCONNECT_GRACE_MS
}

impl SeakeeperConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            websocket: default_websocket(),
            client_id: None,
            keep_alive_secs: default_keep_alive(),
            status_topic: default_status_topic(),
            command_topic: default_command_topic(),
            stale_after_secs: default_stale_after(),
            publish_timeout_ms: default_publish_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            disconnect_grace_ms: default_disconnect_grace(),
        }
    }

    /// Build and validate a configuration from a component attribute map.
    ///
    /// Only `host` is required; every other key falls back to its default.
    pub fn from_attributes(attributes: &Value) -> Result<Self> {
        let host = attributes
            .get("host")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if host.is_empty() {
            return Err(SeakeeperError::Configuration(
                "need to specify host".to_string(),
            ));
        }

        let config: Self = serde_json::from_value(attributes.clone()).map_err(|e| {
            SeakeeperError::Configuration(format!("invalid attributes: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use plain MQTT over TCP instead of WebSocket.
    pub fn with_websocket(mut self, websocket: bool) -> Self {
        self.websocket = websocket;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_topics(
        mut self,
        status_topic: impl Into<String>,
        command_topic: impl Into<String>,
    ) -> Self {
        self.status_topic = status_topic.into();
        self.command_topic = command_topic.into();
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Check the configuration for values the session cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SeakeeperError::Configuration(
                "need to specify host".to_string(),
            ));
        }
        if self.status_topic.is_empty() || self.command_topic.is_empty() {
            return Err(SeakeeperError::Configuration(
                "status and command topics must not be empty".to_string(),
            ));
        }
        if self.status_topic == self.command_topic {
            return Err(SeakeeperError::Configuration(format!(
                "status and command topics must differ: {}",
                self.status_topic
            )));
        }
        if self.stale_after_secs == 0
            || self.publish_timeout_ms == 0
            || self.connect_timeout_secs == 0
        {
            return Err(SeakeeperError::Configuration(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Broker URL for WebSocket connections, or `host:port` otherwise.
    pub fn broker_addr(&self) -> String {
        if self.websocket {
            format!("ws://{}:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}
