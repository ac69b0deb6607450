//! Device session.
//!
//! A [`Seakeeper`] owns the transport connection and the status cache. It
//! subscribes to the status topic on [`start`](Seakeeper::start), feeds every
//! inbound message through the codec into the cache, and exposes
//! freshness-gated reads and the power/stabilize commands.
//!
//! ## State machine
//!
//! ```text
//! Unconnected ──start──▶ Connected ──close──▶ Closed
//!                            ▲                   │
//!                            └──────start────────┘
//! ```
//!
//! `start` is not meant to be called concurrently with itself; callers
//! initialize a session from one task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::{CacheEntry, StatusCache};
use crate::codec::{Status, decode_status};
use crate::config::SeakeeperConfig;
use crate::context::ReadContext;
use crate::dispatcher::{Capability, CommandDispatcher};
use crate::error::{Result, SeakeeperError};
use crate::mqtt::MqttTransport;
use crate::transport::{MessageHandler, Transport};

/// Default resource name of a session.
pub const DEFAULT_NAME: &str = "seakeeper";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    Closed,
}

/// Session with one Seakeeper device.
pub struct Seakeeper<T: Transport = MqttTransport> {
    name: String,
    config: SeakeeperConfig,
    transport: T,
    state: RwLock<SessionState>,
    cache: Arc<StatusCache>,
    dispatcher: CommandDispatcher,
}

impl Seakeeper<MqttTransport> {
    /// Create an unconnected session over MQTT.
    pub fn new(name: impl Into<String>, config: SeakeeperConfig) -> Result<Self> {
        let transport = MqttTransport::new(config.clone());
        Self::with_transport(name, config, transport)
    }

    /// Build a session from component attributes and start it.
    pub async fn from_attributes(name: impl Into<String>, attributes: &Value) -> Result<Self> {
        let config = SeakeeperConfig::from_attributes(attributes)?;
        let session = Self::new(name, config)?;
        session.start().await?;
        Ok(session)
    }
}

impl<T: Transport> Seakeeper<T> {
    /// Create an unconnected session over an arbitrary transport.
    pub fn with_transport(
        name: impl Into<String>,
        config: SeakeeperConfig,
        transport: T,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(StatusCache::new(config.stale_after()));
        let dispatcher = CommandDispatcher::new(&config.command_topic, config.publish_timeout());
        Ok(Self {
            name: name.into(),
            config,
            transport,
            state: RwLock::new(SessionState::Unconnected),
            cache,
            dispatcher,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SeakeeperConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Connect and subscribe to the status topic.
    ///
    /// No-op when already connected. On a subscribe failure the fresh
    /// connection is released before the error is returned, and the
    /// session keeps its previous state.
    pub async fn start(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.transport.connect().await?;

        let cache = self.cache.clone();
        let handler: MessageHandler = Arc::new(move |topic: &str, payload: &[u8]| {
            match decode_status(payload) {
                Ok((status, raw)) => cache.record_update(CacheEntry::new(status, raw)),
                Err(e) => error!(
                    "Error decoding message on {}: {} ({})",
                    topic,
                    e,
                    String::from_utf8_lossy(payload)
                ),
            }
        });

        if let Err(e) = self
            .transport
            .subscribe(&self.config.status_topic, handler)
            .await
        {
            self.transport.disconnect(Duration::ZERO).await;
            return Err(e.into());
        }

        *self.state.write() = SessionState::Connected;
        info!(
            "Seakeeper '{}' listening on {}",
            self.name, self.config.status_topic
        );
        Ok(())
    }

    /// Disconnect gracefully. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }

        self.transport
            .disconnect(self.config.disconnect_grace())
            .await;
        *self.state.write() = SessionState::Closed;
        info!("Seakeeper '{}' closed", self.name);
        Ok(())
    }

    /// Last typed status, without a freshness check.
    pub fn last_status(&self) -> Status {
        self.cache.last_status()
    }

    /// Receipt time of the last status, if any arrived.
    pub fn last_status_time(&self) -> Option<DateTime<Utc>> {
        self.cache.last_received_at()
    }

    /// Full key/value map of the last status if it is fresh.
    pub fn readings(&self, context: ReadContext) -> Result<Map<String, Value>> {
        self.cache.readings(context)
    }

    /// Switch flywheel power.
    pub async fn set_power(&self, on: bool) -> Result<()> {
        self.set_power_with_cancel(on, &CancellationToken::new())
            .await
    }

    /// Switch flywheel power, giving up when `cancel` fires.
    pub async fn set_power_with_cancel(&self, on: bool, cancel: &CancellationToken) -> Result<()> {
        self.execute(Capability::Power, on, cancel).await
    }

    /// Switch roll stabilization.
    pub async fn set_stabilize(&self, on: bool) -> Result<()> {
        self.set_stabilize_with_cancel(on, &CancellationToken::new())
            .await
    }

    /// Switch roll stabilization, giving up when `cancel` fires.
    pub async fn set_stabilize_with_cancel(
        &self,
        on: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.execute(Capability::Stabilize, on, cancel).await
    }

    /// Generic command entry point.
    ///
    /// Accepts `{"power": on}` and/or `{"stabilize": on}` where `on` is a
    /// bool or a number (`> 0` is on). Other keys are ignored. Returns an
    /// empty map.
    pub async fn do_command(&self, command: &Map<String, Value>) -> Result<Map<String, Value>> {
        for capability in [Capability::Power, Capability::Stabilize] {
            let Some(value) = command.get(capability.key()) else {
                continue;
            };
            let on = match value {
                Value::Bool(on) => *on,
                Value::Number(n) => n.as_f64().is_some_and(|n| n > 0.0),
                other => {
                    return Err(SeakeeperError::InvalidCommand(format!(
                        "{} expects a bool or number, got {}",
                        capability, other
                    )));
                }
            };
            self.execute(capability, on, &CancellationToken::new())
                .await?;
        }
        Ok(Map::new())
    }

    async fn execute(
        &self,
        capability: Capability,
        on: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let connection = self.is_connected().then_some(&self.transport);
        self.dispatcher
            .execute_at(&self.cache, connection, capability, on, Utc::now(), cancel)
            .await
    }
}
