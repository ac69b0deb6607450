//! Command dispatch.
//!
//! Commands are requests, not transactions. A command is decided from the
//! cached status (never from stale data), published to the command topic,
//! and considered done once the transport acknowledges it. Whether the
//! device actually changed state shows up only in a later status message.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::StatusCache;
use crate::codec::{Status, encode_command};
use crate::context::ReadContext;
use crate::error::{Result, SeakeeperError};
use crate::transport::Transport;

/// A switchable device capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Flywheel power
    Power,
    /// Roll stabilization
    Stabilize,
}

impl Capability {
    /// Key used in command payloads.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::Stabilize => "stabilize",
        }
    }

    fn is_on(&self, status: &Status) -> bool {
        match self {
            Self::Power => status.is_power_on(),
            Self::Stabilize => status.is_stabilize_on(),
        }
    }

    fn is_available(&self, status: &Status) -> bool {
        match self {
            Self::Power => status.is_power_available(),
            Self::Stabilize => status.is_stabilize_available(),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Outcome of checking a command against the cached status.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandDecision {
    /// The device already reports the requested "on" state.
    AlreadySatisfied,
    /// Publish this payload.
    Send(Vec<u8>),
}

/// Decide whether `capability` must be switched to `on` given `status`.
///
/// Only "on" requests are checked for idempotency and availability; "off"
/// is always sent.
pub fn decide(status: &Status, capability: Capability, on: bool) -> Result<CommandDecision> {
    if on && capability.is_on(status) {
        return Ok(CommandDecision::AlreadySatisfied);
    }
    if on && !capability.is_available(status) {
        return Err(SeakeeperError::Unavailable(capability));
    }
    Ok(CommandDecision::Send(encode_command(capability.key(), on)?))
}

/// Publishes commands with a bounded wait for acknowledgment.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    command_topic: String,
    publish_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(command_topic: impl Into<String>, publish_timeout: Duration) -> Self {
        Self {
            command_topic: command_topic.into(),
            publish_timeout,
        }
    }

    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    /// Switch `capability` using the status cached at `now`.
    ///
    /// `connection` is `None` when the session is not connected; that is
    /// only reported once a publish is actually needed.
    pub async fn execute_at<T: Transport + ?Sized>(
        &self,
        cache: &StatusCache,
        connection: Option<&T>,
        capability: Capability,
        on: bool,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let entry = cache.fresh_entry_at(now, ReadContext::default())?;

        let payload = match decide(&entry.status, capability, on)? {
            CommandDecision::AlreadySatisfied => {
                debug!("{} already on, not sending", capability);
                return Ok(());
            }
            CommandDecision::Send(payload) => payload,
        };

        let connection = connection.ok_or(SeakeeperError::NotConnected)?;
        self.send_request(connection, payload, cancel).await
    }

    /// Publish a command payload and wait for the transport acknowledgment.
    ///
    /// Fails with [`SeakeeperError::SendTimeout`] when the bound elapses and
    /// [`SeakeeperError::Cancelled`] when `cancel` fires first. An errored
    /// acknowledgment is returned as-is.
    pub async fn send_request<T: Transport + ?Sized>(
        &self,
        connection: &T,
        payload: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let text = String::from_utf8_lossy(&payload).into_owned();
        info!("Sending request {} to {}", text, self.command_topic);

        let publish = connection.publish(&self.command_topic, payload);
        tokio::select! {
            result = tokio::time::timeout(self.publish_timeout, publish) => match result {
                Ok(ack) => ack.map_err(SeakeeperError::from),
                Err(_) => Err(SeakeeperError::SendTimeout { payload: text }),
            },
            _ = cancel.cancelled() => Err(SeakeeperError::Cancelled { payload: text }),
        }
    }
}
