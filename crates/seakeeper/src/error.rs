//! Error types for the Seakeeper bridge.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::context::ReadContext;
use crate::dispatcher::Capability;
use crate::transport::TransportError;

/// Result type for Seakeeper operations.
pub type Result<T> = std::result::Result<T, SeakeeperError>;

/// Error type for Seakeeper operations.
///
/// Every error is returned to the immediate caller. Nothing is retried
/// internally.
#[derive(Debug, Error)]
pub enum SeakeeperError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Payload is not a structured status record
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Connect/subscribe failure or an acknowledgment carrying an error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Cached status is older than the freshness threshold
    #[error("Last update too old: {} ({}) context {context:?}", fmt_last_update(.last_update), fmt_age(.age))]
    StatusTooOld {
        last_update: Option<DateTime<Utc>>,
        age: Option<Duration>,
        context: ReadContext,
    },

    /// Stale read from a background capture pipeline; skip silently
    #[error("No capture to store")]
    NoCaptureToStore,

    /// Device reports the requested capability as unavailable
    #[error("Trying to turn {0} on and not available")]
    Unavailable(Capability),

    /// Command acknowledgment did not arrive within the bound
    #[error("Timed out sending request {payload}")]
    SendTimeout { payload: String },

    /// Command wait was cancelled by the caller
    #[error("Cancelled sending request {payload}")]
    Cancelled { payload: String },

    /// Session is not connected
    #[error("No active connection")]
    NotConnected,

    /// Generic command with a malformed argument
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl SeakeeperError {
    /// Whether the caller should drop this error silently instead of
    /// surfacing it (stale data seen by a background capture pipeline).
    pub fn is_silent_skip(&self) -> bool {
        matches!(self, Self::NoCaptureToStore)
    }

    /// Whether the error came from a stale or missing status.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StatusTooOld { .. } | Self::NoCaptureToStore)
    }

    /// Whether a command wait ended without an acknowledgment, either by
    /// hitting the bound or by caller cancellation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::SendTimeout { .. } | Self::Cancelled { .. })
    }
}

fn fmt_last_update(last_update: &Option<DateTime<Utc>>) -> String {
    match last_update {
        Some(ts) => ts.to_rfc3339(),
        None => "never".to_string(),
    }
}

fn fmt_age(age: &Option<Duration>) -> String {
    match age {
        Some(age) => format!("{:.1}s ago", age.as_secs_f64()),
        None => "no status received".to_string(),
    }
}
