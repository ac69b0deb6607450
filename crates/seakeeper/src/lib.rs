//! Seakeeper Telemetry and Command Bridge
//!
//! This crate connects to the MQTT broker of a Seakeeper gyro stabilizer,
//! keeps the most recent status message, and issues power and stabilize
//! commands.
//!
//! ## Architecture
//!
//! - **codec**: status payload → typed [`Status`] + raw key/value map
//! - **cache**: single-entry [`StatusCache`] with the 60 second freshness gate
//! - **dispatcher**: idempotent command decisions and bounded publish
//! - **session**: [`Seakeeper`], the caller-facing lifecycle and operations
//! - **transport**: the [`Transport`] trait; [`MqttTransport`] implements it
//!
//! Commands are requests. A successful command only means the broker
//! connection acknowledged it; the next status message shows whether the
//! device acted on it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use seakeeper::{ReadContext, Seakeeper, SeakeeperConfig};
//!
//! let session = Seakeeper::new("seakeeper", SeakeeperConfig::new("10.1.10.42"))?;
//! session.start().await?;
//! let readings = session.readings(ReadContext::default())?;
//! session.set_power(true).await?;
//! session.close().await?;
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod mqtt;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use cache::{CacheEntry, StatusCache, check_freshness};
pub use codec::{Status, decode_status, encode_command};
pub use config::SeakeeperConfig;
pub use context::{FROM_DATA_CAPTURE_KEY, ReadContext};
pub use dispatcher::{Capability, CommandDecision, CommandDispatcher, decide};
pub use error::{Result, SeakeeperError};
pub use mqtt::MqttTransport;
pub use session::{DEFAULT_NAME, Seakeeper, SessionState};
pub use transport::{MessageHandler, Transport, TransportError, TransportResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
