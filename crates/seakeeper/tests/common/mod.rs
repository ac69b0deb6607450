//! Scripted in-memory transport for session tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use seakeeper::transport::topic_matches;
use seakeeper::{
    MessageHandler, Seakeeper, SeakeeperConfig, Transport, TransportError, TransportResult,
};

/// Status payload captured from a Seakeeper 40 with power off.
pub const POWER_OFF_STATUS: &str = r#"{"active_alarm_history":0,"battery_voltage":25.399999618530273,"boat_roll_angle":0.023101806640625,"display":"7.43.0.36","drive_current":0,"drive_temperature":"95.0° F","flywheel_speed":0,"gyro_angle":44.800003051757812,"model":"40","power_available":1,"power_enabled":0,"progress_bar_available":false,"progress_bar_percentage":0,"run_hours":1167,"sea_hours":958,"serial":"234-0033","stabilize_available":false,"stabilize_enabled":0}"#;

pub const STATUS_TOPIC: &str = "seakeeper/status/1";
pub const COMMAND_TOPIC: &str = "seakeeper/request/1";

/// Transport whose behaviour each test scripts up front.
#[derive(Default)]
pub struct ScriptedTransport {
    pub connect_error: Mutex<Option<TransportError>>,
    pub subscribe_error: Mutex<Option<TransportError>>,
    pub ack_error: Mutex<Option<TransportError>>,
    /// Never acknowledge publishes
    pub withhold_acks: AtomicBool,

    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub published: Mutex<Vec<(String, Vec<u8>)>>,
    handlers: Mutex<Vec<(String, MessageHandler)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver an inbound message as the broker would.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<MessageHandler> = self
            .handlers
            .lock()
            .iter()
            .filter(|(filter, _)| topic_matches(topic, filter))
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(topic, payload);
        }
    }

    pub fn published_payloads(&self) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> TransportResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.connect_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> TransportResult<()> {
        if let Some(e) = self.subscribe_error.lock().clone() {
            return Err(e);
        }
        self.handlers.lock().push((topic.to_string(), handler));
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()> {
        self.published.lock().push((topic.to_string(), payload));
        if self.withhold_acks.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        match self.ack_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn disconnect(&self, _grace: Duration) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().clear();
    }
}

/// Unconnected session over a scripted transport.
pub fn scripted_session() -> (Seakeeper<Arc<ScriptedTransport>>, Arc<ScriptedTransport>) {
    scripted_session_with(SeakeeperConfig::new("localhost"))
}

pub fn scripted_session_with(
    config: SeakeeperConfig,
) -> (Seakeeper<Arc<ScriptedTransport>>, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new();
    let session =
        Seakeeper::with_transport("seakeeper", config, transport.clone()).expect("valid config");
    (session, transport)
}

/// Started session that has already received `status`.
pub async fn started_session(
    status: &str,
) -> (Seakeeper<Arc<ScriptedTransport>>, Arc<ScriptedTransport>) {
    let (session, transport) = scripted_session();
    session.start().await.expect("start");
    transport.deliver(STATUS_TOPIC, status.as_bytes());
    (session, transport)
}
