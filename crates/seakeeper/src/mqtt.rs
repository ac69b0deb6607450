//! MQTT transport using rumqttc.
//!
//! One background task polls the rumqttc event loop. It routes inbound
//! publishes to the registered handlers and resolves pending
//! acknowledgments:
//!
//! - connect resolves on the first `ConnAck`
//! - subscribe resolves on the matching `SubAck`
//! - publish (QoS 0) resolves when rumqttc reports the outgoing publish,
//!   which happens once its state has taken the request and before the
//!   socket is flushed
//!
//! Each request is handed to rumqttc with a non-blocking `try_*` call while
//! the acknowledgment lock is held, and its sender is queued only when that
//! call succeeds. The acknowledgment queues therefore always line up with
//! the requests rumqttc holds, even when a caller gives up waiting. A full
//! request channel is reported as an error instead of blocking. After the
//! first successful connect, rumqttc reconnects on its own; transient errors
//! are logged and pending acknowledgments keep waiting (callers bound the
//! wait). A graceful disconnect fails everything still pending.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SeakeeperConfig;
use crate::transport::{
    MessageHandler, Transport, TransportError, TransportResult, topic_matches,
};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 10;

type AckSender = oneshot::Sender<TransportResult<()>>;

/// Acknowledgments waiting for an event from the broker connection.
#[derive(Default)]
struct PendingAcks {
    publishes: VecDeque<AckSender>,
    subscriptions: VecDeque<(String, AckSender)>,
}

impl PendingAcks {
    fn ack_publish(&mut self) {
        if let Some(tx) = self.publishes.pop_front() {
            // receiver is gone if the caller timed out
            let _ = tx.send(Ok(()));
        }
    }

    fn ack_subscription(&mut self, return_codes: &[SubscribeReasonCode]) {
        let Some((topic, tx)) = self.subscriptions.pop_front() else {
            warn!("Received SubAck with no pending subscription");
            return;
        };

        let result = if return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(TransportError::Subscribe {
                topic,
                reason: "rejected by broker".to_string(),
            })
        } else {
            Ok(())
        };
        let _ = tx.send(result);
    }

    fn fail_all(&mut self, error: &TransportError) {
        for tx in self.publishes.drain(..) {
            let _ = tx.send(Err(error.clone()));
        }
        for (_, tx) in self.subscriptions.drain(..) {
            let _ = tx.send(Err(error.clone()));
        }
    }
}

/// A handler bound to a topic filter.
struct Subscription {
    filter: String,
    handler: MessageHandler,
}

type Subscriptions = Arc<RwLock<Vec<Subscription>>>;

/// Live broker connection.
struct Connection {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// MQTT transport using rumqttc.
pub struct MqttTransport {
    config: SeakeeperConfig,
    connection: tokio::sync::Mutex<Option<Connection>>,
    pending: Arc<Mutex<PendingAcks>>,
    subscriptions: Subscriptions,
}

impl MqttTransport {
    pub fn new(config: SeakeeperConfig) -> Self {
        Self {
            config,
            connection: tokio::sync::Mutex::new(None),
            pending: Arc::new(Mutex::new(PendingAcks::default())),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Build rumqttc options from the configuration.
    fn mqtt_options(&self) -> MqttOptions {
        let client_id = self
            .config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("seakeeper-{}", Uuid::new_v4()));

        let mut options = if self.config.websocket {
            let mut options =
                MqttOptions::new(client_id, self.config.broker_addr(), self.config.port);
            options.set_transport(rumqttc::Transport::Ws);
            options
        } else {
            MqttOptions::new(client_id, &self.config.host, self.config.port)
        };
        options.set_keep_alive(self.config.keep_alive());
        options
    }

    fn remove_subscription(&self, topic: &str) {
        self.subscriptions.write().retain(|s| s.filter != topic);
    }

    fn timeout_ms(timeout: Duration) -> u64 {
        u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> TransportResult<()> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Ok(());
        }

        let broker = self.config.broker_addr();
        info!("Connecting to MQTT broker {}", broker);

        let (client, eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_loop(
            eventloop,
            connack_tx,
            self.pending.clone(),
            self.subscriptions.clone(),
            broker.clone(),
        ));

        let timeout = self.config.connect_timeout();
        let result = match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Connection(format!(
                "event loop for {} stopped before connecting",
                broker
            ))),
            Err(_) => Err(TransportError::Timeout(Self::timeout_ms(timeout))),
        };

        match result {
            Ok(()) => {
                *connection = Some(Connection { client, task });
                Ok(())
            }
            Err(e) => {
                task.abort();
                error!("Failed to connect to MQTT broker {}: {}", broker, e);
                Err(e)
            }
        }
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> TransportResult<()> {
        let ack = {
            let connection = self.connection.lock().await;
            let connection = connection.as_ref().ok_or(TransportError::NotConnected)?;

            // Register before subscribing so no message is missed
            self.subscriptions.write().push(Subscription {
                filter: topic.to_string(),
                handler,
            });

            let mut pending = self.pending.lock();
            if let Err(e) = connection.client.try_subscribe(topic, QoS::AtMostOnce) {
                drop(pending);
                self.remove_subscription(topic);
                return Err(TransportError::Subscribe {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
            }
            let (tx, rx) = oneshot::channel();
            pending.subscriptions.push_back((topic.to_string(), tx));
            rx
        };

        let timeout = self.config.connect_timeout();
        let result = match tokio::time::timeout(timeout, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Disconnected(
                "subscription acknowledgment dropped".to_string(),
            )),
            Err(_) => Err(TransportError::Timeout(Self::timeout_ms(timeout))),
        };

        match &result {
            Ok(()) => info!("Subscribed to {}", topic),
            Err(e) => {
                warn!("Failed to subscribe to {}: {}", topic, e);
                self.remove_subscription(topic);
            }
        }
        result
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()> {
        let ack = {
            let connection = self.connection.lock().await;
            let connection = connection.as_ref().ok_or(TransportError::NotConnected)?;
            enqueue_publish(&connection.client, &self.pending, topic, payload)?
        };

        ack.await.unwrap_or_else(|_| {
            Err(TransportError::Disconnected(
                "publish acknowledgment dropped".to_string(),
            ))
        })
    }

    async fn disconnect(&self, grace: Duration) {
        let Some(connection) = self.connection.lock().await.take() else {
            return;
        };

        if let Err(e) = connection.client.try_disconnect() {
            warn!("MQTT disconnect request failed: {}", e);
        }

        let mut task = connection.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            debug!("MQTT event loop did not stop within {:?}, aborting", grace);
            task.abort();
        }

        self.pending
            .lock()
            .fail_all(&TransportError::Disconnected("disconnected".to_string()));
        self.subscriptions.write().clear();
        info!("Disconnected from MQTT broker {}", self.config.broker_addr());
    }
}

/// Hand a publish to rumqttc and queue its acknowledgment.
///
/// No await point separates the request from its queued sender, so a
/// cancelled caller can never leave one without the other.
fn enqueue_publish(
    client: &AsyncClient,
    pending: &Mutex<PendingAcks>,
    topic: &str,
    payload: Vec<u8>,
) -> TransportResult<oneshot::Receiver<TransportResult<()>>> {
    let mut pending = pending.lock();
    client
        .try_publish(topic, QoS::AtMostOnce, false, payload)
        .map_err(|e| TransportError::Publish {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
    let (tx, rx) = oneshot::channel();
    pending.publishes.push_back(tx);
    Ok(rx)
}

/// Deliver an inbound message to every handler whose filter matches.
fn dispatch(subscriptions: &Subscriptions, topic: &str, payload: &[u8]) {
    let subscriptions = subscriptions.read();
    let mut delivered = false;
    for subscription in subscriptions.iter() {
        if topic_matches(topic, &subscription.filter) {
            (subscription.handler)(topic, payload);
            delivered = true;
        }
    }
    if !delivered {
        debug!("No handler for message on {}", topic);
    }
}

/// Poll the rumqttc event loop until the connection is closed.
async fn run_event_loop(
    mut eventloop: EventLoop,
    connack_tx: oneshot::Sender<TransportResult<()>>,
    pending: Arc<Mutex<PendingAcks>>,
    subscriptions: Subscriptions,
    broker: String,
) {
    let mut connack_tx = Some(connack_tx);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("MQTT broker {} connection acknowledged", broker);
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                } else {
                    let e = TransportError::Connection(format!(
                        "broker {} refused connection: {:?}",
                        broker, ack.code
                    ));
                    if let Some(tx) = connack_tx.take() {
                        let _ = tx.send(Err(e));
                        return;
                    }
                    error!("{}", e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received MQTT message on {} ({} bytes)",
                    publish.topic,
                    publish.payload.len()
                );
                dispatch(&subscriptions, &publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                pending.lock().ack_subscription(&ack.return_codes);
            }
            Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                pending.lock().ack_publish();
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent to {}", broker);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Err(TransportError::Connection(e.to_string())));
                    return;
                }
                if matches!(e, ConnectionError::RequestsDone) {
                    break;
                }
                error!("MQTT broker {} error: {}", broker, e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    pending
        .lock()
        .fail_all(&TransportError::Disconnected(format!("{} closed", broker)));
    info!("MQTT broker {} connection closed", broker);
}
