// src/io/mqtt/publisher.rs
//
// MQTT message queue - publishes serialized payloads to broker topics.
//
// Delivery mapping:
//   durable = true  -> QoS 1 (at least once) on a persistent session
//   durable = false -> QoS 0 (at most once)
// Publishing while the broker connection is down fails immediately instead of
// queueing in the client, so the caller sees the loss.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::io::traits::{MessageQueue, QueueError};

/// Delay between event loop polls after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long `shutdown` waits for the DISCONNECT to be flushed
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Client ID used when none is configured and no serial port is known
const DEFAULT_CLIENT_ID: &str = "wind-receiver";

// ============================================================================
// Configuration
// ============================================================================

/// MQTT broker configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// MQTT broker hostname
    pub host: String,
    /// MQTT broker port
    pub port: u16,
    /// Username for authentication (optional)
    pub username: Option<String>,
    /// Password for authentication (optional)
    pub password: Option<String>,
    /// Client ID. Must stay the same across restarts for the persistent
    /// session to be resumed.
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,
    /// How long startup waits for the broker to accept the connection
    pub connect_timeout_secs: u64,
    /// Topic readings are published to
    pub readings_topic: String,
    /// Topic error events are published to when enabled
    pub errors_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            readings_topic: "wind/readings".to_string(),
            errors_topic: "wind/errors".to_string(),
        }
    }
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn options(&self) -> MqttOptions {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let mut options = MqttOptions::new(client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(5)));
        // Persistent session so QoS 1 messages survive a reconnect
        options.set_clean_session(false);

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        options
    }
}

/// Stable client ID derived from the serial port name, e.g.
/// `/dev/ttyUSB0` -> `wind-receiver-dev-ttyUSB0`
pub fn client_id_for_port(port: &str) -> String {
    let suffix: String = port
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let suffix = suffix.trim_matches('-');

    if suffix.is_empty() {
        DEFAULT_CLIENT_ID.to_string()
    } else {
        format!("{}-{}", DEFAULT_CLIENT_ID, suffix)
    }
}

// ============================================================================
// MQTT Queue
// ============================================================================

/// Message queue backed by an MQTT broker.
///
/// The rumqttc event loop runs on its own task and tracks connection state;
/// `publish` only hands the message to the client.
pub struct MqttQueue {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    task_handle: Option<JoinHandle<()>>,
}

impl MqttQueue {
    /// Create the client and start driving its event loop.
    /// The broker connection is established in the background; use
    /// `wait_connected` to block until it is up.
    pub fn connect(config: &MqttConfig) -> Self {
        let (client, eventloop) = AsyncClient::new(config.options(), 100);
        let (connected_tx, connected) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            "Connecting to MQTT broker {}:{}",
            config.host, config.port
        );

        let handle = tokio::spawn(drive_event_loop(eventloop, connected_tx, shutdown_rx));

        Self {
            client,
            connected,
            shutdown_tx,
            task_handle: Some(handle),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the broker has accepted the connection.
    /// Returns false if `timeout` elapses first.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        let up = matches!(
            tokio::time::timeout(timeout, connected.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        up
    }

    /// Disconnect cleanly and stop the event loop task
    pub async fn shutdown(mut self) {
        let Some(mut handle) = self.task_handle.take() else {
            return;
        };

        // The event loop exits once the DISCONNECT has been written
        if self.is_connected() && self.client.disconnect().await.is_ok() {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut handle)
                .await
                .is_ok()
            {
                return;
            }
            debug!("MQTT disconnect did not flush in time");
        }

        let _ = self.shutdown_tx.send(true);
        if tokio::time::timeout(DISCONNECT_TIMEOUT, handle).await.is_err() {
            debug!("MQTT event loop did not stop in time");
        }
    }
}

#[async_trait]
impl MessageQueue for MqttQueue {
    async fn publish(
        &self,
        destination: &str,
        payload: Vec<u8>,
        durable: bool,
    ) -> Result<(), QueueError> {
        if !self.is_connected() {
            return Err(QueueError::NotConnected);
        }

        let qos = if durable {
            QoS::AtLeastOnce
        } else {
            QoS::AtMostOnce
        };

        self.client
            .publish(destination, qos, false, payload)
            .await
            .map_err(|e| QueueError::Rejected {
                destination: destination.to_string(),
                reason: e.to_string(),
            })
    }
}

// ============================================================================
// Event Loop Task
// ============================================================================

// `poll` is only ever dropped on shutdown. Dropping it mid-connect restarts
// the TCP and CONNECT handshake on the next call.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    connected: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!("MQTT connected ({:?})", ack.code);
                connected.send_replace(true);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT broker sent disconnect");
                connected.send_replace(false);
            }
            Ok(Event::Incoming(Packet::PubAck(ack))) => {
                debug!(pkid = ack.pkid, "MQTT publish acknowledged");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(ConnectionError::RequestsDone) => {
                // Client dropped
                break;
            }
            Err(e) => {
                if connected.send_replace(false) {
                    warn!("MQTT connection lost: {}", e);
                } else {
                    warn!("MQTT connection error: {}", e);
                }
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
    }

    connected.send_replace(false);
    debug!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_at;
    use crate::publisher::{ErrorEvent, ErrorKind, Publisher};
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    // ------------------------------------------------------------------------
    // Fake broker
    // ------------------------------------------------------------------------

    /// Read one MQTT control packet as (fixed header byte, body)
    async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let header = stream.read_u8().await.ok()?;
        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            remaining |= ((byte & 0x7f) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0u8; remaining];
        stream.read_exact(&mut body).await.ok()?;
        Some((header, body))
    }

    /// Single-connection broker. Answers CONNECT after `connack_delay`, acks
    /// QoS 1 publishes and pings, and forwards (header byte, topic) of every
    /// PUBLISH it receives.
    async fn spawn_broker(
        connack_delay: Duration,
    ) -> (u16, mpsc::UnboundedReceiver<(u8, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            while let Some((header, body)) = read_packet(&mut stream).await {
                let reply: Vec<u8> = match header >> 4 {
                    // CONNECT
                    1 => {
                        tokio::time::sleep(connack_delay).await;
                        vec![0x20, 0x02, 0x00, 0x00]
                    }
                    // PUBLISH
                    3 => {
                        let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                        let topic = String::from_utf8_lossy(&body[2..2 + topic_len]).into_owned();
                        let _ = tx.send((header, topic));
                        if header & 0x06 == 0x02 {
                            vec![0x40, 0x02, body[2 + topic_len], body[3 + topic_len]]
                        } else {
                            Vec::new()
                        }
                    }
                    // PINGREQ
                    12 => vec![0xD0, 0x00],
                    // DISCONNECT
                    14 => break,
                    _ => Vec::new(),
                };
                if !reply.is_empty() && stream.write_all(&reply).await.is_err() {
                    break;
                }
            }
        });

        (port, rx)
    }

    fn local_config(port: u16) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            client_id: Some("wind-receiver-test".to_string()),
            ..MqttConfig::default()
        }
    }

    async fn next_publish(published: &mut mpsc::UnboundedReceiver<(u8, String)>) -> (u8, String) {
        tokio::time::timeout(Duration::from_secs(5), published.recv())
            .await
            .expect("publish reached the broker")
            .expect("broker still running")
    }

    // ------------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_default_config() {
        let config = MqttConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.readings_topic, "wind/readings");
        assert_eq!(config.errors_topic, "wind/errors");
    }

    #[test]
    fn test_options_use_persistent_session() {
        let config = MqttConfig {
            client_id: Some("anemometer-1".to_string()),
            ..MqttConfig::default()
        };
        let options = config.options();
        assert_eq!(options.client_id(), "anemometer-1");
        assert!(!options.clean_session());
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn test_default_client_id_is_stable() {
        let first = MqttConfig::default().options();
        let second = MqttConfig::default().options();
        assert_eq!(first.client_id(), "wind-receiver");
        assert_eq!(first.client_id(), second.client_id());
    }

    #[test]
    fn test_client_id_for_port() {
        assert_eq!(client_id_for_port("/dev/ttyUSB0"), "wind-receiver-dev-ttyUSB0");
        assert_eq!(client_id_for_port("COM9"), "wind-receiver-COM9");
        assert_eq!(client_id_for_port("//"), "wind-receiver");
    }

    #[tokio::test]
    async fn test_publish_fails_fast_when_disconnected() {
        let config = MqttConfig {
            // Nothing listens here; the event loop keeps failing to connect
            host: "127.0.0.1".to_string(),
            port: 1,
            ..MqttConfig::default()
        };
        let queue = MqttQueue::connect(&config);

        let result = queue.publish("wind/readings", b"{}".to_vec(), true).await;
        assert!(matches!(result, Err(QueueError::NotConnected)));
        assert!(!queue.wait_connected(Duration::from_millis(200)).await);

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_connects_when_connack_is_slow() {
        let (port, mut published) = spawn_broker(Duration::from_millis(400)).await;
        let queue = MqttQueue::connect(&local_config(port));

        assert!(queue.wait_connected(Duration::from_secs(5)).await);
        assert!(queue.is_connected());
        queue
            .publish("wind/readings", b"{}".to_vec(), true)
            .await
            .unwrap();
        assert_eq!(next_publish(&mut published).await.1, "wind/readings");

        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_readings_use_qos1_and_error_events_qos0() {
        let (port, mut published) = spawn_broker(Duration::from_millis(10)).await;
        let queue = MqttQueue::connect(&local_config(port));
        assert!(queue.wait_connected(Duration::from_secs(5)).await);

        let publisher = Publisher::new(queue);
        let reading = parse_at("12.3,270", Utc::now()).unwrap();
        publisher.publish(&reading, "wind/readings").await.unwrap();
        publisher
            .publish_error(&ErrorEvent::new(ErrorKind::ParseError, "ab,cd"), "wind/errors")
            .await
            .unwrap();

        // PUBLISH fixed header: 0x32 = QoS 1, 0x30 = QoS 0, no retain
        assert_eq!(
            next_publish(&mut published).await,
            (0x32, "wind/readings".to_string())
        );
        assert_eq!(
            next_publish(&mut published).await,
            (0x30, "wind/errors".to_string())
        );

        publisher.into_queue().shutdown().await;
    }
}
