// src/io/mqtt/mod.rs
//
// MQTT-backed message queue for publishing wind readings to a broker.

mod publisher;

// Re-export public items
pub use publisher::{client_id_for_port, MqttConfig, MqttQueue};
