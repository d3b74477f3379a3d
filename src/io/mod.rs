// src/io/mod.rs
//
// Device and broker IO: the serial source the sensor is read from and the
// MQTT queue readings are published to.

pub mod mqtt;
pub mod serial;
pub mod traits;

pub use mqtt::{MqttConfig, MqttQueue};
pub use serial::{SerialFramer, SerialReader};
pub use traits::{MessageQueue, QueueError, SerialError, SerialSource};
