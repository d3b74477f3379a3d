// src/io/traits.rs
//
// Capability traits the worker is built against.
// Production implementations live in io::serial and io::mqtt; tests supply
// scripted fakes.

use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// Serial Source
// ============================================================================

/// Errors raised by a serial source
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to enumerate serial ports: {0}")]
    Enumerate(#[source] serialport::Error),
    #[error("port is not open")]
    NotOpen,
}

/// A byte source polled once per worker tick
pub trait SerialSource: Send {
    /// Human-readable port identifier used in log lines
    fn name(&self) -> &str;

    /// Acquire the underlying handle
    fn open(&mut self) -> Result<(), SerialError>;

    /// All bytes currently buffered by the device, without blocking.
    /// Returns an empty vector when nothing is available.
    fn read_available(&mut self) -> Result<Vec<u8>, SerialError>;

    /// Release the handle. Returns true if an open handle was released.
    fn close(&mut self) -> bool;
}

// ============================================================================
// Message Queue
// ============================================================================

/// Errors raised by a message queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("not connected to broker")]
    NotConnected,
    #[error("broker rejected publish to {destination}: {reason}")]
    Rejected { destination: String, reason: String },
}

/// Publish capability of the downstream message queue.
/// Connection management and authentication belong to the implementation.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Submit `payload` to `destination`. `durable` requests persistent,
    /// at-least-once delivery. Failure is reported synchronously.
    async fn publish(
        &self,
        destination: &str,
        payload: Vec<u8>,
        durable: bool,
    ) -> Result<(), QueueError>;
}
