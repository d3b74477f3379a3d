// src/publisher.rs
//
// Serializes readings (and optional error events) and submits them to the
// message queue capability.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::io::traits::{MessageQueue, QueueError};
use crate::parser::Reading;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Category of a pipeline failure reported on the errors topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ReadError,
    CorruptedPacket,
    ParseError,
    PublishError,
}

/// Failure report published when error publishing is enabled
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    #[serde(rename = "Kind")]
    pub kind: ErrorKind,
    #[serde(rename = "Detail")]
    pub detail: String,
    #[serde(rename = "Datestamp")]
    pub timestamp: DateTime<Utc>,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Hands serialized messages to a queue
pub struct Publisher<Q> {
    queue: Q,
}

impl<Q: MessageQueue> Publisher<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn into_queue(self) -> Q {
        self.queue
    }

    /// Publish a reading with durable delivery. No retry on failure.
    pub async fn publish(&self, reading: &Reading, destination: &str) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(reading)?;
        self.queue.publish(destination, payload, true).await?;
        Ok(())
    }

    /// Publish an error event. Best effort, so delivery is not durable.
    pub async fn publish_error(
        &self,
        event: &ErrorEvent,
        destination: &str,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.queue.publish(destination, payload, false).await?;
        Ok(())
    }
}
