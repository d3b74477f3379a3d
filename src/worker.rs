// src/worker.rs
//
// Wind sensor worker - the polling loop that drives the pipeline:
//     SerialReader -> SerialFramer -> parser -> Publisher
//
// One task owns the framer for the whole session. Each tick reads whatever the
// port has buffered, frames it, and publishes readings in stream order before
// sleeping until the next tick.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::io::serial::{Frame, FramerEvent, SerialFramer};
use crate::io::traits::{MessageQueue, SerialError, SerialSource};
use crate::parser;
use crate::publisher::{ErrorEvent, ErrorKind, Publisher};

// ============================================================================
// Types and Configuration
// ============================================================================

/// Allowed poll interval range in milliseconds
pub const MIN_POLL_INTERVAL_MS: u64 = 20;
pub const MAX_POLL_INTERVAL_MS: u64 = 1000;

/// Worker configuration
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Destination for readings
    pub readings_topic: String,
    /// Destination for error events
    pub errors_topic: String,
    /// Also publish read/corruption/parse/publish failures to `errors_topic`
    pub publish_errors: bool,
    /// Delay between polls of the serial port
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            readings_topic: "wind/readings".to_string(),
            errors_topic: "wind/errors".to_string(),
            publish_errors: false,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Worker lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Closed,
    Open,
    Running,
    Closing,
}

/// Counters for one worker session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub bytes_read: u64,
    pub frames: u64,
    pub readings_published: u64,
    pub corrupted_packets: u64,
    pub parse_errors: u64,
    pub read_errors: u64,
    pub publish_errors: u64,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("port opening error: {0}")]
    PortOpen(#[source] SerialError),
}

// ============================================================================
// Worker
// ============================================================================

pub struct WindWorker<S, Q> {
    serial: S,
    framer: SerialFramer,
    publisher: Publisher<Q>,
    config: WorkerConfig,
    state: WorkerState,
    stats: PipelineStats,
    cancel_flag: Arc<AtomicBool>,
}

impl<S: SerialSource, Q: MessageQueue> WindWorker<S, Q> {
    pub fn new(serial: S, queue: Q, config: WorkerConfig) -> Self {
        Self {
            serial,
            framer: SerialFramer::new(),
            publisher: Publisher::new(queue),
            config,
            state: WorkerState::Closed,
            stats: PipelineStats::default(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned cancellation flag
    pub fn with_cancel_flag(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = cancel_flag;
        self
    }

    /// Flag that stops the loop at the next tick when set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel_flag.clone()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn queue(&self) -> &Q {
        self.publisher.queue()
    }

    /// Release the worker, returning the queue for shutdown
    pub fn into_queue(self) -> Q {
        self.publisher.into_queue()
    }

    /// Run until cancelled. The port is closed on every exit path.
    /// Only a failure to open the port ends the run with an error.
    pub async fn run(&mut self) -> Result<PipelineStats, WorkerError> {
        let result = self.run_session().await;

        self.state = WorkerState::Closing;
        if self.serial.close() {
            info!("{} is closed", self.serial.name());
        }
        self.framer.clear();
        self.state = WorkerState::Closed;

        info!(
            bytes = self.stats.bytes_read,
            frames = self.stats.frames,
            published = self.stats.readings_published,
            corrupted = self.stats.corrupted_packets,
            parse_errors = self.stats.parse_errors,
            read_errors = self.stats.read_errors,
            publish_errors = self.stats.publish_errors,
            "Session ended"
        );

        result.map(|()| self.stats.clone())
    }

    async fn run_session(&mut self) -> Result<(), WorkerError> {
        if let Err(e) = self.serial.open() {
            warn!("Port opening error: {}", e);
            return Err(WorkerError::PortOpen(e));
        }
        self.state = WorkerState::Open;
        info!("{} is open", self.serial.name());

        self.state = WorkerState::Running;
        while !self.cancel_flag.load(Ordering::Relaxed) {
            self.tick().await;

            if self.cancel_flag.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        Ok(())
    }

    /// One poll of the serial port. Read failures are logged and skipped.
    pub async fn tick(&mut self) {
        match self.serial.read_available() {
            Ok(data) if data.is_empty() => {}
            Ok(data) => {
                self.stats.bytes_read += data.len() as u64;
                self.ingest(&data).await;
            }
            Err(e) => {
                self.stats.read_errors += 1;
                warn!("Data reading error: {}", e);
                self.report(ErrorKind::ReadError, e.to_string()).await;
            }
        }
    }

    /// Frame `data` and handle every resulting event in stream order
    pub async fn ingest(&mut self, data: &[u8]) {
        for event in self.framer.ingest(data) {
            match event {
                FramerEvent::Frame(frame) => self.handle_frame(frame).await,
                FramerEvent::Corrupted { discarded } => {
                    self.stats.corrupted_packets += 1;
                    let text = String::from_utf8_lossy(&discarded).into_owned();
                    warn!("Incorrect package: {:?}", text);
                    self.report(ErrorKind::CorruptedPacket, text).await;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        self.stats.frames += 1;
        let payload = frame.payload();
        info!("Received frame: {:?}", payload);

        let reading = match parser::parse(&payload) {
            Ok(reading) => reading,
            Err(e) => {
                self.stats.parse_errors += 1;
                warn!("Parsing error: {}", e);
                self.report(ErrorKind::ParseError, payload).await;
                return;
            }
        };

        match self
            .publisher
            .publish(&reading, &self.config.readings_topic)
            .await
        {
            Ok(()) => {
                self.stats.readings_published += 1;
                info!(
                    "ws = {}, wd = {}",
                    reading.wind_speed, reading.wind_direction
                );
            }
            Err(e) => {
                self.stats.publish_errors += 1;
                warn!("Publish error, reading dropped: {}", e);
                self.report(ErrorKind::PublishError, e.to_string()).await;
            }
        }
    }

    /// Publish an error event if enabled. Failures here are only logged.
    async fn report(&self, kind: ErrorKind, detail: String) {
        if !self.config.publish_errors {
            return;
        }
        let event = ErrorEvent::new(kind, detail);
        if let Err(e) = self
            .publisher
            .publish_error(&event, &self.config.errors_topic)
            .await
        {
            warn!("Failed to publish {:?} event: {}", kind, e);
        }
    }
}
