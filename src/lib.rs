//! Wind sensor receiver.
//!
//! Reads the anemometer's `$<speed>,<direction>\r\n` stream from a serial
//! port, reframes it, parses readings and publishes them to an MQTT broker.
//!
//! ```text
//! SerialReader -> SerialFramer -> parser -> Publisher -> MessageQueue
//! ```
//!
//! [`worker::WindWorker`] drives the pipeline; the serial port and the queue
//! are passed in through the [`io::traits`] capability traits.

pub mod io;
pub mod logging;
pub mod parser;
pub mod publisher;
pub mod settings;
pub mod worker;

pub use io::traits::{MessageQueue, QueueError, SerialError, SerialSource};
pub use parser::{ParseError, Reading};
pub use publisher::{ErrorEvent, ErrorKind, PublishError, Publisher};
pub use worker::{PipelineStats, WindWorker, WorkerConfig, WorkerError, WorkerState};
