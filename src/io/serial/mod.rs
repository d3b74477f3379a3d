// src/io/serial/mod.rs
//
// Serial port driver and stream framing for the wind sensor.
//
// Features:
// - Non-blocking polled reads at fixed 2400 8-N-1 line settings
// - `$...\r\n` frame extraction with bounded-buffer resynchronization

pub mod framer;
pub mod reader;

pub use framer::{Frame, FramerEvent, SerialFramer, RESYNC_THRESHOLD, SENTINEL, TERMINATOR};
pub use reader::{list_serial_ports, SerialPortInfo, SerialReader};
