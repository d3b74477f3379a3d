// src/io/serial/reader.rs
//
// Serial port reader for the wind sensor.
// The line settings are fixed by the device (2400 baud, 8N1); only the port
// name is configurable.

use serde::Serialize;
use serialport::{DataBits, Parity, SerialPort, StopBits};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info};

use crate::io::traits::{SerialError, SerialSource};

// ============================================================================
// Line Settings
// ============================================================================

pub const BAUD_RATE: u32 = 2400;
pub const DATA_BITS: DataBits = DataBits::Eight;
pub const PARITY: Parity = Parity::None;
pub const STOP_BITS: StopBits = StopBits::One;

/// Read timeout. Reads are only issued for bytes already buffered, so this
/// only bounds a driver that under-reports.
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

// ============================================================================
// Serial Reader
// ============================================================================

/// Owns the serial handle for one session
pub struct SerialReader {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialReader {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            port: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }
}

impl SerialSource for SerialReader {
    fn name(&self) -> &str {
        &self.port_name
    }

    fn open(&mut self) -> Result<(), SerialError> {
        let port = serialport::new(&self.port_name, BAUD_RATE)
            .data_bits(DATA_BITS)
            .parity(PARITY)
            .stop_bits(STOP_BITS)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| SerialError::Open {
                port: self.port_name.clone(),
                source,
            })?;

        info!(
            port = %self.port_name,
            "Opened {} at {} baud (8-N-1)",
            self.port_name,
            BAUD_RATE
        );
        self.port = Some(port);
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>, SerialError> {
        let port = self.port.as_mut().ok_or(SerialError::NotOpen)?;

        let available = port.bytes_to_read().map_err(std::io::Error::from)? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; available];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                debug!(port = %self.port_name, bytes = n, "read");
                Ok(buf)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(SerialError::Read(e)),
        }
    }

    fn close(&mut self) -> bool {
        // Dropping the boxed port releases the OS handle
        self.port.take().is_some()
    }
}

// ============================================================================
// Port Enumeration
// ============================================================================

/// List available serial ports
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, SerialError> {
    let ports = serialport::available_ports().map_err(SerialError::Enumerate)?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (port_type, manufacturer, product) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => {
                    ("USB".to_string(), info.manufacturer, info.product)
                }
                serialport::SerialPortType::BluetoothPort => ("Bluetooth".to_string(), None, None),
                serialport::SerialPortType::PciPort => ("PCI".to_string(), None, None),
                serialport::SerialPortType::Unknown => ("Unknown".to_string(), None, None),
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_open_fails() {
        let mut reader = SerialReader::new("/dev/does-not-exist");
        assert!(matches!(reader.read_available(), Err(SerialError::NotOpen)));
    }

    #[test]
    fn test_open_missing_port_fails() {
        let mut reader = SerialReader::new("/dev/wind-receiver-missing-port");
        match reader.open() {
            Err(SerialError::Open { port, .. }) => {
                assert_eq!(port, "/dev/wind-receiver-missing-port")
            }
            other => panic!("expected open error, got {:?}", other.map(|_| ())),
        }
        assert!(!reader.is_open());
    }

    #[test]
    fn test_close_without_open_releases_nothing() {
        let mut reader = SerialReader::new("COM9");
        assert!(!reader.close());
        assert_eq!(reader.name(), "COM9");
    }

    #[test]
    fn test_enumerate_error_message() {
        let err = SerialError::Enumerate(serialport::Error::new(
            serialport::ErrorKind::Unknown,
            "udev unavailable",
        ));
        let message = err.to_string();
        assert!(message.starts_with("failed to enumerate serial ports"));
        assert!(!message.contains("read error"));
    }
}
