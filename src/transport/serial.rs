//! Serial Transportation.
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::Transport;
use crate::error::{Error, Result};

/// The K150 firmware talks 19200 8N1.
pub const DEFAULT_BAUDRATE: u32 = 19200;

const SERIAL_TIMEOUT_MS: u64 = 1000;

pub struct SerialTransport {
    serial_port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port: &str) -> Result<Self> {
        Self::open_with_baudrate(port, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port: &str, baudrate: u32) -> Result<Self> {
        log::info!("Opening serial port: \"{}\" @ {} baud", port, baudrate);
        let port = serialport::new(port, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;
        Ok(SerialTransport { serial_port: port })
    }

    pub fn set_baudrate(&mut self, baudrate: impl Into<u32>) -> Result<()> {
        self.serial_port.set_baud_rate(baudrate.into())?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, raw: &[u8], timeout: Duration) -> Result<()> {
        self.serial_port.set_timeout(timeout)?;
        match self.serial_port.write_all(raw) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::TimedOut => {
                return Err(Error::TransportTimeout {
                    expected: raw.len(),
                    received: 0,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(e) => return Err(e.into()),
        }
        self.serial_port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.serial_port.set_timeout(timeout)?;
        match self.serial_port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}
