//! Abstract programmer transport interface.
use std::time::{Duration, Instant};

use crate::constants::timing;
use crate::error::{Error, Result};

pub use self::serial::{DEFAULT_BAUDRATE, SerialTransport};

mod serial;
#[cfg(test)]
pub(crate) mod scripted;

/// Abstraction of the byte channel to the programmer.
/// Usually a serial port, or a USB-serial bridge exposed as one.
pub trait Transport {
    /// Write all of `raw`, failing if the channel does not accept it in time.
    fn write(&mut self, raw: &[u8], timeout: Duration) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns 0 when nothing arrived; that is not an error.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Read exactly `count` bytes or fail with [`Error::TransportTimeout`].
    ///
    /// Zero-byte reads are retried after a short sleep until the deadline
    /// passes. A partial buffer is never returned as success.
    fn read_exact(&mut self, count: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; count];
        let mut filled = 0;
        let start = Instant::now();

        while filled < count {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                break;
            }
            let slice = (timeout - elapsed).min(timing::READ_SLICE);
            let n = self.read(&mut buf[filled..], slice)?;
            if n == 0 {
                std::thread::sleep(timing::POLL_INTERVAL);
            } else {
                filled += n;
            }
        }

        if filled < count {
            return Err(Error::TransportTimeout {
                expected: count,
                received: filled,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(buf)
    }

    /// Discard whatever is still buffered, returning the number of bytes dropped.
    fn drain(&mut self) -> Result<usize> {
        let mut buf = [0u8; 64];
        let mut total = 0;
        for _ in 0..timing::DRAIN_MAX_READS {
            let n = self.read(&mut buf, timing::DRAIN)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total > 0 {
            log::debug!("drained {} stale bytes", total);
        }
        Ok(total)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, raw: &[u8], timeout: Duration) -> Result<()> {
        (**self).write(raw, timeout)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).read(buf, timeout)
    }
}
