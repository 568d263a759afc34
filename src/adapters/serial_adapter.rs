use super::{timed_out, Transport};
use bytes::Bytes;
use log::debug;
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Port-level read timeout. A gap this long after data has arrived ends a read.
const QUIET_GAP: Duration = Duration::from_millis(100);

/// Serial transport for RS-232 communication
///
/// This adapter wraps the serialport crate with blocking I/O. A read collects
/// bytes until the line has been quiet for [`QUIET_GAP`] or the caller's
/// timeout elapses, whichever comes first.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Opens a serial port
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn open(port_name: &str, baud_rate: u32) -> io::Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(QUIET_GAP)
            .open()?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);
        Ok(Self {
            port_name: port_name.to_string(),
            port,
        })
    }

    /// Port this transport is bound to.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        debug!(
            "[{}] Sent {:?}",
            self.port_name,
            String::from_utf8_lossy(bytes).trim_end()
        );
        Ok(())
    }

    fn read(&mut self, timeout: Duration) -> io::Result<Bytes> {
        let start = Instant::now();
        let mut response = Vec::new();
        let mut buffer = [0u8; 1024];

        loop {
            match self.port.read(&mut buffer) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("{} closed", self.port_name),
                    ))
                }
                Ok(n) => response.extend_from_slice(&buffer[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if !response.is_empty() {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }

            if start.elapsed() >= timeout {
                break;
            }
        }

        if response.is_empty() {
            return Err(timed_out(timeout));
        }
        debug!(
            "[{}] Received {:?}",
            self.port_name,
            String::from_utf8_lossy(&response).trim_end()
        );
        Ok(Bytes::from(response))
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
