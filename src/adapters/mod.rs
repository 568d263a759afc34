//! Transport adapters
//!
//! Byte-level links to the control boards. Each board driver owns exactly one
//! [`Transport`]; the protocols are half-duplex request/response with no
//! correlation IDs, so a link is never shared between callers.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock::{Journal, MockTransport, Responder};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialTransport;

use bytes::Bytes;
use std::io;
use std::time::Duration;

/// Raw byte channel with a per-read timeout.
pub trait Transport: Send {
    /// Writes the whole buffer.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Returns everything received until the line goes quiet or `timeout`
    /// elapses. Receiving nothing is an `io::ErrorKind::TimedOut` error.
    fn read(&mut self, timeout: Duration) -> io::Result<Bytes>;

    /// Drops any unread input.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reads a response and decodes it lossily as text.
pub(crate) fn read_text(transport: &mut dyn Transport, timeout: Duration) -> io::Result<String> {
    let bytes = transport.read(timeout)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Error returned when a read produced no bytes before its deadline.
pub(crate) fn timed_out(timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no response within {:?}", timeout),
    )
}
