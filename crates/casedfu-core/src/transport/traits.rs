//! Serial transport abstraction.
//!
//! Defines the `LineTransport` trait the DFU session talks through,
//! allowing different implementations (serial port, mock, etc.).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open port: {0}")]
    OpenFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bidirectional, line-oriented byte channel to the device.
///
/// The session owns its transport for the whole run and drops it on exit, so
/// implementations release the underlying port in `Drop`.
pub trait LineTransport {
    /// Write every byte of `data`.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one complete line, without its terminator.
    ///
    /// `Ok(None)` means nothing complete arrived in time; that is the normal
    /// idle case, not an error.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError>;
}

impl<T: LineTransport + ?Sized> LineTransport for Box<T> {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write_all(data)
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        (**self).read_line(timeout)
    }
}
