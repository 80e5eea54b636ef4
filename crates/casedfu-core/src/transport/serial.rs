//! serialport-based transport implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, instrument, trace, warn};

use super::traits::{LineTransport, TransportError};
use crate::protocol::DEFAULT_POLL_TIMEOUT_MS;

/// Longest unterminated run kept while waiting for a line end.
pub const MAX_PENDING_LEN: usize = 4096;

/// Assembles lines out of arbitrarily split serial reads.
///
/// Either CR or LF ends a line; the empty line between a CR and its LF is
/// skipped. Unterminated input past `MAX_PENDING_LEN` bytes is dropped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_PENDING_LEN
            && !self.pending.iter().any(|&b| b == b'\n' || b == b'\r')
        {
            warn!(discarded = self.pending.len(), "No line end from device, dropping input");
            self.pending.clear();
        }
    }

    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let end = self.pending.iter().position(|&b| b == b'\n' || b == b'\r')?;
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = &raw[..raw.len() - 1];
            if !line.is_empty() {
                return Some(String::from_utf8_lossy(line).into_owned());
            }
        }
    }

    /// Bytes received after the last line terminator.
    pub fn partial_len(&self) -> usize {
        self.pending.len()
    }
}

/// Serial port transport, 8N1, no flow control.
///
/// The port is closed when the transport is dropped.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
    name: String,
}

impl SerialTransport {
    #[instrument(level = "info")]
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS))
            .open()
            .map_err(|e| TransportError::OpenFailed(format!("{}: {}", path, e)))?;

        info!(port = path, baud_rate, "Serial port opened");

        Ok(Self {
            port,
            lines: LineBuffer::default(),
            name: path.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LineTransport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port
            .write_all(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        trace!(bytes_written = data.len(), "Write complete");
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, TransportError> {
        if let Some(line) = self.lines.next_line() {
            return Ok(Some(line));
        }

        self.port
            .set_timeout(timeout)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        loop {
            match self.port.read(&mut buf) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => {
                    self.lines.push(&buf[..n]);
                    if let Some(line) = self.lines.next_line() {
                        return Ok(Some(line));
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!(
            port = %self.name,
            discarded = self.lines.partial_len(),
            "Closing serial port"
        );
    }
}
