//! Serial-port signal source.
//!
//! Reads newline-delimited text from a serial device. The port is opened with
//! a read timeout no longer than the listener's poll interval, and reads are
//! only attempted when bytes are waiting, so a poll never stalls the listener.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, trace};

use super::{SignalSource, SourceError};
use crate::error::{Error, Result};

/// Longest line kept while waiting for a newline.
const MAX_LINE_LEN: usize = 4096;

/// Most bytes pulled from the port in one read.
const READ_CHUNK: usize = 1024;

/// A serial device producing one detection per line.
pub struct SerialSource {
    address: String,
    port: Option<Box<dyn SerialPort>>,
    lines: LineBuffer,
}

impl std::fmt::Debug for SerialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSource")
            .field("address", &self.address)
            .field("open", &self.port.is_some())
            .field("lines", &self.lines)
            .finish()
    }
}

impl SerialSource {
    /// Open the device at `address`.
    ///
    /// On Unix the port is opened for exclusive access, so a second listener
    /// on the same device fails here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] carrying the address if the port cannot be
    /// opened.
    pub fn open(address: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        debug!(address, baud_rate, "Opening serial port");
        let port = serialport::new(address, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(|e| Error::connection(address, e.to_string()))?;

        info!(address, baud_rate, "Serial port opened");
        Ok(Self {
            address: address.to_string(),
            port: Some(port),
            lines: LineBuffer::default(),
        })
    }
}

impl SignalSource for SerialSource {
    fn address(&self) -> &str {
        &self.address
    }

    fn poll_event(&mut self) -> std::result::Result<Option<Vec<u8>>, SourceError> {
        if let Some(line) = self.lines.pop() {
            return Ok(Some(line));
        }

        let Some(port) = self.port.as_mut() else {
            return Err(SourceError::Disconnected("port closed".to_string()));
        };

        let waiting = port.bytes_to_read().map_err(classify_serial_error)?;
        if waiting == 0 {
            return Ok(None);
        }

        let want = usize::try_from(waiting).unwrap_or(READ_CHUNK).min(READ_CHUNK);
        let mut buf = vec![0u8; want];
        match port.read(&mut buf) {
            Ok(0) => Err(SourceError::Disconnected("end of stream".to_string())),
            Ok(n) => {
                trace!(bytes = n, "Read from serial port");
                self.lines.extend(&buf[..n]);
                Ok(self.lines.pop())
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(classify_io_error(&e)),
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(address = %self.address, "Serial port closed");
        }
    }
}

fn classify_serial_error(err: serialport::Error) -> SourceError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => SourceError::Disconnected(err.to_string()),
        serialport::ErrorKind::Io(kind) if is_disconnect_kind(kind) => {
            SourceError::Disconnected(err.to_string())
        }
        _ => SourceError::Read(err.to_string()),
    }
}

fn classify_io_error(err: &io::Error) -> SourceError {
    // EIO, ENXIO and ENODEV are what Linux reports for an unplugged adapter.
    let unplugged = matches!(err.raw_os_error(), Some(5 | 6 | 19));
    if unplugged || is_disconnect_kind(err.kind()) {
        SourceError::Disconnected(err.to_string())
    } else {
        SourceError::Read(err.to_string())
    }
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotFound
    )
}

/// Reassembles lines from arbitrarily split reads.
///
/// A line longer than [`MAX_LINE_LEN`] is dropped whole, up to and including
/// its newline.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    partial: Vec<u8>,
    complete: VecDeque<Vec<u8>>,
    discarding: bool,
}

impl LineBuffer {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.discarding {
                if byte == b'\n' {
                    self.discarding = false;
                }
            } else if byte == b'\n' {
                self.complete.push_back(std::mem::take(&mut self.partial));
            } else if self.partial.len() < MAX_LINE_LEN {
                self.partial.push(byte);
            } else {
                debug!(len = self.partial.len(), "Discarding overlong line");
                self.partial.clear();
                self.discarding = true;
            }
        }
    }

    pub(crate) fn pop(&mut self) -> Option<Vec<u8>> {
        self.complete.pop_front()
    }
}
