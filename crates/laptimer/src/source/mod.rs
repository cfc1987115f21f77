//! Signal sources.
//!
//! A signal source is anything that produces raw detection lines: a serial
//! device, a simulated RFID reader, a replay file, or a scripted test double.
//! Sources never block for long. A poll that finds nothing returns `Ok(None)`
//! so the listener can check its stop flag.

pub mod decode;
pub mod replay;
pub mod scripted;
pub mod serial;
pub mod simulated;

use std::time::Duration;

use thiserror::Error;

use crate::config::{ListenerConfig, SourceKind};
use crate::error::{Error, Result};

pub use decode::{DecodeError, LineDecoder, TokenMode};
pub use replay::ReplaySource;
pub use scripted::{ScriptedEvent, ScriptedFeed, ScriptedSource};
pub use serial::SerialSource;
pub use simulated::SimulatedRfidSource;

/// Failures reported by a source while it is being polled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The device is gone; the listener must stop.
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// A single read failed; the next poll may succeed.
    #[error("read failed: {0}")]
    Read(String),
}

/// An open channel that yields raw detection lines.
pub trait SignalSource: Send {
    /// Address of the underlying device (for logging and error reports).
    fn address(&self) -> &str;

    /// Read the next raw line without blocking past the read timeout.
    ///
    /// Returns `Ok(None)` when no complete line is available yet.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Disconnected`] when the device has gone away and
    /// [`SourceError::Read`] for a failure that only affects this read.
    fn poll_event(&mut self) -> std::result::Result<Option<Vec<u8>>, SourceError>;

    /// Release the device. Polling after close reports a disconnect.
    fn close(&mut self);
}

/// Something that knows how to open a [`SignalSource`].
pub trait OpenSource {
    /// Address the source will be opened at.
    fn address(&self) -> String;

    /// Open the source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the device cannot be reached.
    fn open(&self) -> Result<Box<dyn SignalSource>>;
}

impl OpenSource for ListenerConfig {
    fn address(&self) -> String {
        match self.source {
            SourceKind::Serial => self.device.clone(),
            SourceKind::Simulated => "simulated".to_string(),
            SourceKind::Replay => self
                .replay_path
                .as_ref()
                .map_or_else(|| "replay".to_string(), |p| p.display().to_string()),
        }
    }

    fn open(&self) -> Result<Box<dyn SignalSource>> {
        let emit_interval = Duration::from_millis(self.emit_interval_ms);
        match self.source {
            SourceKind::Serial => {
                let source = SerialSource::open(
                    &self.device,
                    self.baud_rate,
                    Duration::from_millis(self.read_timeout_ms),
                )?;
                Ok(Box::new(source))
            }
            SourceKind::Simulated => Ok(Box::new(SimulatedRfidSource::new(
                emit_interval,
                self.simulated_tags.clone(),
            ))),
            SourceKind::Replay => {
                let path = self
                    .replay_path
                    .as_ref()
                    .ok_or_else(|| Error::connection("replay", "no replay_path configured"))?;
                Ok(Box::new(ReplaySource::open(path, emit_interval)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display() {
        assert_eq!(
            SourceError::Disconnected("unplugged".to_string()).to_string(),
            "device disconnected: unplugged"
        );
        assert_eq!(
            SourceError::Read("framing".to_string()).to_string(),
            "read failed: framing"
        );
    }

    #[test]
    fn test_serial_address_is_device() {
        let config = ListenerConfig {
            device: "/dev/ttyACM3".to_string(),
            ..ListenerConfig::default()
        };
        assert_eq!(OpenSource::address(&config), "/dev/ttyACM3");
    }

    #[test]
    fn test_open_missing_serial_device_fails() {
        let config = ListenerConfig {
            source: SourceKind::Serial,
            device: "/dev/laptimer-does-not-exist".to_string(),
            ..ListenerConfig::default()
        };
        let err = config.open().err().expect("open should fail");
        assert!(err.is_connection_error());
        assert!(err.to_string().contains("/dev/laptimer-does-not-exist"));
    }

    #[test]
    fn test_open_simulated() {
        let config = ListenerConfig {
            source: SourceKind::Simulated,
            ..ListenerConfig::default()
        };
        let source = config.open().unwrap();
        assert_eq!(source.address(), "simulated");
    }

    #[test]
    fn test_open_replay_without_path_fails() {
        let config = ListenerConfig {
            source: SourceKind::Replay,
            replay_path: None,
            ..ListenerConfig::default()
        };
        assert!(config.open().err().unwrap().is_connection_error());
    }
}
