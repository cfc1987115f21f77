//! File replay source.
//!
//! Plays back a capture of serial output, one line per `interval`. Once the
//! file is exhausted the source stays open and reports no data.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::{SignalSource, SourceError};
use crate::error::{Error, Result};

/// Replays newline-delimited lines from a file.
#[derive(Debug)]
pub struct ReplaySource {
    address: String,
    path: PathBuf,
    reader: Option<BufReader<File>>,
    interval: Duration,
    next_line: Instant,
    exhausted: bool,
}

impl ReplaySource {
    /// Open a replay file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, interval: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let address = path.display().to_string();
        let file = File::open(&path).map_err(|e| Error::connection(&address, e.to_string()))?;

        info!(path = %address, "Replaying detections");
        Ok(Self {
            address,
            path,
            reader: Some(BufReader::new(file)),
            interval,
            next_line: Instant::now(),
            exhausted: false,
        })
    }

    /// Path of the file being replayed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SignalSource for ReplaySource {
    fn address(&self) -> &str {
        &self.address
    }

    fn poll_event(&mut self) -> std::result::Result<Option<Vec<u8>>, SourceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(SourceError::Disconnected("replay closed".to_string()));
        };
        if self.exhausted || Instant::now() < self.next_line {
            return Ok(None);
        }

        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                debug!(path = %self.address, "Replay finished");
                self.exhausted = true;
                Ok(None)
            }
            Ok(_) => {
                self.next_line = Instant::now() + self.interval;
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                Ok(Some(line))
            }
            Err(e) => Err(SourceError::Read(e.to_string())),
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}
