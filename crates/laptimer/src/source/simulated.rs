//! Simulated RFID reader.
//!
//! Emits a tag read every `interval`. With an empty tag pool each read is a
//! fresh random 10-digit code; with a pool, reads are drawn from it so that
//! the same tags come around again and produce laps.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::trace;

use super::{SignalSource, SourceError};

/// A synthetic RFID reader.
#[derive(Debug)]
pub struct SimulatedRfidSource {
    interval: Duration,
    next_read: Instant,
    tags: Vec<String>,
    rng: StdRng,
    closed: bool,
}

impl SimulatedRfidSource {
    /// Create a reader that emits one tag per `interval`.
    #[must_use]
    pub fn new(interval: Duration, tags: Vec<String>) -> Self {
        Self::with_rng(interval, tags, StdRng::from_entropy())
    }

    /// Create a reader with a fixed seed, for reproducible runs.
    #[must_use]
    pub fn seeded(interval: Duration, tags: Vec<String>, seed: u64) -> Self {
        Self::with_rng(interval, tags, StdRng::seed_from_u64(seed))
    }

    fn with_rng(interval: Duration, tags: Vec<String>, rng: StdRng) -> Self {
        Self {
            interval,
            next_read: Instant::now() + interval,
            tags,
            rng,
            closed: false,
        }
    }

    fn next_tag(&mut self) -> String {
        if let Some(tag) = self.tags.choose(&mut self.rng) {
            return tag.clone();
        }
        self.rng
            .gen_range(1_000_000_000_u64..=9_999_999_999)
            .to_string()
    }
}

impl SignalSource for SimulatedRfidSource {
    fn address(&self) -> &str {
        "simulated"
    }

    fn poll_event(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        if self.closed {
            return Err(SourceError::Disconnected("simulator closed".to_string()));
        }

        let now = Instant::now();
        if now < self.next_read {
            return Ok(None);
        }
        self.next_read = now + self.interval;

        let tag = self.next_tag();
        trace!(tag = %tag, "Simulated tag read");
        Ok(Some(tag.into_bytes()))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
