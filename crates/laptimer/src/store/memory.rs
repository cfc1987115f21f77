//! In-memory record backend.
//!
//! Clones share state, so a test can keep one handle to inspect what was
//! saved or to make saves fail while the store owns the other.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::RecordBackend;
use crate::error::{Error, Result};
use crate::lap_clock::LapRecord;

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<LapRecord>,
    fail_saves: bool,
    save_count: usize,
}

/// A [`RecordBackend`] that keeps the table in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// An empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend pre-loaded with `records`.
    #[must_use]
    pub fn with_records(records: Vec<LapRecord>) -> Self {
        let backend = Self::new();
        backend.state().records = records;
        backend
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following save fail (or succeed again).
    pub fn fail_saves(&self, fail: bool) {
        self.state().fail_saves = fail;
    }

    /// The table as last saved.
    #[must_use]
    pub fn saved(&self) -> Vec<LapRecord> {
        self.state().records.clone()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.state().save_count
    }
}

impl RecordBackend for MemoryBackend {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn load(&mut self) -> Result<Vec<LapRecord>> {
        Ok(self.state().records.clone())
    }

    fn save(&mut self, records: &[LapRecord]) -> Result<()> {
        let mut state = self.state();
        if state.fail_saves {
            return Err(Error::StoreWrite {
                path: PathBuf::from(":memory:"),
                source: io::Error::new(io::ErrorKind::Other, "simulated write failure"),
            });
        }
        state.records = records.to_vec();
        state.save_count += 1;
        Ok(())
    }
}
