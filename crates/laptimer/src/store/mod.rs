//! Lap record storage.
//!
//! [`LapStore`] keeps the current record of every token in memory and writes
//! the whole table through a [`RecordBackend`] after each change. A failed
//! write leaves the in-memory state intact and marks the store dirty; the next
//! [`LapStore::flush`] or [`LapStore::upsert`] retries it.
//!
//! The store assumes it is the only writer of its backing file.

pub mod csv;
pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

use crate::config::{Config, StorageBackend};
use crate::detection::DetectionToken;
use crate::error::Result;
use crate::lap_clock::LapRecord;

pub use self::csv::CsvBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Durable home for the record table.
pub trait RecordBackend: Send + fmt::Debug {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Read every stored record. A missing backing file is an empty table.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the table exists but cannot be read.
    fn load(&mut self) -> Result<Vec<LapRecord>>;

    /// Replace the stored table with `records`.
    ///
    /// A concurrent reader sees either the old table or the new one.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the write fails.
    fn save(&mut self, records: &[LapRecord]) -> Result<()>;
}

/// In-memory record table backed by a [`RecordBackend`].
#[derive(Debug)]
pub struct LapStore {
    backend: Box<dyn RecordBackend>,
    records: BTreeMap<DetectionToken, LapRecord>,
    dirty: bool,
}

impl LapStore {
    /// Load the table from `backend`.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the backend cannot be read.
    pub fn open(mut backend: Box<dyn RecordBackend>) -> Result<Self> {
        let loaded = backend.load()?;
        let records: BTreeMap<_, _> = loaded
            .into_iter()
            .map(|record| (record.token.clone(), record))
            .collect();

        info!(
            backend = %backend.describe(),
            records = records.len(),
            "Lap store opened"
        );
        Ok(Self {
            backend,
            records,
            dirty: false,
        })
    }

    /// Open the backend selected in `config`.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the backend cannot be opened or read.
    pub fn open_from_config(config: &Config) -> Result<Self> {
        let path = config.store_path();
        let backend: Box<dyn RecordBackend> = match config.storage.backend {
            StorageBackend::Csv => Box::new(CsvBackend::new(path)),
            StorageBackend::Sqlite => Box::new(SqliteBackend::open(path)?),
        };
        Self::open(backend)
    }

    /// Where the table lives.
    #[must_use]
    pub fn describe(&self) -> String {
        self.backend.describe()
    }

    /// The record for `token`, if any.
    #[must_use]
    pub fn get(&self, token: &DetectionToken) -> Option<&LapRecord> {
        self.records.get(token)
    }

    /// All records, ordered by token.
    pub fn records(&self) -> impl Iterator<Item = &LapRecord> {
        self.records.values()
    }

    /// Owned copy of all records, ordered by token.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LapRecord> {
        self.records.values().cloned().collect()
    }

    /// Number of tokens with a record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether there are changes not yet written.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Insert or replace a record in memory without writing it.
    ///
    /// Used to batch several changes into one [`flush`](Self::flush).
    pub fn apply(&mut self, record: LapRecord) {
        self.records.insert(record.token.clone(), record);
        self.dirty = true;
    }

    /// Insert or replace a record and write the table.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the write fails. The record is kept in
    /// memory and written by the next successful flush.
    pub fn upsert(&mut self, record: LapRecord) -> Result<()> {
        self.apply(record);
        self.flush()
    }

    /// Write pending changes.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the write fails; the store stays dirty.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        let records = self.snapshot();
        match self.backend.save(&records) {
            Ok(()) => {
                self.dirty = false;
                debug!(records = records.len(), "Lap store saved");
                Ok(())
            }
            Err(e) => {
                warn!(
                    backend = %self.backend.describe(),
                    error = %e,
                    "Failed to save lap records; will retry"
                );
                Err(e)
            }
        }
    }

    /// Delete the record for `token`.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the write fails.
    pub fn remove(&mut self, token: &DetectionToken) -> Result<Option<LapRecord>> {
        let removed = self.records.remove(token);
        if removed.is_some() {
            info!(token = %token, "Removed lap record");
            self.dirty = true;
            self.flush()?;
        }
        Ok(removed)
    }

    /// Delete every record. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the write fails.
    pub fn clear(&mut self) -> Result<usize> {
        let count = self.records.len();
        if count > 0 {
            self.records.clear();
            self.dirty = true;
            self.flush()?;
            info!(count, "Cleared lap records");
        }
        Ok(count)
    }
}
