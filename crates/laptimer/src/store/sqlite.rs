//! `SQLite` record backend.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta};
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use super::{migrations, RecordBackend};
use crate::detection::DetectionToken;
use crate::error::{Error, Result};
use crate::lap_clock::LapRecord;

/// Record table stored in a `SQLite` database.
#[derive(Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    conn: Connection,
}

impl SqliteBackend {
    /// Open or create the database at `path`.
    ///
    /// Creates parent directories as needed and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening lap database at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        // WAL lets a reader see the last committed table while a save is running
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&mut conn)?;

        info!("Lap database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Open a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordBackend for SqliteBackend {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn load(&mut self) -> Result<Vec<LapRecord>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT token, last_lap_ms, best_lap_ms, last_seen_ms
            FROM lap_records ORDER BY token
            ",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (token, last_lap_ms, best_lap_ms, last_seen_ms) in rows {
            let Ok(parsed) = DetectionToken::new(&token) else {
                warn!(token = %token, "Skipping lap record with an empty token");
                continue;
            };
            let Some(last_seen_at) = DateTime::from_timestamp_millis(last_seen_ms) else {
                warn!(token = %token, last_seen_ms, "Skipping lap record with an out-of-range timestamp");
                continue;
            };
            records.push(LapRecord {
                token: parsed,
                last_lap: last_lap_ms.map(TimeDelta::milliseconds),
                best_lap: best_lap_ms.map(TimeDelta::milliseconds),
                last_seen_at,
            });
        }
        Ok(records)
    }

    fn save(&mut self, records: &[LapRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM lap_records", [])?;
        {
            let mut insert = tx.prepare(
                r"
                INSERT INTO lap_records (token, last_lap_ms, best_lap_ms, last_seen_ms)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )?;
            for record in records {
                insert.execute(params![
                    record.token.as_str(),
                    record.last_lap.map(|d| d.num_milliseconds()),
                    record.best_lap.map(|d| d.num_milliseconds()),
                    record.last_seen_at.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;
        debug!(records = records.len(), "Saved lap records");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(token: &str, last_ms: Option<i64>, best_ms: Option<i64>, seen_ms: i64) -> LapRecord {
        LapRecord {
            token: DetectionToken::new(token).unwrap(),
            last_lap: last_ms.map(TimeDelta::milliseconds),
            best_lap: best_ms.map(TimeDelta::milliseconds),
            last_seen_at: DateTime::from_timestamp_millis(seen_ms).unwrap(),
        }
    }

    #[test]
    fn test_empty_database() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        assert!(backend.load().unwrap().is_empty());
        assert_eq!(backend.describe(), "sqlite::memory:");
    }

    #[test]
    fn test_save_then_load() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        let records = vec![
            record("A1", Some(11_000), Some(8_500), 30_000),
            record("B2", None, None, 1_000),
        ];

        backend.save(&records).unwrap();
        assert_eq!(backend.load().unwrap(), records);
    }

    #[test]
    fn test_save_replaces_table() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .save(&[record("A1", None, None, 0), record("B2", None, None, 0)])
            .unwrap();
        backend.save(&[record("B2", Some(5), Some(5), 5)]).unwrap();

        assert_eq!(backend.load().unwrap(), vec![record("B2", Some(5), Some(5), 5)]);
    }

    #[test]
    fn test_not_set_is_null() {
        let mut backend = SqliteBackend::open_in_memory().unwrap();
        backend.save(&[record("A1", None, None, 0)]).unwrap();

        let nulls: i32 = backend
            .conn
            .query_row(
                "SELECT COUNT(*) FROM lap_records WHERE last_lap_ms IS NULL AND best_lap_ms IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(nulls, 1);
    }

    #[test]
    fn test_reopen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("laps.db");

        {
            let mut backend = SqliteBackend::open(&path).unwrap();
            backend.save(&[record("A1", Some(10_500), Some(10_500), 10_500)]).unwrap();
        }

        let mut backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.path(), path);
        assert_eq!(
            backend.load().unwrap(),
            vec![record("A1", Some(10_500), Some(10_500), 10_500)]
        );
    }

    #[test]
    fn test_open_invalid_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        let err = SqliteBackend::open(blocker.join("laps.db")).unwrap_err();
        assert!(err.is_persistence_error());
    }
}
