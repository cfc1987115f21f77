//! CSV record backend.
//!
//! The table has the header `token,last_lap,best_lap,last_seen_at`. Laps are
//! decimal seconds with millisecond precision (`10.500`), `last_seen_at` is
//! epoch seconds with millisecond precision, and an unset lap is the literal
//! `NotSet`.
//!
//! Saves write a sibling temp file and rename it over the table, so a reader
//! never sees a half-written file.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};

use super::RecordBackend;
use crate::detection::DetectionToken;
use crate::error::{Error, Result};
use crate::lap_clock::LapRecord;

/// Column names, in order.
pub const HEADER: [&str; 4] = ["token", "last_lap", "best_lap", "last_seen_at"];

/// Written for a lap that has not happened yet.
pub const NOT_SET: &str = "NotSet";

/// Record table stored as a CSV file.
#[derive(Debug, Clone)]
pub struct CsvBackend {
    path: PathBuf,
}

impl CsvBackend {
    /// A backend for the table at `path`. Nothing is touched until load or save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the table.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_to(&self, temp: &Path, records: &[LapRecord]) -> Result<()> {
        let file = File::create(temp).map_err(|source| Error::StoreWrite {
            path: temp.to_path_buf(),
            source,
        })?;

        let mut writer = ::csv::Writer::from_writer(file);
        writer.write_record(HEADER)?;
        for record in records {
            writer.write_record([
                record.token.as_str().to_string(),
                format_optional_seconds(record.last_lap),
                format_optional_seconds(record.best_lap),
                format_millis_as_seconds(record.last_seen_at.timestamp_millis()),
            ])?;
        }

        let file = writer.into_inner().map_err(|e| Error::StoreWrite {
            path: temp.to_path_buf(),
            source: e.into_error(),
        })?;
        file.sync_all().map_err(|source| Error::StoreWrite {
            path: temp.to_path_buf(),
            source,
        })
    }
}

impl RecordBackend for CsvBackend {
    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }

    fn load(&mut self) -> Result<Vec<LapRecord>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No lap table yet");
            return Ok(Vec::new());
        }

        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(::csv::Trim::All)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for (index, row) in reader.records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!(path = %self.path.display(), row = index + 1, error = %e, "Skipping unreadable row");
                    continue;
                }
            };

            if is_blank_row(&row) || is_header_row(&row) {
                continue;
            }

            match parse_row(&row) {
                Some(record) => records.push(record),
                None => warn!(
                    path = %self.path.display(),
                    row = index + 1,
                    contents = ?row,
                    "Skipping malformed lap record"
                ),
            }
        }

        Ok(records)
    }

    fn save(&mut self, records: &[LapRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let temp = self.temp_path();
        if let Err(e) = self.write_to(&temp, records) {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }

        fs::rename(&temp, &self.path).map_err(|source| {
            let _ = fs::remove_file(&temp);
            Error::StoreWrite {
                path: self.path.clone(),
                source,
            }
        })
    }
}

/// A legacy table may start with an empty or all-null row.
fn is_blank_row(row: &::csv::StringRecord) -> bool {
    row.iter().all(|field| {
        field.is_empty()
            || field.eq_ignore_ascii_case("null")
            || field.eq_ignore_ascii_case("none")
            || field.eq_ignore_ascii_case("nan")
            || field == NOT_SET
    })
}

fn is_header_row(row: &::csv::StringRecord) -> bool {
    row.get(0)
        .is_some_and(|field| field.eq_ignore_ascii_case(HEADER[0]))
}

fn parse_row(row: &::csv::StringRecord) -> Option<LapRecord> {
    if row.len() != HEADER.len() {
        return None;
    }
    let token = DetectionToken::new(row.get(0)?).ok()?;
    let last_lap = parse_optional_lap(row.get(1)?)?;
    let best_lap = parse_optional_lap(row.get(2)?)?;
    let last_seen_at: DateTime<Utc> =
        DateTime::from_timestamp_millis(parse_seconds_as_millis(row.get(3)?)?)?;

    Some(LapRecord {
        token,
        last_lap,
        best_lap,
        last_seen_at,
    })
}

/// `Some(None)` for `NotSet`, `None` if the field is unparseable.
fn parse_optional_lap(field: &str) -> Option<Option<TimeDelta>> {
    if field == NOT_SET {
        return Some(None);
    }
    parse_seconds_as_millis(field).map(|millis| Some(TimeDelta::milliseconds(millis)))
}

/// Parse decimal seconds into whole milliseconds, truncating extra digits.
fn parse_seconds_as_millis(field: &str) -> Option<i64> {
    let (negative, digits) = match field.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, field),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }

    let seconds: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut millis_text: String = fraction.chars().take(3).collect();
    while millis_text.len() < 3 {
        millis_text.push('0');
    }
    let millis: i64 = millis_text.parse().ok()?;

    let total = seconds.checked_mul(1_000)?.checked_add(millis)?;
    Some(if negative { -total } else { total })
}

fn format_millis_as_seconds(millis: i64) -> String {
    let sign = if millis < 0 { "-" } else { "" };
    let millis = millis.unsigned_abs();
    format!("{sign}{}.{:03}", millis / 1_000, millis % 1_000)
}

fn format_optional_seconds(duration: Option<TimeDelta>) -> String {
    duration.map_or_else(
        || NOT_SET.to_string(),
        |d| format_millis_as_seconds(d.num_milliseconds()),
    )
}
