//! `SQLite` schema definitions for the lap record store.

/// SQL statement to create the lap records table.
///
/// Durations and timestamps are whole milliseconds; NULL means not set.
pub const CREATE_LAP_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS lap_records (
    token TEXT PRIMARY KEY NOT NULL,
    last_lap_ms INTEGER,
    best_lap_ms INTEGER,
    last_seen_ms INTEGER NOT NULL
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[CREATE_LAP_RECORDS_TABLE, CREATE_METADATA_TABLE];
