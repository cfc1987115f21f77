//! Error types for laptimer.
//!
//! This module defines the error type shared by the listener, the lap store and
//! the configuration layer. Connection and persistence failures are always
//! surfaced to the caller; malformed serial lines never reach this type.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for laptimer operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Connection Errors ===
    /// The signal source could not be opened.
    #[error("failed to connect to {address}: {message}")]
    Connection {
        /// Device address that was requested.
        address: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The signal source went away while the listener was running.
    #[error("connection to {address} lost: {reason}")]
    ConnectionLost {
        /// Device address of the lost source.
        address: String,
        /// Reason reported by the source.
        reason: String,
    },

    // === Persistence Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// Reading or writing a CSV table failed.
    #[error("CSV store error: {0}")]
    CsvStore(#[from] csv::Error),

    /// Writing a record file failed.
    #[error("failed to write {path}: {source}")]
    StoreWrite {
        /// Path of the file being written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Data Errors ===
    /// A detection token was empty or otherwise unusable.
    #[error("invalid detection token: {0:?}")]
    InvalidToken(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for laptimer operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a connection error for the given address.
    #[must_use]
    pub fn connection(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a connection-lost error for the given address.
    #[must_use]
    pub fn connection_lost(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Check if this error came from the signal source (at start or mid-session).
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ConnectionLost { .. })
    }

    /// Check if this error came from the record store.
    #[must_use]
    pub fn is_persistence_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::CsvStore(_)
                | Self::StoreWrite { .. }
                | Self::DirectoryCreate { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = Error::connection("/dev/ttyUSB9", "No such file or directory");
        let msg = err.to_string();
        assert!(msg.contains("/dev/ttyUSB9"));
        assert!(msg.contains("No such file"));
    }

    #[test]
    fn test_connection_lost_display() {
        let err = Error::connection_lost("COM3", "device unplugged");
        assert_eq!(err.to_string(), "connection to COM3 lost: device unplugged");
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("COM1", "x").is_connection_error());
        assert!(Error::connection_lost("COM1", "x").is_connection_error());
        assert!(!Error::internal("x").is_connection_error());
    }

    #[test]
    fn test_is_persistence_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = Error::StoreWrite {
            path: PathBuf::from("/readonly/laps.csv"),
            source: io_err,
        };
        assert!(err.is_persistence_error());
        assert!(!err.is_connection_error());

        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.is_persistence_error());
        assert!(!Error::timeout("stop").is_persistence_error());
    }

    #[test]
    fn test_store_write_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = Error::StoreWrite {
            path: PathBuf::from("/data/laps.csv"),
            source: io_err,
        };
        let msg = err.to_string();
        assert!(msg.contains("/data/laps.csv"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_timeout_error_display() {
        let err = Error::timeout("stopping listener");
        assert_eq!(err.to_string(), "operation timed out: stopping listener");
    }

    #[test]
    fn test_invalid_token_display() {
        let err = Error::InvalidToken("  ".to_string());
        assert!(err.to_string().contains("invalid detection token"));
    }

    #[test]
    fn test_plain_io_error_is_not_persistence() {
        // Io covers replay files and the roster, not the record store.
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "capture.txt");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("capture.txt"));
        assert!(!err.is_persistence_error());
    }

    #[test]
    fn test_from_csv_error() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader("A1,10.500\nB2\n".as_bytes());
        let csv_err = reader
            .records()
            .find_map(std::result::Result::err)
            .unwrap();
        let err: Error = csv_err.into();
        assert!(matches!(err, Error::CsvStore(_)));
        assert!(err.is_persistence_error());
    }

    #[test]
    fn test_from_figment_error() {
        use figment::providers::{Format, Toml};

        let figment_err = figment::Figment::new()
            .merge(Toml::string("listener = 5"))
            .extract::<crate::config::Config>()
            .unwrap_err();
        let err: Error = figment_err.into();
        assert!(matches!(err, Error::ConfigLoad(_)));
        assert!(!err.is_persistence_error());
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "poll_interval_ms must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("poll_interval_ms"));
    }
}
