//! Driver roster.
//!
//! Maps tag tokens to the driver carrying them. Stored as a CSV file with the
//! columns `tag,name,number,kart,kart_class`; tags with no entry are shown as
//! [`NOT_ASSIGNED`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detection::DetectionToken;
use crate::error::{Error, Result};

/// Placeholder for every field of an unassigned tag.
pub const NOT_ASSIGNED: &str = "Not Assigned";

const HEADER: [&str; 5] = ["tag", "name", "number", "kart", "kart_class"];

/// Who is carrying a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    /// Driver name.
    pub name: String,
    /// Race number.
    pub number: String,
    /// Kart identifier.
    pub kart: String,
    /// Kart class (e.g. `125cc`).
    pub kart_class: String,
}

impl Default for DriverInfo {
    fn default() -> Self {
        Self {
            name: NOT_ASSIGNED.to_string(),
            number: NOT_ASSIGNED.to_string(),
            kart: NOT_ASSIGNED.to_string(),
            kart_class: NOT_ASSIGNED.to_string(),
        }
    }
}

impl DriverInfo {
    /// A driver with only a name set.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Tag-to-driver table backed by a CSV file.
#[derive(Debug, Clone)]
pub struct DriverRoster {
    path: PathBuf,
    drivers: BTreeMap<DetectionToken, DriverInfo>,
}

impl DriverRoster {
    /// Load the roster at `path`. A missing file is an empty roster.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut drivers = BTreeMap::new();

        if !path.exists() {
            debug!(path = %path.display(), "No roster file yet");
            return Ok(Self { path, drivers });
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&path)?;

        for row in reader.records() {
            let row = row?;
            let Some(tag) = row.get(0) else { continue };
            if tag.eq_ignore_ascii_case(HEADER[0]) || tag.eq_ignore_ascii_case("rfid") {
                continue;
            }
            let Ok(token) = DetectionToken::new(tag) else {
                warn!(path = %path.display(), row = ?row, "Skipping roster row without a tag");
                continue;
            };

            let field = |index: usize| {
                row.get(index)
                    .filter(|value| !value.is_empty())
                    .unwrap_or(NOT_ASSIGNED)
                    .to_string()
            };
            drivers.insert(
                token,
                DriverInfo {
                    name: field(1),
                    number: field(2),
                    kart: field(3),
                    kart_class: field(4),
                },
            );
        }

        debug!(path = %path.display(), drivers = drivers.len(), "Roster loaded");
        Ok(Self { path, drivers })
    }

    /// Write the roster back to its file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let temp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&temp)?;
            writer.write_record(HEADER)?;
            for (token, driver) in &self.drivers {
                writer.write_record([
                    token.as_str(),
                    driver.name.as_str(),
                    driver.number.as_str(),
                    driver.kart.as_str(),
                    driver.kart_class.as_str(),
                ])?;
            }
            writer.flush().map_err(|source| Error::StoreWrite {
                path: temp.clone(),
                source,
            })?;
        }

        fs::rename(&temp, &self.path).map_err(|source| Error::StoreWrite {
            path: self.path.clone(),
            source,
        })?;
        info!(path = %self.path.display(), drivers = self.drivers.len(), "Roster saved");
        Ok(())
    }

    /// Path of the roster file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The driver for `token`, if assigned.
    #[must_use]
    pub fn get(&self, token: &DetectionToken) -> Option<&DriverInfo> {
        self.drivers.get(token)
    }

    /// The driver for `token`, or an all-`Not Assigned` entry.
    #[must_use]
    pub fn driver_or_default(&self, token: &DetectionToken) -> DriverInfo {
        self.get(token).cloned().unwrap_or_default()
    }

    /// Driver name for display.
    #[must_use]
    pub fn display_name(&self, token: &DetectionToken) -> &str {
        self.get(token).map_or(NOT_ASSIGNED, |driver| driver.name.as_str())
    }

    /// Assign a driver to `token`, returning the previous entry.
    pub fn assign(&mut self, token: DetectionToken, driver: DriverInfo) -> Option<DriverInfo> {
        self.drivers.insert(token, driver)
    }

    /// Remove the entry for `token`.
    pub fn remove(&mut self, token: &DetectionToken) -> Option<DriverInfo> {
        self.drivers.remove(token)
    }

    /// All entries, ordered by tag.
    pub fn iter(&self) -> impl Iterator<Item = (&DetectionToken, &DriverInfo)> {
        self.drivers.iter()
    }

    /// Number of assigned tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no tags are assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}
