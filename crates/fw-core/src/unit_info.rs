//! The client's `unitinfo.txt` side channel.
//!
//! Describes only the unit currently being worked on:
//!
//! ```text
//! Current Work Unit
//! -----------------
//! Name: p2677_IBX in water
//! Tag: P2677R14C69G39
//! Download time: March 10 19:40:16
//! Due time: March 13 19:40:16
//! Progress: 1%  [__________]
//! ```

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Datelike, Months, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Fingerprint;

#[derive(Debug, Error)]
pub enum UnitInfoError {
    #[error("failed to read unit info {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid {field} in unit info: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// Metadata about the active unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfoLogData {
    pub protein_name: String,
    pub protein_tag: String,
    pub download_time: Option<DateTime<Utc>>,
    pub due_time: Option<DateTime<Utc>>,
    /// Derived from the tag; unknown if the tag is not a fingerprint.
    pub fingerprint: Fingerprint,
    pub progress: Option<u8>,
}

impl UnitInfoLogData {
    /// Parses unit info text read at `now`.
    ///
    /// Timestamps carry no year. The download time is placed in the year of
    /// `now`, or the year before when that would put it in the future. A due
    /// time that lands before the download time is moved into the following
    /// year.
    pub fn parse(text: &str, now: DateTime<Utc>) -> Result<Self, UnitInfoError> {
        let data = Self::parse_in_year(text, now.year())?;
        if data.download_time.is_some_and(|download| download > now) {
            return Self::parse_in_year(text, now.year() - 1);
        }
        Ok(data)
    }

    fn parse_in_year(text: &str, year: i32) -> Result<Self, UnitInfoError> {
        let mut data = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Name" => data.protein_name = value.to_string(),
                "Tag" => {
                    data.protein_tag = value.to_string();
                    data.fingerprint = value.parse().unwrap_or_default();
                }
                "Download time" => {
                    data.download_time = Some(parse_time("download time", value, year)?);
                }
                "Due time" => data.due_time = Some(parse_time("due time", value, year)?),
                "Progress" => {
                    data.progress = value
                        .split('%')
                        .next()
                        .and_then(|p| p.trim().parse().ok());
                }
                _ => {}
            }
        }

        if let (Some(download), Some(due)) = (data.download_time, data.due_time) {
            if due < download {
                data.due_time = due.checked_add_months(Months::new(12));
            }
        }
        Ok(data)
    }
}

fn parse_time(field: &'static str, value: &str, year: i32) -> Result<DateTime<Utc>, UnitInfoError> {
    NaiveDateTime::parse_from_str(&format!("{year} {value}"), "%Y %B %d %H:%M:%S")
        .map(|t| t.and_utc())
        .map_err(|_| UnitInfoError::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}

/// Supplies unit info for the active slot.
pub trait UnitInfoLogSource {
    /// `Ok(None)` when no unit info exists.
    fn read_unit_info(&self) -> Result<Option<UnitInfoLogData>, UnitInfoError>;
}

impl UnitInfoLogSource for Option<UnitInfoLogData> {
    fn read_unit_info(&self) -> Result<Option<UnitInfoLogData>, UnitInfoError> {
        Ok(self.clone())
    }
}

/// A `unitinfo.txt` file on disk.
#[derive(Debug, Clone)]
pub struct UnitInfoFile {
    path: PathBuf,
    now: DateTime<Utc>,
}

impl UnitInfoFile {
    pub fn new(path: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            now,
        }
    }
}

impl UnitInfoLogSource for UnitInfoFile {
    fn read_unit_info(&self) -> Result<Option<UnitInfoLogData>, UnitInfoError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(UnitInfoError::Io {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };
        UnitInfoLogData::parse(&text, self.now).map(Some)
    }
}
