//! Fixed-slot queue snapshot.
//!
//! # Layout
//!
//! All integers little-endian. Times are seconds since
//! `2000-01-01T00:00:00Z`, zero meaning unset. Strings are NUL-padded.
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | version (`601`) |
//! | 4 | 4 | current slot index |
//! | 8 | 10 × 256 | entries |
//! | 2568 | 16 | stats: perf fraction `f32`, perf units `u32`, download KB/s `f32`, upload KB/s `f32` |
//!
//! Entry:
//!
//! | Offset | Size | Field |
//! |---|---|---|
//! | 0 | 4 | status |
//! | 4 | 8 | project, run, clone, gen (`u16` each) |
//! | 12 | 12 | begin, due, end time (`u32` each) |
//! | 24 | 4 | local UTC offset in minutes (`i32`) |
//! | 28 | 4 | core number (e.g. `0xA2`) |
//! | 32 | 4 | team |
//! | 36 | 64 | folding ID |
//! | 100 | 32 | CPU type |
//! | 132 | 32 | OS type |

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Fingerprint;

pub const QUEUE_SLOTS: usize = 10;
pub const QUEUE_VERSION: u32 = 601;

const HEADER_LEN: usize = 8;
const ENTRY_LEN: usize = 256;
const STATS_LEN: usize = 16;
const STATS_OFFSET: usize = HEADER_LEN + QUEUE_SLOTS * ENTRY_LEN;
/// Total size of a snapshot file.
pub const SNAPSHOT_LEN: usize = STATS_OFFSET + STATS_LEN;

const FOLDING_ID_LEN: usize = 64;
const PLATFORM_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to read queue {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("queue snapshot is {actual} bytes, expected {SNAPSHOT_LEN}")]
    Truncated { actual: usize },
    #[error("unsupported queue version {0}")]
    UnsupportedVersion(u32),
    #[error("queue current index {0} out of range")]
    IndexOutOfRange(u32),
}

/// Status of one queue slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Unknown,
    #[default]
    Empty,
    Deleted,
    Finished,
    Garbage,
    FoldingNow,
    Queued,
    ReadyForUpload,
    Abandoned,
    FetchingFromServer,
}

impl QueueStatus {
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Empty,
            1 => Self::Deleted,
            2 => Self::Finished,
            3 => Self::Garbage,
            4 => Self::FoldingNow,
            5 => Self::Queued,
            6 => Self::ReadyForUpload,
            7 => Self::Abandoned,
            8 => Self::FetchingFromServer,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Deleted => 1,
            Self::Finished => 2,
            Self::Garbage => 3,
            Self::FoldingNow => 4,
            Self::Queued => 5,
            Self::ReadyForUpload => 6,
            Self::Abandoned => 7,
            Self::FetchingFromServer => 8,
            Self::Unknown => u32::MAX,
        }
    }

    /// Whether the entry's fields describe a real unit.
    #[must_use]
    pub const fn describes_unit(&self) -> bool {
        !matches!(
            self,
            Self::Unknown | Self::Empty | Self::Garbage | Self::Abandoned
        )
    }

    /// Whether a unit must have been assigned to reach this status.
    #[must_use]
    pub const fn requires_assignment(&self) -> bool {
        matches!(self, Self::FoldingNow | Self::ReadyForUpload | Self::Finished)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Empty => "empty",
            Self::Deleted => "deleted",
            Self::Finished => "finished",
            Self::Garbage => "garbage",
            Self::FoldingNow => "folding_now",
            Self::Queued => "queued",
            Self::ReadyForUpload => "ready_for_upload",
            Self::Abandoned => "abandoned",
            Self::FetchingFromServer => "fetching_from_server",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queue slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub status: QueueStatus,
    pub fingerprint: Fingerprint,
    pub begin_time: Option<DateTime<Utc>>,
    pub due_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Offset of the client's local clock from UTC, in minutes.
    pub utc_offset_minutes: i32,
    /// Core identifier as hex, e.g. `A2`.
    pub core: String,
    pub cpu: String,
    pub os: String,
    pub folding_id: String,
    pub team: u32,
}

impl QueueEntry {
    fn local(&self, time: Option<DateTime<Utc>>) -> Option<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)?;
        time.map(|t| t.with_timezone(&offset))
    }

    pub fn begin_time_local(&self) -> Option<DateTime<FixedOffset>> {
        self.local(self.begin_time)
    }

    pub fn due_time_local(&self) -> Option<DateTime<FixedOffset>> {
        self.local(self.due_time)
    }

    pub fn end_time_local(&self) -> Option<DateTime<FixedOffset>> {
        self.local(self.end_time)
    }
}

/// Aggregate statistics kept alongside the slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub performance_fraction: f32,
    pub performance_fraction_units: u32,
    pub download_rate: f32,
    pub upload_rate: f32,
}

/// Ten slots plus the index of the one being worked on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub entries: [QueueEntry; QUEUE_SLOTS],
    pub current_index: usize,
    pub stats: QueueStats,
}

impl QueueSnapshot {
    /// Decodes a snapshot.
    pub fn parse(bytes: &[u8]) -> Result<Self, QueueError> {
        if bytes.len() != SNAPSHOT_LEN {
            return Err(QueueError::Truncated {
                actual: bytes.len(),
            });
        }
        let version = read_u32(bytes, 0);
        if version != QUEUE_VERSION {
            return Err(QueueError::UnsupportedVersion(version));
        }
        let raw_index = read_u32(bytes, 4);
        let current_index = usize::try_from(raw_index)
            .ok()
            .filter(|&i| i < QUEUE_SLOTS)
            .ok_or(QueueError::IndexOutOfRange(raw_index))?;

        let entries = std::array::from_fn(|slot| {
            let start = HEADER_LEN + slot * ENTRY_LEN;
            parse_entry(&bytes[start..start + ENTRY_LEN])
        });

        let stats = QueueStats {
            performance_fraction: read_f32(bytes, STATS_OFFSET),
            performance_fraction_units: read_u32(bytes, STATS_OFFSET + 4),
            download_rate: read_f32(bytes, STATS_OFFSET + 8),
            upload_rate: read_f32(bytes, STATS_OFFSET + 12),
        };

        Ok(Self {
            entries,
            current_index,
            stats,
        })
    }

    /// Encodes a snapshot. Values that do not fit the layout are truncated.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0_u8; SNAPSHOT_LEN];
        write_u32(&mut out, 0, QUEUE_VERSION);
        write_u32(
            &mut out,
            4,
            u32::try_from(self.current_index).unwrap_or(u32::MAX),
        );
        for (slot, entry) in self.entries.iter().enumerate() {
            let start = HEADER_LEN + slot * ENTRY_LEN;
            write_entry(&mut out[start..start + ENTRY_LEN], entry);
        }
        write_u32(&mut out, STATS_OFFSET, self.stats.performance_fraction.to_bits());
        write_u32(&mut out, STATS_OFFSET + 4, self.stats.performance_fraction_units);
        write_u32(&mut out, STATS_OFFSET + 8, self.stats.download_rate.to_bits());
        write_u32(&mut out, STATS_OFFSET + 12, self.stats.upload_rate.to_bits());
        out
    }
}

/// Supplies the queue snapshot, if there is one.
pub trait QueueSnapshotSource {
    /// `Ok(None)` when no snapshot exists.
    fn read_snapshot(&self) -> Result<Option<QueueSnapshot>, QueueError>;
}

impl QueueSnapshotSource for QueueSnapshot {
    fn read_snapshot(&self) -> Result<Option<QueueSnapshot>, QueueError> {
        Ok(Some(self.clone()))
    }
}

impl QueueSnapshotSource for Option<QueueSnapshot> {
    fn read_snapshot(&self) -> Result<Option<QueueSnapshot>, QueueError> {
        Ok(self.clone())
    }
}

/// A snapshot file on disk.
#[derive(Debug, Clone)]
pub struct QueueFile {
    path: PathBuf,
}

impl QueueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueueSnapshotSource for QueueFile {
    fn read_snapshot(&self) -> Result<Option<QueueSnapshot>, QueueError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(QueueError::Io {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };
        QueueSnapshot::parse(&bytes).map(Some)
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

fn decode_time(secs: u32) -> Option<DateTime<Utc>> {
    (secs != 0).then(|| epoch() + TimeDelta::seconds(i64::from(secs)))
}

fn encode_time(time: Option<DateTime<Utc>>) -> u32 {
    time.and_then(|t| u32::try_from((t - epoch()).num_seconds()).ok())
        .unwrap_or(0)
}

fn parse_entry(raw: &[u8]) -> QueueEntry {
    let status = QueueStatus::from_code(read_u32(raw, 0));
    let fingerprint = Fingerprint::new(
        u32::from(read_u16(raw, 4)),
        u32::from(read_u16(raw, 6)),
        u32::from(read_u16(raw, 8)),
        u32::from(read_u16(raw, 10)),
    );
    QueueEntry {
        status,
        fingerprint,
        begin_time: decode_time(read_u32(raw, 12)),
        due_time: decode_time(read_u32(raw, 16)),
        end_time: decode_time(read_u32(raw, 20)),
        utc_offset_minutes: i32::from_le_bytes(array(raw, 24)),
        core: match read_u32(raw, 28) {
            0 => String::new(),
            core => format!("{core:02X}"),
        },
        team: read_u32(raw, 32),
        folding_id: read_str(&raw[36..36 + FOLDING_ID_LEN]),
        cpu: read_str(&raw[100..100 + PLATFORM_LEN]),
        os: read_str(&raw[132..132 + PLATFORM_LEN]),
    }
}

fn write_entry(out: &mut [u8], entry: &QueueEntry) {
    let narrow = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
    write_u32(out, 0, entry.status.code());
    out[4..6].copy_from_slice(&narrow(entry.fingerprint.project_id).to_le_bytes());
    out[6..8].copy_from_slice(&narrow(entry.fingerprint.run).to_le_bytes());
    out[8..10].copy_from_slice(&narrow(entry.fingerprint.clone).to_le_bytes());
    out[10..12].copy_from_slice(&narrow(entry.fingerprint.generation).to_le_bytes());
    write_u32(out, 12, encode_time(entry.begin_time));
    write_u32(out, 16, encode_time(entry.due_time));
    write_u32(out, 20, encode_time(entry.end_time));
    out[24..28].copy_from_slice(&entry.utc_offset_minutes.to_le_bytes());
    write_u32(out, 28, u32::from_str_radix(&entry.core, 16).unwrap_or(0));
    write_u32(out, 32, entry.team);
    write_str(&mut out[36..36 + FOLDING_ID_LEN], &entry.folding_id);
    write_str(&mut out[100..100 + PLATFORM_LEN], &entry.cpu);
    write_str(&mut out[132..132 + PLATFORM_LEN], &entry.os);
}

fn array<const N: usize>(raw: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0_u8; N];
    buf.copy_from_slice(&raw[offset..offset + N]);
    buf
}

fn read_u16(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(array(raw, offset))
}

fn read_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(array(raw, offset))
}

fn read_f32(raw: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(raw, offset))
}

fn read_str(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn write_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_str(out: &mut [u8], value: &str) {
    // Keep a trailing NUL.
    let len = value.len().min(out.len() - 1);
    out[..len].copy_from_slice(&value.as_bytes()[..len]);
}
