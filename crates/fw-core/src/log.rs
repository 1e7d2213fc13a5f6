//! Log line classification.
//!
//! Turns raw `FAHlog.txt` text into [`LogLine`]s. Each line gets a
//! [`LineKind`] and a typed [`LinePayload`]; nothing downstream needs to
//! re-parse line text.

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Fingerprint;

static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d{2}:\d{2}:\d{2})\]\s?(.*)$").unwrap());
static CLIENT_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Folding@Home Client Version\s+(\S+)").unwrap());
static USER_TEAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- User name: (.+?) \(Team (\d+)\)").unwrap());
static QUEUE_INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Working on queue slot (\d+)").unwrap());
static CORE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Folding@Home .*Core\s*$").unwrap());
static CORE_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Version (\d+\.\d+)").unwrap());
static PROTEIN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Protein: (.+)$").unwrap());
static PROJECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Project: (\d+) \(Run (\d+), Clone (\d+), Gen (\d+)\)").unwrap()
});
static FRAME_STEPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Completed (\d+) out of (\d+) steps(?:\s+\((\d+)%\))?").unwrap()
});
static FRAME_PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Completed (\d+)%\s*$").unwrap());
static SHUTDOWN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Folding@home Core Shutdown: (\w+)").unwrap());
static UNITS_COMPLETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+ Number of Units Completed: (\d+)").unwrap());

/// Classification of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Unknown,
    LogOpen,
    ClientVersion,
    UserTeam,
    UnitProcessing,
    QueueIndex,
    CoreStart,
    CoreVersion,
    Protein,
    Project,
    Frame,
    CoreShutdown,
    GettingWorkPacket,
    Working,
    SendingResults,
    Paused,
    UnitsCompleted,
}

/// How a work unit ended, as reported by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkUnitResult {
    #[default]
    Unknown,
    FinishedUnit,
    EarlyUnitEnd,
    UnstableMachine,
    Interrupted,
    BadWorkUnit,
    CoreOutdated,
    ClientCoreError,
}

impl WorkUnitResult {
    /// Maps the core's shutdown token (e.g. `FINISHED_UNIT`).
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        match token {
            "FINISHED_UNIT" => Self::FinishedUnit,
            "EARLY_UNIT_END" => Self::EarlyUnitEnd,
            "UNSTABLE_MACHINE" => Self::UnstableMachine,
            "INTERRUPTED" => Self::Interrupted,
            "BAD_WORK_UNIT" => Self::BadWorkUnit,
            "CORE_OUTDATED" => Self::CoreOutdated,
            "CLIENT_CORE_ERROR" => Self::ClientCoreError,
            _ => Self::Unknown,
        }
    }

    /// String representation for storage and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::FinishedUnit => "finished_unit",
            Self::EarlyUnitEnd => "early_unit_end",
            Self::UnstableMachine => "unstable_machine",
            Self::Interrupted => "interrupted",
            Self::BadWorkUnit => "bad_work_unit",
            Self::CoreOutdated => "core_outdated",
            Self::ClientCoreError => "client_core_error",
        }
    }
}

impl fmt::Display for WorkUnitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkUnitResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "finished_unit" => Ok(Self::FinishedUnit),
            "early_unit_end" => Ok(Self::EarlyUnitEnd),
            "unstable_machine" => Ok(Self::UnstableMachine),
            "interrupted" => Ok(Self::Interrupted),
            "bad_work_unit" => Ok(Self::BadWorkUnit),
            "core_outdated" => Ok(Self::CoreOutdated),
            "client_core_error" => Ok(Self::ClientCoreError),
            _ => Err(format!("invalid work unit result: {s}")),
        }
    }
}

/// A frame progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameData {
    pub percent: u8,
    pub raw_complete: u64,
    pub raw_total: u64,
    pub time: NaiveTime,
}

/// Typed payload carried by a classified line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LinePayload {
    #[default]
    None,
    Frame(FrameData),
    /// A fingerprint sighting.
    Project(Fingerprint),
    UnitResult(WorkUnitResult),
    ClientVersion(String),
    CoreVersion(String),
    Protein(String),
    UserTeam {
        folding_id: String,
        team: u32,
    },
    QueueIndex(usize),
    UnitsCompleted(u32),
    /// The line was recognised but its content could not be used.
    Malformed(String),
}

/// One classified log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Zero-based position in the whole log.
    pub index: usize,
    pub kind: LineKind,
    pub time: Option<NaiveTime>,
    pub text: String,
    pub payload: LinePayload,
}

/// Classifies every line of `text`.
pub fn tokenize(text: &str) -> Vec<LogLine> {
    text.lines()
        .enumerate()
        .map(|(index, raw)| classify(index, raw))
        .collect()
}

/// Classifies a single raw line.
pub fn classify(index: usize, raw: &str) -> LogLine {
    let raw = raw.trim_end();
    let (time, body) = split_timestamp(raw);
    let (kind, payload) = classify_body(body, time);
    LogLine {
        index,
        kind,
        time,
        text: raw.to_string(),
        payload,
    }
}

fn split_timestamp(raw: &str) -> (Option<NaiveTime>, &str) {
    TIME_RE.captures(raw).map_or((None, raw.trim_start()), |caps| {
        let time = NaiveTime::parse_from_str(&caps[1], "%H:%M:%S").ok();
        let body = caps.get(2).map_or("", |m| m.as_str());
        (time, body)
    })
}

fn classify_body(body: &str, time: Option<NaiveTime>) -> (LineKind, LinePayload) {
    if body.starts_with("--- Opening Log file") {
        return (LineKind::LogOpen, LinePayload::None);
    }
    if let Some(caps) = CLIENT_VERSION_RE.captures(body) {
        return (
            LineKind::ClientVersion,
            LinePayload::ClientVersion(caps[1].to_string()),
        );
    }
    if let Some(caps) = USER_TEAM_RE.captures(body) {
        let payload = caps[2].parse::<u32>().map_or_else(
            |_| LinePayload::Malformed(format!("team out of range: {}", &caps[2])),
            |team| LinePayload::UserTeam {
                folding_id: caps[1].to_string(),
                team,
            },
        );
        return (LineKind::UserTeam, payload);
    }
    if body.starts_with("+ Processing work unit") {
        return (LineKind::UnitProcessing, LinePayload::None);
    }
    if let Some(caps) = QUEUE_INDEX_RE.captures(body) {
        let payload = caps[1].parse::<usize>().map_or_else(
            |_| LinePayload::Malformed(format!("bad queue slot: {}", &caps[1])),
            LinePayload::QueueIndex,
        );
        return (LineKind::QueueIndex, payload);
    }
    if let Some(caps) = SHUTDOWN_RE.captures(body) {
        return (
            LineKind::CoreShutdown,
            LinePayload::UnitResult(WorkUnitResult::from_token(&caps[1])),
        );
    }
    if CORE_START_RE.is_match(body) {
        return (LineKind::CoreStart, LinePayload::None);
    }
    if let Some(caps) = CORE_VERSION_RE.captures(body) {
        return (
            LineKind::CoreVersion,
            LinePayload::CoreVersion(caps[1].to_string()),
        );
    }
    if let Some(caps) = PROTEIN_RE.captures(body) {
        return (
            LineKind::Protein,
            LinePayload::Protein(caps[1].trim().to_string()),
        );
    }
    if let Some(caps) = PROJECT_RE.captures(body) {
        return (LineKind::Project, parse_project(&caps));
    }
    if let Some(caps) = FRAME_STEPS_RE.captures(body) {
        return (LineKind::Frame, parse_steps_frame(&caps, time));
    }
    if let Some(caps) = FRAME_PERCENT_RE.captures(body) {
        return (LineKind::Frame, parse_percent_frame(&caps, time));
    }
    if body.starts_with("+ Attempting to get work packet") {
        return (LineKind::GettingWorkPacket, LinePayload::None);
    }
    if body.starts_with("+ Working ...") {
        return (LineKind::Working, LinePayload::None);
    }
    if body.starts_with("+ Attempting to send results") {
        return (LineKind::SendingResults, LinePayload::None);
    }
    if body.starts_with("+ Paused") {
        return (LineKind::Paused, LinePayload::None);
    }
    if let Some(caps) = UNITS_COMPLETED_RE.captures(body) {
        let payload = caps[1].parse::<u32>().map_or_else(
            |_| LinePayload::Malformed(format!("unit count out of range: {}", &caps[1])),
            LinePayload::UnitsCompleted,
        );
        return (LineKind::UnitsCompleted, payload);
    }
    (LineKind::Unknown, LinePayload::None)
}

fn parse_project(caps: &regex::Captures<'_>) -> LinePayload {
    let mut parts = [0_u32; 4];
    for (slot, i) in parts.iter_mut().zip(1..=4) {
        match caps[i].parse::<u32>() {
            Ok(value) => *slot = value,
            Err(_) => return LinePayload::Malformed(format!("project value out of range: {}", &caps[i])),
        }
    }
    let [project_id, run, clone, generation] = parts;
    LinePayload::Project(Fingerprint::new(project_id, run, clone, generation))
}

fn parse_steps_frame(caps: &regex::Captures<'_>, time: Option<NaiveTime>) -> LinePayload {
    let (Ok(raw_complete), Ok(raw_total)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) else {
        return LinePayload::Malformed("step count out of range".to_string());
    };
    let percent = match caps.get(3) {
        Some(m) => m.as_str().parse::<u64>().ok(),
        None if raw_total > 0 => Some(raw_complete.saturating_mul(100) / raw_total),
        None => None,
    };
    let Some(percent) = percent else {
        return LinePayload::Malformed("cannot determine frame percent".to_string());
    };
    frame_payload(percent, raw_complete, raw_total, time)
}

fn parse_percent_frame(caps: &regex::Captures<'_>, time: Option<NaiveTime>) -> LinePayload {
    let Ok(percent) = caps[1].parse::<u64>() else {
        return LinePayload::Malformed(format!("frame percent out of range: {}", &caps[1]));
    };
    frame_payload(percent, percent, 100, time)
}

fn frame_payload(
    percent: u64,
    raw_complete: u64,
    raw_total: u64,
    time: Option<NaiveTime>,
) -> LinePayload {
    let Some(time) = time else {
        return LinePayload::Malformed("frame line has no timestamp".to_string());
    };
    let percent = match u8::try_from(percent) {
        Ok(p) if p <= crate::frames::MAX_PERCENT => p,
        _ => return LinePayload::Malformed(format!("frame percent out of range: {percent}")),
    };
    if raw_complete > raw_total {
        return LinePayload::Malformed(format!(
            "completed steps exceed total: {raw_complete} > {raw_total}"
        ));
    }
    LinePayload::Frame(FrameData {
        percent,
        raw_complete,
        raw_total,
        time,
    })
}
