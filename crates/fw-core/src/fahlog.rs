//! Log segmentation into client runs and work unit spans.
//!
//! A client run starts at each `--- Opening Log file` line. Within a run,
//! a unit span starts at `+ Processing work unit` and runs until the next
//! one (or the end of the run). The first `Working on queue slot NN` line
//! in a unit span ties it to a queue slot.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::log::{LineKind, LinePayload, LogLine, tokenize};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to read log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Identity of the client run that owns a span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub folding_id: String,
    pub team: u32,
    pub client_version: String,
    /// Latest lifetime unit count the client reported in this run.
    pub units_completed: Option<u32>,
}

/// A contiguous run of classified log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    lines: Vec<LogLine>,
    owner: RunIdentity,
}

impl LineSpan {
    pub const fn new(lines: Vec<LogLine>, owner: RunIdentity) -> Self {
        Self { lines, owner }
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    /// The client run this span belongs to.
    pub const fn owner(&self) -> &RunIdentity {
        &self.owner
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

/// Supplies the spans the reconciler reads.
///
/// This trait allows reconciliation to work with different log
/// representations (e.g., a parsed [`FahLog`], or test fixtures).
pub trait LogLineSource {
    /// Lines of the most recent unit that worked in queue slot `index`.
    /// Empty when the log never mentions that slot.
    fn span_for_slot(&self, index: usize) -> LineSpan;

    /// The unit before the current one, possibly from an earlier run.
    fn previous_unit_span(&self) -> Option<LineSpan>;

    /// The last unit of the current client run.
    fn current_unit_span(&self) -> Option<LineSpan>;

    /// Every line of the current client run.
    fn current_run_span(&self) -> LineSpan;
}

#[derive(Debug, Clone)]
struct UnitRange {
    run: usize,
    start: usize,
    end: usize,
    queue_index: Option<usize>,
}

#[derive(Debug, Clone)]
struct ClientRun {
    start: usize,
    end: usize,
    identity: RunIdentity,
}

/// A parsed client log.
#[derive(Debug, Clone, Default)]
pub struct FahLog {
    lines: Vec<LogLine>,
    runs: Vec<ClientRun>,
    units: Vec<UnitRange>,
}

impl FahLog {
    /// Parses log text.
    pub fn parse(text: &str) -> Self {
        Self::from_lines(tokenize(text))
    }

    /// Reads and parses a log file. Invalid UTF-8 is replaced, not rejected.
    pub fn read(path: &Path) -> Result<Self, LogError> {
        let bytes = fs::read(path).map_err(|source| LogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    /// Segments already-classified lines.
    pub fn from_lines(lines: Vec<LogLine>) -> Self {
        let runs = split_runs(&lines);
        let units = runs
            .iter()
            .enumerate()
            .flat_map(|(run, r)| split_units(&lines, run, r.start, r.end))
            .collect();
        tracing::debug!(lines = lines.len(), runs = runs.len(), "segmented log");
        Self { lines, runs, units }
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    fn current_identity(&self) -> RunIdentity {
        self.runs
            .last()
            .map(|r| r.identity.clone())
            .unwrap_or_default()
    }

    fn span_of(&self, unit: &UnitRange) -> LineSpan {
        LineSpan::new(
            self.lines[unit.start..unit.end].to_vec(),
            self.runs[unit.run].identity.clone(),
        )
    }

    /// Position in `units` of the current unit, if the current run has one.
    fn current_unit_position(&self) -> Option<usize> {
        let last_run = self.runs.len().checked_sub(1)?;
        let position = self.units.len().checked_sub(1)?;
        (self.units[position].run == last_run).then_some(position)
    }
}

impl LogLineSource for FahLog {
    fn span_for_slot(&self, index: usize) -> LineSpan {
        self.units
            .iter()
            .rev()
            .find(|u| u.queue_index == Some(index))
            .map_or_else(
                || LineSpan::new(Vec::new(), self.current_identity()),
                |u| self.span_of(u),
            )
    }

    fn previous_unit_span(&self) -> Option<LineSpan> {
        let position = match self.current_unit_position() {
            Some(current) => current.checked_sub(1)?,
            None => self.units.len().checked_sub(1)?,
        };
        Some(self.span_of(&self.units[position]))
    }

    fn current_unit_span(&self) -> Option<LineSpan> {
        self.current_unit_position()
            .map(|position| self.span_of(&self.units[position]))
    }

    fn current_run_span(&self) -> LineSpan {
        self.runs.last().map_or_else(LineSpan::default, |run| {
            LineSpan::new(
                self.lines[run.start..run.end].to_vec(),
                run.identity.clone(),
            )
        })
    }
}

fn split_runs(lines: &[LogLine]) -> Vec<ClientRun> {
    let mut starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.kind == LineKind::LogOpen)
        .map(|(i, _)| i)
        .collect();
    // Lines before the first header still form a run (truncated logs).
    if starts.first() != Some(&0) && !lines.is_empty() {
        starts.insert(0, 0);
    }

    let mut runs = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(lines.len());
        runs.push(ClientRun {
            start,
            end,
            identity: run_identity(&lines[start..end]),
        });
    }
    runs
}

fn run_identity(lines: &[LogLine]) -> RunIdentity {
    let mut identity = RunIdentity::default();
    for line in lines {
        match &line.payload {
            LinePayload::ClientVersion(version) if identity.client_version.is_empty() => {
                identity.client_version.clone_from(version);
            }
            LinePayload::UserTeam { folding_id, team } if identity.folding_id.is_empty() => {
                identity.folding_id.clone_from(folding_id);
                identity.team = *team;
            }
            LinePayload::UnitsCompleted(count) => identity.units_completed = Some(*count),
            _ => {}
        }
    }
    identity
}

fn split_units(lines: &[LogLine], run: usize, start: usize, end: usize) -> Vec<UnitRange> {
    let starts: Vec<usize> = (start..end)
        .filter(|&i| lines[i].kind == LineKind::UnitProcessing)
        .collect();

    starts
        .iter()
        .enumerate()
        .map(|(n, &unit_start)| {
            let unit_end = starts.get(n + 1).copied().unwrap_or(end);
            let queue_index = lines[unit_start..unit_end].iter().find_map(|l| match l.payload {
                LinePayload::QueueIndex(index) => Some(index),
                _ => None,
            });
            UnitRange {
                run,
                start: unit_start,
                end: unit_end,
                queue_index,
            }
        })
        .collect()
}
