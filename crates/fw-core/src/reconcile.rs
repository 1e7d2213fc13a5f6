//! Work unit reconciliation.
//!
//! Merges the queue snapshot, the log and the unit info side channel into
//! one record per slot.
//!
//! # Algorithm Summary
//!
//! With a snapshot, each of the 10 slots is built from its queue entry,
//! layered with what the slot's log span says and, for the active slot,
//! with unit info. A slot is kept only if the merged fingerprint matches
//! the log or the unit info. The active slot is never dropped: on a
//! mismatch it is rebuilt from the current unit (or current run) span.
//!
//! Without a snapshot, two slots are produced: the previous unit and the
//! current unit, both straight from the log.

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::fahlog::{LineSpan, LogLineSource, RunIdentity};
use crate::frames::FrameProgress;
use crate::log::WorkUnitResult;
use crate::log_unit::{ClientStatus, LogUnitData};
use crate::queue::{QUEUE_SLOTS, QueueEntry, QueueSnapshot, QueueSnapshotSource};
use crate::types::Fingerprint;
use crate::unit_info::{UnitInfoLogData, UnitInfoLogSource};

/// Number of slots produced without a queue snapshot.
pub const LOG_ONLY_SLOTS: usize = 2;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A source handed over data its contract rules out.
    #[error("contract violation: {0}")]
    ContractViolation(String),
}

/// The authoritative record for one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledUnit {
    pub fingerprint: Fingerprint,
    pub protein_name: String,
    pub protein_tag: String,
    pub download_time: Option<DateTime<Utc>>,
    pub due_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
    pub folding_id: String,
    pub team: u32,
    pub core_id: String,
    pub core_version: String,
    /// Time of day the unit's span began.
    pub start_time: Option<NaiveTime>,
    pub frames: FrameProgress,
    pub unit_result: WorkUnitResult,
}

impl ReconciledUnit {
    /// Average frame time over consecutively observed frames.
    pub fn frame_time(&self) -> Option<TimeDelta> {
        self.frames.average_frame_time()
    }

    /// Time since download, if the download time is known.
    pub fn elapsed_since_download(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
        self.download_time
            .map(|t| now - t)
            .filter(|d| *d >= TimeDelta::zero())
    }
}

/// Whether slots came from a queue snapshot or from the log alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SlotMode {
    Queue { active: usize },
    LogOnly,
}

/// One output position: the record (if any) and the span it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub unit: Option<ReconciledUnit>,
    pub span: Option<LineSpan>,
}

impl Slot {
    fn new(unit: Option<ReconciledUnit>, span: LineSpan) -> Self {
        Self {
            unit,
            span: (!span.is_empty()).then_some(span),
        }
    }
}

/// Result of a pass: index-aligned slots.
///
/// Always 10 slots in [`SlotMode::Queue`] and 2 in [`SlotMode::LogOnly`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    mode: SlotMode,
    slots: Vec<Slot>,
}

impl Reconciliation {
    pub const fn mode(&self) -> SlotMode {
        self.mode
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Index of the slot the client is working on.
    pub const fn active_index(&self) -> usize {
        match self.mode {
            SlotMode::Queue { active } => active,
            SlotMode::LogOnly => LOG_ONLY_SLOTS - 1,
        }
    }

    pub fn active(&self) -> Option<&ReconciledUnit> {
        self.slots
            .get(self.active_index())
            .and_then(|s| s.unit.as_ref())
    }

    pub fn units(&self) -> impl Iterator<Item = Option<&ReconciledUnit>> {
        self.slots.iter().map(|s| s.unit.as_ref())
    }

    pub fn spans(&self) -> impl Iterator<Item = Option<&LineSpan>> {
        self.slots.iter().map(|s| s.span.as_ref())
    }
}

/// Runs reconciliation passes, reporting to an injected sink.
///
/// Not reentrant: callers run at most one pass per client at a time.
pub struct Reconciler<'a> {
    sink: &'a mut dyn DiagnosticSink,
}

impl<'a> Reconciler<'a> {
    pub fn new(sink: &'a mut dyn DiagnosticSink) -> Self {
        Self { sink }
    }

    /// Reconciles all three sources.
    ///
    /// Source failures degrade the result and are reported as warnings.
    /// Only a [`ReconcileError::ContractViolation`] aborts the pass.
    pub fn reconcile(
        &mut self,
        queue: &dyn QueueSnapshotSource,
        log: &dyn LogLineSource,
        unit_info: &dyn UnitInfoLogSource,
    ) -> Result<Reconciliation, ReconcileError> {
        match queue.read_snapshot() {
            Ok(Some(snapshot)) => self.reconcile_queue(&snapshot, log, unit_info),
            Ok(None) => {
                self.notice(
                    Severity::Warning,
                    "queue snapshot not found, reading log only".to_string(),
                );
                Ok(self.reconcile_log_only(log, unit_info))
            }
            Err(err) => {
                self.notice(
                    Severity::Warning,
                    format!("queue snapshot unavailable, reading log only: {err}"),
                );
                Ok(self.reconcile_log_only(log, unit_info))
            }
        }
    }

    fn reconcile_queue(
        &mut self,
        snapshot: &QueueSnapshot,
        log: &dyn LogLineSource,
        unit_info: &dyn UnitInfoLogSource,
    ) -> Result<Reconciliation, ReconcileError> {
        check_snapshot(snapshot)?;
        let active = snapshot.current_index;
        let mut slots = Vec::with_capacity(QUEUE_SLOTS);

        for (index, entry) in snapshot.entries.iter().enumerate() {
            let span = log.span_for_slot(index);
            let mut data = LogUnitData::from_span(&span, self.sink);
            let info = if index == active {
                self.read_unit_info(unit_info)
            } else {
                None
            };
            self.backfill(index, entry, &mut data);

            let unit = build_unit(Some(entry), &data, info.as_ref(), span.owner());
            if passes_identity_gate(&unit, &data, info.as_ref()) {
                slots.push(Slot::new(Some(unit), span));
            } else if index == active {
                let (unit, span) = self.active_fallback(index, entry, log, info.as_ref());
                slots.push(Slot::new(Some(unit), span));
            } else {
                if entry.status.describes_unit() {
                    self.notice(
                        Severity::Debug,
                        format!(
                            "slot {index}: queue {} does not match log, skipped",
                            entry.fingerprint
                        ),
                    );
                }
                slots.push(Slot::new(None, span));
            }
        }

        Ok(Reconciliation {
            mode: SlotMode::Queue { active },
            slots,
        })
    }

    /// Rebuilds the active slot from the current unit or current run,
    /// bypassing the identity gate.
    fn active_fallback(
        &mut self,
        index: usize,
        entry: &QueueEntry,
        log: &dyn LogLineSource,
        info: Option<&UnitInfoLogData>,
    ) -> (ReconciledUnit, LineSpan) {
        let (span, source) = match log.current_unit_span() {
            Some(span) => (span, "current unit"),
            None => (log.current_run_span(), "current run"),
        };
        self.notice(
            Severity::Warning,
            format!("slot {index}: active unit does not match log, rebuilding from {source}"),
        );

        let mut data = LogUnitData::from_span(&span, self.sink);
        self.backfill(index, entry, &mut data);

        // Keep the placeholder; surfacing the mismatch here regressed the
        // active slot display while the client waits for an assignment.
        if data.status == ClientStatus::GettingWorkPacket {
            self.notice(
                Severity::Info,
                format!("slot {index}: client is getting a work packet, showing placeholder"),
            );
            return (ReconciledUnit::default(), span);
        }

        let unit = build_unit(Some(entry), &data, info, span.owner());
        (unit, span)
    }

    fn reconcile_log_only(
        &mut self,
        log: &dyn LogLineSource,
        unit_info: &dyn UnitInfoLogSource,
    ) -> Reconciliation {
        let previous = log.previous_unit_span().map_or_else(Slot::default, |span| {
            let data = LogUnitData::from_span(&span, self.sink);
            let unit = build_unit(None, &data, None, span.owner());
            Slot::new(Some(unit), span)
        });

        let span = log.current_unit_span().unwrap_or_else(|| {
            self.notice(
                Severity::Info,
                "no current unit in log, reading the whole current run".to_string(),
            );
            log.current_run_span()
        });
        let data = LogUnitData::from_span(&span, self.sink);
        let info = self.read_unit_info(unit_info);
        let unit = build_unit(None, &data, info.as_ref(), span.owner());
        let current = Slot::new(Some(unit), span);

        Reconciliation {
            mode: SlotMode::LogOnly,
            slots: vec![previous, current],
        }
    }

    fn backfill(&mut self, index: usize, entry: &QueueEntry, data: &mut LogUnitData) {
        if entry.status.describes_unit() && data.backfill_identity(&entry.fingerprint) {
            self.notice(
                Severity::Debug,
                format!(
                    "slot {index}: adopted {} from an earlier log line",
                    entry.fingerprint
                ),
            );
        }
    }

    fn read_unit_info(&mut self, source: &dyn UnitInfoLogSource) -> Option<UnitInfoLogData> {
        source.read_unit_info().unwrap_or_else(|err| {
            self.notice(
                Severity::Warning,
                format!("unit info unavailable: {err}"),
            );
            None
        })
    }

    fn notice(&mut self, severity: Severity, message: String) {
        self.sink.notice(severity, message);
    }
}

/// Convenience wrapper around [`Reconciler::reconcile`].
pub fn reconcile(
    queue: &dyn QueueSnapshotSource,
    log: &dyn LogLineSource,
    unit_info: &dyn UnitInfoLogSource,
    sink: &mut dyn DiagnosticSink,
) -> Result<Reconciliation, ReconcileError> {
    Reconciler::new(sink).reconcile(queue, log, unit_info)
}

fn check_snapshot(snapshot: &QueueSnapshot) -> Result<(), ReconcileError> {
    if snapshot.current_index >= QUEUE_SLOTS {
        return Err(ReconcileError::ContractViolation(format!(
            "active slot {} outside 0..{QUEUE_SLOTS}",
            snapshot.current_index
        )));
    }
    for (index, entry) in snapshot.entries.iter().enumerate() {
        if entry.status.requires_assignment() && !entry.fingerprint.is_known() {
            return Err(ReconcileError::ContractViolation(format!(
                "slot {index} is {} but has no fingerprint",
                entry.status
            )));
        }
    }
    Ok(())
}

/// Merges the sources, most authoritative first. Later layers only fill
/// what earlier ones left unknown, except log-only fields (frames, result,
/// core version, start time) which always come from the log.
fn build_unit(
    entry: Option<&QueueEntry>,
    data: &LogUnitData,
    info: Option<&UnitInfoLogData>,
    owner: &RunIdentity,
) -> ReconciledUnit {
    let mut unit = ReconciledUnit::default();

    if let Some(entry) = entry.filter(|e| e.status.describes_unit()) {
        unit.fingerprint = entry.fingerprint;
        unit.download_time = entry.begin_time;
        unit.due_time = entry.due_time;
        unit.finished_time = entry.end_time;
        unit.folding_id.clone_from(&entry.folding_id);
        unit.team = entry.team;
        unit.core_id.clone_from(&entry.core);
    }

    let logged = data.fingerprint();
    if !unit.fingerprint.is_known() {
        unit.fingerprint = logged;
    }
    if unit.protein_tag.is_empty() && logged.is_known() {
        unit.protein_tag = logged.tag();
    }
    if unit.protein_name.is_empty() {
        unit.protein_name = data.protein_name.clone().unwrap_or_default();
    }
    unit.core_version.clone_from(&data.core_version);
    unit.start_time = data.start_time;
    unit.frames = data.frames.clone();
    unit.unit_result = data.unit_result;

    // Unit info left over from another unit must not leak into this one.
    let info = info.filter(|i| {
        !i.fingerprint.is_known()
            || !unit.fingerprint.is_known()
            || unit.fingerprint.matches(&i.fingerprint)
    });
    if let Some(info) = info {
        if unit.protein_name.is_empty() {
            unit.protein_name.clone_from(&info.protein_name);
        }
        if unit.protein_tag.is_empty() {
            unit.protein_tag.clone_from(&info.protein_tag);
        }
        if unit.download_time.is_none() {
            unit.download_time = info.download_time;
        }
        if unit.due_time.is_none() {
            unit.due_time = info.due_time;
        }
        if !unit.fingerprint.is_known() {
            unit.fingerprint = info.fingerprint;
        }
    }

    if unit.folding_id.is_empty() {
        unit.folding_id.clone_from(&owner.folding_id);
    }
    if unit.team == 0 {
        unit.team = owner.team;
    }
    unit
}

fn passes_identity_gate(
    unit: &ReconciledUnit,
    data: &LogUnitData,
    info: Option<&UnitInfoLogData>,
) -> bool {
    unit.fingerprint.matches(&data.fingerprint())
        || info.is_some_and(|i| unit.fingerprint.matches(&i.fingerprint))
}
