//! Work unit data extracted from a log span.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::fahlog::LineSpan;
use crate::frames::FrameProgress;
use crate::log::{LineKind, LinePayload, WorkUnitResult};
use crate::types::Fingerprint;

/// What the client was doing at the end of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    #[default]
    Unknown,
    /// Waiting on the assignment server; no unit is assigned yet.
    GettingWorkPacket,
    Running,
    SendingResults,
    Paused,
}

/// A fingerprint logged somewhere in a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sighting {
    pub fingerprint: Fingerprint,
    /// Index of the line in the whole log.
    pub line: usize,
}

/// Everything a span says about one work unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogUnitData {
    pub start_time: Option<NaiveTime>,
    pub frames: FrameProgress,
    pub core_version: String,
    pub protein_name: Option<String>,
    pub unit_result: WorkUnitResult,
    pub status: ClientStatus,
    /// Every fingerprint sighting, in log order.
    pub sightings: Vec<Sighting>,
    /// Index into `sightings` of the unit's own identity line.
    identity: Option<usize>,
}

impl LogUnitData {
    /// Extracts unit data from `span`.
    ///
    /// A span may cover several units (the whole current run); the frames
    /// and result then describe the last one. The identity is the first
    /// sighting after the last core start, since earlier sightings can
    /// belong to a previous unit. Malformed frame lines are reported and
    /// skipped.
    pub fn from_span(span: &LineSpan, sink: &mut dyn DiagnosticSink) -> Self {
        let mut data = Self {
            start_time: span.lines().iter().find_map(|l| l.time),
            ..Self::default()
        };
        let mut core_started_at: Option<usize> = None;

        for line in span.lines() {
            match line.kind {
                LineKind::UnitProcessing => {
                    data.frames = FrameProgress::new();
                    data.unit_result = WorkUnitResult::Unknown;
                    data.status = ClientStatus::Running;
                }
                LineKind::CoreStart => {
                    core_started_at = Some(data.sightings.len());
                    data.status = ClientStatus::Running;
                }
                LineKind::Working => data.status = ClientStatus::Running,
                LineKind::GettingWorkPacket => data.status = ClientStatus::GettingWorkPacket,
                LineKind::SendingResults => data.status = ClientStatus::SendingResults,
                LineKind::Paused => data.status = ClientStatus::Paused,
                _ => {}
            }

            match &line.payload {
                LinePayload::Frame(frame) => {
                    data.frames.set_frame(
                        frame.percent,
                        frame.raw_complete,
                        frame.raw_total,
                        frame.time,
                    );
                    data.status = ClientStatus::Running;
                }
                LinePayload::Project(fingerprint) => data.sightings.push(Sighting {
                    fingerprint: *fingerprint,
                    line: line.index,
                }),
                LinePayload::UnitResult(result) => data.unit_result = *result,
                LinePayload::CoreVersion(version) => data.core_version.clone_from(version),
                LinePayload::Protein(name) => data.protein_name = Some(name.clone()),
                LinePayload::Malformed(reason) if line.kind == LineKind::Frame => sink.notice(
                    Severity::Warning,
                    format!("line {}: skipped malformed frame: {reason}", line.index + 1),
                ),
                LinePayload::Malformed(reason) => sink.notice(
                    Severity::Debug,
                    format!("line {}: {reason}", line.index + 1),
                ),
                _ => {}
            }
        }

        data.identity = core_started_at.filter(|&i| i < data.sightings.len());
        data
    }

    /// The unit's own fingerprint, unknown if no identity line was seen.
    pub fn fingerprint(&self) -> Fingerprint {
        self.identity
            .and_then(|i| self.sightings.get(i))
            .map_or(Fingerprint::UNKNOWN, |s| s.fingerprint)
    }

    pub const fn identity_index(&self) -> Option<usize> {
        self.identity
    }

    /// Adopts the last sighting matching `expected` when no identity line
    /// has been seen yet.
    ///
    /// The last match is taken, not the first: a sighting left over from the
    /// previous unit can be logged before this unit's identity line.
    /// Returns `true` if an identity was adopted.
    pub fn backfill_identity(&mut self, expected: &Fingerprint) -> bool {
        if self.fingerprint().is_known() || !expected.is_known() {
            return false;
        }
        let adopted = self
            .sightings
            .iter()
            .rposition(|s| s.fingerprint.matches(expected));
        if adopted.is_some() {
            self.identity = adopted;
        }
        adopted.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::NoticeLog;
    use crate::fahlog::RunIdentity;
    use crate::log::tokenize;

    fn span(text: &str) -> LineSpan {
        LineSpan::new(tokenize(text), RunIdentity::default())
    }

    const UNIT: &str = "\
[19:40:16] + Processing work unit
[19:40:16] Working on queue slot 04 [March 10 19:40:16 UTC]
[19:40:16] Folding@Home Gromacs SMP Core
[19:40:16] Version 2.10 (Sun Aug 30 03:43:28 CEST 2009)
[19:40:17] Project: 2677 (Run 14, Clone 69, Gen 39)
[19:40:23] Completed 0 out of 250000 steps  (0%)
[19:47:55] Completed 2500 out of 250000 steps  (1%)
[19:55:13] Completed 5000 out of 250000 steps  (2%)
";

    #[test]
    fn extracts_unit_fields() {
        let mut sink = NoticeLog::new();
        let data = LogUnitData::from_span(&span(UNIT), &mut sink);

        assert_eq!(data.start_time, NaiveTime::from_hms_opt(19, 40, 16));
        assert_eq!(data.core_version, "2.10");
        assert_eq!(data.fingerprint(), Fingerprint::new(2677, 14, 69, 39));
        assert_eq!(data.frames.observed(), 3);
        assert_eq!(data.frames.percent_complete(), 2);
        assert_eq!(data.status, ClientStatus::Running);
        assert!(sink.notices().is_empty());
    }

    #[test]
    fn sighting_before_core_start_is_not_identity() {
        let text = "\
[20:43:50] + Processing work unit
[20:43:50] Project: 2669 (Run 13, Clone 247, Gen 48)
[20:43:55] Folding@Home Gromacs SMP Core
";
        let mut sink = NoticeLog::new();
        let data = LogUnitData::from_span(&span(text), &mut sink);
        assert_eq!(data.sightings.len(), 1);
        assert!(!data.fingerprint().is_known());
    }

    #[test]
    fn backfill_adopts_last_matching_sighting() {
        let text = "\
[20:43:50] + Processing work unit
[20:43:50] Project: 2677 (Run 14, Clone 69, Gen 39)
[20:43:51] Project: 2669 (Run 13, Clone 247, Gen 48)
[20:43:52] Project: 2677 (Run 14, Clone 69, Gen 39)
";
        let mut sink = NoticeLog::new();
        let mut data = LogUnitData::from_span(&span(text), &mut sink);
        let expected = Fingerprint::new(2677, 14, 69, 39);

        assert!(data.backfill_identity(&expected));
        assert_eq!(data.identity_index(), Some(2));
        assert_eq!(data.fingerprint(), expected);
    }

    #[test]
    fn backfill_leaves_known_identity_alone() {
        let mut sink = NoticeLog::new();
        let mut data = LogUnitData::from_span(&span(UNIT), &mut sink);
        assert!(!data.backfill_identity(&Fingerprint::new(1, 2, 3, 4)));
        assert_eq!(data.fingerprint(), Fingerprint::new(2677, 14, 69, 39));
    }

    #[test]
    fn backfill_without_match_keeps_unknown() {
        let text = "[20:43:50] Project: 2669 (Run 13, Clone 247, Gen 48)\n";
        let mut sink = NoticeLog::new();
        let mut data = LogUnitData::from_span(&span(text), &mut sink);
        assert!(!data.backfill_identity(&Fingerprint::new(2677, 14, 69, 39)));
        assert!(!data.fingerprint().is_known());
        assert!(!data.backfill_identity(&Fingerprint::UNKNOWN));
    }

    #[test]
    fn malformed_frame_is_isolated() {
        let text = format!("{UNIT}[20:02:30] Completed 7500 out of 250000 steps  (300%)\n[20:09:48] Completed 10000 out of 250000 steps  (4%)\n");
        let mut sink = NoticeLog::new();
        let data = LogUnitData::from_span(&span(&text), &mut sink);

        assert_eq!(data.frames.observed(), 4);
        assert_eq!(data.frames.percent_complete(), 4);
        assert_eq!(sink.notices().len(), 1);
        assert_eq!(sink.notices()[0].severity, Severity::Warning);
        assert!(sink.notices()[0].message.starts_with("line 9:"));
    }

    #[test]
    fn last_status_line_wins() {
        let text = format!(
            "{UNIT}[20:43:50] Folding@home Core Shutdown: FINISHED_UNIT\n[20:43:51] + Attempting to send results\n[20:43:55] + Attempting to get work packet\n"
        );
        let mut sink = NoticeLog::new();
        let data = LogUnitData::from_span(&span(&text), &mut sink);
        assert_eq!(data.unit_result, WorkUnitResult::FinishedUnit);
        assert_eq!(data.status, ClientStatus::GettingWorkPacket);
    }

    #[test]
    fn run_span_describes_last_unit() {
        let text = format!(
            "{UNIT}[20:43:50] Folding@home Core Shutdown: FINISHED_UNIT\n\
             [20:43:55] + Processing work unit\n\
             [20:43:56] Folding@Home Gromacs SMP Core\n\
             [20:43:57] Project: 2669 (Run 13, Clone 247, Gen 48)\n"
        );
        let mut sink = NoticeLog::new();
        let data = LogUnitData::from_span(&span(&text), &mut sink);
        assert_eq!(data.fingerprint(), Fingerprint::new(2669, 13, 247, 48));
        assert_eq!(data.unit_result, WorkUnitResult::Unknown);
        assert!(data.frames.is_empty());
        assert_eq!(data.sightings.len(), 2);
    }
}
