//! History command listing recorded units.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use fw_core::WorkUnitResult;
use fw_db::{Database, UnitRecord};
use serde::Serialize;

/// A recorded unit for display.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub client: String,
    pub protein_tag: String,
    pub protein_name: String,
    pub download_time: Option<DateTime<Utc>>,
    pub finished_time: Option<DateTime<Utc>>,
    pub percent_complete: u8,
    pub frames_observed: u32,
    pub unit_result: WorkUnitResult,
    pub last_seen: DateTime<Utc>,
}

impl From<UnitRecord> for HistoryEntry {
    fn from(record: UnitRecord) -> Self {
        Self {
            protein_tag: record.fingerprint.tag(),
            percent_complete: record.percent_complete(),
            frames_observed: record.frames.observed(),
            id: record.id,
            client: record.client,
            protein_name: record.protein_name,
            download_time: record.download_time,
            finished_time: record.finished_time,
            unit_result: record.unit_result,
            last_seen: record.last_seen,
        }
    }
}

pub fn get_history(db: &Database, client: Option<&str>) -> Result<Vec<HistoryEntry>> {
    let records = match client {
        Some(name) => db.list_units_for_client(name)?,
        None => db.list_units()?,
    };
    Ok(records.into_iter().map(HistoryEntry::from).collect())
}

/// Formats the history for human-readable output.
pub fn format_history(entries: &[HistoryEntry]) -> String {
    let mut output = String::new();

    if entries.is_empty() {
        writeln!(output, "No units recorded.").unwrap();
        writeln!(output).unwrap();
        writeln!(
            output,
            "Hint: Run 'fw sync' to record units from configured clients."
        )
        .unwrap();
        return output;
    }

    writeln!(
        output,
        "{:<10}  {:<18}  {:<16}  {:>8}  RESULT",
        "CLIENT", "UNIT", "DOWNLOADED", "PROGRESS"
    )
    .unwrap();
    for entry in entries {
        let downloaded = entry
            .download_time
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        writeln!(
            output,
            "{:<10}  {:<18}  {downloaded:<16}  {:>8}  {}",
            entry.client,
            entry.protein_tag,
            format!("{}%", entry.percent_complete),
            entry.unit_result
        )
        .unwrap();
    }
    output
}

/// Runs the history command.
pub fn run<W: Write>(writer: &mut W, db: &Database, client: Option<&str>, json: bool) -> Result<()> {
    let entries = get_history(db, client)?;
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&entries)?)?;
    } else {
        write!(writer, "{}", format_history(&entries))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, TimeZone};
    use fw_core::{Fingerprint, ReconciledUnit};
    use insta::assert_snapshot;

    fn record(client: &str, fingerprint: Fingerprint, hour: u32, percent: u8) -> UnitRecord {
        let mut unit = ReconciledUnit {
            fingerprint,
            download_time: Utc.with_ymd_and_hms(2009, 3, 10, hour, 40, 0).single(),
            ..ReconciledUnit::default()
        };
        for p in 0..=percent {
            unit.frames.set_frame(
                p,
                u64::from(p) * 2500,
                250_000,
                NaiveTime::from_hms_opt(hour, 41, u32::from(p)).unwrap(),
            );
        }
        let seen = Utc.with_ymd_and_hms(2009, 3, 10, 23, 0, 0).unwrap();
        UnitRecord::from_unit(client, &unit, seen).unwrap()
    }

    fn db() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_units(&[
            record("home", Fingerprint::new(2677, 14, 69, 39), 20, 1),
            record("work", Fingerprint::new(2669, 13, 247, 48), 19, 0),
        ])
        .unwrap();
        db
    }

    #[test]
    fn history_lists_units_by_download_time() {
        let entries = get_history(&db(), None).unwrap();
        assert_snapshot!(format_history(&entries), @r"
        CLIENT      UNIT                DOWNLOADED        PROGRESS  RESULT
        work        P2669R13C247G48     2009-03-10 19:40        0%  unknown
        home        P2677R14C69G39      2009-03-10 20:40        1%  unknown
        ");
    }

    #[test]
    fn history_filters_by_client() {
        let entries = get_history(&db(), Some("home")).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].protein_tag, "P2677R14C69G39");
        assert_eq!(entries[0].frames_observed, 2);
    }

    #[test]
    fn empty_history_shows_hint() {
        let db = Database::open_in_memory().unwrap();
        let mut output = Vec::new();
        run(&mut output, &db, None, false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        No units recorded.

        Hint: Run 'fw sync' to record units from configured clients.
        ");
    }

    #[test]
    fn history_json_is_an_array() {
        let mut output = Vec::new();
        run(&mut output, &db(), None, true).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["unit_result"], "unknown");
        assert_eq!(json[1]["percent_complete"], 1);
    }
}
