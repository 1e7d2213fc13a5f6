//! Sync command: reconcile every client and record its units.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fw_db::{Database, UnitRecord};

use crate::Config;
use crate::monitor::reconcile_all;

/// Runs the sync command.
pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<()> {
    if config.clients.is_empty() {
        writeln!(writer, "No clients configured.")?;
        return Ok(());
    }

    for report in reconcile_all(&config.clients, now) {
        let reconciliation = match report.result {
            Ok(reconciliation) => reconciliation,
            Err(err) => {
                writeln!(writer, "{}: skipped ({err})", report.name)?;
                continue;
            }
        };

        let records: Vec<UnitRecord> = reconciliation
            .units()
            .flatten()
            .filter_map(|unit| UnitRecord::from_unit(&report.name, unit, now))
            .collect();
        let written = db
            .upsert_units(&records)
            .with_context(|| format!("failed to record units for {}", report.name))?;
        tracing::info!(client = report.name.as_str(), units = written, "synced");

        let noun = if written == 1 { "unit" } else { "units" };
        writeln!(writer, "{}: {written} {noun} recorded", report.name)?;
    }

    Ok(())
}
