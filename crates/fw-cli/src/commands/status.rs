//! Status command showing each client's reconciled queue.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::{Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use fw_core::{
    Fingerprint, ProductionCalculator, ProductionValues, ReconciledUnit, Severity, SlotMode,
    WorkUnitResult,
};
use serde::Serialize;

use crate::Config;
use crate::monitor::{ClientReport, reconcile_all};

// ========== Status Data ==========

/// One occupied slot, ready for display.
#[derive(Debug, Clone, Serialize)]
pub struct SlotEntry {
    pub slot: usize,
    pub active: bool,
    pub fingerprint: Fingerprint,
    pub protein_tag: String,
    pub protein_name: String,
    pub percent_complete: u8,
    pub frames_observed: u32,
    pub frame_time_secs: Option<i64>,
    pub core: String,
    pub unit_result: WorkUnitResult,
    pub download_time: Option<DateTime<Utc>>,
    pub due_time: Option<DateTime<Utc>>,
    pub production: Option<ProductionValues>,
}

/// A client's status.
#[derive(Debug, Clone, Serialize)]
pub struct ClientView {
    pub client: String,
    pub mode: Option<SlotMode>,
    pub slots: Vec<SlotEntry>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl ClientView {
    pub fn from_report(report: &ClientReport, config: &Config, now: DateTime<Utc>) -> Self {
        let warnings = report
            .notices
            .iter()
            .filter(|n| n.severity >= Severity::Warning)
            .map(|n| n.message.clone())
            .collect();

        match &report.result {
            Ok(reconciliation) => {
                let active = reconciliation.active_index();
                let slots = reconciliation
                    .units()
                    .enumerate()
                    .filter_map(|(slot, unit)| {
                        unit.map(|unit| slot_entry(slot, slot == active, unit, config, now))
                    })
                    .collect();
                Self {
                    client: report.name.clone(),
                    mode: Some(reconciliation.mode()),
                    slots,
                    error: None,
                    warnings,
                }
            }
            Err(err) => Self {
                client: report.name.clone(),
                mode: None,
                slots: Vec::new(),
                error: Some(err.clone()),
                warnings,
            },
        }
    }
}

fn slot_entry(
    slot: usize,
    active: bool,
    unit: &ReconciledUnit,
    config: &Config,
    now: DateTime<Utc>,
) -> SlotEntry {
    let production = config
        .protein(unit.fingerprint.project_id)
        .filter(|_| unit.fingerprint.is_known())
        .and_then(|params| {
            ProductionCalculator::new(params, config.decimal_places).for_unit(unit, now)
        });

    SlotEntry {
        slot,
        active,
        fingerprint: unit.fingerprint,
        protein_tag: unit.protein_tag.clone(),
        protein_name: unit.protein_name.clone(),
        percent_complete: unit.frames.percent_complete(),
        frames_observed: unit.frames.observed(),
        frame_time_secs: unit.frame_time().map(|t| t.num_seconds()),
        core: unit.core_id.clone(),
        unit_result: unit.unit_result,
        download_time: unit.download_time,
        due_time: unit.due_time,
        production,
    }
}

// ========== Human-Readable Output ==========

/// Formats seconds as `7m 32s` or `1h 05m`.
pub fn format_frame_time(secs: i64) -> String {
    let delta = TimeDelta::seconds(secs);
    if delta.num_hours() > 0 {
        format!("{}h {:02}m", delta.num_hours(), delta.num_minutes() % 60)
    } else {
        format!("{}m {:02}s", delta.num_minutes(), secs % 60)
    }
}

fn state(entry: &SlotEntry) -> &'static str {
    match entry.unit_result {
        WorkUnitResult::Unknown if entry.active => "active",
        WorkUnitResult::Unknown => "-",
        result => result.as_str(),
    }
}

fn unit_label(entry: &SlotEntry) -> String {
    if !entry.protein_tag.is_empty() {
        entry.protein_tag.clone()
    } else if entry.fingerprint.is_known() {
        entry.fingerprint.tag()
    } else {
        "-".to_string()
    }
}

/// Formats client statuses for human-readable output.
pub fn format_status(entries: &[ClientView], decimal_places: u32) -> String {
    let mut output = String::new();

    if entries.is_empty() {
        writeln!(output, "No clients configured.").unwrap();
        writeln!(output).unwrap();
        writeln!(
            output,
            "Hint: Add a [[clients]] entry with a name and path to config.toml."
        )
        .unwrap();
        return output;
    }

    let places = decimal_places as usize;
    for (n, entry) in entries.iter().enumerate() {
        if n > 0 {
            writeln!(output).unwrap();
        }

        match entry.mode {
            Some(SlotMode::Queue { active }) => {
                writeln!(output, "{} (queue, active slot {active})", entry.client).unwrap();
            }
            Some(SlotMode::LogOnly) => writeln!(output, "{} (log only)", entry.client).unwrap(),
            None => writeln!(output, "{}", entry.client).unwrap(),
        }

        if let Some(error) = &entry.error {
            writeln!(output, "  error: {error}").unwrap();
        } else if entry.slots.is_empty() {
            writeln!(output, "  No units.").unwrap();
        } else {
            writeln!(
                output,
                "  SLOT  {:<18}  {:>8}  {:>10}  {:>10}  STATE",
                "UNIT", "PROGRESS", "FRAME TIME", "PPD"
            )
            .unwrap();
            for slot in &entry.slots {
                let marker = if slot.active { '*' } else { ' ' };
                let progress = format!("{}%", slot.percent_complete);
                let frame_time = slot
                    .frame_time_secs
                    .map_or_else(|| "-".to_string(), format_frame_time);
                let ppd = slot.production.as_ref().map_or_else(
                    || "-".to_string(),
                    |p| format!("{:.places$}", p.by_frame_time.points_per_day),
                );
                writeln!(
                    output,
                    "  {marker}{:>3}  {:<18}  {progress:>8}  {frame_time:>10}  {ppd:>10}  {}",
                    slot.slot,
                    unit_label(slot),
                    state(slot)
                )
                .unwrap();
            }
        }

        for warning in &entry.warnings {
            writeln!(output, "  warning: {warning}").unwrap();
        }
    }

    output
}

// ========== JSON Output ==========

#[derive(Debug, Serialize)]
pub struct JsonStatus<'a> {
    pub generated_at: String,
    pub clients: &'a [ClientView],
}

/// Formats client statuses as JSON.
pub fn format_status_json(entries: &[ClientView], now: DateTime<Utc>) -> Result<String> {
    let status = JsonStatus {
        generated_at: now.to_rfc3339(),
        clients: entries,
    };
    Ok(serde_json::to_string_pretty(&status)?)
}

// ========== Public Interface ==========

/// Runs the status command.
pub fn run<W: Write>(
    writer: &mut W,
    config: &Config,
    client: Option<&str>,
    json: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    let clients = match client {
        Some(name) => match config.client(name) {
            Some(c) => vec![c.clone()],
            None => bail!("no client named '{name}' in configuration"),
        },
        None => config.clients.clone(),
    };

    let entries: Vec<ClientView> = reconcile_all(&clients, now)
        .iter()
        .map(|report| ClientView::from_report(report, config, now))
        .collect();

    if json {
        writeln!(writer, "{}", format_status_json(&entries, now)?)?;
    } else {
        write!(writer, "{}", format_status(&entries, config.decimal_places))?;
    }
    Ok(())
}
