//! Ppd command: production for a given frame time.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use chrono::TimeDelta;
use fw_core::production::ProductionEstimate;
use fw_core::{ProductionCalculator, ProductionValues, ProteinParams};

use super::status::format_frame_time;
use crate::cli::PpdArgs;

pub fn production_for(args: &PpdArgs, decimal_places: u32) -> ProductionValues {
    let params = ProteinParams {
        frames: args.frames,
        credit: args.credit,
        preferred_days: args.preferred_days,
        maximum_days: args.maximum_days,
        k_factor: args.k_factor,
    };
    ProductionCalculator::new(params, decimal_places).production_values(
        TimeDelta::seconds(i64::from(args.frame_time)),
        args.elapsed.map(|secs| TimeDelta::seconds(i64::from(secs))),
        args.percent,
    )
}

fn write_estimate(output: &mut String, title: &str, estimate: &ProductionEstimate, places: usize) {
    writeln!(output, "{title}:").unwrap();
    writeln!(
        output,
        "  Completion: {}",
        format_frame_time(estimate.estimated_time.num_seconds())
    )
    .unwrap();
    writeln!(output, "  Multiplier: {:.2}", estimate.multiplier).unwrap();
    writeln!(output, "  Credit: {:.0}", estimate.credit).unwrap();
    writeln!(output, "  PPD: {:.places$}", estimate.points_per_day).unwrap();
}

/// Formats production values for human-readable output.
pub fn format_production(values: &ProductionValues, decimal_places: u32) -> String {
    let places = decimal_places as usize;
    let mut output = String::new();
    writeln!(
        output,
        "Frame time: {}",
        format_frame_time(values.frame_time.num_seconds())
    )
    .unwrap();
    writeln!(output, "Units per day: {:.3}", values.units_per_day).unwrap();
    writeln!(output).unwrap();
    write_estimate(&mut output, "By frame time", &values.by_frame_time, places);
    writeln!(output).unwrap();
    match &values.by_download_time {
        Some(estimate) => write_estimate(&mut output, "By download time", estimate, places),
        None => writeln!(output, "By download time: unknown (pass --elapsed)").unwrap(),
    }
    output
}

/// Runs the ppd command.
pub fn run<W: Write>(writer: &mut W, args: &PpdArgs, decimal_places: u32) -> Result<()> {
    let values = production_for(args, decimal_places);
    if args.json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&values)?)?;
    } else {
        write!(writer, "{}", format_production(&values, decimal_places))?;
    }
    Ok(())
}
