//! Production math: units per day, bonus multiplier, points per day.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::frames::duration_secs;
use crate::reconcile::ReconciledUnit;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Per-project constants published by the assignment servers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProteinParams {
    /// Frames per unit.
    pub frames: u32,
    /// Base credit.
    pub credit: f64,
    pub preferred_days: f64,
    pub maximum_days: f64,
    /// Bonus factor; zero or negative disables the bonus.
    pub k_factor: f64,
}

/// One estimate of unit completion time run through the formulas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductionEstimate {
    #[serde(with = "duration_secs")]
    pub estimated_time: TimeDelta,
    pub multiplier: f64,
    pub credit: f64,
    pub points_per_day: f64,
}

/// Frame-time and download-time estimates side by side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProductionValues {
    #[serde(with = "duration_secs")]
    pub frame_time: TimeDelta,
    pub units_per_day: f64,
    pub by_frame_time: ProductionEstimate,
    /// Present only when the download time is known.
    pub by_download_time: Option<ProductionEstimate>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductionCalculator {
    params: ProteinParams,
    decimal_places: u32,
}

impl ProductionCalculator {
    pub const fn new(params: ProteinParams, decimal_places: u32) -> Self {
        Self {
            params,
            decimal_places,
        }
    }

    pub const fn params(&self) -> &ProteinParams {
        &self.params
    }

    /// Units completed per day at `frame_time` per frame.
    pub fn units_per_day(&self, frame_time: TimeDelta) -> f64 {
        let unit_seconds = seconds(frame_time) * f64::from(self.params.frames);
        if unit_seconds <= 0.0 {
            return 0.0;
        }
        SECONDS_PER_DAY / unit_seconds
    }

    /// Quick return bonus multiplier for a unit finishing after `estimated_time`.
    pub fn multiplier(&self, estimated_time: TimeDelta) -> f64 {
        let days = seconds(estimated_time) / SECONDS_PER_DAY;
        let ProteinParams {
            preferred_days,
            maximum_days,
            k_factor,
            ..
        } = self.params;
        if k_factor > 0.0 && days > 0.0 && days <= preferred_days {
            (maximum_days * k_factor / days).sqrt()
        } else {
            1.0
        }
    }

    pub fn points_per_day(&self, frame_time: TimeDelta, estimated_time: TimeDelta) -> f64 {
        let ppd = self.units_per_day(frame_time)
            * self.params.credit
            * self.multiplier(estimated_time);
        round_to(ppd, self.decimal_places)
    }

    pub fn bonus_credit(&self, estimated_time: TimeDelta) -> f64 {
        round_to(self.params.credit * self.multiplier(estimated_time), 0)
    }

    /// Computes both estimates.
    ///
    /// The frame-time estimate assumes the whole unit runs at `frame_time`.
    /// The download-time estimate adds the time remaining at `frame_time` to
    /// what has already passed since download.
    pub fn production_values(
        &self,
        frame_time: TimeDelta,
        elapsed_since_download: Option<TimeDelta>,
        percent_complete: u8,
    ) -> ProductionValues {
        let frames = i32::try_from(self.params.frames).unwrap_or(i32::MAX);
        let whole_unit = frame_time.checked_mul(frames).unwrap_or(TimeDelta::MAX);

        let remaining_fraction = f64::from(100 - percent_complete.min(100)) / 100.0;
        let remaining = scale(whole_unit, remaining_fraction);

        ProductionValues {
            frame_time,
            units_per_day: self.units_per_day(frame_time),
            by_frame_time: self.estimate(frame_time, whole_unit),
            by_download_time: elapsed_since_download.map(|elapsed| {
                self.estimate(frame_time, elapsed.checked_add(&remaining).unwrap_or(TimeDelta::MAX))
            }),
        }
    }

    /// Production for a reconciled unit, or `None` before any frame time is known.
    pub fn for_unit(&self, unit: &ReconciledUnit, now: DateTime<Utc>) -> Option<ProductionValues> {
        let frame_time = unit.frame_time()?;
        Some(self.production_values(
            frame_time,
            unit.elapsed_since_download(now),
            unit.frames.percent_complete(),
        ))
    }

    fn estimate(&self, frame_time: TimeDelta, estimated_time: TimeDelta) -> ProductionEstimate {
        ProductionEstimate {
            estimated_time,
            multiplier: self.multiplier(estimated_time),
            credit: self.bonus_credit(estimated_time),
            points_per_day: self.points_per_day(frame_time, estimated_time),
        }
    }
}

/// Rounds half away from zero to `places` decimals.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10_f64.powi(i32::try_from(places).unwrap_or(i32::MAX));
    if !factor.is_finite() {
        return value;
    }
    (value * factor).round() / factor
}

#[allow(clippy::cast_precision_loss)]
fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

#[allow(clippy::cast_possible_truncation)]
fn scale(delta: TimeDelta, fraction: f64) -> TimeDelta {
    TimeDelta::try_milliseconds((seconds(delta) * fraction * 1000.0).round() as i64)
        .unwrap_or(TimeDelta::MAX)
}
