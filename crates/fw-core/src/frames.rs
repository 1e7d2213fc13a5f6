//! Frame progress tracking for a single work unit.
//!
//! A work unit reports progress as percentage checkpoints ("frames"). Each
//! percent is recorded at most once; the first write wins.

use std::collections::BTreeMap;

use chrono::{NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Highest valid frame percent.
pub const MAX_PERCENT: u8 = 100;

/// One progress checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub percent: u8,
    pub raw_complete: u64,
    pub raw_total: u64,
    /// Wall clock time-of-day the frame was logged.
    pub time: NaiveTime,
    /// Time since the `percent - 1` frame, zero when that frame was not seen.
    #[serde(with = "duration_secs")]
    pub duration: TimeDelta,
}

/// Accumulates [`FrameEvent`]s for a work unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameProgress {
    frames: BTreeMap<u8, FrameEvent>,
    latest: Option<u8>,
    observed: u32,
}

impl FrameProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a frame.
    ///
    /// Returns `false` without changing anything when `percent` is already
    /// recorded or exceeds [`MAX_PERCENT`].
    pub fn set_frame(
        &mut self,
        percent: u8,
        raw_complete: u64,
        raw_total: u64,
        time: NaiveTime,
    ) -> bool {
        if percent > MAX_PERCENT || self.frames.contains_key(&percent) {
            return false;
        }

        let duration = percent
            .checked_sub(1)
            .and_then(|prev| self.frames.get(&prev))
            .map_or(TimeDelta::zero(), |prev| elapsed(prev.time, time));

        self.frames.insert(
            percent,
            FrameEvent {
                percent,
                raw_complete,
                raw_total,
                time,
                duration,
            },
        );
        self.latest = Some(percent);
        self.observed += 1;
        true
    }

    pub fn frame(&self, percent: u8) -> Option<&FrameEvent> {
        self.frames.get(&percent)
    }

    /// The most recently recorded frame.
    pub fn latest(&self) -> Option<&FrameEvent> {
        self.latest.and_then(|p| self.frames.get(&p))
    }

    pub fn raw_complete(&self) -> u64 {
        self.latest().map_or(0, |f| f.raw_complete)
    }

    pub fn raw_total(&self) -> u64 {
        self.latest().map_or(0, |f| f.raw_total)
    }

    /// Number of distinct frames recorded.
    pub const fn observed(&self) -> u32 {
        self.observed
    }

    /// Percent of the most recent frame, zero when none recorded.
    pub fn percent_complete(&self) -> u8 {
        self.latest.unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames in percent order.
    pub fn iter(&self) -> impl Iterator<Item = &FrameEvent> {
        self.frames.values()
    }

    /// Average duration of frames whose predecessor was also observed.
    ///
    /// Frames without a predecessor carry a zero duration and would drag the
    /// average down, so they are left out.
    pub fn average_frame_time(&self) -> Option<TimeDelta> {
        let timed: Vec<TimeDelta> = self
            .frames
            .values()
            .filter(|f| f.percent > 0 && self.frames.contains_key(&(f.percent - 1)))
            .map(|f| f.duration)
            .collect();
        let count = i32::try_from(timed.len()).ok().filter(|&n| n > 0)?;
        let total = timed.into_iter().fold(TimeDelta::zero(), |acc, d| acc + d);
        Some(total / count)
    }
}

/// Time from `prev` to `next`, treating a backwards step as a midnight rollover.
fn elapsed(prev: NaiveTime, next: NaiveTime) -> TimeDelta {
    let delta = next.signed_duration_since(prev);
    if delta < TimeDelta::zero() {
        delta + TimeDelta::days(1)
    } else {
        delta
    }
}

pub(crate) mod duration_secs {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &TimeDelta, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<TimeDelta, D::Error> {
        let secs = i64::deserialize(d)?;
        TimeDelta::try_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("duration out of range: {secs}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M:%S").unwrap()
    }

    #[test]
    fn duration_is_relative_to_previous_percent() {
        let mut frames = FrameProgress::new();
        frames.set_frame(0, 0, 250_000, t("00:05:12"));
        frames.set_frame(1, 2_500, 250_000, t("00:13:34"));

        let frame = frames.frame(1).unwrap();
        assert_eq!(frame.duration, TimeDelta::seconds(8 * 60 + 22));
    }

    #[test]
    fn midnight_rollover_adds_a_day() {
        let mut frames = FrameProgress::new();
        frames.set_frame(4, 10_000, 250_000, t("23:45:12"));
        frames.set_frame(5, 12_500, 250_000, t("00:03:54"));

        let frame = frames.frame(5).unwrap();
        assert_eq!(frame.duration, TimeDelta::seconds(18 * 60 + 42));
    }

    #[test]
    fn first_write_wins() {
        let mut frames = FrameProgress::new();
        assert!(frames.set_frame(3, 7_500, 250_000, t("01:00:00")));
        assert!(!frames.set_frame(3, 9_999, 1, t("02:00:00")));

        let frame = frames.frame(3).unwrap();
        assert_eq!(frame.raw_complete, 7_500);
        assert_eq!(frame.time, t("01:00:00"));
        assert_eq!(frames.observed(), 1);
    }

    #[test]
    fn missing_predecessor_gives_zero_duration() {
        let mut frames = FrameProgress::new();
        frames.set_frame(10, 25_000, 250_000, t("10:00:00"));
        assert_eq!(frames.frame(10).unwrap().duration, TimeDelta::zero());
    }

    #[test]
    fn rejects_percent_above_hundred() {
        let mut frames = FrameProgress::new();
        assert!(!frames.set_frame(101, 1, 1, t("10:00:00")));
        assert!(frames.is_empty());
        assert_eq!(frames.observed(), 0);
    }

    #[test]
    fn latest_reflects_last_write() {
        let mut frames = FrameProgress::new();
        assert!(frames.latest().is_none());
        assert_eq!(frames.raw_complete(), 0);

        frames.set_frame(0, 0, 500, t("10:00:00"));
        frames.set_frame(1, 5, 500, t("10:01:00"));

        assert_eq!(frames.latest().unwrap().percent, 1);
        assert_eq!(frames.raw_complete(), 5);
        assert_eq!(frames.raw_total(), 500);
        assert_eq!(frames.percent_complete(), 1);
    }

    #[test]
    fn average_skips_frames_without_predecessor() {
        let mut frames = FrameProgress::new();
        frames.set_frame(0, 0, 100, t("10:00:00"));
        frames.set_frame(1, 1, 100, t("10:05:00"));
        frames.set_frame(2, 2, 100, t("10:15:00"));
        frames.set_frame(7, 7, 100, t("11:00:00"));

        assert_eq!(frames.average_frame_time(), Some(TimeDelta::seconds(450)));
    }

    #[test]
    fn average_is_none_without_timed_frames() {
        let mut frames = FrameProgress::new();
        frames.set_frame(0, 0, 100, t("10:00:00"));
        assert_eq!(frames.average_frame_time(), None);
    }
}
