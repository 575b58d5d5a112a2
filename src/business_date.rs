//! Business-date resolution.
//!
//! The POS trading day is offset from UTC midnight by a fixed boundary hour:
//! a sale rung up at 01:30 UTC still belongs to the previous trading day when
//! the boundary is 04:00. Both the fetch-window selection and the aggregation
//! bucketing must go through this one type — mixing "UTC calendar day" and
//! "business date" arithmetic across those two call sites is the classic
//! source of reconciliation discrepancies.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One POS trading day. Wire form is the compact `yyyymmdd` integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BusinessDate(NaiveDate);

impl BusinessDate {
    pub fn new(date: NaiveDate) -> Self {
        BusinessDate(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Compact `yyyymmdd` form used by the POS API and storage.
    pub fn compact(&self) -> u32 {
        self.0.year() as u32 * 10_000 + self.0.month() * 100 + self.0.day()
    }

    /// Parse the compact `yyyymmdd` form. Rejects impossible dates.
    pub fn from_compact(v: u32) -> Option<Self> {
        let year = (v / 10_000) as i32;
        let month = (v / 100) % 100;
        let day = v % 100;
        NaiveDate::from_ymd_opt(year, month, day).map(BusinessDate)
    }

    /// Half-open `[start, end)` UTC instant window covering this trading day.
    /// The window starts `day_boundary_hour` hours after UTC midnight and
    /// spans exactly 24 hours.
    pub fn window(&self, day_boundary_hour: u32) -> (DateTime<Utc>, DateTime<Utc>) {
        let midnight = self.0.and_hms_opt(0, 0, 0).expect("midnight is valid");
        let start = midnight.and_utc() + Duration::hours(day_boundary_hour as i64);
        (start, start + Duration::hours(24))
    }

    /// Bucket an instant into its trading day. Exact inverse of [`window`]:
    /// for any instant `t`, `for_instant(t, h)` is the unique date `d` with
    /// `d.window(h).0 <= t < d.window(h).1`.
    ///
    /// [`window`]: BusinessDate::window
    pub fn for_instant(instant: DateTime<Utc>, day_boundary_hour: u32) -> Self {
        BusinessDate((instant - Duration::hours(day_boundary_hour as i64)).date_naive())
    }

    /// The next trading day. Used for range iteration.
    pub fn succ(&self) -> Self {
        BusinessDate(self.0.succ_opt().expect("date overflow"))
    }
}

impl fmt::Display for BusinessDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bd(y: i32, m: u32, d: u32) -> BusinessDate {
        BusinessDate::new(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_compact_round_trip() {
        let date = bd(2026, 1, 15);
        assert_eq!(date.compact(), 20260115);
        assert_eq!(BusinessDate::from_compact(20260115), Some(date));
        assert_eq!(BusinessDate::from_compact(20260230), None); // Feb 30
    }

    #[test]
    fn test_window_offsets_by_boundary_hour() {
        let (start, end) = bd(2026, 1, 15).window(4);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 15, 4, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 16, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_instant_before_boundary_belongs_to_previous_day() {
        // 01:30 UTC on Jan 16 is still trading day Jan 15 with a 4am boundary.
        let late_night = Utc.with_ymd_and_hms(2026, 1, 16, 1, 30, 0).unwrap();
        assert_eq!(BusinessDate::for_instant(late_night, 4), bd(2026, 1, 15));

        // 04:00 exactly opens the new day.
        let opening = Utc.with_ymd_and_hms(2026, 1, 16, 4, 0, 0).unwrap();
        assert_eq!(BusinessDate::for_instant(opening, 4), bd(2026, 1, 16));
    }

    #[test]
    fn test_window_and_for_instant_are_inverses() {
        for hour in [0u32, 4, 6] {
            let date = bd(2026, 3, 1);
            let (start, end) = date.window(hour);
            assert_eq!(BusinessDate::for_instant(start, hour), date);
            assert_eq!(
                BusinessDate::for_instant(end - Duration::seconds(1), hour),
                date
            );
            assert_eq!(BusinessDate::for_instant(end, hour), date.succ());
        }
    }
}
