//! Business calendar - working days and business-hour arithmetic
//!
//! A business day is any day that is not a configured weekend day, unless an
//! explicit calendar entry overrides it (holidays, working Saturdays, ...).
//! Each business day has one business window: 09:00-17:00 local time by
//! default, or the weekday's own window (e.g. a Saturday half-day).

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One override entry for a calendar date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub is_holiday: bool,
    #[serde(default)]
    pub is_weekend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CalendarEntry {
    pub fn holiday(date: NaiveDate, name: impl Into<String>) -> Self {
        Self {
            date,
            is_holiday: true,
            is_weekend: false,
            name: Some(name.into()),
        }
    }

    /// An entry that marks the date as an ordinary working day
    pub fn working_day(date: NaiveDate) -> Self {
        Self {
            date,
            is_holiday: false,
            is_weekend: false,
            name: None,
        }
    }

    pub fn is_business_day(&self) -> bool {
        !self.is_holiday && !self.is_weekend
    }
}

/// Window of one weekday that differs from the default window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub weekday: Weekday,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Business window and weekly rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessHours {
    pub day_start: NaiveTime,
    pub day_end: NaiveTime,
    pub weekend: Vec<Weekday>,
    /// Per-weekday windows replacing `day_start`/`day_end` on that weekday
    pub day_windows: Vec<DayWindow>,
    pub offset: FixedOffset,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            day_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            day_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            weekend: vec![Weekday::Sat, Weekday::Sun],
            day_windows: Vec::new(),
            offset: Utc.fix(),
        }
    }
}

impl BusinessHours {
    /// Opening and closing time on `weekday`
    pub fn window_for(&self, weekday: Weekday) -> (NaiveTime, NaiveTime) {
        self.day_windows
            .iter()
            .find(|w| w.weekday == weekday)
            .map(|w| (w.start, w.end))
            .unwrap_or((self.day_start, self.day_end))
    }
}

/// Working-day calendar: weekly rule plus per-date overrides
#[derive(Debug, Clone, Default)]
pub struct BusinessCalendar {
    hours: BusinessHours,
    overrides: BTreeMap<NaiveDate, CalendarEntry>,
}

impl BusinessCalendar {
    pub fn new(hours: BusinessHours, entries: impl IntoIterator<Item = CalendarEntry>) -> Self {
        let overrides = entries.into_iter().map(|e| (e.date, e)).collect();
        Self { hours, overrides }
    }

    pub fn hours(&self) -> &BusinessHours {
        &self.hours
    }

    pub fn entry(&self, date: NaiveDate) -> Option<&CalendarEntry> {
        self.overrides.get(&date)
    }

    /// Whether `date` is a working day
    pub fn is_business_day(&self, date: NaiveDate) -> bool {
        match self.overrides.get(&date) {
            Some(entry) => entry.is_business_day(),
            None => !self.hours.weekend.contains(&date.weekday()),
        }
    }

    /// Local calendar date of an instant
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.hours.offset).date_naive()
    }

    /// Business window of a date, as UTC instants
    pub fn window(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let (start, end) = self.hours.window_for(date.weekday());
        (self.local_to_utc(date, start), self.local_to_utc(date, end))
    }

    fn local_to_utc(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        let utc = local - Duration::seconds(i64::from(self.hours.offset.local_minus_utc()));
        utc.and_utc()
    }

    /// Advance `start` by `duration` of business time
    ///
    /// Time outside the business window does not count. A start before the window
    /// is clamped to the window start; a start at or after the window end rolls to
    /// the next business day. Non-positive durations return `start` unchanged.
    pub fn add_business_duration(&self, start: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
        if duration <= Duration::zero() {
            return start;
        }

        let mut remaining = duration;
        let mut date = self.local_date(start);
        let mut cursor = start;

        // Terminates because config validation guarantees a business weekday
        // and the override table is finite.
        loop {
            if self.is_business_day(date) {
                let (open, close) = self.window(date);
                if cursor < open {
                    cursor = open;
                }
                if cursor < close {
                    let available = close - cursor;
                    if remaining <= available {
                        return cursor + remaining;
                    }
                    remaining -= available;
                }
            }

            let Some(next) = date.succ_opt() else {
                return cursor;
            };
            date = next;
            cursor = self.window(date).0;
        }
    }

    /// Business time elapsed in `[start, end)`
    pub fn business_duration_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
        if end <= start {
            return Duration::zero();
        }

        let mut total = Duration::zero();
        let mut date = self.local_date(start);
        let last = self.local_date(end);

        while date <= last {
            if self.is_business_day(date) {
                let (open, close) = self.window(date);
                let from = start.max(open);
                let to = end.min(close);
                if from < to {
                    total += to - from;
                }
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn calendar() -> BusinessCalendar {
        BusinessCalendar::new(BusinessHours::default(), Vec::new())
    }

    #[test]
    fn test_default_weekend_rule() {
        let cal = calendar();
        // 2025-03-07 is a Friday
        assert!(cal.is_business_day(date(2025, 3, 7)));
        assert!(!cal.is_business_day(date(2025, 3, 8)));
        assert!(!cal.is_business_day(date(2025, 3, 9)));
        assert!(cal.is_business_day(date(2025, 3, 10)));
    }

    #[test]
    fn test_override_entries_win_both_ways() {
        let cal = BusinessCalendar::new(
            BusinessHours::default(),
            vec![
                CalendarEntry::holiday(date(2025, 3, 10), "Founders Day"),
                CalendarEntry::working_day(date(2025, 3, 8)),
            ],
        );
        assert!(!cal.is_business_day(date(2025, 3, 10)));
        assert!(cal.is_business_day(date(2025, 3, 8)));
    }

    #[test]
    fn test_override_weekend_flag() {
        let entry = CalendarEntry {
            date: date(2025, 3, 11),
            is_holiday: false,
            is_weekend: true,
            name: None,
        };
        let cal = BusinessCalendar::new(BusinessHours::default(), vec![entry]);
        assert!(!cal.is_business_day(date(2025, 3, 11)));
    }

    #[test]
    fn test_add_within_same_day() {
        let cal = calendar();
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 4, 10, 0), Duration::hours(3)),
            at(2025, 3, 4, 13, 0)
        );
    }

    #[test]
    fn test_add_friday_afternoon_rolls_over_weekend() {
        let cal = calendar();
        // 30 minutes on Friday, the remaining 90 minutes on Monday
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 7, 16, 30), Duration::hours(2)),
            at(2025, 3, 10, 10, 30)
        );
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 7, 16, 30), Duration::hours(1)),
            at(2025, 3, 10, 9, 30)
        );
    }

    #[test]
    fn test_add_friday_afternoon_with_six_pm_close() {
        let hours = BusinessHours {
            day_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            ..BusinessHours::default()
        };
        let cal = BusinessCalendar::new(hours, Vec::new());
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 7, 16, 30), Duration::hours(2)),
            at(2025, 3, 10, 9, 30)
        );
    }

    #[test]
    fn test_add_clamps_early_start() {
        let cal = calendar();
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 4, 6, 15), Duration::minutes(30)),
            at(2025, 3, 4, 9, 30)
        );
    }

    #[test]
    fn test_add_after_close_rolls_to_next_day() {
        let cal = calendar();
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 4, 17, 0), Duration::hours(1)),
            at(2025, 3, 5, 10, 0)
        );
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 4, 21, 45), Duration::hours(1)),
            at(2025, 3, 5, 10, 0)
        );
    }

    #[test]
    fn test_add_exact_fit_ends_at_close() {
        let cal = calendar();
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 4, 9, 0), Duration::hours(8)),
            at(2025, 3, 4, 17, 0)
        );
    }

    #[test]
    fn test_add_skips_holiday() {
        let cal = BusinessCalendar::new(
            BusinessHours::default(),
            vec![CalendarEntry::holiday(date(2025, 3, 10), "Closed")],
        );
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 7, 16, 0), Duration::hours(2)),
            at(2025, 3, 11, 10, 0)
        );
    }

    #[test]
    fn test_add_multi_day_budget() {
        let cal = calendar();
        // 72 business hours = 9 business days of 8 hours
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 3, 9, 0), Duration::hours(72)),
            at(2025, 3, 13, 17, 0)
        );
    }

    #[test]
    fn test_add_non_positive_is_identity() {
        let cal = calendar();
        let start = at(2025, 3, 8, 12, 0);
        assert_eq!(cal.add_business_duration(start, Duration::zero()), start);
        assert_eq!(cal.add_business_duration(start, Duration::hours(-3)), start);
    }

    #[test]
    fn test_add_respects_utc_offset() {
        let hours = BusinessHours {
            offset: FixedOffset::east_opt(5 * 3600 + 1800).unwrap(),
            ..BusinessHours::default()
        };
        let cal = BusinessCalendar::new(hours, Vec::new());
        // 09:00 IST is 03:30 UTC
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 4, 0, 0), Duration::hours(1)),
            at(2025, 3, 4, 4, 30)
        );
    }

    fn saturday_half_day() -> BusinessHours {
        BusinessHours {
            day_start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            day_end: NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
            weekend: vec![Weekday::Sun],
            day_windows: vec![DayWindow {
                weekday: Weekday::Sat,
                start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(17, 30, 0).unwrap(),
            }],
            offset: Utc.fix(),
        }
    }

    #[test]
    fn test_weekday_window_overrides_default() {
        let cal = BusinessCalendar::new(saturday_half_day(), Vec::new());
        assert!(cal.is_business_day(date(2025, 3, 8)));
        assert!(!cal.is_business_day(date(2025, 3, 9)));
        assert_eq!(
            cal.window(date(2025, 3, 8)),
            (at(2025, 3, 8, 10, 0), at(2025, 3, 8, 17, 30))
        );
        assert_eq!(
            cal.window(date(2025, 3, 7)),
            (at(2025, 3, 7, 10, 0), at(2025, 3, 7, 18, 30))
        );
    }

    #[test]
    fn test_add_runs_through_saturday_half_day() {
        let cal = BusinessCalendar::new(saturday_half_day(), Vec::new());
        // Friday 17:30-18:30, Saturday 10:00-17:30, Monday from 10:00
        assert_eq!(
            cal.add_business_duration(at(2025, 3, 7, 17, 30), Duration::hours(10)),
            at(2025, 3, 10, 11, 30)
        );
        assert_eq!(
            cal.business_duration_between(at(2025, 3, 7, 17, 30), at(2025, 3, 10, 11, 30)),
            Duration::hours(10)
        );
    }

    #[test]
    fn test_between_weekend_is_zero() {
        let cal = calendar();
        assert_eq!(
            cal.business_duration_between(at(2025, 3, 8, 0, 0), at(2025, 3, 10, 0, 0)),
            Duration::zero()
        );
    }

    #[test]
    fn test_between_spans_days() {
        let cal = calendar();
        // Friday 16:30-17:00 plus Monday 09:00-10:30
        assert_eq!(
            cal.business_duration_between(at(2025, 3, 7, 16, 30), at(2025, 3, 10, 10, 30)),
            Duration::hours(2)
        );
    }

    #[test]
    fn test_between_reversed_range_is_zero() {
        let cal = calendar();
        assert_eq!(
            cal.business_duration_between(at(2025, 3, 5, 12, 0), at(2025, 3, 4, 12, 0)),
            Duration::zero()
        );
    }

    #[test]
    fn test_add_and_between_agree() {
        let cal = calendar();
        let start = at(2025, 3, 6, 14, 20);
        let end = cal.add_business_duration(start, Duration::minutes(1_000));
        assert_eq!(cal.business_duration_between(start, end), Duration::minutes(1_000));
    }
}
