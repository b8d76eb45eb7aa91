//! Calendar-field interval schedule: advance by N seconds/minutes/hours/
//! days/weeks/months/years in a time zone.

use chrono::{
    DateTime, Duration as ChronoDuration, LocalResult, Months, NaiveDateTime, TimeZone, Utc,
};
use chrono_tz::Tz;

use crate::calendar::Calendar;
use crate::error::{Result, SchedulerError};

/// Units a [`CalendarIntervalSchedule`] can step by. The sub-day units also
/// parameterize [`DailyTimeIntervalSchedule`](crate::triggers::DailyTimeIntervalSchedule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    /// Milliseconds per unit for the fixed-length units.
    pub(crate) fn fixed_ms(&self) -> Option<i64> {
        match self {
            Self::Second => Some(1_000),
            Self::Minute => Some(60_000),
            Self::Hour => Some(3_600_000),
            _ => None,
        }
    }
}

/// Misfire recovery for calendar-interval schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CalendarIntervalMisfireInstruction {
    /// Skip misfire handling; all missed fires happen as fast as they can
    /// be acquired
    Ignore,
    /// Policy chosen by the scheduler; for calendar-interval this means
    /// [`CalendarIntervalMisfireInstruction::FireOnceNow`]
    #[default]
    Smart,
    /// Fire once immediately, then continue on schedule
    FireOnceNow,
    /// Drop the missed fire and wait for the next scheduled instant
    DoNothing,
}

/// Fires every `interval` `unit`s after the trigger's start time, stepping
/// calendar fields in `time_zone` for day-and-larger units.
#[derive(Debug, Clone)]
pub struct CalendarIntervalSchedule {
    /// Step width, at least 1
    pub interval: u32,
    /// Step unit
    pub unit: IntervalUnit,
    /// Fires recorded so far
    pub times_triggered: u32,
    /// Zone day-and-larger steps are computed in
    pub time_zone: Tz,
    /// Keep the wall-clock hour when a DST transition shifts the offset
    pub preserve_hour_of_day_across_daylight_savings: bool,
    /// When the preserved hour does not exist (spring-forward gap), skip to
    /// the next day instead of sliding to the earliest valid instant
    pub skip_day_if_hour_does_not_exist: bool,
    /// Recovery policy when a fire time passes the misfire threshold
    pub misfire_instruction: CalendarIntervalMisfireInstruction,
}

impl CalendarIntervalSchedule {
    pub fn new(interval: u32, unit: IntervalUnit) -> Self {
        Self {
            interval,
            unit,
            times_triggered: 0,
            time_zone: Tz::UTC,
            preserve_hour_of_day_across_daylight_savings: false,
            skip_day_if_hour_does_not_exist: false,
            misfire_instruction: CalendarIntervalMisfireInstruction::default(),
        }
    }

    pub fn in_time_zone(mut self, tz: Tz) -> Self {
        self.time_zone = tz;
        self
    }

    pub fn preserve_hour_across_daylight_savings(mut self) -> Self {
        self.preserve_hour_of_day_across_daylight_savings = true;
        self
    }

    pub fn skip_day_if_hour_missing(mut self) -> Self {
        self.skip_day_if_hour_does_not_exist = true;
        self
    }

    pub fn with_misfire_instruction(
        mut self,
        instruction: CalendarIntervalMisfireInstruction,
    ) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.interval < 1 {
            return Err(SchedulerError::validation(
                "calendar interval must be at least 1",
            ));
        }
        Ok(())
    }

    pub(crate) fn on_triggered(&mut self) {
        self.times_triggered += 1;
    }

    /// Whether steps are computed on local wall-clock fields rather than as
    /// fixed epoch-millisecond multiples.
    fn steps_locally(&self) -> bool {
        match self.unit {
            IntervalUnit::Second | IntervalUnit::Minute | IntervalUnit::Hour => false,
            IntervalUnit::Day | IntervalUnit::Week => {
                self.preserve_hour_of_day_across_daylight_savings
            }
            IntervalUnit::Month | IntervalUnit::Year => true,
        }
    }

    /// Approximate step width, for seeding the index search.
    fn approx_step_ms(&self) -> i64 {
        let per_unit = match self.unit {
            IntervalUnit::Second => 1_000,
            IntervalUnit::Minute => 60_000,
            IntervalUnit::Hour => 3_600_000,
            IntervalUnit::Day => 86_400_000,
            IntervalUnit::Week => 7 * 86_400_000,
            IntervalUnit::Month => 2_629_800_000, // 30.4375 days
            IntervalUnit::Year => 31_557_600_000, // 365.25 days
        };
        per_unit * self.interval as i64
    }

    /// The k-th fire time (k = 0 is the start itself).
    fn nth_fire(&self, start: DateTime<Utc>, k: i64) -> DateTime<Utc> {
        if !self.steps_locally() {
            let step = match self.unit {
                IntervalUnit::Day => 86_400_000,
                IntervalUnit::Week => 7 * 86_400_000,
                other => other.fixed_ms().unwrap_or(1_000),
            };
            return start + ChronoDuration::milliseconds(k * step * self.interval as i64);
        }

        let local = start.with_timezone(&self.time_zone).naive_local();
        let stepped = match self.unit {
            IntervalUnit::Day => local + ChronoDuration::days(k * self.interval as i64),
            IntervalUnit::Week => local + ChronoDuration::days(7 * k * self.interval as i64),
            IntervalUnit::Month | IntervalUnit::Year => {
                let months = match self.unit {
                    IntervalUnit::Month => self.interval as i64 * k,
                    _ => self.interval as i64 * 12 * k,
                };
                let date = if months >= 0 {
                    local.date().checked_add_months(Months::new(months as u32))
                } else {
                    local.date().checked_sub_months(Months::new((-months) as u32))
                };
                match date {
                    Some(d) => d.and_time(local.time()),
                    None => local,
                }
            }
            _ => local,
        };
        self.resolve_local(stepped)
    }

    /// Resolve a stepped local time to an instant, honoring the DST flags.
    fn resolve_local(&self, mut naive: NaiveDateTime) -> DateTime<Utc> {
        loop {
            match self.time_zone.from_local_datetime(&naive) {
                LocalResult::Single(dt) => return dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
                LocalResult::None => {
                    if self.skip_day_if_hour_does_not_exist {
                        naive += ChronoDuration::days(1);
                    } else {
                        naive += ChronoDuration::minutes(15);
                    }
                }
            }
        }
    }

    /// The smallest k with `nth_fire(k) > after`.
    fn index_after(&self, after: DateTime<Utc>, start: DateTime<Utc>) -> i64 {
        if after < start {
            return 0;
        }
        let est = (after - start).num_milliseconds() / self.approx_step_ms();
        let mut k = (est - 2).max(0);
        while self.nth_fire(start, k) <= after {
            k += 1;
        }
        while k > 0 && self.nth_fire(start, k - 1) > after {
            k -= 1;
        }
        k
    }

    pub(crate) fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let k = self.index_after(after, start);
        let candidate = self.nth_fire(start, k);
        match end {
            Some(end) if candidate >= end => None,
            _ => Some(candidate),
        }
    }

    pub(crate) fn updated_after_misfire(
        &self,
        next: Option<DateTime<Utc>>,
        calendar: Option<&dyn Calendar>,
        now: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let effective = match self.misfire_instruction {
            CalendarIntervalMisfireInstruction::Ignore => return next,
            CalendarIntervalMisfireInstruction::Smart => {
                CalendarIntervalMisfireInstruction::FireOnceNow
            }
            other => other,
        };
        match effective {
            CalendarIntervalMisfireInstruction::FireOnceNow => Some(now),
            CalendarIntervalMisfireInstruction::DoNothing => {
                let mut next = self.fire_time_after(now, start, end);
                if let Some(cal) = calendar {
                    while let Some(t) = next {
                        if cal.is_time_included(t) {
                            break;
                        }
                        next = self.fire_time_after(t, start, end);
                    }
                }
                next
            }
            _ => next,
        }
    }

    pub(crate) fn final_fire_time(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let end = end?;
        if start >= end {
            return None;
        }
        let k = self.index_after(end - ChronoDuration::milliseconds(1), start);
        match k {
            0 => Some(start),
            k => Some(self.nth_fire(start, k - 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_hour_interval_is_fixed_ms() {
        let s = CalendarIntervalSchedule::new(6, IntervalUnit::Hour);
        let start = utc(2026, 3, 2, 0);
        assert_eq!(
            s.fire_time_after(start, start, None),
            Some(utc(2026, 3, 2, 6))
        );
        assert_eq!(
            s.fire_time_after(utc(2026, 3, 2, 7), start, None),
            Some(utc(2026, 3, 2, 12))
        );
    }

    #[test]
    fn test_month_interval_clamps_short_months() {
        let s = CalendarIntervalSchedule::new(1, IntervalUnit::Month);
        let start = utc(2026, 1, 31, 9);
        // January 31 + 1 month clamps to February 28
        assert_eq!(
            s.fire_time_after(start, start, None),
            Some(utc(2026, 2, 28, 9))
        );
    }

    #[test]
    fn test_year_interval() {
        let s = CalendarIntervalSchedule::new(2, IntervalUnit::Year);
        let start = utc(2026, 3, 2, 8);
        assert_eq!(
            s.fire_time_after(start, start, None),
            Some(utc(2028, 3, 2, 8))
        );
    }

    #[test]
    fn test_preserved_hour_across_dst() {
        // Berlin springs forward on 2026-03-29. Daily at 08:00 local:
        // UTC offset changes from +1 to +2 across the transition.
        let s = CalendarIntervalSchedule::new(1, IntervalUnit::Day)
            .in_time_zone(chrono_tz::Europe::Berlin)
            .preserve_hour_across_daylight_savings();
        let start = utc(2026, 3, 28, 7); // 08:00 CET
        assert_eq!(
            s.fire_time_after(start, start, None),
            Some(utc(2026, 3, 29, 6)) // 08:00 CEST
        );
    }

    #[test]
    fn test_unpreserved_day_is_24h() {
        let s = CalendarIntervalSchedule::new(1, IntervalUnit::Day)
            .in_time_zone(chrono_tz::Europe::Berlin);
        let start = utc(2026, 3, 28, 7);
        assert_eq!(
            s.fire_time_after(start, start, None),
            Some(utc(2026, 3, 29, 7)) // wall clock drifts to 09:00 CEST
        );
    }

    #[test]
    fn test_skip_day_when_hour_missing() {
        // 02:30 local does not exist on the Berlin spring-forward day.
        let s = CalendarIntervalSchedule::new(1, IntervalUnit::Day)
            .in_time_zone(chrono_tz::Europe::Berlin)
            .preserve_hour_across_daylight_savings()
            .skip_day_if_hour_missing();
        let start = Utc.with_ymd_and_hms(2026, 3, 28, 1, 30, 0).unwrap(); // 02:30 CET
        let next = s.fire_time_after(start, start, None).unwrap();
        // March 29 02:30 is skipped; fire lands on March 30 02:30 CEST
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 30, 0, 30, 0).unwrap());
    }

    #[test]
    fn test_end_time_cuts_off() {
        let s = CalendarIntervalSchedule::new(1, IntervalUnit::Day);
        let start = utc(2026, 3, 2, 0);
        assert_eq!(
            s.fire_time_after(utc(2026, 3, 2, 12), start, Some(utc(2026, 3, 3, 0))),
            None
        );
    }

    #[test]
    fn test_final_fire_time() {
        let s = CalendarIntervalSchedule::new(1, IntervalUnit::Day);
        let start = utc(2026, 3, 2, 0);
        assert_eq!(
            s.final_fire_time(start, Some(utc(2026, 3, 5, 0))),
            Some(utc(2026, 3, 4, 0))
        );
        assert_eq!(s.final_fire_time(start, None), None);
    }

    #[test]
    fn test_zero_interval_invalid() {
        assert!(CalendarIntervalSchedule::new(0, IntervalUnit::Hour)
            .validate()
            .is_err());
    }
}
