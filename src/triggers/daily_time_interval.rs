//! Daily time-window interval schedule: repeat every N seconds/minutes/
//! hours inside a `[start_time_of_day, end_time_of_day]` window on selected
//! weekdays.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveDateTime,
    NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::fmt;

use crate::calendar::Calendar;
use crate::error::{Result, SchedulerError};
use crate::triggers::{IntervalUnit, RepeatCount};

/// A second-granularity wall-clock time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return Err(SchedulerError::validation(format!(
                "invalid time of day {:02}:{:02}:{:02}",
                hour, minute, second
            )));
        }
        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    /// Shorthand for a whole hour.
    pub fn hour_of_day(hour: u32) -> Result<Self> {
        Self::new(hour, 0, 0)
    }

    fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Misfire recovery for daily time-interval schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DailyTimeIntervalMisfireInstruction {
    /// Skip misfire handling; all missed fires happen as fast as they can
    /// be acquired
    Ignore,
    /// Policy chosen by the scheduler; for daily time-interval this means
    /// [`DailyTimeIntervalMisfireInstruction::FireOnceNow`]
    #[default]
    Smart,
    /// Fire once immediately, then continue on schedule
    FireOnceNow,
    /// Drop the missed fire and wait for the next scheduled instant
    DoNothing,
}

/// Fires every `interval` sub-day `unit`s between `start_time_of_day` and
/// `end_time_of_day` (inclusive) on the selected weekdays.
#[derive(Debug, Clone)]
pub struct DailyTimeIntervalSchedule {
    /// Step width, at least 1
    pub interval: u32,
    /// Step unit; must be `Second`, `Minute`, or `Hour`
    pub unit: IntervalUnit,
    /// First slot of each day's window
    pub start_time_of_day: TimeOfDay,
    /// Last admissible instant of each day's window (inclusive)
    pub end_time_of_day: TimeOfDay,
    /// Weekdays the window is open on, cron numbering (1 = Sunday .. 7 =
    /// Saturday)
    pub days_of_week: BTreeSet<u32>,
    /// Total fires after the first; `Indefinitely` by default
    pub repeat_count: RepeatCount,
    /// Fires recorded so far
    pub times_triggered: u32,
    /// Zone the daily window is evaluated in
    pub time_zone: Tz,
    /// Recovery policy when a fire time passes the misfire threshold
    pub misfire_instruction: DailyTimeIntervalMisfireInstruction,
}

impl DailyTimeIntervalSchedule {
    pub fn new(
        interval: u32,
        unit: IntervalUnit,
        start_time_of_day: TimeOfDay,
        end_time_of_day: TimeOfDay,
    ) -> Self {
        Self {
            interval,
            unit,
            start_time_of_day,
            end_time_of_day,
            days_of_week: (1..=7).collect(),
            repeat_count: RepeatCount::Indefinitely,
            times_triggered: 0,
            time_zone: Tz::UTC,
            misfire_instruction: DailyTimeIntervalMisfireInstruction::default(),
        }
    }

    /// Restrict firing to the given weekdays (cron numbering, 1 = Sunday).
    pub fn on_days_of_week(mut self, days: impl IntoIterator<Item = u32>) -> Self {
        self.days_of_week = days.into_iter().collect();
        self
    }

    /// Monday through Friday.
    pub fn on_weekdays(self) -> Self {
        self.on_days_of_week(2..=6)
    }

    pub fn with_repeat_count(mut self, repeat_count: RepeatCount) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    pub fn in_time_zone(mut self, tz: Tz) -> Self {
        self.time_zone = tz;
        self
    }

    pub fn with_misfire_instruction(
        mut self,
        instruction: DailyTimeIntervalMisfireInstruction,
    ) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    fn step_ms(&self) -> i64 {
        self.unit.fixed_ms().unwrap_or(1_000) * self.interval as i64
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.interval < 1 {
            return Err(SchedulerError::validation(
                "daily time interval must be at least 1",
            ));
        }
        if self.unit.fixed_ms().is_none() {
            return Err(SchedulerError::validation(
                "daily time interval unit must be seconds, minutes, or hours",
            ));
        }
        if self.step_ms() >= 86_400_000 {
            return Err(SchedulerError::validation(
                "daily time interval must be shorter than one day",
            ));
        }
        if self.end_time_of_day < self.start_time_of_day {
            return Err(SchedulerError::validation(
                "daily window end cannot precede its start",
            ));
        }
        if self.days_of_week.is_empty() {
            return Err(SchedulerError::validation(
                "daily time interval needs at least one weekday",
            ));
        }
        if self.days_of_week.iter().any(|d| !(1..=7).contains(d)) {
            return Err(SchedulerError::validation(
                "weekdays must be in 1..=7 (1 = Sunday)",
            ));
        }
        Ok(())
    }

    pub(crate) fn on_triggered(&mut self) {
        self.times_triggered += 1;
    }

    fn resolve_local(&self, mut naive: NaiveDateTime) -> DateTime<Utc> {
        loop {
            match self.time_zone.from_local_datetime(&naive) {
                LocalResult::Single(dt) => return dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
                LocalResult::None => naive += ChronoDuration::minutes(15),
            }
        }
    }

    fn cron_dow(date: NaiveDate) -> u32 {
        date.weekday().num_days_from_sunday() + 1
    }

    /// The next window slot strictly after `after`, ignoring repeat count
    /// and end time.
    fn slot_after(&self, after: DateTime<Utc>, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let step = self.step_ms();
        let floor = (after + ChronoDuration::milliseconds(1)).max(start);
        let mut local = floor.with_timezone(&self.time_zone).naive_local();

        // Non-empty weekday sets repeat within 7 days; a few extra
        // iterations cover DST slides.
        for _ in 0..16 {
            let date = local.date();
            if self.days_of_week.contains(&Self::cron_dow(date)) {
                let window_start = date.and_time(self.start_time_of_day.as_naive_time());
                let window_end = date.and_time(self.end_time_of_day.as_naive_time());
                let slot = if local <= window_start {
                    Some(window_start)
                } else if local <= window_end {
                    let elapsed = (local - window_start).num_milliseconds();
                    let k = (elapsed + step - 1) / step;
                    let slot = window_start + ChronoDuration::milliseconds(k * step);
                    (slot <= window_end).then_some(slot)
                } else {
                    None
                };
                if let Some(slot) = slot {
                    return Some(self.resolve_local(slot));
                }
            }
            local = (date + ChronoDuration::days(1)).and_time(NaiveTime::MIN);
        }
        None
    }

    pub(crate) fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if let RepeatCount::Times(n) = self.repeat_count {
            if self.times_triggered > n {
                return None;
            }
        }
        let candidate = self.slot_after(after, start)?;
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
            DailyTimeIntervalMisfireInstruction::Ignore => return next,
            DailyTimeIntervalMisfireInstruction::Smart => {
                DailyTimeIntervalMisfireInstruction::FireOnceNow
            }
            other => other,
        };
        match effective {
            DailyTimeIntervalMisfireInstruction::FireOnceNow => Some(now),
            DailyTimeIntervalMisfireInstruction::DoNothing => {
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
        const MAX_SCAN: u32 = 100_000;

        match (self.repeat_count, end) {
            (RepeatCount::Times(n), _) if n < MAX_SCAN => {
                // The (n+1)-th slot overall, bounded by the end time
                let mut t = start - ChronoDuration::milliseconds(1);
                let mut last = None;
                for _ in 0..=n {
                    match self.slot_after(t, start) {
                        Some(slot) if end.map_or(true, |e| slot < e) => {
                            last = Some(slot);
                            t = slot;
                        }
                        _ => break,
                    }
                }
                last
            }
            (_, Some(e)) => {
                // Walk back from the end to the last open window
                let end_local = e.with_timezone(&self.time_zone).naive_local();
                let mut date = end_local.date();
                for _ in 0..16 {
                    if self.days_of_week.contains(&Self::cron_dow(date)) {
                        let window_start = date.and_time(self.start_time_of_day.as_naive_time());
                        let mut bound = date.and_time(self.end_time_of_day.as_naive_time());
                        if date == end_local.date() && end_local <= bound {
                            bound = end_local - ChronoDuration::milliseconds(1);
                        }
                        if bound >= window_start {
                            let k = (bound - window_start).num_milliseconds() / self.step_ms();
                            let slot =
                                window_start + ChronoDuration::milliseconds(k * self.step_ms());
                            let resolved = self.resolve_local(slot);
                            if resolved >= start {
                                return Some(resolved);
                            }
                        }
                    }
                    date = date - ChronoDuration::days(1);
                }
                None
            }
            _ => None,
        }
    }
}
