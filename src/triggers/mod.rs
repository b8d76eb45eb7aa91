//! Triggers: fire schedules bound to jobs.
//!
//! A [`Trigger`] owns identity, the referenced job, priority, the optional
//! calendar name, the `[start_time, end_time)` validity window, and the
//! computed previous/next fire times. How fire times advance is decided by
//! its [`Schedule`], a sealed set of four variants:
//!
//! - [`CronSchedule`]: a cron expression in a time zone
//! - [`SimpleSchedule`]: fixed-rate repetition with an optional repeat count
//! - [`CalendarIntervalSchedule`]: calendar-field stepping (seconds..years)
//! - [`DailyTimeIntervalSchedule`]: repetition inside a daily time window on
//!   selected weekdays
//!
//! Misfire handling is a per-variant instruction carried by the schedule.

mod calendar_interval;
mod cron;
mod daily_time_interval;
mod simple;

pub use calendar_interval::{
    CalendarIntervalMisfireInstruction, CalendarIntervalSchedule, IntervalUnit,
};
pub use cron::{CronMisfireInstruction, CronSchedule};
pub use daily_time_interval::{
    DailyTimeIntervalMisfireInstruction, DailyTimeIntervalSchedule, TimeOfDay,
};
pub use simple::{RepeatCount, SimpleMisfireInstruction, SimpleSchedule};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::calendar::Calendar;
use crate::cron::CronExpression;
use crate::error::{Result, SchedulerError};
use crate::jobs::{JobDataMap, JobKey, DEFAULT_GROUP};

/// Priority assigned to triggers created without an explicit one. Higher
/// values win ties between triggers due at the same instant.
pub const DEFAULT_PRIORITY: i32 = 5;

// ═══════════════════════════════════════════════════════════════════════════════
// Trigger Key
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identity of a trigger: `(name, group)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    /// Create a key in the given group.
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Create a key in the default group.
    pub fn with_default_group(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

impl Ord for TriggerKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.group
            .cmp(&other.group)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for TriggerKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Schedule
// ═══════════════════════════════════════════════════════════════════════════════

/// The sealed set of fire-schedule variants.
#[derive(Debug, Clone)]
pub enum Schedule {
    Cron(CronSchedule),
    Simple(SimpleSchedule),
    CalendarInterval(CalendarIntervalSchedule),
    DailyTimeInterval(DailyTimeIntervalSchedule),
}

impl Schedule {
    /// A cron schedule with the default (smart) misfire policy.
    pub fn cron(expression: CronExpression) -> Self {
        Self::Cron(CronSchedule::new(expression))
    }

    /// A fixed-rate schedule repeating `count` additional times after the
    /// first fire.
    pub fn repeat(interval: Duration, count: u32) -> Self {
        Self::Simple(SimpleSchedule::new(interval, RepeatCount::Times(count)))
    }

    /// A fixed-rate schedule repeating until `end_time` (or forever).
    pub fn repeat_forever(interval: Duration) -> Self {
        Self::Simple(SimpleSchedule::new(interval, RepeatCount::Indefinitely))
    }

    /// A schedule that fires exactly once, at the trigger's start time.
    pub fn once() -> Self {
        Self::Simple(SimpleSchedule::new(Duration::ZERO, RepeatCount::Times(0)))
    }

    /// A calendar-field interval schedule.
    pub fn calendar_interval(interval: u32, unit: IntervalUnit) -> Self {
        Self::CalendarInterval(CalendarIntervalSchedule::new(interval, unit))
    }

    /// A daily time-window interval schedule.
    pub fn daily_time_interval(
        interval: u32,
        unit: IntervalUnit,
        start_time_of_day: TimeOfDay,
        end_time_of_day: TimeOfDay,
    ) -> Self {
        Self::DailyTimeInterval(DailyTimeIntervalSchedule::new(
            interval,
            unit,
            start_time_of_day,
            end_time_of_day,
        ))
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Cron(_) => Ok(()),
            Self::Simple(s) => s.validate(),
            Self::CalendarInterval(s) => s.validate(),
            Self::DailyTimeInterval(s) => s.validate(),
        }
    }

    /// Whether the misfire instruction says to skip misfire handling and
    /// fire all missed occurrences as fast as they can be acquired.
    pub fn misfire_ignored(&self) -> bool {
        match self {
            Self::Cron(s) => s.misfire_instruction == CronMisfireInstruction::Ignore,
            Self::Simple(s) => s.misfire_instruction == SimpleMisfireInstruction::Ignore,
            Self::CalendarInterval(s) => {
                s.misfire_instruction == CalendarIntervalMisfireInstruction::Ignore
            }
            Self::DailyTimeInterval(s) => {
                s.misfire_instruction == DailyTimeIntervalMisfireInstruction::Ignore
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Trigger
// ═══════════════════════════════════════════════════════════════════════════════

/// A scheduled firing rule for one job.
#[derive(Debug, Clone)]
pub struct Trigger {
    key: TriggerKey,
    job_key: Option<JobKey>,
    description: Option<String>,
    priority: i32,
    calendar_name: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    next_fire_time: Option<DateTime<Utc>>,
    previous_fire_time: Option<DateTime<Utc>>,
    job_data: JobDataMap,
    schedule: Schedule,
}

impl Trigger {
    /// Start building a trigger with the given key.
    pub fn builder(key: TriggerKey) -> TriggerBuilder {
        TriggerBuilder::new(key)
    }

    pub fn key(&self) -> &TriggerKey {
        &self.key
    }

    /// The job this trigger fires. `None` only before the trigger has been
    /// associated by `schedule_job`.
    pub fn job_key(&self) -> Option<&JobKey> {
        self.job_key.as_ref()
    }

    pub(crate) fn set_job_key(&mut self, job_key: JobKey) {
        self.job_key = Some(job_key);
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn calendar_name(&self) -> Option<&str> {
        self.calendar_name.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// `None` iff the trigger will never fire again.
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.previous_fire_time
    }

    pub fn job_data(&self) -> &JobDataMap {
        &self.job_data
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Whether this trigger can ever fire again.
    pub fn may_fire_again(&self) -> bool {
        self.next_fire_time.is_some()
    }

    /// The instant of the last fire this trigger will ever make, when that
    /// is computable. Cron schedules return `None`.
    pub fn final_fire_time(&self) -> Option<DateTime<Utc>> {
        match &self.schedule {
            Schedule::Cron(_) => None,
            Schedule::Simple(s) => s.final_fire_time(self.start_time, self.end_time),
            Schedule::CalendarInterval(s) => s.final_fire_time(self.start_time, self.end_time),
            Schedule::DailyTimeInterval(s) => s.final_fire_time(self.start_time, self.end_time),
        }
    }

    /// The first instant strictly after `after` at which this trigger's
    /// schedule fires, ignoring calendars. `None` when the schedule is
    /// exhausted or past its end time.
    pub fn fire_time_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.schedule {
            Schedule::Cron(s) => s.fire_time_after(after, self.start_time, self.end_time),
            Schedule::Simple(s) => s.fire_time_after(after, self.start_time, self.end_time),
            Schedule::CalendarInterval(s) => {
                s.fire_time_after(after, self.start_time, self.end_time)
            }
            Schedule::DailyTimeInterval(s) => {
                s.fire_time_after(after, self.start_time, self.end_time)
            }
        }
    }

    /// Compute and record the first fire time, honoring the calendar.
    /// Returns the computed time; `None` means the trigger will never fire.
    pub fn compute_first_fire_time(
        &mut self,
        calendar: Option<&dyn Calendar>,
    ) -> Option<DateTime<Utc>> {
        let mut first = self.fire_time_after(self.start_time - ChronoDuration::seconds(1));
        if let Some(cal) = calendar {
            while let Some(t) = first {
                if cal.is_time_included(t) {
                    break;
                }
                first = self.fire_time_after(t);
            }
        }
        self.next_fire_time = first;
        first
    }

    /// Record a fire: shift `previous_fire_time` forward and advance
    /// `next_fire_time` past any calendar-excluded instants.
    pub fn triggered(&mut self, calendar: Option<&dyn Calendar>) {
        self.previous_fire_time = self.next_fire_time;
        let mut next = self
            .next_fire_time
            .and_then(|n| self.fire_time_after(n));
        if let Some(cal) = calendar {
            while let Some(t) = next {
                if cal.is_time_included(t) {
                    break;
                }
                next = self.fire_time_after(t);
            }
        }
        match &mut self.schedule {
            Schedule::Simple(s) => s.on_triggered(),
            Schedule::CalendarInterval(s) => s.on_triggered(),
            Schedule::DailyTimeInterval(s) => s.on_triggered(),
            Schedule::Cron(_) => {}
        }
        self.next_fire_time = next;
    }

    /// Apply the variant's misfire instruction after a fire time has passed
    /// the misfire threshold unfired.
    pub fn update_after_misfire(&mut self, calendar: Option<&dyn Calendar>, now: DateTime<Utc>) {
        let Trigger {
            schedule,
            start_time,
            end_time,
            next_fire_time,
            ..
        } = self;
        match schedule {
            Schedule::Cron(s) => {
                *next_fire_time =
                    s.updated_after_misfire(*next_fire_time, calendar, now, *start_time, *end_time);
            }
            Schedule::Simple(s) => {
                s.update_after_misfire(next_fire_time, start_time, *end_time, now);
            }
            Schedule::CalendarInterval(s) => {
                *next_fire_time =
                    s.updated_after_misfire(*next_fire_time, calendar, now, *start_time, *end_time);
            }
            Schedule::DailyTimeInterval(s) => {
                *next_fire_time =
                    s.updated_after_misfire(*next_fire_time, calendar, now, *start_time, *end_time);
            }
        }
    }

    /// Recompute `next_fire_time` under a changed calendar: resume from the
    /// previous fire, skip excluded instants, and treat a resulting fire
    /// time more than `misfire_threshold` in the past as misfired.
    pub fn update_with_new_calendar(
        &mut self,
        calendar: &dyn Calendar,
        misfire_threshold: Duration,
        now: DateTime<Utc>,
    ) {
        let base = match self.previous_fire_time {
            Some(prev) => prev,
            None => self.start_time - ChronoDuration::seconds(1),
        };
        let mut next = self.fire_time_after(base);
        while let Some(t) = next {
            if calendar.is_time_included(t) {
                break;
            }
            next = self.fire_time_after(t);
        }

        if let Some(t) = next {
            let threshold =
                ChronoDuration::from_std(misfire_threshold).unwrap_or(ChronoDuration::MAX);
            if t < now && now - t >= threshold {
                next = self.fire_time_after(now);
                while let Some(t) = next {
                    if calendar.is_time_included(t) {
                        break;
                    }
                    next = self.fire_time_after(t);
                }
            }
        }
        self.next_fire_time = next;
    }

    /// Check the trigger's configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.key.name.is_empty() {
            return Err(SchedulerError::validation("trigger name cannot be empty"));
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(SchedulerError::validation(
                    "trigger end time cannot precede its start time",
                ));
            }
        }
        self.schedule.validate()
    }

    pub(crate) fn set_next_fire_time(&mut self, next: Option<DateTime<Utc>>) {
        self.next_fire_time = next;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Trigger Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for [`Trigger`]s. Construction fails when the configuration
/// violates an invariant (for example `end_time < start_time`).
#[derive(Debug, Clone)]
pub struct TriggerBuilder {
    key: TriggerKey,
    job_key: Option<JobKey>,
    description: Option<String>,
    priority: i32,
    calendar_name: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    job_data: JobDataMap,
    schedule: Option<Schedule>,
}

impl TriggerBuilder {
    fn new(key: TriggerKey) -> Self {
        Self {
            key,
            job_key: None,
            description: None,
            priority: DEFAULT_PRIORITY,
            calendar_name: None,
            start_time: None,
            end_time: None,
            job_data: JobDataMap::new(),
            schedule: None,
        }
    }

    /// The job this trigger fires. May be omitted when the trigger is passed
    /// to `schedule_job` together with its job.
    pub fn for_job(mut self, job_key: JobKey) -> Self {
        self.job_key = Some(job_key);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Mask fire times through the named calendar.
    pub fn modified_by_calendar(mut self, calendar_name: impl Into<String>) -> Self {
        self.calendar_name = Some(calendar_name.into());
        self
    }

    pub fn start_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn end_at(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    pub fn with_job_data(mut self, job_data: JobDataMap) -> Self {
        self.job_data = job_data;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Build and validate the trigger. The start time defaults to now; the
    /// schedule defaults to firing once at the start time.
    pub fn build(self) -> Result<Trigger> {
        let trigger = Trigger {
            key: self.key,
            job_key: self.job_key,
            description: self.description,
            priority: self.priority,
            calendar_name: self.calendar_name,
            start_time: self.start_time.unwrap_or_else(Utc::now),
            end_time: self.end_time,
            next_fire_time: None,
            previous_fire_time: None,
            job_data: self.job_data,
            schedule: self.schedule.unwrap_or_else(Schedule::once),
        };
        trigger.validate()?;
        Ok(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, mi, s).unwrap()
    }

    #[test]
    fn test_end_before_start_fails() {
        let result = Trigger::builder(TriggerKey::with_default_group("t"))
            .start_at(utc(12, 0, 0))
            .end_at(utc(11, 0, 0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_default_priority_and_group() {
        let trigger = Trigger::builder(TriggerKey::with_default_group("t"))
            .start_at(utc(12, 0, 0))
            .build()
            .unwrap();
        assert_eq!(trigger.priority(), DEFAULT_PRIORITY);
        assert_eq!(trigger.key().group, DEFAULT_GROUP);
        assert!(trigger.job_key().is_none());
    }

    #[test]
    fn test_once_schedule_fires_exactly_once() {
        let mut trigger = Trigger::builder(TriggerKey::with_default_group("t"))
            .start_at(utc(12, 0, 0))
            .with_schedule(Schedule::once())
            .build()
            .unwrap();
        assert_eq!(trigger.compute_first_fire_time(None), Some(utc(12, 0, 0)));
        trigger.triggered(None);
        assert_eq!(trigger.previous_fire_time(), Some(utc(12, 0, 0)));
        assert_eq!(trigger.next_fire_time(), None);
        assert!(!trigger.may_fire_again());
    }

    #[test]
    fn test_cron_trigger_advance() {
        let expr = CronExpression::parse("0 0/5 * * * ?").unwrap();
        let mut trigger = Trigger::builder(TriggerKey::with_default_group("t"))
            .start_at(utc(12, 3, 17))
            .with_schedule(Schedule::cron(expr))
            .build()
            .unwrap();
        assert_eq!(trigger.compute_first_fire_time(None), Some(utc(12, 5, 0)));
        trigger.triggered(None);
        assert_eq!(trigger.previous_fire_time(), Some(utc(12, 5, 0)));
        assert_eq!(trigger.next_fire_time(), Some(utc(12, 10, 0)));
    }

    #[test]
    fn test_calendar_skips_excluded_instants() {
        #[derive(Debug)]
        struct ExcludeNoonHour;
        impl Calendar for ExcludeNoonHour {
            fn is_time_included(&self, time: DateTime<Utc>) -> bool {
                time.format("%H").to_string() != "12"
            }
            fn next_included_time(&self, time: DateTime<Utc>) -> DateTime<Utc> {
                time
            }
        }

        let expr = CronExpression::parse("0 0 * * * ?").unwrap();
        let mut trigger = Trigger::builder(TriggerKey::with_default_group("t"))
            .start_at(utc(11, 30, 0))
            .with_schedule(Schedule::cron(expr))
            .build()
            .unwrap();
        // 12:00 is excluded, first fire slides to 13:00
        assert_eq!(
            trigger.compute_first_fire_time(Some(&ExcludeNoonHour as &dyn Calendar)),
            Some(utc(13, 0, 0))
        );
    }

    #[test]
    fn test_final_fire_time_for_cron_is_none() {
        let expr = CronExpression::parse("0 0 * * * ?").unwrap();
        let trigger = Trigger::builder(TriggerKey::with_default_group("t"))
            .start_at(utc(0, 0, 0))
            .with_schedule(Schedule::cron(expr))
            .build()
            .unwrap();
        assert_eq!(trigger.final_fire_time(), None);
    }
}
