//! Fixed-rate schedule: `start_time + k * repeat_interval`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// How many times a [`SimpleSchedule`] repeats after its first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
    /// Repeat forever (until the trigger's end time, if any)
    Indefinitely,
    /// Repeat exactly this many times after the first fire; `Times(0)`
    /// fires exactly once
    Times(u32),
}

/// Misfire recovery for fixed-rate schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SimpleMisfireInstruction {
    /// Skip misfire handling; all missed fires happen as fast as they can
    /// be acquired
    Ignore,
    /// Policy chosen by the scheduler: `FireNow` for one-shot schedules,
    /// `RescheduleNextWithRemainingCount` for indefinite ones,
    /// `RescheduleNowWithExistingRepeatCount` otherwise
    #[default]
    Smart,
    /// Fire once immediately
    FireNow,
    /// Re-anchor the schedule at now, keeping the repeat count
    RescheduleNowWithExistingRepeatCount,
    /// Re-anchor the schedule at now, dropping the missed fires from the
    /// repeat count
    RescheduleNowWithRemainingRepeatCount,
    /// Wait for the next scheduled instant, keeping the repeat count
    RescheduleNextWithExistingCount,
    /// Wait for the next scheduled instant, dropping the missed fires from
    /// the repeat count
    RescheduleNextWithRemainingCount,
}

/// Fires at `start_time`, then every `repeat_interval` for `repeat_count`
/// further times.
#[derive(Debug, Clone)]
pub struct SimpleSchedule {
    /// Gap between consecutive fires
    pub repeat_interval: Duration,
    /// Fires after the first one
    pub repeat_count: RepeatCount,
    /// Fires recorded so far
    pub times_triggered: u32,
    /// Recovery policy when a fire time passes the misfire threshold
    pub misfire_instruction: SimpleMisfireInstruction,
}

impl SimpleSchedule {
    pub fn new(repeat_interval: Duration, repeat_count: RepeatCount) -> Self {
        Self {
            repeat_interval,
            repeat_count,
            times_triggered: 0,
            misfire_instruction: SimpleMisfireInstruction::default(),
        }
    }

    pub fn with_misfire_instruction(mut self, instruction: SimpleMisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    fn interval_ms(&self) -> i64 {
        self.repeat_interval.as_millis() as i64
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.repeat_count != RepeatCount::Times(0) && self.repeat_interval < Duration::from_millis(1)
        {
            return Err(SchedulerError::validation(
                "repeat interval must be at least 1ms for a repeating schedule",
            ));
        }
        Ok(())
    }

    pub(crate) fn on_triggered(&mut self) {
        self.times_triggered += 1;
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

        let candidate = if after < start {
            start
        } else {
            let interval = self.interval_ms();
            if interval == 0 {
                // One-shot schedule; its only fire time is the start
                return None;
            }
            let k = (after - start).num_milliseconds() / interval + 1;
            if let RepeatCount::Times(n) = self.repeat_count {
                if k > n as i64 {
                    return None;
                }
            }
            start + ChronoDuration::milliseconds(k * interval)
        };

        match end {
            Some(end) if candidate >= end => None,
            _ => Some(candidate),
        }
    }

    pub(crate) fn update_after_misfire(
        &mut self,
        next: &mut Option<DateTime<Utc>>,
        start: &mut DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let effective = match self.misfire_instruction {
            SimpleMisfireInstruction::Ignore => return,
            SimpleMisfireInstruction::Smart => match self.repeat_count {
                RepeatCount::Times(0) => SimpleMisfireInstruction::FireNow,
                RepeatCount::Indefinitely => {
                    SimpleMisfireInstruction::RescheduleNextWithRemainingCount
                }
                RepeatCount::Times(_) => {
                    SimpleMisfireInstruction::RescheduleNowWithExistingRepeatCount
                }
            },
            other => other,
        };

        let missed = self.missed_fires(*next, now);
        match effective {
            SimpleMisfireInstruction::FireNow => {
                *next = Some(now);
            }
            SimpleMisfireInstruction::RescheduleNowWithExistingRepeatCount => {
                *start = now;
                *next = Some(now);
            }
            SimpleMisfireInstruction::RescheduleNowWithRemainingRepeatCount => {
                self.drop_missed(missed);
                *start = now;
                *next = Some(now);
            }
            SimpleMisfireInstruction::RescheduleNextWithExistingCount => {
                *next = self.fire_time_after(now, *start, end);
            }
            SimpleMisfireInstruction::RescheduleNextWithRemainingCount => {
                self.drop_missed(missed);
                *next = self.fire_time_after(now, *start, end);
            }
            // Ignore and Smart already resolved above
            _ => {}
        }
    }

    /// Fires missed between the stale `next` and `now`, clamped at zero.
    fn missed_fires(&self, next: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
        let interval = self.interval_ms();
        match next {
            Some(next) if interval > 0 && now > next => {
                ((now - next).num_milliseconds() / interval).max(0) as u32
            }
            _ => 0,
        }
    }

    fn drop_missed(&mut self, missed: u32) {
        if let RepeatCount::Times(n) = self.repeat_count {
            self.repeat_count = RepeatCount::Times(n.saturating_sub(missed));
        }
    }

    pub(crate) fn final_fire_time(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let interval = self.interval_ms();
        let last_before = |e: DateTime<Utc>| {
            if interval == 0 {
                return start;
            }
            let k = ((e - start).num_milliseconds() - 1) / interval;
            start + ChronoDuration::milliseconds(k.max(0) * interval)
        };

        match self.repeat_count {
            RepeatCount::Times(0) => match end {
                Some(e) if start >= e => None,
                _ => Some(start),
            },
            RepeatCount::Times(n) => {
                let last = start + ChronoDuration::milliseconds(n as i64 * interval);
                match end {
                    Some(e) if last >= e => {
                        if start >= e {
                            None
                        } else {
                            Some(last_before(e))
                        }
                    }
                    _ => Some(last),
                }
            }
            RepeatCount::Indefinitely => match end {
                Some(e) if start < e => Some(last_before(e)),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, s).unwrap()
    }

    fn sched(interval_ms: u64, count: RepeatCount) -> SimpleSchedule {
        SimpleSchedule::new(Duration::from_millis(interval_ms), count)
    }

    #[test]
    fn test_kth_fire_formula() {
        let s = sched(500, RepeatCount::Times(3));
        let start = utc(0);
        for k in 0..=3i64 {
            let expected = start + ChronoDuration::milliseconds(k * 500);
            let probe = expected - ChronoDuration::milliseconds(1);
            assert_eq!(s.fire_time_after(probe, start, None), Some(expected));
        }
        // Fire 4 never happens
        let probe = start + ChronoDuration::milliseconds(3 * 500);
        assert_eq!(s.fire_time_after(probe, start, None), None);
    }

    #[test]
    fn test_one_shot() {
        let s = sched(0, RepeatCount::Times(0));
        let start = utc(10);
        assert_eq!(s.fire_time_after(utc(0), start, None), Some(start));
        assert_eq!(s.fire_time_after(start, start, None), None);
    }

    #[test]
    fn test_end_time_bound() {
        let s = sched(1000, RepeatCount::Indefinitely);
        let start = utc(0);
        let end = utc(3);
        assert_eq!(s.fire_time_after(utc(1), start, Some(end)), Some(utc(2)));
        assert_eq!(s.fire_time_after(utc(2), start, Some(end)), None);
    }

    #[test]
    fn test_zero_interval_requires_no_repeat() {
        assert!(sched(0, RepeatCount::Times(2)).validate().is_err());
        assert!(sched(0, RepeatCount::Times(0)).validate().is_ok());
        assert!(sched(100, RepeatCount::Indefinitely).validate().is_ok());
    }

    #[test]
    fn test_exhausted_after_triggering() {
        let mut s = sched(1000, RepeatCount::Times(1));
        let start = utc(0);
        s.on_triggered();
        s.on_triggered();
        assert_eq!(s.fire_time_after(start, start, None), None);
    }

    #[test]
    fn test_misfire_smart_one_shot_fires_now() {
        let mut s = sched(0, RepeatCount::Times(0));
        let mut start = utc(0);
        let mut next = Some(utc(0));
        let now = utc(30);
        s.update_after_misfire(&mut next, &mut start, None, now);
        assert_eq!(next, Some(now));
        assert_eq!(start, utc(0));
    }

    #[test]
    fn test_misfire_reschedule_now_reanchors_start() {
        let mut s = sched(1000, RepeatCount::Times(10))
            .with_misfire_instruction(SimpleMisfireInstruction::RescheduleNowWithExistingRepeatCount);
        let mut start = utc(0);
        let mut next = Some(utc(0));
        let now = utc(30);
        s.update_after_misfire(&mut next, &mut start, None, now);
        assert_eq!(next, Some(now));
        assert_eq!(start, now);
        assert_eq!(s.repeat_count, RepeatCount::Times(10));
    }

    #[test]
    fn test_misfire_remaining_drops_missed() {
        let mut s = sched(1000, RepeatCount::Times(10))
            .with_misfire_instruction(SimpleMisfireInstruction::RescheduleNowWithRemainingRepeatCount);
        let mut start = utc(0);
        let mut next = Some(utc(0));
        // 5.5 intervals late: 5 fires missed
        let now = utc(5) + ChronoDuration::milliseconds(500);
        s.update_after_misfire(&mut next, &mut start, None, now);
        assert_eq!(s.repeat_count, RepeatCount::Times(5));
        assert_eq!(next, Some(now));
    }

    #[test]
    fn test_misfire_next_with_existing_waits() {
        let mut s = sched(1000, RepeatCount::Indefinitely)
            .with_misfire_instruction(SimpleMisfireInstruction::RescheduleNextWithExistingCount);
        let mut start = utc(0);
        let mut next = Some(utc(0));
        let now = utc(30) + ChronoDuration::milliseconds(1);
        s.update_after_misfire(&mut next, &mut start, None, now);
        assert_eq!(next, Some(utc(31)));
        assert_eq!(start, utc(0));
    }

    #[test]
    fn test_final_fire_time() {
        let s = sched(1000, RepeatCount::Times(3));
        assert_eq!(s.final_fire_time(utc(0), None), Some(utc(3)));

        let s = sched(1000, RepeatCount::Indefinitely);
        assert_eq!(s.final_fire_time(utc(0), None), None);
        // End at 12:00:03 exactly: the last fire strictly before it is 12:00:02
        assert_eq!(s.final_fire_time(utc(0), Some(utc(3))), Some(utc(2)));
    }
}
