//! Cron-expression-driven schedule.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::calendar::Calendar;
use crate::cron::CronExpression;

/// Misfire recovery for cron schedules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CronMisfireInstruction {
    /// Skip misfire handling; all missed fires happen as fast as they can
    /// be acquired
    Ignore,
    /// Policy chosen by the scheduler; for cron this means
    /// [`CronMisfireInstruction::FireOnceNow`]
    #[default]
    Smart,
    /// Fire once immediately, then continue on schedule
    FireOnceNow,
    /// Drop the missed fire and wait for the next scheduled instant
    DoNothing,
}

/// Fires at the instants of a [`CronExpression`].
#[derive(Debug, Clone)]
pub struct CronSchedule {
    /// The expression, bound to its time zone
    pub expression: CronExpression,
    /// Recovery policy when a fire time passes the misfire threshold
    pub misfire_instruction: CronMisfireInstruction,
}

impl CronSchedule {
    pub fn new(expression: CronExpression) -> Self {
        Self {
            expression,
            misfire_instruction: CronMisfireInstruction::default(),
        }
    }

    pub fn with_misfire_instruction(mut self, instruction: CronMisfireInstruction) -> Self {
        self.misfire_instruction = instruction;
        self
    }

    pub(crate) fn fire_time_after(
        &self,
        after: DateTime<Utc>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let floor = start - ChronoDuration::seconds(1);
        let after = after.max(floor);
        let next = self.expression.next_after(after)?;
        match end {
            Some(end) if next >= end => None,
            _ => Some(next),
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
            CronMisfireInstruction::Ignore => return next,
            CronMisfireInstruction::Smart => CronMisfireInstruction::FireOnceNow,
            other => other,
        };
        match effective {
            CronMisfireInstruction::FireOnceNow => Some(now),
            CronMisfireInstruction::DoNothing => {
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
            // Ignore and Smart already resolved above
            _ => next,
        }
    }
}
