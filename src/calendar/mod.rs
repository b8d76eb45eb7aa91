//! Calendars: instant-inclusion predicates for masking out excluded times.
//!
//! A [`Calendar`] answers whether a trigger may fire at a given instant and
//! where the next permitted instant lies. Calendars stack: each may carry a
//! base calendar, and an instant is included only when every calendar in the
//! chain includes it.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// Instant-inclusion predicate used to mask excluded times (holidays,
/// weekends, business hours) out of a trigger's schedule.
pub trait Calendar: fmt::Debug + Send + Sync {
    /// Whether the given instant is permitted.
    fn is_time_included(&self, time: DateTime<Utc>) -> bool;

    /// The next permitted instant at or after `time`.
    ///
    /// Implementations return `time` itself when it is included.
    fn next_included_time(&self, time: DateTime<Utc>) -> DateTime<Utc>;

    /// The stacked base calendar, if any (chained AND semantics).
    fn base_calendar(&self) -> Option<&Arc<dyn Calendar>> {
        None
    }

    /// Human-readable description.
    fn description(&self) -> Option<&str> {
        None
    }
}

/// Building block for calendar implementations: holds the optional base
/// calendar and description, and includes every instant its base includes.
///
/// Concrete calendars embed a `BaseCalendar` and consult
/// [`BaseCalendar::base_includes`] before applying their own exclusions.
#[derive(Debug, Clone, Default)]
pub struct BaseCalendar {
    base: Option<Arc<dyn Calendar>>,
    description: Option<String>,
}

impl BaseCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(mut self, base: Arc<dyn Calendar>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Whether the base chain (if any) includes the instant.
    pub fn base_includes(&self, time: DateTime<Utc>) -> bool {
        self.base.as_ref().map_or(true, |b| b.is_time_included(time))
    }

    /// The next instant the base chain includes, starting at `time`.
    pub fn base_next_included(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        match &self.base {
            Some(b) => b.next_included_time(time),
            None => time,
        }
    }
}

impl Calendar for BaseCalendar {
    fn is_time_included(&self, time: DateTime<Utc>) -> bool {
        self.base_includes(time)
    }

    fn next_included_time(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        self.base_next_included(time)
    }

    fn base_calendar(&self) -> Option<&Arc<dyn Calendar>> {
        self.base.as_ref()
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Excludes a closed interval of instants.
    #[derive(Debug)]
    struct BlackoutCalendar {
        inner: BaseCalendar,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    }

    impl Calendar for BlackoutCalendar {
        fn is_time_included(&self, time: DateTime<Utc>) -> bool {
            if !self.inner.base_includes(time) {
                return false;
            }
            time < self.from || time > self.until
        }

        fn next_included_time(&self, time: DateTime<Utc>) -> DateTime<Utc> {
            let mut t = self.inner.base_next_included(time);
            if t >= self.from && t <= self.until {
                t = self.until + chrono::Duration::seconds(1);
            }
            self.inner.base_next_included(t)
        }

        fn base_calendar(&self) -> Option<&Arc<dyn Calendar>> {
            self.inner.base_calendar()
        }
    }

    fn utc(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap()
    }

    #[test]
    fn test_base_calendar_includes_everything() {
        let cal = BaseCalendar::new();
        assert!(cal.is_time_included(utc(0)));
        assert_eq!(cal.next_included_time(utc(5)), utc(5));
    }

    #[test]
    fn test_blackout_exclusion() {
        let cal = BlackoutCalendar {
            inner: BaseCalendar::new(),
            from: utc(9),
            until: utc(17),
        };
        assert!(cal.is_time_included(utc(8)));
        assert!(!cal.is_time_included(utc(12)));
        assert!(cal.next_included_time(utc(12)) > utc(17));
        assert_eq!(cal.next_included_time(utc(3)), utc(3));
    }

    #[test]
    fn test_chained_base_is_anded() {
        let morning = Arc::new(BlackoutCalendar {
            inner: BaseCalendar::new(),
            from: utc(8),
            until: utc(10),
        });
        let stacked = BlackoutCalendar {
            inner: BaseCalendar::new().with_base(morning),
            from: utc(14),
            until: utc(16),
        };
        assert!(!stacked.is_time_included(utc(9)));
        assert!(!stacked.is_time_included(utc(15)));
        assert!(stacked.is_time_included(utc(12)));
    }
}
