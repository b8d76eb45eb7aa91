//! The cron expression parser and fire-time evaluator.

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, NaiveDate, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CronParseError;

/// No fire time is ever computed past this year.
pub const MAX_YEAR: i32 = 2299;

const YEAR_TOKEN_MIN: u32 = 1970;
const YEAR_TOKEN_MAX: u32 = 2199;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// A parsed cron expression bound to a time zone.
///
/// An expression has 6 or 7 whitespace-separated fields:
///
/// ```text
/// Seconds Minutes Hours Day-of-month Month Day-of-week [Year]
/// 0-59    0-59    0-23  1-31         1-12  1-7          1970-2199
/// ```
///
/// Months also accept `JAN`-`DEC` and weekdays `SUN`-`SAT` (1 = Sunday),
/// case-insensitively. `*` selects every value, lists (`,`) mix with ranges
/// (`a-b`, wrapping when `b < a`) and steps (`*/n`, `a/n`, `a-b/n`). Exactly
/// one of day-of-month and day-of-week must be `?` ("no specific value").
///
/// Day-of-month additionally understands `L` (last day), `L-n` (n-th to
/// last), `LW` (last weekday) and `dW` (weekday nearest `d`, never crossing
/// the month boundary). Day-of-week understands `L` alone (Saturday), `nL`
/// (last weekday `n` of the month) and `n#k` (k-th weekday `n` of the
/// month, `k` in 1..=5).
///
/// ```
/// use metronome::cron::CronExpression;
///
/// let every_five = "0 0/5 * * * ?".parse::<CronExpression>().unwrap();
/// assert!(every_five.to_string() == "0 0/5 * * * ?");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CronExpressionRepr", into = "CronExpressionRepr")]
pub struct CronExpression {
    expression: String,
    tz: Tz,
    seconds: BTreeSet<u32>,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    day_of_month: DayOfMonthField,
    months: BTreeSet<u32>,
    day_of_week: DayOfWeekField,
    /// `None` means every year up to [`MAX_YEAR`]
    years: Option<BTreeSet<i32>>,
}

/// Serialized shape: the normalized expression plus its zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CronExpressionRepr {
    expression: String,
    time_zone: Tz,
}

impl From<CronExpression> for CronExpressionRepr {
    fn from(expr: CronExpression) -> Self {
        Self {
            expression: expr.expression,
            time_zone: expr.tz,
        }
    }
}

impl TryFrom<CronExpressionRepr> for CronExpression {
    type Error = CronParseError;

    fn try_from(repr: CronExpressionRepr) -> Result<Self, Self::Error> {
        Ok(CronExpression::parse(&repr.expression)?.with_time_zone(repr.time_zone))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DayOfMonthField {
    /// `?`
    Unspecified,
    /// Plain day numbers
    Days(BTreeSet<u32>),
    /// `L`, `L-n`, `LW`
    Last { offset: u32, weekday: bool },
    /// `dW`
    NearestWeekday(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DayOfWeekField {
    /// `?`
    Unspecified,
    /// Plain weekday numbers (1 = Sunday .. 7 = Saturday)
    Days(BTreeSet<u32>),
    /// `nL`: last weekday `n` of the month
    Last(u32),
    /// `n#k`: k-th weekday `n` of the month
    Nth { weekday: u32, nth: u32 },
}

impl CronExpression {
    /// Parse an expression in UTC.
    pub fn parse(expression: &str) -> Result<Self, CronParseError> {
        Self::parse_with_time_zone(expression, Tz::UTC)
    }

    /// Parse an expression evaluated in the given time zone.
    pub fn parse_with_time_zone(expression: &str, tz: Tz) -> Result<Self, CronParseError> {
        Parser::new(expression).parse(tz)
    }

    /// Rebind the expression to another time zone.
    pub fn with_time_zone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    /// The zone fire times are computed in.
    pub fn time_zone(&self) -> Tz {
        self.tz
    }

    /// The normalized (uppercased) textual form.
    pub fn as_str(&self) -> &str {
        &self.expression
    }

    /// The least instant strictly after `after` satisfying the expression,
    /// or `None` when no such instant exists at or below [`MAX_YEAR`].
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let min_time = self.min_time_of_day();
        let after_local = after.with_timezone(&self.tz).naive_local();
        let mut local = after_local.with_nanosecond(0)? + ChronoDuration::seconds(1);

        loop {
            if local.year() > MAX_YEAR {
                return None;
            }

            // Seconds
            let sec = local.time().second();
            match self.seconds.range(sec..).next() {
                Some(&s) => local = local.with_second(s)?,
                None => {
                    local = (local + ChronoDuration::minutes(1))
                        .with_second(*self.seconds.iter().next()?)?;
                }
            }

            // Minutes
            let min = local.time().minute();
            match self.minutes.range(min..).next() {
                Some(&m) if m == min => {}
                Some(&m) => {
                    local = local
                        .with_minute(m)?
                        .with_second(*self.seconds.iter().next()?)?;
                }
                None => {
                    local = (local + ChronoDuration::hours(1))
                        .with_minute(*self.minutes.iter().next()?)?
                        .with_second(*self.seconds.iter().next()?)?;
                }
            }

            // Hours
            let hour = local.time().hour();
            match self.hours.range(hour..).next() {
                Some(&h) if h == hour => {}
                Some(&h) => local = local.date().and_time(min_time).with_hour(h)?,
                None => {
                    local = (local.date() + ChronoDuration::days(1)).and_time(min_time);
                    continue;
                }
            }

            // Year
            let date = local.date();
            if !self.year_matches(date.year()) {
                let next = self.next_allowed_year(date.year() + 1)?;
                if next > MAX_YEAR {
                    return None;
                }
                local = NaiveDate::from_ymd_opt(next, 1, 1)?.and_time(min_time);
                continue;
            }

            // Month
            if !self.months.contains(&date.month()) {
                local = match self.months.range(date.month() + 1..).next() {
                    Some(&m) => NaiveDate::from_ymd_opt(date.year(), m, 1)?.and_time(min_time),
                    None => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?.and_time(min_time),
                };
                continue;
            }

            // Day
            if !self.day_matches(date) {
                local = (date + ChronoDuration::days(1)).and_time(min_time);
                continue;
            }

            // Resolve the local candidate to an instant. Skipped-hour gaps
            // advance the search; ambiguous (fold) times pick the earliest
            // occurrence still after `after`.
            match self.tz.from_local_datetime(&local) {
                LocalResult::Single(dt) => {
                    let dt = dt.with_timezone(&Utc);
                    if dt > after {
                        return Some(dt);
                    }
                    local += ChronoDuration::seconds(1);
                }
                LocalResult::Ambiguous(earliest, latest) => {
                    let earliest = earliest.with_timezone(&Utc);
                    let latest = latest.with_timezone(&Utc);
                    if earliest > after {
                        return Some(earliest);
                    }
                    if latest > after {
                        return Some(latest);
                    }
                    local += ChronoDuration::seconds(1);
                }
                LocalResult::None => {
                    local += ChronoDuration::minutes(15);
                }
            }
        }
    }

    /// Whether `instant` (at second granularity) satisfies the expression.
    pub fn is_satisfied_by(&self, instant: DateTime<Utc>) -> bool {
        let truncated = match instant.with_nanosecond(0) {
            Some(t) => t,
            None => return false,
        };
        self.next_after(truncated - ChronoDuration::seconds(1)) == Some(truncated)
    }

    fn min_time_of_day(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(
            *self.hours.iter().next().unwrap_or(&0),
            *self.minutes.iter().next().unwrap_or(&0),
            *self.seconds.iter().next().unwrap_or(&0),
        )
        .unwrap_or(NaiveTime::MIN)
    }

    fn year_matches(&self, year: i32) -> bool {
        match &self.years {
            None => year <= MAX_YEAR,
            Some(set) => set.contains(&year),
        }
    }

    fn next_allowed_year(&self, from: i32) -> Option<i32> {
        match &self.years {
            None => (from <= MAX_YEAR).then_some(from),
            Some(set) => set.range(from..).next().copied(),
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        match (&self.day_of_month, &self.day_of_week) {
            (DayOfMonthField::Unspecified, dow) => Self::dow_matches(dow, date),
            (dom, _) => Self::dom_matches(dom, date),
        }
    }

    fn dom_matches(field: &DayOfMonthField, date: NaiveDate) -> bool {
        let day = date.day();
        let last = last_day_of_month(date.year(), date.month());
        match field {
            DayOfMonthField::Unspecified => true,
            DayOfMonthField::Days(set) => set.contains(&day),
            DayOfMonthField::Last {
                offset,
                weekday: false,
            } => last.checked_sub(*offset).is_some_and(|d| d >= 1 && day == d),
            DayOfMonthField::Last { weekday: true, .. } => {
                day == nearest_weekday(date.year(), date.month(), last)
            }
            DayOfMonthField::NearestWeekday(d) => {
                day == nearest_weekday(date.year(), date.month(), (*d).min(last))
            }
        }
    }

    fn dow_matches(field: &DayOfWeekField, date: NaiveDate) -> bool {
        let dow = cron_day_of_week(date);
        let day = date.day();
        let last = last_day_of_month(date.year(), date.month());
        match field {
            DayOfWeekField::Unspecified => true,
            DayOfWeekField::Days(set) => set.contains(&dow),
            DayOfWeekField::Last(n) => dow == *n && day + 7 > last,
            DayOfWeekField::Nth { weekday, nth } => dow == *weekday && (day - 1) / 7 + 1 == *nth,
        }
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl FromStr for CronExpression {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Cron day-of-week numbering: 1 = Sunday .. 7 = Saturday.
fn cron_day_of_week(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_sunday() + 1
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_y, next_m) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_y, next_m, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// The weekday nearest `day` within the same month: Saturdays pull back to
/// Friday (or push to Monday when `day` is the 1st), Sundays push forward to
/// Monday (or pull back to Friday when `day` is the last day).
fn nearest_weekday(year: i32, month: u32, day: u32) -> u32 {
    let last = last_day_of_month(year, month);
    let date = match NaiveDate::from_ymd_opt(year, month, day) {
        Some(d) => d,
        None => return day,
    };
    match cron_day_of_week(date) {
        7 => {
            if day == 1 {
                day + 2
            } else {
                day - 1
            }
        }
        1 => {
            if day == last {
                day - 2
            } else {
                day + 1
            }
        }
        _ => day,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════════════════════════

struct Parser<'a> {
    original: &'a str,
    expression: String,
}

/// `(min, max)` bounds plus optional names for a numeric field.
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: Option<&'static [&'static str]>,
}

const SECONDS_SPEC: FieldSpec = FieldSpec {
    name: "seconds",
    min: 0,
    max: 59,
    names: None,
};
const MINUTES_SPEC: FieldSpec = FieldSpec {
    name: "minutes",
    min: 0,
    max: 59,
    names: None,
};
const HOURS_SPEC: FieldSpec = FieldSpec {
    name: "hours",
    min: 0,
    max: 23,
    names: None,
};
const DOM_SPEC: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: None,
};
const MONTHS_SPEC: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: Some(&MONTH_NAMES),
};
const DOW_SPEC: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 1,
    max: 7,
    names: Some(&DAY_NAMES),
};
const YEARS_SPEC: FieldSpec = FieldSpec {
    name: "year",
    min: YEAR_TOKEN_MIN,
    max: YEAR_TOKEN_MAX,
    names: None,
};

impl<'a> Parser<'a> {
    fn new(original: &'a str) -> Self {
        Self {
            original,
            expression: original.trim().to_uppercase(),
        }
    }

    fn error(&self, position: usize, message: impl Into<String>) -> CronParseError {
        CronParseError::new(self.original.trim(), position, message)
    }

    fn parse(self, tz: Tz) -> Result<CronExpression, CronParseError> {
        // Tokens with their byte offsets in the normalized expression.
        let mut fields: Vec<(usize, &str)> = Vec::new();
        let mut offset = 0;
        let expr = self.expression.clone();
        for token in expr.split_whitespace() {
            let at = expr[offset..]
                .find(token)
                .map(|i| i + offset)
                .unwrap_or(offset);
            fields.push((at, token));
            offset = at + token.len();
        }

        if !(6..=7).contains(&fields.len()) {
            return Err(self.error(
                0,
                format!("expected 6 or 7 fields, found {}", fields.len()),
            ));
        }

        let seconds = self.parse_numeric(fields[0], &SECONDS_SPEC)?;
        let minutes = self.parse_numeric(fields[1], &MINUTES_SPEC)?;
        let hours = self.parse_numeric(fields[2], &HOURS_SPEC)?;
        let day_of_month = self.parse_day_of_month(fields[3])?;
        let months = self.parse_numeric(fields[4], &MONTHS_SPEC)?;
        let day_of_week = self.parse_day_of_week(fields[5])?;
        let years = match fields.get(6) {
            None => None,
            Some(&(_, "*")) => None,
            Some(&field) => Some(
                self.parse_numeric(field, &YEARS_SPEC)?
                    .into_iter()
                    .map(|y| y as i32)
                    .collect(),
            ),
        };

        match (&day_of_month, &day_of_week) {
            (DayOfMonthField::Unspecified, DayOfWeekField::Unspecified) => {
                return Err(self.error(
                    fields[5].0,
                    "'?' cannot be used in both day-of-month and day-of-week",
                ));
            }
            (DayOfMonthField::Unspecified, _) | (_, DayOfWeekField::Unspecified) => {}
            _ => {
                return Err(self.error(
                    fields[5].0,
                    "one of day-of-month or day-of-week must be '?'",
                ));
            }
        }

        Ok(CronExpression {
            expression: self.expression,
            tz,
            seconds,
            minutes,
            hours,
            day_of_month,
            months,
            day_of_week,
            years,
        })
    }

    fn parse_numeric(
        &self,
        (at, token): (usize, &str),
        spec: &FieldSpec,
    ) -> Result<BTreeSet<u32>, CronParseError> {
        let mut values = BTreeSet::new();
        for element in token.split(',') {
            if element.is_empty() {
                return Err(self.error(at, format!("empty element in {} list", spec.name)));
            }
            self.parse_element(at, element, spec, &mut values)?;
        }
        Ok(values)
    }

    fn parse_element(
        &self,
        at: usize,
        element: &str,
        spec: &FieldSpec,
        values: &mut BTreeSet<u32>,
    ) -> Result<(), CronParseError> {
        let (base, step) = match element.split_once('/') {
            None => (element, None),
            Some((base, step_str)) => {
                let step: u32 = step_str.parse().map_err(|_| {
                    self.error(at, format!("unparseable step '{}' in {}", step_str, spec.name))
                })?;
                let span = spec.max - spec.min + 1;
                if step == 0 || step > span {
                    return Err(self.error(
                        at,
                        format!("step {} out of range for {} field", step, spec.name),
                    ));
                }
                (base, Some(step))
            }
        };

        let (start, end) = if base == "*" {
            (spec.min, spec.max)
        } else {
            match base.split_once('-') {
                Some((lo, hi)) => {
                    let lo = self.parse_value(at, lo, spec)?;
                    let hi = self.parse_value(at, hi, spec)?;
                    (lo, hi)
                }
                None => {
                    let v = self.parse_value(at, base, spec)?;
                    match step {
                        // `a/n` runs from a through the field max
                        Some(_) => (v, spec.max),
                        None => (v, v),
                    }
                }
            }
        };

        // `a-b` with b < a wraps through the field maximum.
        let ordered: Vec<u32> = if start <= end {
            (start..=end).collect()
        } else {
            (start..=spec.max).chain(spec.min..=end).collect()
        };
        for v in ordered.into_iter().step_by(step.unwrap_or(1) as usize) {
            values.insert(v);
        }
        Ok(())
    }

    fn parse_value(&self, at: usize, text: &str, spec: &FieldSpec) -> Result<u32, CronParseError> {
        let value = if let Some(names) = spec.names {
            match names.iter().position(|n| *n == text) {
                Some(idx) => idx as u32 + spec.min,
                None => text.parse().map_err(|_| {
                    self.error(at, format!("unknown {} value '{}'", spec.name, text))
                })?,
            }
        } else {
            text.parse()
                .map_err(|_| self.error(at, format!("unparseable {} value '{}'", spec.name, text)))?
        };
        if value < spec.min || value > spec.max {
            return Err(self.error(
                at,
                format!(
                    "{} value {} out of range {}-{}",
                    spec.name, value, spec.min, spec.max
                ),
            ));
        }
        Ok(value)
    }

    fn parse_day_of_month(
        &self,
        (at, token): (usize, &str),
    ) -> Result<DayOfMonthField, CronParseError> {
        if token == "?" {
            return Ok(DayOfMonthField::Unspecified);
        }
        if token.contains(',') && (token.contains('L') || token.contains('W')) {
            return Err(self.error(at, "'L' and 'W' cannot be part of a day-of-month list"));
        }
        if token == "L" {
            return Ok(DayOfMonthField::Last {
                offset: 0,
                weekday: false,
            });
        }
        if token == "LW" {
            return Ok(DayOfMonthField::Last {
                offset: 0,
                weekday: true,
            });
        }
        if let Some(offset_str) = token.strip_prefix("L-") {
            let offset: u32 = offset_str.parse().map_err(|_| {
                self.error(at, format!("unparseable 'L' offset '{}'", offset_str))
            })?;
            if offset > 30 {
                return Err(self.error(at, format!("'L' offset {} out of range 0-30", offset)));
            }
            return Ok(DayOfMonthField::Last {
                offset,
                weekday: false,
            });
        }
        if let Some(day_str) = token.strip_suffix('W') {
            let day = self.parse_value(at, day_str, &DOM_SPEC)?;
            return Ok(DayOfMonthField::NearestWeekday(day));
        }
        Ok(DayOfMonthField::Days(
            self.parse_numeric((at, token), &DOM_SPEC)?,
        ))
    }

    fn parse_day_of_week(
        &self,
        (at, token): (usize, &str),
    ) -> Result<DayOfWeekField, CronParseError> {
        if token == "?" {
            return Ok(DayOfWeekField::Unspecified);
        }
        if token.contains(',') && (token.contains('L') || token.contains('#')) {
            return Err(self.error(at, "'L' and '#' cannot be part of a day-of-week list"));
        }
        if token == "L" {
            // Bare 'L' in day-of-week means Saturday
            return Ok(DayOfWeekField::Days(BTreeSet::from([7])));
        }
        if let Some(day_str) = token.strip_suffix('L') {
            let weekday = self.parse_value(at, day_str, &DOW_SPEC)?;
            return Ok(DayOfWeekField::Last(weekday));
        }
        if let Some((day_str, nth_str)) = token.split_once('#') {
            let weekday = self.parse_value(at, day_str, &DOW_SPEC)?;
            let nth: u32 = nth_str
                .parse()
                .map_err(|_| self.error(at, format!("unparseable '#' ordinal '{}'", nth_str)))?;
            if !(1..=5).contains(&nth) {
                return Err(self.error(at, format!("'#' ordinal {} out of range 1-5", nth)));
            }
            return Ok(DayOfWeekField::Nth { weekday, nth });
        }
        Ok(DayOfWeekField::Days(
            self.parse_numeric((at, token), &DOW_SPEC)?,
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_every_five_minutes() {
        let expr = CronExpression::parse("0 0/5 * * * ?").unwrap();
        let next = expr.next_after(utc(2026, 3, 2, 12, 3, 17)).unwrap();
        assert_eq!(next, utc(2026, 3, 2, 12, 5, 0));
        let next = expr.next_after(next).unwrap();
        assert_eq!(next, utc(2026, 3, 2, 12, 10, 0));
    }

    #[test]
    fn test_result_is_strictly_after() {
        let expr = CronExpression::parse("0 0 12 * * ?").unwrap();
        let noon = utc(2026, 3, 2, 12, 0, 0);
        assert_eq!(expr.next_after(noon).unwrap(), utc(2026, 3, 3, 12, 0, 0));
    }

    #[test]
    fn test_leap_year_boundaries() {
        let expr = CronExpression::parse("0 0 0 29 2 ? 2100").unwrap();
        assert_eq!(expr.next_after(utc(2026, 1, 1, 0, 0, 0)), None);

        let expr = CronExpression::parse("0 0 0 29 2 ? 2028").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 1, 1, 0, 0, 0)).unwrap(),
            utc(2028, 2, 29, 0, 0, 0)
        );
    }

    #[test]
    fn test_names_case_insensitive() {
        let expr = CronExpression::parse("0 0 9 ? mar mon-fri").unwrap();
        assert_eq!(expr.to_string(), "0 0 9 ? MAR MON-FRI");
        // 2026-03-02 is a Monday
        assert_eq!(
            expr.next_after(utc(2026, 2, 27, 0, 0, 0)).unwrap(),
            utc(2026, 3, 2, 9, 0, 0)
        );
    }

    #[test]
    fn test_wrapping_range() {
        let expr = CronExpression::parse("0 0 22-2 * * ?").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 3, 2, 20, 0, 0)).unwrap(),
            utc(2026, 3, 2, 22, 0, 0)
        );
        assert_eq!(
            expr.next_after(utc(2026, 3, 2, 23, 30, 0)).unwrap(),
            utc(2026, 3, 3, 0, 0, 0)
        );
        assert_eq!(
            expr.next_after(utc(2026, 3, 3, 2, 30, 0)).unwrap(),
            utc(2026, 3, 3, 22, 0, 0)
        );
    }

    #[test]
    fn test_last_day_of_month() {
        let expr = CronExpression::parse("0 0 0 L * ?").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 2, 1, 0, 0, 0)).unwrap(),
            utc(2026, 2, 28, 0, 0, 0)
        );
        // L-2: third-to-last day of a 31-day month
        let expr = CronExpression::parse("0 0 0 L-2 * ?").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 1, 1, 0, 0, 0)).unwrap(),
            utc(2026, 1, 29, 0, 0, 0)
        );
    }

    #[test]
    fn test_last_weekday_of_month() {
        // January 2026 ends on Saturday the 31st; LW pulls back to Friday the 30th
        let expr = CronExpression::parse("0 0 0 LW 1 ? 2026").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 1, 1, 0, 0, 0)).unwrap(),
            utc(2026, 1, 30, 0, 0, 0)
        );
    }

    #[test]
    fn test_nearest_weekday() {
        // 2026-05-02 is a Saturday; 2W resolves to Friday the 1st
        let expr = CronExpression::parse("0 0 0 2W 5 ?").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 4, 1, 0, 0, 0)).unwrap(),
            utc(2026, 5, 1, 0, 0, 0)
        );
        // 2026-08-01 is a Saturday; 1W pushes forward to Monday the 3rd
        let expr = CronExpression::parse("0 0 0 1W 8 ?").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 7, 1, 0, 0, 0)).unwrap(),
            utc(2026, 8, 3, 0, 0, 0)
        );
    }

    #[test]
    fn test_nth_weekday_of_month() {
        // Third Friday of March 2026 is the 20th
        let expr = CronExpression::parse("0 0 0 ? 3 6#3").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 3, 1, 0, 0, 0)).unwrap(),
            utc(2026, 3, 20, 0, 0, 0)
        );
    }

    #[test]
    fn test_fifth_occurrence_may_skip_months() {
        // Fifth Monday: March 2026 has five Mondays (last is the 30th),
        // April has only four.
        let expr = CronExpression::parse("0 0 0 ? * 2#5").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 3, 30, 0, 0, 1)).unwrap(),
            utc(2026, 6, 29, 0, 0, 0)
        );
    }

    #[test]
    fn test_last_weekday_in_month_token() {
        // Last Sunday of March 2026 is the 29th
        let expr = CronExpression::parse("0 30 10 ? 3 1L 2026").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 3, 1, 0, 0, 0)).unwrap(),
            utc(2026, 3, 29, 10, 30, 0)
        );
    }

    #[test]
    fn test_bare_l_in_day_of_week_is_saturday() {
        let expr = CronExpression::parse("0 0 0 ? * L").unwrap();
        // 2026-03-07 is a Saturday
        assert_eq!(
            expr.next_after(utc(2026, 3, 2, 0, 0, 0)).unwrap(),
            utc(2026, 3, 7, 0, 0, 0)
        );
    }

    #[test]
    fn test_time_zone_evaluation() {
        let expr =
            CronExpression::parse_with_time_zone("0 0 9 * * ?", chrono_tz::America::New_York)
                .unwrap();
        // 09:00 in New York is 14:00 UTC under EST (winter)
        assert_eq!(
            expr.next_after(utc(2026, 1, 15, 0, 0, 0)).unwrap(),
            utc(2026, 1, 15, 14, 0, 0)
        );
        // and 13:00 UTC under EDT (summer)
        assert_eq!(
            expr.next_after(utc(2026, 6, 15, 0, 0, 0)).unwrap(),
            utc(2026, 6, 15, 13, 0, 0)
        );
    }

    #[test]
    fn test_skipped_hour_advances() {
        // US DST spring-forward 2026-03-08: 02:30 EST does not exist
        let expr =
            CronExpression::parse_with_time_zone("0 30 2 * * ?", chrono_tz::America::New_York)
                .unwrap();
        let next = expr.next_after(utc(2026, 3, 8, 5, 0, 0)).unwrap();
        // The 02:30 slot next occurs on March 9
        assert_eq!(next, utc(2026, 3, 9, 6, 30, 0));
    }

    #[test]
    fn test_seven_field_year() {
        let expr = CronExpression::parse("0 0 0 1 1 ? 2030-2032").unwrap();
        assert_eq!(
            expr.next_after(utc(2026, 1, 1, 0, 0, 0)).unwrap(),
            utc(2030, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            expr.next_after(utc(2032, 1, 1, 0, 0, 0)),
            None
        );
    }

    #[test]
    fn test_max_year_exhaustion() {
        let expr = CronExpression::parse("0 0 0 1 1 ?").unwrap();
        assert_eq!(
            expr.next_after(utc(MAX_YEAR, 1, 1, 0, 0, 0)),
            None
        );
    }

    #[test]
    fn test_is_satisfied_by() {
        let expr = CronExpression::parse("0 15 10 * * ?").unwrap();
        assert!(expr.is_satisfied_by(utc(2026, 3, 2, 10, 15, 0)));
        assert!(!expr.is_satisfied_by(utc(2026, 3, 2, 10, 15, 1)));
    }

    #[test]
    fn test_parse_rejects_both_day_fields() {
        let err = CronExpression::parse("0 0 0 1 * 2").unwrap_err();
        assert!(err.message.contains("must be '?'"));

        let err = CronExpression::parse("0 0 0 ? * ?").unwrap_err();
        assert!(err.message.contains("both"));
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        assert!(CronExpression::parse("60 0 0 * * ?").is_err());
        assert!(CronExpression::parse("0 0 24 * * ?").is_err());
        assert!(CronExpression::parse("0 0 0 32 * ?").is_err());
        assert!(CronExpression::parse("0 0 0 ? * 8").is_err());
        assert!(CronExpression::parse("0 0 0 ? 13 *").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_ordinal() {
        let err = CronExpression::parse("0 0 0 ? * 6#6").unwrap_err();
        assert!(err.message.contains("out of range 1-5"));
    }

    #[test]
    fn test_parse_error_position() {
        let err = CronExpression::parse("0 0 0 * BAD ?").unwrap_err();
        assert_eq!(err.position, 8);
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert!(CronExpression::parse("0 0 *").is_err());
        assert!(CronExpression::parse("0 0 0 * * ? 2026 extra").is_err());
    }

    #[test]
    fn test_step_and_list_combinations() {
        let expr = CronExpression::parse("0 5,35 8-17/3 ? * MON,WED,FRI").unwrap();
        // 2026-03-02 is a Monday; hours 8, 11, 14, 17
        assert_eq!(
            expr.next_after(utc(2026, 3, 2, 11, 36, 0)).unwrap(),
            utc(2026, 3, 2, 14, 5, 0)
        );
    }

    #[test]
    fn test_serde_round_trip() {
        let expr =
            CronExpression::parse_with_time_zone("0 0/5 * * * ?", chrono_tz::Europe::Berlin)
                .unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        let back: CronExpression = serde_json::from_str(&json).unwrap();
        assert_eq!(expr, back);
    }
}
