//! Cron expression parsing and evaluation.
//!
//! The textual form is the 6/7-field dialect: `Seconds Minutes Hours
//! Day-of-month Month Day-of-week [Year]`, with `* ? , - / L W #` tokens and
//! case-insensitive month/weekday names. See [`CronExpression`] for the full
//! grammar.

mod expression;

pub use expression::{CronExpression, MAX_YEAR};
