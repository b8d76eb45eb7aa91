//! # Metronome
//!
//! An in-process job scheduler: fires user-defined jobs at moments derived
//! from declarative schedules (cron expressions and fixed-rate or
//! calendar-aware intervals), tolerates clock drift and outages through
//! per-trigger misfire policies, coordinates a bounded worker pool, and
//! guarantees ordering and concurrency rules per job.
//!
//! ## Architecture
//!
//! - **CronExpression**: 6/7-field cron parsing and next-fire evaluation
//! - **Triggers**: a sealed set of schedule variants (cron, simple,
//!   calendar-interval, daily time-interval) with misfire policies
//! - **JobStore**: the store contract plus the in-memory reference store
//!   owning jobs, triggers, calendars, paused groups, and blocked jobs
//! - **ThreadPool**: bounded pool of pre-created OS worker threads
//! - **Scheduler**: the façade plus the control-loop thread that acquires,
//!   fires, and dispatches trigger batches
//! - **Telemetry**: structured logging infrastructure
//!
//! ## Example
//!
//! ```no_run
//! use metronome::prelude::*;
//! use std::time::Duration;
//!
//! struct HelloJob;
//!
//! impl Job for HelloJob {
//!     fn execute(&self, ctx: &mut ExecutionContext) -> JobResult {
//!         println!("hello from {}", ctx.job_detail().key);
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> metronome::Result<()> {
//!     let scheduler = SchedulerFactory::default_scheduler()?;
//!     scheduler.register_job("hello", || Box::new(HelloJob));
//!
//!     let job = JobDetail::new(JobKey::with_default_group("hello"), "hello");
//!     let trigger = Trigger::builder(TriggerKey::with_default_group("every-2s"))
//!         .with_schedule(Schedule::repeat_forever(Duration::from_secs(2)))
//!         .build()?;
//!     scheduler.schedule_job(job, trigger)?;
//!     scheduler.start()?;
//!     std::thread::sleep(Duration::from_secs(10));
//!     scheduler.shutdown(true);
//!     Ok(())
//! }
//! ```

pub mod calendar;
pub mod config;
pub mod cron;
pub mod error;
pub mod jobs;
pub mod pool;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod triggers;

pub use error::{CronParseError, ErrorCode, Result, SchedulerError};

/// Re-export of the types most applications touch.
pub mod prelude {
    pub use crate::calendar::Calendar;
    pub use crate::config::SchedulerConfig;
    pub use crate::cron::CronExpression;
    pub use crate::error::{ErrorCode, Result, SchedulerError};
    pub use crate::jobs::{
        ExecutionContext, Job, JobDataMap, JobDetail, JobExecutionError, JobKey, JobResult,
    };
    pub use crate::scheduler::{
        JobListener, Scheduler, SchedulerFactory, SchedulerListener, TriggerListener,
    };
    pub use crate::store::TriggerState;
    pub use crate::triggers::{IntervalUnit, RepeatCount, Schedule, TimeOfDay, Trigger, TriggerKey};
}
