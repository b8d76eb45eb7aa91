//! Job definitions and execution plumbing.
//!
//! This module provides the abstractions jobs are built from:
//!
//! - **JobKey / JobDetail / JobDataMap**: identity, metadata, and the typed
//!   key-value payload handed to executions
//! - **Job trait**: the interface user job code implements
//! - **ExecutionContext / FiredBundle**: the per-fire snapshot a worker runs
//!   against
//! - **JobFactory**: name-to-constructor registry producing job instances
//! - **JobRunShell**: the worker-side wrapper around one fire

mod context;
mod detail;
mod run_shell;

pub use context::{
    ExecutionContext, FiredBundle, Job, JobExecutionError, JobFactory, JobResult,
    RegistryJobFactory, UnscheduleHint,
};
pub use detail::{DataValue, JobDataMap, JobDetail, JobKey, DEFAULT_GROUP};
pub use run_shell::JobRunShell;
