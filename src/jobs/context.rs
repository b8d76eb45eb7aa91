//! Per-fire execution context, job trait, and job construction.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::{ErrorCode, Result, SchedulerError};
use crate::jobs::{JobDataMap, JobDetail};
use crate::triggers::Trigger;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// The interface all job implementations provide.
///
/// `execute` runs on a worker thread. Failures are returned as a
/// [`JobExecutionError`] value — they are routed to listeners and into the
/// completion instruction, never propagated out of the worker.
pub trait Job: Send + Sync {
    /// Execute the job against the per-fire context.
    ///
    /// Long-running jobs should poll
    /// [`ExecutionContext::is_interrupt_requested`] and bail out when an
    /// interruption has been requested; jobs that ignore it run to
    /// completion.
    fn execute(&self, ctx: &mut ExecutionContext) -> JobResult;
}

/// Result type for job execution.
pub type JobResult = std::result::Result<(), JobExecutionError>;

/// What the scheduler should do with the firing (or all) triggers of a job
/// that reported an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnscheduleHint {
    /// Leave triggers alone
    #[default]
    None,
    /// Unschedule the trigger that fired this execution
    FiringTrigger,
    /// Unschedule every trigger pointing at this job
    AllTriggers,
}

/// Error reported by a job execution, with recovery hints.
#[derive(Debug, Clone)]
pub struct JobExecutionError {
    /// What went wrong
    pub message: String,
    /// Re-execute the job immediately
    pub refire_immediately: bool,
    /// Unschedule the firing trigger or all of the job's triggers
    pub unschedule: UnscheduleHint,
}

impl JobExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            refire_immediately: false,
            unschedule: UnscheduleHint::None,
        }
    }

    /// Request an immediate re-execution of the job.
    pub fn with_refire(mut self) -> Self {
        self.refire_immediately = true;
        self
    }

    /// Request that the trigger which fired this execution be unscheduled.
    pub fn with_unschedule_firing_trigger(mut self) -> Self {
        self.unschedule = UnscheduleHint::FiringTrigger;
        self
    }

    /// Request that all triggers of this job be unscheduled.
    pub fn with_unschedule_all_triggers(mut self) -> Self {
        self.unschedule = UnscheduleHint::AllTriggers;
        self
    }
}

impl fmt::Display for JobExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobExecutionError {}

// ═══════════════════════════════════════════════════════════════════════════════
// Fired Bundle
// ═══════════════════════════════════════════════════════════════════════════════

/// The immutable snapshot handed to a worker for one fire.
#[derive(Debug, Clone)]
pub struct FiredBundle {
    /// The job to run
    pub job_detail: JobDetail,
    /// The trigger, as of the fire (previous/next already advanced)
    pub trigger: Trigger,
    /// The trigger's calendar, if it names one
    pub calendar: Option<Arc<dyn Calendar>>,
    /// When the fire actually happened
    pub fire_time: DateTime<Utc>,
    /// When the fire was scheduled to happen
    pub scheduled_fire_time: DateTime<Utc>,
    /// The trigger's previous fire time before this one
    pub previous_fire_time: Option<DateTime<Utc>>,
    /// The trigger's next fire time after this one
    pub next_fire_time: Option<DateTime<Utc>>,
    /// Whether this fire recovers one lost to a hard stop
    pub recovering: bool,
    /// Unique id of this fire
    pub fire_instance_id: Uuid,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Execution Context
// ═══════════════════════════════════════════════════════════════════════════════

/// The per-invocation view a job gets of its fire.
///
/// Carries the merged data map (trigger values overlaying job values), the
/// bundle fields, a user-writable `result`, an `out` map for communicating
/// with listeners, and the cooperative interruption flag.
pub struct ExecutionContext {
    scheduler_name: String,
    bundle: FiredBundle,
    merged_data: JobDataMap,
    interrupted: Arc<AtomicBool>,
    result: Option<serde_json::Value>,
    out: JobDataMap,
    run_time: Option<Duration>,
}

impl ExecutionContext {
    pub(crate) fn new(
        scheduler_name: impl Into<String>,
        bundle: FiredBundle,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        let merged_data = bundle.job_detail.job_data.merged(bundle.trigger.job_data());
        Self {
            scheduler_name: scheduler_name.into(),
            bundle,
            merged_data,
            interrupted,
            result: None,
            out: JobDataMap::new(),
            run_time: None,
        }
    }

    /// Name of the scheduler that fired this execution.
    pub fn scheduler_name(&self) -> &str {
        &self.scheduler_name
    }

    /// The job being executed.
    pub fn job_detail(&self) -> &JobDetail {
        &self.bundle.job_detail
    }

    /// The trigger that fired.
    pub fn trigger(&self) -> &Trigger {
        &self.bundle.trigger
    }

    /// The merged data map: trigger values overlay job values.
    pub fn merged_job_data_map(&self) -> &JobDataMap {
        &self.merged_data
    }

    /// Mutable access to the merged map. Changes flow back into the stored
    /// job only when the job persists data after execution.
    pub fn merged_job_data_map_mut(&mut self) -> &mut JobDataMap {
        &mut self.merged_data
    }

    pub fn fire_time(&self) -> DateTime<Utc> {
        self.bundle.fire_time
    }

    pub fn scheduled_fire_time(&self) -> DateTime<Utc> {
        self.bundle.scheduled_fire_time
    }

    pub fn previous_fire_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.previous_fire_time
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.bundle.next_fire_time
    }

    pub fn recovering(&self) -> bool {
        self.bundle.recovering
    }

    pub fn fire_instance_id(&self) -> Uuid {
        self.bundle.fire_instance_id
    }

    /// Whether interruption of this execution has been requested.
    pub fn is_interrupt_requested(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    /// Set the user-visible result of this execution.
    pub fn set_result(&mut self, result: serde_json::Value) {
        self.result = Some(result);
    }

    /// The result a previous step of this execution recorded, if any.
    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    /// Map for passing values from the job to listeners.
    pub fn out_map(&self) -> &JobDataMap {
        &self.out
    }

    /// Mutable access to the listener-communication map.
    pub fn out_map_mut(&mut self) -> &mut JobDataMap {
        &mut self.out
    }

    /// Wall-clock duration of the job's `execute` call. `None` until the
    /// execution finished.
    pub fn run_time(&self) -> Option<Duration> {
        self.run_time
    }

    pub(crate) fn set_run_time(&mut self, run_time: Duration) {
        self.run_time = Some(run_time);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Factory
// ═══════════════════════════════════════════════════════════════════════════════

/// Produces a job instance for each fire.
///
/// The default implementation is [`RegistryJobFactory`]; alternative
/// factories may inject dependencies into job instances.
pub trait JobFactory: Send + Sync {
    /// Build the job instance for the given bundle.
    fn new_job(&self, bundle: &FiredBundle) -> Result<Box<dyn Job>>;
}

/// Constructor registered for a job type name.
pub type JobConstructor = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// The default factory: a registry mapping job type names to constructors.
#[derive(Default)]
pub struct RegistryJobFactory {
    constructors: RwLock<HashMap<String, JobConstructor>>,
}

impl RegistryJobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under a job type name. Replaces any previous
    /// registration for the same name.
    pub fn register<F>(&self, job_type: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Job> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .insert(job_type.into(), Arc::new(constructor));
    }

    /// Whether a constructor is registered for the name.
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.constructors.read().contains_key(job_type)
    }
}

impl JobFactory for RegistryJobFactory {
    fn new_job(&self, bundle: &FiredBundle) -> Result<Box<dyn Job>> {
        let job_type = &bundle.job_detail.job_type;
        let constructors = self.constructors.read();
        let constructor = constructors.get(job_type).ok_or_else(|| {
            SchedulerError::new(
                ErrorCode::JobFactoryFailed,
                format!("no job registered under type '{}'", job_type),
            )
        })?;
        Ok(constructor())
    }
}

impl fmt::Debug for RegistryJobFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryJobFactory")
            .field("registered", &self.constructors.read().len())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
