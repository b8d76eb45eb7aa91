//! Job store: the contract and the in-memory reference implementation.
//!
//! A [`JobStore`] owns jobs, triggers, calendars, and group-level state
//! (paused groups, blocked jobs). Worker threads never see store-internal
//! collections; everything crossing the boundary is a snapshot. Persistent
//! implementations must honor the same invariants and state machine as the
//! reference [`RamJobStore`].

mod ram;

pub use ram::RamJobStore;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::calendar::Calendar;
use crate::error::Result;
use crate::jobs::{FiredBundle, JobDataMap, JobDetail, JobKey};
use crate::triggers::{Trigger, TriggerKey};

// ═══════════════════════════════════════════════════════════════════════════════
// Trigger State
// ═══════════════════════════════════════════════════════════════════════════════

/// State of a stored trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerState {
    /// Eligible for acquisition
    Waiting,
    /// Reserved by the scheduler thread, not yet fired
    Acquired,
    /// A fire is in flight
    Executing,
    /// Paused; not acquirable until resumed
    Paused,
    /// Paused while its job is blocked; resuming yields `Blocked`
    PausedAndBlocked,
    /// Its concurrent-execution-disallowed job is executing elsewhere
    Blocked,
    /// Will never fire again; terminal
    Complete,
    /// A fire ended in an unrecoverable error; terminal until the
    /// application removes and reschedules the trigger
    Error,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Completion Instruction
// ═══════════════════════════════════════════════════════════════════════════════

/// What the store should do with a trigger when its fire completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedExecutionInstruction {
    /// Continue on schedule
    Noop,
    /// Requeue the job for immediate re-execution
    ReExecuteJob,
    /// Remove the firing trigger; delete its job if a non-durable orphan
    SetTriggerComplete,
    /// Remove the firing trigger
    DeleteTrigger,
    /// Put the firing trigger into the `Error` state
    SetTriggerError,
    /// Remove every trigger of the job
    SetAllTriggersOfJobComplete,
    /// Put every trigger of the job into the `Error` state
    SetAllTriggersOfJobError,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Scheduler Signaler
// ═══════════════════════════════════════════════════════════════════════════════

/// Channel from the store back to the scheduler.
///
/// Implemented by the scheduler core; the store calls it (outside its own
/// lock) whenever state changed in a way that may affect the next wakeup.
pub trait SchedulerSignaler: Send + Sync {
    /// Scheduling data changed; `candidate_next_fire_time` carries the new
    /// earliest fire time when one is known.
    fn signal_scheduling_change(&self, candidate_next_fire_time: Option<DateTime<Utc>>);

    /// A trigger passed the misfire threshold unfired.
    fn notify_trigger_listeners_misfired(&self, trigger: &Trigger);

    /// A trigger will never fire again and left the store.
    fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger);
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Store Contract
// ═══════════════════════════════════════════════════════════════════════════════

/// The store contract. All operations serialize on the store's internal
/// lock; none of them block beyond it.
pub trait JobStore: Send + Sync {
    /// Wire the store to the scheduler's signaler. Called once before the
    /// scheduler starts.
    fn initialize(&self, signaler: Arc<dyn SchedulerSignaler>) -> Result<()>;

    /// Orderly teardown. The RAM store has nothing to tear down.
    fn shutdown(&self) {}

    fn is_clustered(&self) -> bool {
        false
    }

    fn supports_persistence(&self) -> bool {
        false
    }

    fn set_instance_name(&self, _name: &str) {}

    fn set_instance_id(&self, _id: &str) {}

    fn set_thread_pool_size(&self, _size: usize) {}

    // ── Storage ──────────────────────────────────────────────────────────────

    /// Store a job and its trigger atomically.
    fn store_job_and_trigger(&self, job: JobDetail, trigger: Trigger) -> Result<()>;

    /// Store a job; `replace` overwrites an existing one with the same key.
    fn store_job(&self, job: JobDetail, replace: bool) -> Result<()>;

    /// Store a trigger. Its job must already be stored; its first fire time
    /// is computed here, and a trigger that will never fire is rejected.
    fn store_trigger(&self, trigger: Trigger, replace: bool) -> Result<()>;

    /// Remove a job and all triggers referencing it.
    fn remove_job(&self, key: &JobKey) -> Result<bool>;

    /// Remove a trigger; its job departs too when left a non-durable
    /// orphan.
    fn remove_trigger(&self, key: &TriggerKey) -> Result<bool>;

    /// Replace a trigger with a new one referencing the same job. Returns
    /// `false` when the old trigger does not exist.
    fn replace_trigger(&self, key: &TriggerKey, new_trigger: Trigger) -> Result<bool>;

    fn retrieve_job(&self, key: &JobKey) -> Option<JobDetail>;

    fn retrieve_trigger(&self, key: &TriggerKey) -> Option<Trigger>;

    fn check_job_exists(&self, key: &JobKey) -> bool;

    fn check_trigger_exists(&self, key: &TriggerKey) -> bool;

    /// Remove all jobs, triggers, and calendars.
    fn clear_all_scheduling_data(&self) -> Result<()>;

    // ── Calendars ────────────────────────────────────────────────────────────

    /// Store a calendar. With `update_triggers`, triggers referencing it
    /// are re-evaluated against the new calendar.
    fn store_calendar(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()>;

    /// Remove a calendar. Fails while any trigger references it.
    fn remove_calendar(&self, name: &str) -> Result<bool>;

    fn retrieve_calendar(&self, name: &str) -> Option<Arc<dyn Calendar>>;

    fn get_calendar_names(&self) -> Vec<String>;

    // ── Queries ──────────────────────────────────────────────────────────────

    fn get_job_keys(&self, group: &str) -> Vec<JobKey>;

    fn get_trigger_keys(&self, group: &str) -> Vec<TriggerKey>;

    fn get_job_group_names(&self) -> Vec<String>;

    fn get_trigger_group_names(&self) -> Vec<String>;

    fn get_triggers_for_job(&self, key: &JobKey) -> Vec<Trigger>;

    fn get_trigger_state(&self, key: &TriggerKey) -> Option<TriggerState>;

    fn get_number_of_jobs(&self) -> usize;

    fn get_number_of_triggers(&self) -> usize;

    fn get_number_of_calendars(&self) -> usize;

    // ── Pause / Resume ───────────────────────────────────────────────────────

    fn pause_trigger(&self, key: &TriggerKey) -> Result<()>;

    /// Pause every trigger in the group, and remember the group so later
    /// additions enter paused.
    fn pause_trigger_group(&self, group: &str) -> Result<()>;

    fn pause_job(&self, key: &JobKey) -> Result<()>;

    fn pause_job_group(&self, group: &str) -> Result<()>;

    fn resume_trigger(&self, key: &TriggerKey) -> Result<()>;

    fn resume_trigger_group(&self, group: &str) -> Result<()>;

    fn resume_job(&self, key: &JobKey) -> Result<()>;

    fn resume_job_group(&self, group: &str) -> Result<()>;

    fn pause_all(&self) -> Result<()>;

    fn resume_all(&self) -> Result<()>;

    fn get_paused_trigger_groups(&self) -> Vec<String>;

    // ── Acquisition lifecycle ────────────────────────────────────────────────

    /// Reserve up to `max_count` due triggers, earliest first (ties: higher
    /// priority, then key order). Only `Waiting` triggers whose next fire
    /// time is within `no_later_than + time_window` are returned, at most
    /// one per concurrent-execution-disallowed job. Misfires are applied
    /// here.
    fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Vec<Trigger>;

    /// Return an acquired-but-unfired trigger to `Waiting`.
    fn release_acquired_trigger(&self, key: &TriggerKey);

    /// Fire the acquired triggers: advance their schedules, move them to
    /// `Executing`, block sibling triggers of concurrent-execution-
    /// disallowed jobs, and hand back one bundle per successful fire.
    /// Entries that are no longer fireable are silently dropped.
    fn triggers_fired(&self, triggers: &[Trigger]) -> Vec<FiredBundle>;

    /// Record the outcome of a fire and honor the completion instruction.
    /// `executed_data` is the context's merged data map, copied back into
    /// the stored job for persist-job-data-after-execution jobs.
    fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedExecutionInstruction,
        executed_data: &JobDataMap,
    );

    /// How late a fire time may run before it counts as a misfire.
    fn set_misfire_threshold(&self, threshold: Duration);
}
