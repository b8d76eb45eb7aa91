//! The scheduler façade and its control machinery.
//!
//! [`Scheduler`] is a cheaply cloneable handle over the scheduler core: the
//! job store, the worker pool, the control-loop thread, listener
//! registries, the job factory, and the registry of in-flight executions.
//! Façade operations validate arguments, route to the store, and emit
//! listener events; the heavy lifting lives in the store and the control
//! loop.

mod factory;
mod listeners;
mod repository;
mod thread;

pub use factory::SchedulerFactory;
pub use listeners::{JobListener, ListenerManager, SchedulerListener, TriggerListener};
pub use repository::SchedulerRepository;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::config::SchedulerConfig;
use crate::error::{ErrorCode, Result, SchedulerError};
use crate::jobs::{
    FiredBundle, Job, JobDataMap, JobDetail, JobFactory, JobKey, JobRunShell, RegistryJobFactory,
};
use crate::pool::ThreadPool;
use crate::store::{
    CompletedExecutionInstruction, JobStore, SchedulerSignaler, TriggerState,
};
use crate::triggers::{Schedule, Trigger, TriggerKey};
use thread::{BundleExecutor, SchedulerThread, SchedulerThreadState};

/// Group used for the one-shot triggers created by
/// [`Scheduler::trigger_job`].
pub const MANUAL_TRIGGER_GROUP: &str = "MANUAL_TRIGGER";

// ═══════════════════════════════════════════════════════════════════════════════
// Metadata
// ═══════════════════════════════════════════════════════════════════════════════

/// Point-in-time description of a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerMetadata {
    pub instance_name: String,
    pub instance_id: String,
    pub started: bool,
    pub in_standby: bool,
    pub shutdown: bool,
    pub jobs_executed: u64,
    pub thread_pool_size: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Core
// ═══════════════════════════════════════════════════════════════════════════════

struct RunningJob {
    job_key: JobKey,
    interrupt_flag: Arc<AtomicBool>,
}

struct SchedulerCore {
    instance_name: String,
    instance_id: String,
    thread_name: String,
    store: Arc<dyn JobStore>,
    pool: Arc<dyn ThreadPool>,
    listeners: Arc<ListenerManager>,
    default_factory: Arc<RegistryJobFactory>,
    job_factory: RwLock<Arc<dyn JobFactory>>,
    thread_state: Arc<SchedulerThreadState>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    running_jobs: Arc<Mutex<HashMap<Uuid, RunningJob>>>,
    jobs_executed: Arc<AtomicU64>,
    started_once: AtomicBool,
    shutdown: AtomicBool,
    idle_wait_time: Duration,
    batch_max_count: usize,
    batch_time_window: Duration,
    make_scheduler_thread_daemon: bool,
    interrupt_jobs_on_shutdown: bool,
    interrupt_jobs_on_shutdown_with_wait: bool,
}

/// The store-to-scheduler signal channel.
struct CoreSignaler {
    thread_state: Arc<SchedulerThreadState>,
    listeners: Arc<ListenerManager>,
}

impl SchedulerSignaler for CoreSignaler {
    fn signal_scheduling_change(&self, candidate_next_fire_time: Option<DateTime<Utc>>) {
        self.thread_state
            .signal_scheduling_change(candidate_next_fire_time);
    }

    fn notify_trigger_listeners_misfired(&self, trigger: &Trigger) {
        self.listeners.notify_trigger_misfired(trigger);
    }

    fn notify_scheduler_listeners_finalized(&self, trigger: &Trigger) {
        self.listeners
            .notify_scheduler_listeners(|l| l.trigger_finalized(trigger));
    }
}

impl BundleExecutor for SchedulerCore {
    fn execute_bundle(&self, bundle: FiredBundle) {
        let trigger = bundle.trigger.clone();
        let job_detail = bundle.job_detail.clone();
        let merged_data = job_detail.job_data.merged(trigger.job_data());
        let fire_instance_id = bundle.fire_instance_id;

        let factory = self.job_factory.read().clone();
        let job = match factory.new_job(&bundle) {
            Ok(job) => job,
            Err(error) => {
                tracing::error!(
                    job = %job_detail.key,
                    error = %error,
                    "Job factory failed; recording trigger error"
                );
                self.listeners.notify_scheduler_listeners(|l| {
                    l.scheduler_error("job factory failed", &error)
                });
                self.store.triggered_job_complete(
                    &trigger,
                    &job_detail,
                    CompletedExecutionInstruction::SetTriggerError,
                    &merged_data,
                );
                return;
            }
        };

        let interrupt_flag = Arc::new(AtomicBool::new(false));
        self.running_jobs.lock().insert(
            fire_instance_id,
            RunningJob {
                job_key: job_detail.key.clone(),
                interrupt_flag: interrupt_flag.clone(),
            },
        );

        let shell = JobRunShell::new(
            self.instance_name.clone(),
            bundle,
            job,
            self.store.clone(),
            self.listeners.clone(),
            interrupt_flag,
        );
        let running_jobs = self.running_jobs.clone();
        let jobs_executed = self.jobs_executed.clone();
        let dispatched = self.pool.run_in_thread(Box::new(move || {
            shell.run();
            jobs_executed.fetch_add(1, Ordering::Relaxed);
            running_jobs.lock().remove(&fire_instance_id);
        }));

        if !dispatched {
            self.running_jobs.lock().remove(&fire_instance_id);
            let error = SchedulerError::new(
                ErrorCode::ThreadPoolRejected,
                "thread pool rejected the fire",
            );
            tracing::error!(job = %job_detail.key, "Dispatch failed; recording trigger error");
            self.listeners
                .notify_scheduler_listeners(|l| l.scheduler_error("dispatch failed", &error));
            self.store.triggered_job_complete(
                &trigger,
                &job_detail,
                CompletedExecutionInstruction::SetTriggerError,
                &merged_data,
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Façade
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle to a scheduler instance. Clones share the same instance.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    /// Wire a scheduler from its parts. The store is initialized with this
    /// scheduler's signaler and misfire threshold.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        pool: Arc<dyn ThreadPool>,
    ) -> Result<Self> {
        let config = config.validated()?;
        let listeners = Arc::new(ListenerManager::new());
        let thread_state = Arc::new(SchedulerThreadState::new());
        let default_factory = Arc::new(RegistryJobFactory::new());

        store.initialize(Arc::new(CoreSignaler {
            thread_state: thread_state.clone(),
            listeners: listeners.clone(),
        }))?;
        store.set_misfire_threshold(config.misfire_threshold);
        store.set_instance_name(&config.instance_name);
        store.set_instance_id(&config.instance_id);
        store.set_thread_pool_size(pool.pool_size());

        let core = Arc::new(SchedulerCore {
            instance_name: config.instance_name,
            instance_id: config.instance_id,
            thread_name: config.thread_name,
            store,
            pool,
            listeners,
            job_factory: RwLock::new(default_factory.clone() as Arc<dyn JobFactory>),
            default_factory,
            thread_state,
            thread_handle: Mutex::new(None),
            running_jobs: Arc::new(Mutex::new(HashMap::new())),
            jobs_executed: Arc::new(AtomicU64::new(0)),
            started_once: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            idle_wait_time: config.idle_wait_time,
            batch_max_count: config.batch_max_count,
            batch_time_window: config.batch_time_window,
            make_scheduler_thread_daemon: config.make_scheduler_thread_daemon,
            interrupt_jobs_on_shutdown: config.interrupt_jobs_on_shutdown,
            interrupt_jobs_on_shutdown_with_wait: config.interrupt_jobs_on_shutdown_with_wait,
        });

        tracing::info!(
            scheduler = %core.instance_name,
            instance_id = %core.instance_id,
            "Scheduler created"
        );
        Ok(Self { core })
    }

    pub fn instance_name(&self) -> &str {
        &self.core.instance_name
    }

    pub fn instance_id(&self) -> &str {
        &self.core.instance_id
    }

    fn check_open(&self) -> Result<()> {
        if self.core.shutdown.load(Ordering::SeqCst) {
            return Err(SchedulerError::shutdown());
        }
        Ok(())
    }

    // ── Job type registration ────────────────────────────────────────────────

    /// Register a job constructor with the default factory.
    pub fn register_job<F>(&self, job_type: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Job> + Send + Sync + 'static,
    {
        self.core.default_factory.register(job_type, constructor);
    }

    /// Replace the job factory (for dependency-injecting factories).
    pub fn set_job_factory(&self, factory: Arc<dyn JobFactory>) {
        *self.core.job_factory.write() = factory;
    }

    /// The listener registries of this scheduler.
    pub fn listener_manager(&self) -> Arc<ListenerManager> {
        self.core.listeners.clone()
    }

    // ── Scheduling ───────────────────────────────────────────────────────────

    /// Store a job and schedule its trigger; returns the first fire time.
    pub fn schedule_job(&self, job: JobDetail, mut trigger: Trigger) -> Result<DateTime<Utc>> {
        self.check_open()?;
        match trigger.job_key() {
            None => trigger.set_job_key(job.key.clone()),
            Some(key) if *key == job.key => {}
            Some(key) => {
                return Err(SchedulerError::validation(format!(
                    "trigger references job '{}' but was scheduled with job '{}'",
                    key, job.key
                )));
            }
        }
        let first = self.first_fire_time(&mut trigger)?;
        self.core
            .store
            .store_job_and_trigger(job.clone(), trigger)?;
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.job_added(&job));
        tracing::info!(job = %job.key, first_fire = %first, "Job scheduled");
        Ok(first)
    }

    /// Schedule a trigger against an already-stored job; returns the first
    /// fire time.
    pub fn schedule(&self, mut trigger: Trigger) -> Result<DateTime<Utc>> {
        self.check_open()?;
        if trigger.job_key().is_none() {
            return Err(SchedulerError::validation(
                "trigger must reference a job; use for_job or schedule_job",
            ));
        }
        let first = self.first_fire_time(&mut trigger)?;
        self.core.store.store_trigger(trigger, false)?;
        Ok(first)
    }

    /// Remove a trigger; `true` when it existed.
    pub fn unschedule_job(&self, key: &TriggerKey) -> Result<bool> {
        self.check_open()?;
        self.core.store.remove_trigger(key)
    }

    /// Replace a trigger, keeping its job. Returns the new first fire time,
    /// or `None` when the old trigger did not exist.
    pub fn reschedule_job(
        &self,
        key: &TriggerKey,
        mut new_trigger: Trigger,
    ) -> Result<Option<DateTime<Utc>>> {
        self.check_open()?;
        let first = self.first_fire_time(&mut new_trigger)?;
        Ok(self
            .core
            .store
            .replace_trigger(key, new_trigger)?
            .then_some(first))
    }

    /// Add a job without a trigger. Without `replace`, the job must be
    /// durable (a non-durable job with no triggers would depart at once).
    pub fn add_job(&self, job: JobDetail, replace: bool) -> Result<()> {
        self.check_open()?;
        if !job.durable && !replace {
            return Err(SchedulerError::validation(
                "jobs added with no trigger must be durable",
            ));
        }
        self.core.store.store_job(job.clone(), replace)?;
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.job_added(&job));
        Ok(())
    }

    /// Delete a job and all of its triggers; `true` when it existed.
    pub fn delete_job(&self, key: &JobKey) -> Result<bool> {
        self.check_open()?;
        let removed = self.core.store.remove_job(key)?;
        if removed {
            self.core
                .listeners
                .notify_scheduler_listeners(|l| l.job_deleted(key));
        }
        Ok(removed)
    }

    /// Fire a stored job right now through a one-shot trigger.
    pub fn trigger_job(&self, key: &JobKey, data: Option<JobDataMap>) -> Result<()> {
        self.check_open()?;
        if !self.core.store.check_job_exists(key) {
            return Err(SchedulerError::not_found(ErrorCode::JobNotFound, key));
        }
        let mut builder = Trigger::builder(TriggerKey::new(
            Uuid::new_v4().to_string(),
            MANUAL_TRIGGER_GROUP,
        ))
        .for_job(key.clone())
        .start_at(Utc::now())
        .with_schedule(Schedule::once());
        if let Some(data) = data {
            builder = builder.with_job_data(data);
        }
        self.core.store.store_trigger(builder.build()?, false)
    }

    fn first_fire_time(&self, trigger: &mut Trigger) -> Result<DateTime<Utc>> {
        trigger.validate()?;
        let calendar = match trigger.calendar_name() {
            Some(name) => Some(self.core.store.retrieve_calendar(name).ok_or_else(|| {
                SchedulerError::not_found(ErrorCode::CalendarNotFound, name)
            })?),
            None => None,
        };
        trigger
            .compute_first_fire_time(calendar.as_deref())
            .ok_or_else(|| {
                SchedulerError::new(
                    ErrorCode::TriggerWillNeverFire,
                    format!("trigger '{}' will never fire", trigger.key()),
                )
            })
    }

    // ── Pause / resume ───────────────────────────────────────────────────────

    pub fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.check_open()?;
        self.core.store.pause_trigger(key)?;
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.trigger_paused(key));
        Ok(())
    }

    pub fn pause_triggers(&self, group: &str) -> Result<()> {
        self.check_open()?;
        self.core.store.pause_trigger_group(group)?;
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.trigger_group_paused(group));
        Ok(())
    }

    pub fn pause_job(&self, key: &JobKey) -> Result<()> {
        self.check_open()?;
        self.core.store.pause_job(key)
    }

    pub fn pause_jobs(&self, group: &str) -> Result<()> {
        self.check_open()?;
        self.core.store.pause_job_group(group)
    }

    pub fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        self.check_open()?;
        self.core.store.resume_trigger(key)?;
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.trigger_resumed(key));
        Ok(())
    }

    pub fn resume_triggers(&self, group: &str) -> Result<()> {
        self.check_open()?;
        self.core.store.resume_trigger_group(group)?;
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.trigger_group_resumed(group));
        Ok(())
    }

    pub fn resume_job(&self, key: &JobKey) -> Result<()> {
        self.check_open()?;
        self.core.store.resume_job(key)
    }

    pub fn resume_jobs(&self, group: &str) -> Result<()> {
        self.check_open()?;
        self.core.store.resume_job_group(group)
    }

    pub fn pause_all(&self) -> Result<()> {
        self.check_open()?;
        self.core.store.pause_all()
    }

    pub fn resume_all(&self) -> Result<()> {
        self.check_open()?;
        self.core.store.resume_all()
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn get_job_detail(&self, key: &JobKey) -> Option<JobDetail> {
        self.core.store.retrieve_job(key)
    }

    pub fn get_trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.core.store.retrieve_trigger(key)
    }

    pub fn get_trigger_state(&self, key: &TriggerKey) -> Option<TriggerState> {
        self.core.store.get_trigger_state(key)
    }

    pub fn get_triggers_of_job(&self, key: &JobKey) -> Vec<Trigger> {
        self.core.store.get_triggers_for_job(key)
    }

    pub fn get_job_keys(&self, group: &str) -> Vec<JobKey> {
        self.core.store.get_job_keys(group)
    }

    pub fn get_trigger_keys(&self, group: &str) -> Vec<TriggerKey> {
        self.core.store.get_trigger_keys(group)
    }

    pub fn get_job_group_names(&self) -> Vec<String> {
        self.core.store.get_job_group_names()
    }

    pub fn get_trigger_group_names(&self) -> Vec<String> {
        self.core.store.get_trigger_group_names()
    }

    pub fn get_paused_trigger_groups(&self) -> Vec<String> {
        self.core.store.get_paused_trigger_groups()
    }

    pub fn job_exists(&self, key: &JobKey) -> bool {
        self.core.store.check_job_exists(key)
    }

    pub fn trigger_exists(&self, key: &TriggerKey) -> bool {
        self.core.store.check_trigger_exists(key)
    }

    /// Keys of the jobs currently executing, one entry per in-flight fire.
    pub fn get_currently_executing_jobs(&self) -> Vec<JobKey> {
        self.core
            .running_jobs
            .lock()
            .values()
            .map(|r| r.job_key.clone())
            .collect()
    }

    pub fn metadata(&self) -> SchedulerMetadata {
        SchedulerMetadata {
            instance_name: self.core.instance_name.clone(),
            instance_id: self.core.instance_id.clone(),
            started: self.core.started_once.load(Ordering::SeqCst),
            in_standby: self.core.thread_state.is_paused(),
            shutdown: self.core.shutdown.load(Ordering::SeqCst),
            jobs_executed: self.core.jobs_executed.load(Ordering::Relaxed),
            thread_pool_size: self.core.pool.pool_size(),
        }
    }

    // ── Calendars ────────────────────────────────────────────────────────────

    pub fn add_calendar(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()> {
        self.check_open()?;
        self.core
            .store
            .store_calendar(name, calendar, replace, update_triggers)
    }

    pub fn delete_calendar(&self, name: &str) -> Result<bool> {
        self.check_open()?;
        self.core.store.remove_calendar(name)
    }

    pub fn get_calendar(&self, name: &str) -> Option<Arc<dyn Calendar>> {
        self.core.store.retrieve_calendar(name)
    }

    pub fn get_calendar_names(&self) -> Vec<String> {
        self.core.store.get_calendar_names()
    }

    /// Remove all jobs, triggers, and calendars.
    pub fn clear(&self) -> Result<()> {
        self.check_open()?;
        self.core.store.clear_all_scheduling_data()?;
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.scheduling_data_cleared());
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Start (or resume from standby) firing triggers.
    pub fn start(&self) -> Result<()> {
        self.check_open()?;
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_starting());

        let mut handle = self.core.thread_handle.lock();
        if handle.is_none() {
            let scheduler_thread = SchedulerThread::new(
                self.core.thread_state.clone(),
                self.core.store.clone(),
                self.core.pool.clone(),
                self.core.clone() as Arc<dyn BundleExecutor>,
                self.core.idle_wait_time,
                self.core.batch_max_count,
                self.core.batch_time_window,
            );
            *handle = Some(scheduler_thread.spawn(&self.core.thread_name)?);
        }
        drop(handle);

        self.core.thread_state.set_paused(false);
        self.core.started_once.store(true, Ordering::SeqCst);
        tracing::info!(scheduler = %self.core.instance_name, "Scheduler started");
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_started());
        Ok(())
    }

    /// Start after a delay, without blocking the caller.
    pub fn start_delayed(&self, delay: Duration) -> Result<()> {
        self.check_open()?;
        let scheduler = self.clone();
        std::thread::Builder::new()
            .name(format!("{}-delayed-start", self.core.instance_name))
            .spawn(move || {
                std::thread::sleep(delay);
                if let Err(error) = scheduler.start() {
                    tracing::error!(error = %error, "Delayed start failed");
                }
            })
            .map_err(|e| {
                SchedulerError::with_internal(
                    ErrorCode::SchedulerInternal,
                    "failed to spawn delayed-start thread",
                    e.to_string(),
                )
            })?;
        Ok(())
    }

    /// Stop firing triggers without tearing anything down; `start` resumes.
    pub fn standby(&self) -> Result<()> {
        self.check_open()?;
        self.core.thread_state.set_paused(true);
        tracing::info!(scheduler = %self.core.instance_name, "Scheduler in standby");
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_in_standby());
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.core.started_once.load(Ordering::SeqCst) && !self.is_shutdown()
    }

    pub fn is_in_standby(&self) -> bool {
        self.core.thread_state.is_paused()
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.shutdown.load(Ordering::SeqCst)
    }

    /// Tear the scheduler down. With `wait_for_jobs_to_complete`, returns
    /// only after in-flight executions finish. Idempotent.
    pub fn shutdown(&self, wait_for_jobs_to_complete: bool) {
        if self.core.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            scheduler = %self.core.instance_name,
            wait = wait_for_jobs_to_complete,
            "Scheduler shutting down"
        );
        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_shutting_down());

        self.core.thread_state.halt();

        let interrupt = if wait_for_jobs_to_complete {
            self.core.interrupt_jobs_on_shutdown_with_wait
        } else {
            self.core.interrupt_jobs_on_shutdown
        };
        if interrupt {
            for running in self.core.running_jobs.lock().values() {
                running.interrupt_flag.store(true, Ordering::Relaxed);
            }
        }

        // Stop the pool before joining the control thread: a blocked
        // block_for_available_threads call only returns once intake stops
        self.core.pool.shutdown(wait_for_jobs_to_complete);
        if !self.core.make_scheduler_thread_daemon {
            if let Some(handle) = self.core.thread_handle.lock().take() {
                let _ = handle.join();
            }
        }
        self.core.store.shutdown();
        SchedulerRepository::global().remove(&self.core.instance_name);

        self.core
            .listeners
            .notify_scheduler_listeners(|l| l.scheduler_shutdown());
        tracing::info!(scheduler = %self.core.instance_name, "Scheduler shutdown complete");
    }

    // ── Interruption ─────────────────────────────────────────────────────────

    /// Request cooperative interruption of every in-flight execution of the
    /// job; `true` when at least one was running.
    pub fn interrupt_job(&self, key: &JobKey) -> bool {
        let running = self.core.running_jobs.lock();
        let mut any = false;
        for record in running.values() {
            if &record.job_key == key {
                record.interrupt_flag.store(true, Ordering::Relaxed);
                any = true;
            }
        }
        any
    }

    /// Request cooperative interruption of one specific fire.
    pub fn interrupt_instance(&self, fire_instance_id: Uuid) -> bool {
        let running = self.core.running_jobs.lock();
        match running.get(&fire_instance_id) {
            Some(record) => {
                record.interrupt_flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}
