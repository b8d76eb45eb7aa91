//! The in-memory reference job store.
//!
//! A single mutex guards all collections (spec of the store contract: every
//! mutation serializes on the store lock). Signals and listener
//! notifications produced under the lock are dispatched after it is
//! released, so the signaler can never re-enter the store on the same
//! thread while it is held.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::error::{ErrorCode, Result, SchedulerError};
use crate::jobs::{FiredBundle, JobDataMap, JobDetail, JobKey};
use crate::store::{CompletedExecutionInstruction, JobStore, SchedulerSignaler, TriggerState};
use crate::triggers::{Trigger, TriggerKey};

/// Ordering key for the due queue: `(next_fire_time asc, priority desc,
/// key asc)`. Triggers without a next fire time are not queued.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FireOrder {
    next_fire_time: DateTime<Utc>,
    priority: i32,
    key: TriggerKey,
}

impl Ord for FireOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.next_fire_time
            .cmp(&other.next_fire_time)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for FireOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A stored trigger plus its state. `job_key` is resolved at store time, so
/// downstream paths never deal with an unassociated trigger.
#[derive(Debug, Clone)]
struct TriggerRecord {
    trigger: Trigger,
    state: TriggerState,
    job_key: JobKey,
}

#[derive(Debug)]
struct JobRecord {
    detail: JobDetail,
}

/// Signals gathered under the lock, dispatched after it is released.
enum Notification {
    SchedulingChange(Option<DateTime<Utc>>),
    Misfired(Trigger),
    Finalized(Trigger),
}

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<JobKey, JobRecord>,
    triggers: HashMap<TriggerKey, TriggerRecord>,
    time_ordered: BTreeSet<FireOrder>,
    calendars: HashMap<String, Arc<dyn Calendar>>,
    paused_trigger_groups: HashSet<String>,
    paused_job_groups: HashSet<String>,
    blocked_jobs: HashSet<JobKey>,
}

enum MisfireOutcome {
    /// Within threshold (or the policy ignores misfires)
    NotMisfired,
    /// The trigger advanced to a new next fire time
    Updated,
    /// The trigger will never fire again
    Exhausted,
}

impl StoreInner {
    fn queue(&mut self, key: &TriggerKey) {
        if let Some(rec) = self.triggers.get(key) {
            if rec.state == TriggerState::Waiting {
                if let Some(next) = rec.trigger.next_fire_time() {
                    self.time_ordered.insert(FireOrder {
                        next_fire_time: next,
                        priority: rec.trigger.priority(),
                        key: key.clone(),
                    });
                }
            }
        }
    }

    /// Drop the queue entry for a trigger. Must run before the trigger's
    /// next fire time or priority changes, or the entry cannot be found.
    fn unqueue(&mut self, key: &TriggerKey) {
        if let Some(rec) = self.triggers.get(key) {
            if let Some(next) = rec.trigger.next_fire_time() {
                self.time_ordered.remove(&FireOrder {
                    next_fire_time: next,
                    priority: rec.trigger.priority(),
                    key: key.clone(),
                });
            }
        }
    }

    fn calendar_for(&self, trigger: &Trigger) -> Option<Arc<dyn Calendar>> {
        trigger
            .calendar_name()
            .and_then(|name| self.calendars.get(name).cloned())
    }

    fn triggers_of_job(&self, job_key: &JobKey) -> Vec<TriggerKey> {
        self.triggers
            .iter()
            .filter(|(_, rec)| &rec.job_key == job_key)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove a trigger record; with `orphan_cleanup`, a non-durable job
    /// left without triggers departs with it.
    fn remove_trigger_record(
        &mut self,
        key: &TriggerKey,
        orphan_cleanup: bool,
    ) -> Option<TriggerRecord> {
        self.unqueue(key);
        let record = self.triggers.remove(key)?;
        if orphan_cleanup {
            let job_key = &record.job_key;
            let orphaned = self
                .jobs
                .get(job_key)
                .map(|job| !job.detail.durable)
                .unwrap_or(false)
                && self.triggers_of_job(job_key).is_empty();
            if orphaned {
                tracing::debug!(job = %job_key, "Removing non-durable orphan job");
                self.jobs.remove(job_key);
            }
        }
        Some(record)
    }

    /// Initial state for a newly stored trigger, honoring paused groups and
    /// blocked jobs.
    fn initial_state(&self, trigger_group: &str, job_key: &JobKey) -> TriggerState {
        let paused = self.paused_trigger_groups.contains(trigger_group)
            || self.paused_job_groups.contains(&job_key.group);
        let blocked = self.blocked_jobs.contains(job_key);
        match (paused, blocked) {
            (true, true) => TriggerState::PausedAndBlocked,
            (true, false) => TriggerState::Paused,
            (false, true) => TriggerState::Blocked,
            (false, false) => TriggerState::Waiting,
        }
    }

    /// Apply the misfire policy to a trigger whose fire time lies more than
    /// `threshold` in the past.
    fn apply_misfire(
        &mut self,
        key: &TriggerKey,
        now: DateTime<Utc>,
        threshold: ChronoDuration,
        notifications: &mut Vec<Notification>,
    ) -> MisfireOutcome {
        let misfire_time = now - threshold;
        let Some(rec) = self.triggers.get(key) else {
            return MisfireOutcome::NotMisfired;
        };
        let Some(next) = rec.trigger.next_fire_time() else {
            return MisfireOutcome::NotMisfired;
        };
        if next > misfire_time || rec.trigger.schedule().misfire_ignored() {
            return MisfireOutcome::NotMisfired;
        }

        let calendar = self.calendar_for(&rec.trigger);
        notifications.push(Notification::Misfired(rec.trigger.clone()));

        self.unqueue(key);
        let Some(rec) = self.triggers.get_mut(key) else {
            return MisfireOutcome::NotMisfired;
        };
        rec.trigger.update_after_misfire(calendar.as_deref(), now);

        match rec.trigger.next_fire_time() {
            None => {
                tracing::debug!(trigger = %key, "Trigger exhausted by misfire handling");
                let removed = self.remove_trigger_record(key, true);
                if let Some(removed) = removed {
                    notifications.push(Notification::Finalized(removed.trigger));
                }
                MisfireOutcome::Exhausted
            }
            Some(new_next) => {
                self.queue(key);
                if new_next != next {
                    notifications.push(Notification::SchedulingChange(Some(new_next)));
                }
                MisfireOutcome::Updated
            }
        }
    }

    /// Move one paused/blocked trigger back toward `Waiting`.
    fn resume_trigger_record(
        &mut self,
        key: &TriggerKey,
        now: DateTime<Utc>,
        threshold: ChronoDuration,
        notifications: &mut Vec<Notification>,
    ) {
        let Some(rec) = self.triggers.get_mut(key) else {
            return;
        };
        if !matches!(
            rec.state,
            TriggerState::Paused | TriggerState::PausedAndBlocked
        ) {
            return;
        }
        let blocked = self.blocked_jobs.contains(&rec.job_key);
        rec.state = if blocked {
            TriggerState::Blocked
        } else {
            TriggerState::Waiting
        };
        if !blocked {
            self.queue(key);
            self.apply_misfire(key, now, threshold, notifications);
            if let Some(rec) = self.triggers.get(key) {
                notifications.push(Notification::SchedulingChange(rec.trigger.next_fire_time()));
            }
        }
    }

    /// Pause one trigger, whatever state it is in.
    fn pause_trigger_record(&mut self, key: &TriggerKey) {
        let Some(rec) = self.triggers.get(key) else {
            return;
        };
        let new_state = match rec.state {
            TriggerState::Complete | TriggerState::Error => return,
            TriggerState::Blocked | TriggerState::PausedAndBlocked => {
                TriggerState::PausedAndBlocked
            }
            _ => TriggerState::Paused,
        };
        self.unqueue(key);
        if let Some(rec) = self.triggers.get_mut(key) {
            rec.state = new_state;
        }
    }
}

/// The non-persistent reference store: everything lives behind one mutex
/// inside the process.
pub struct RamJobStore {
    inner: Mutex<StoreInner>,
    signaler: RwLock<Option<Arc<dyn SchedulerSignaler>>>,
    misfire_threshold: Mutex<ChronoDuration>,
}

impl Default for RamJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RamJobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            signaler: RwLock::new(None),
            misfire_threshold: Mutex::new(ChronoDuration::seconds(60)),
        }
    }

    fn threshold(&self) -> ChronoDuration {
        *self.misfire_threshold.lock()
    }

    fn dispatch(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let signaler = self.signaler.read().clone();
        let Some(signaler) = signaler else { return };
        for notification in notifications {
            match notification {
                Notification::SchedulingChange(candidate) => {
                    signaler.signal_scheduling_change(candidate)
                }
                Notification::Misfired(trigger) => {
                    signaler.notify_trigger_listeners_misfired(&trigger)
                }
                Notification::Finalized(trigger) => {
                    signaler.notify_scheduler_listeners_finalized(&trigger)
                }
            }
        }
    }

    /// Shared insert path for new and replacement triggers.
    fn store_trigger_internal(
        &self,
        inner: &mut StoreInner,
        mut trigger: Trigger,
        replace: bool,
        notifications: &mut Vec<Notification>,
    ) -> Result<()> {
        trigger.validate()?;
        let key = trigger.key().clone();

        if inner.triggers.contains_key(&key) {
            if !replace {
                return Err(SchedulerError::already_exists(
                    ErrorCode::TriggerAlreadyExists,
                    &key,
                ));
            }
            inner.remove_trigger_record(&key, false);
        }

        let job_key = trigger
            .job_key()
            .cloned()
            .ok_or_else(|| SchedulerError::validation("trigger references no job"))?;
        if !inner.jobs.contains_key(&job_key) {
            return Err(SchedulerError::not_found(ErrorCode::JobNotFound, &job_key));
        }

        let calendar = match trigger.calendar_name() {
            Some(name) => Some(inner.calendars.get(name).cloned().ok_or_else(|| {
                SchedulerError::not_found(ErrorCode::CalendarNotFound, name)
            })?),
            None => None,
        };

        if trigger.next_fire_time().is_none()
            && trigger
                .compute_first_fire_time(calendar.as_deref())
                .is_none()
        {
            return Err(SchedulerError::new(
                ErrorCode::TriggerWillNeverFire,
                format!("trigger '{}' will never fire", key),
            ));
        }

        let state = inner.initial_state(&key.group, &job_key);
        let next = trigger.next_fire_time();
        inner.triggers.insert(
            key.clone(),
            TriggerRecord {
                trigger,
                state,
                job_key,
            },
        );
        inner.queue(&key);
        tracing::debug!(trigger = %key, state = ?state, "Trigger stored");
        notifications.push(Notification::SchedulingChange(next));
        Ok(())
    }
}

impl JobStore for RamJobStore {
    fn initialize(&self, signaler: Arc<dyn SchedulerSignaler>) -> Result<()> {
        *self.signaler.write() = Some(signaler);
        Ok(())
    }

    fn store_job_and_trigger(&self, job: JobDetail, trigger: Trigger) -> Result<()> {
        let mut notifications = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if inner.jobs.contains_key(&job.key) {
                return Err(SchedulerError::already_exists(
                    ErrorCode::JobAlreadyExists,
                    &job.key,
                ));
            }
            let job_key = job.key.clone();
            inner.jobs.insert(job_key.clone(), JobRecord { detail: job });
            match self.store_trigger_internal(&mut inner, trigger, false, &mut notifications) {
                Ok(()) => Ok(()),
                Err(error) => {
                    // Neither half lands when the trigger is unusable
                    inner.jobs.remove(&job_key);
                    Err(error)
                }
            }
        };
        self.dispatch(notifications);
        result
    }

    fn store_job(&self, job: JobDetail, replace: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&job.key) && !replace {
            return Err(SchedulerError::already_exists(
                ErrorCode::JobAlreadyExists,
                &job.key,
            ));
        }
        tracing::debug!(job = %job.key, "Job stored");
        inner.jobs.insert(job.key.clone(), JobRecord { detail: job });
        Ok(())
    }

    fn store_trigger(&self, trigger: Trigger, replace: bool) -> Result<()> {
        let mut notifications = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            self.store_trigger_internal(&mut inner, trigger, replace, &mut notifications)
        };
        self.dispatch(notifications);
        result
    }

    fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let mut notifications = Vec::new();
        let removed = {
            let mut inner = self.inner.lock();
            for trigger_key in inner.triggers_of_job(key) {
                inner.remove_trigger_record(&trigger_key, false);
            }
            let removed = inner.jobs.remove(key).is_some();
            inner.blocked_jobs.remove(key);
            if removed {
                notifications.push(Notification::SchedulingChange(None));
            }
            removed
        };
        self.dispatch(notifications);
        Ok(removed)
    }

    fn remove_trigger(&self, key: &TriggerKey) -> Result<bool> {
        let mut notifications = Vec::new();
        let removed = {
            let mut inner = self.inner.lock();
            let removed = inner.remove_trigger_record(key, true).is_some();
            if removed {
                notifications.push(Notification::SchedulingChange(None));
            }
            removed
        };
        self.dispatch(notifications);
        Ok(removed)
    }

    fn replace_trigger(&self, key: &TriggerKey, mut new_trigger: Trigger) -> Result<bool> {
        let mut notifications = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            let Some(old) = inner.triggers.get(key) else {
                return Ok(false);
            };
            let old_job_key = old.job_key.clone();
            match new_trigger.job_key() {
                None => new_trigger.set_job_key(old_job_key),
                Some(job_key) if *job_key == old_job_key => {}
                Some(_) => {
                    return Err(SchedulerError::validation(
                        "replacement trigger must reference the same job",
                    ));
                }
            }
            inner.remove_trigger_record(key, false);
            self.store_trigger_internal(&mut inner, new_trigger, false, &mut notifications)
                .map(|()| true)
        };
        self.dispatch(notifications);
        result
    }

    fn retrieve_job(&self, key: &JobKey) -> Option<JobDetail> {
        self.inner.lock().jobs.get(key).map(|rec| rec.detail.clone())
    }

    fn retrieve_trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.inner
            .lock()
            .triggers
            .get(key)
            .map(|rec| rec.trigger.clone())
    }

    fn check_job_exists(&self, key: &JobKey) -> bool {
        self.inner.lock().jobs.contains_key(key)
    }

    fn check_trigger_exists(&self, key: &TriggerKey) -> bool {
        self.inner.lock().triggers.contains_key(key)
    }

    fn clear_all_scheduling_data(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.jobs.clear();
        inner.triggers.clear();
        inner.time_ordered.clear();
        inner.calendars.clear();
        inner.paused_trigger_groups.clear();
        inner.paused_job_groups.clear();
        inner.blocked_jobs.clear();
        tracing::info!("All scheduling data cleared");
        Ok(())
    }

    fn store_calendar(
        &self,
        name: &str,
        calendar: Arc<dyn Calendar>,
        replace: bool,
        update_triggers: bool,
    ) -> Result<()> {
        let now = Utc::now();
        let threshold = self.threshold();
        let mut notifications = Vec::new();
        let result = {
            let mut inner = self.inner.lock();
            if inner.calendars.contains_key(name) && !replace {
                return Err(SchedulerError::already_exists(
                    ErrorCode::CalendarAlreadyExists,
                    name,
                ));
            }
            inner.calendars.insert(name.to_string(), calendar.clone());

            if update_triggers {
                let affected: Vec<TriggerKey> = inner
                    .triggers
                    .iter()
                    .filter(|(_, rec)| rec.trigger.calendar_name() == Some(name))
                    .map(|(key, _)| key.clone())
                    .collect();
                let std_threshold = threshold.to_std().unwrap_or(Duration::from_secs(60));
                for key in affected {
                    inner.unqueue(&key);
                    if let Some(rec) = inner.triggers.get_mut(&key) {
                        rec.trigger
                            .update_with_new_calendar(calendar.as_ref(), std_threshold, now);
                    }
                    inner.queue(&key);
                }
                notifications.push(Notification::SchedulingChange(None));
            }
            Ok(())
        };
        self.dispatch(notifications);
        result
    }

    fn remove_calendar(&self, name: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        let referenced = inner
            .triggers
            .values()
            .any(|rec| rec.trigger.calendar_name() == Some(name));
        if referenced {
            return Err(SchedulerError::new(
                ErrorCode::CalendarInUse,
                format!("calendar '{}' is referenced by triggers", name),
            ));
        }
        Ok(inner.calendars.remove(name).is_some())
    }

    fn retrieve_calendar(&self, name: &str) -> Option<Arc<dyn Calendar>> {
        self.inner.lock().calendars.get(name).cloned()
    }

    fn get_calendar_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().calendars.keys().cloned().collect();
        names.sort();
        names
    }

    fn get_job_keys(&self, group: &str) -> Vec<JobKey> {
        let inner = self.inner.lock();
        let mut keys: Vec<JobKey> = inner
            .jobs
            .keys()
            .filter(|key| key.group == group)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn get_trigger_keys(&self, group: &str) -> Vec<TriggerKey> {
        let inner = self.inner.lock();
        let mut keys: Vec<TriggerKey> = inner
            .triggers
            .keys()
            .filter(|key| key.group == group)
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn get_job_group_names(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut groups: Vec<String> = inner
            .jobs
            .keys()
            .map(|key| key.group.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        groups.sort();
        groups
    }

    fn get_trigger_group_names(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut groups: Vec<String> = inner
            .triggers
            .keys()
            .map(|key| key.group.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        groups.sort();
        groups
    }

    fn get_triggers_for_job(&self, key: &JobKey) -> Vec<Trigger> {
        let inner = self.inner.lock();
        let mut triggers: Vec<Trigger> = inner
            .triggers
            .values()
            .filter(|rec| &rec.job_key == key)
            .map(|rec| rec.trigger.clone())
            .collect();
        triggers.sort_by(|a, b| a.key().cmp(b.key()));
        triggers
    }

    fn get_trigger_state(&self, key: &TriggerKey) -> Option<TriggerState> {
        self.inner.lock().triggers.get(key).map(|rec| rec.state)
    }

    fn get_number_of_jobs(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    fn get_number_of_triggers(&self) -> usize {
        self.inner.lock().triggers.len()
    }

    fn get_number_of_calendars(&self) -> usize {
        self.inner.lock().calendars.len()
    }

    fn pause_trigger(&self, key: &TriggerKey) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pause_trigger_record(key);
        Ok(())
    }

    fn pause_trigger_group(&self, group: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.paused_trigger_groups.insert(group.to_string());
        let keys: Vec<TriggerKey> = inner
            .triggers
            .keys()
            .filter(|key| key.group == group)
            .cloned()
            .collect();
        for key in keys {
            inner.pause_trigger_record(&key);
        }
        tracing::debug!(group = %group, "Trigger group paused");
        Ok(())
    }

    fn pause_job(&self, key: &JobKey) -> Result<()> {
        let mut inner = self.inner.lock();
        for trigger_key in inner.triggers_of_job(key) {
            inner.pause_trigger_record(&trigger_key);
        }
        Ok(())
    }

    fn pause_job_group(&self, group: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.paused_job_groups.insert(group.to_string());
        let jobs: Vec<JobKey> = inner
            .jobs
            .keys()
            .filter(|key| key.group == group)
            .cloned()
            .collect();
        for job_key in jobs {
            for trigger_key in inner.triggers_of_job(&job_key) {
                inner.pause_trigger_record(&trigger_key);
            }
        }
        tracing::debug!(group = %group, "Job group paused");
        Ok(())
    }

    fn resume_trigger(&self, key: &TriggerKey) -> Result<()> {
        let now = Utc::now();
        let threshold = self.threshold();
        let mut notifications = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.resume_trigger_record(key, now, threshold, &mut notifications);
        }
        self.dispatch(notifications);
        Ok(())
    }

    fn resume_trigger_group(&self, group: &str) -> Result<()> {
        let now = Utc::now();
        let threshold = self.threshold();
        let mut notifications = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.paused_trigger_groups.remove(group);
            let keys: Vec<TriggerKey> = inner
                .triggers
                .keys()
                .filter(|key| key.group == group)
                .cloned()
                .collect();
            for key in keys {
                inner.resume_trigger_record(&key, now, threshold, &mut notifications);
            }
        }
        self.dispatch(notifications);
        Ok(())
    }

    fn resume_job(&self, key: &JobKey) -> Result<()> {
        let now = Utc::now();
        let threshold = self.threshold();
        let mut notifications = Vec::new();
        {
            let mut inner = self.inner.lock();
            for trigger_key in inner.triggers_of_job(key) {
                inner.resume_trigger_record(&trigger_key, now, threshold, &mut notifications);
            }
        }
        self.dispatch(notifications);
        Ok(())
    }

    fn resume_job_group(&self, group: &str) -> Result<()> {
        let now = Utc::now();
        let threshold = self.threshold();
        let mut notifications = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.paused_job_groups.remove(group);
            let jobs: Vec<JobKey> = inner
                .jobs
                .keys()
                .filter(|key| key.group == group)
                .cloned()
                .collect();
            for job_key in jobs {
                for trigger_key in inner.triggers_of_job(&job_key) {
                    inner.resume_trigger_record(&trigger_key, now, threshold, &mut notifications);
                }
            }
        }
        self.dispatch(notifications);
        Ok(())
    }

    fn pause_all(&self) -> Result<()> {
        let groups = self.get_trigger_group_names();
        for group in groups {
            self.pause_trigger_group(&group)?;
        }
        Ok(())
    }

    fn resume_all(&self) -> Result<()> {
        let mut groups = self.get_trigger_group_names();
        let remembered: Vec<String> = self
            .inner
            .lock()
            .paused_trigger_groups
            .iter()
            .cloned()
            .collect();
        groups.extend(remembered);
        groups.sort();
        groups.dedup();
        self.inner.lock().paused_job_groups.clear();
        for group in groups {
            self.resume_trigger_group(&group)?;
        }
        Ok(())
    }

    fn get_paused_trigger_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .inner
            .lock()
            .paused_trigger_groups
            .iter()
            .cloned()
            .collect();
        groups.sort();
        groups
    }

    fn acquire_next_triggers(
        &self,
        no_later_than: DateTime<Utc>,
        max_count: usize,
        time_window: Duration,
    ) -> Vec<Trigger> {
        let now = Utc::now();
        let threshold = self.threshold();
        let batch_end =
            no_later_than + ChronoDuration::from_std(time_window).unwrap_or(ChronoDuration::zero());
        let mut notifications = Vec::new();
        let mut acquired = Vec::new();

        {
            let mut inner = self.inner.lock();
            let mut no_concurrent_jobs: HashSet<JobKey> = HashSet::new();
            let mut excluded: Vec<TriggerKey> = Vec::new();

            while acquired.len() < max_count {
                let Some(order) = inner.time_ordered.iter().next().cloned() else {
                    break;
                };
                inner.time_ordered.remove(&order);

                let Some(rec) = inner.triggers.get(&order.key) else {
                    continue;
                };
                if rec.state != TriggerState::Waiting {
                    continue;
                }

                match inner.apply_misfire(&order.key, now, threshold, &mut notifications) {
                    MisfireOutcome::NotMisfired => {}
                    // Re-queued at its post-misfire time (or gone); rescan
                    MisfireOutcome::Updated | MisfireOutcome::Exhausted => continue,
                }

                let rec = match inner.triggers.get(&order.key) {
                    Some(rec) => rec,
                    None => continue,
                };
                let Some(next) = rec.trigger.next_fire_time() else {
                    continue;
                };
                if next > batch_end {
                    // First trigger beyond the window; everything later is too
                    inner.time_ordered.insert(order);
                    break;
                }

                let disallows_concurrent = inner
                    .jobs
                    .get(&rec.job_key)
                    .map(|job| job.detail.concurrent_execution_disallowed)
                    .unwrap_or(false);
                if disallows_concurrent {
                    if no_concurrent_jobs.contains(&rec.job_key) {
                        excluded.push(order.key.clone());
                        continue;
                    }
                    no_concurrent_jobs.insert(rec.job_key.clone());
                }

                let Some(rec) = inner.triggers.get_mut(&order.key) else {
                    continue;
                };
                rec.state = TriggerState::Acquired;
                acquired.push(rec.trigger.clone());
            }

            // Batch-excluded same-job triggers stay waiting in the queue
            for key in excluded {
                inner.queue(&key);
            }
        }

        self.dispatch(notifications);
        if !acquired.is_empty() {
            tracing::debug!(count = acquired.len(), "Triggers acquired");
        }
        acquired
    }

    fn release_acquired_trigger(&self, key: &TriggerKey) {
        let mut inner = self.inner.lock();
        if let Some(rec) = inner.triggers.get_mut(key) {
            if rec.state == TriggerState::Acquired {
                rec.state = TriggerState::Waiting;
                inner.queue(key);
            }
        }
    }

    fn triggers_fired(&self, triggers: &[Trigger]) -> Vec<FiredBundle> {
        let now = Utc::now();
        let threshold = self.threshold();
        let mut notifications = Vec::new();
        let mut bundles = Vec::new();

        {
            let mut inner = self.inner.lock();
            for trigger in triggers {
                let key = trigger.key();
                let Some(rec) = inner.triggers.get(key) else {
                    continue; // deleted since acquisition
                };
                if rec.state != TriggerState::Acquired {
                    continue; // paused or otherwise revoked since acquisition
                }
                let calendar = match rec.trigger.calendar_name() {
                    Some(name) => match inner.calendars.get(name).cloned() {
                        Some(cal) => Some(cal),
                        None => continue, // calendar vanished; cannot fire
                    },
                    None => None,
                };

                // Late-fire check; an overdue trigger may have been held
                // past its threshold between acquisition and firing
                if let Some(rec) = inner.triggers.get_mut(key) {
                    rec.state = TriggerState::Waiting;
                }
                match inner.apply_misfire(key, now, threshold, &mut notifications) {
                    MisfireOutcome::NotMisfired => {}
                    MisfireOutcome::Exhausted => continue,
                    MisfireOutcome::Updated => {
                        // Fire now only if the policy produced a due time
                        let due = inner
                            .triggers
                            .get(key)
                            .and_then(|rec| rec.trigger.next_fire_time())
                            .map(|next| next <= now)
                            .unwrap_or(false);
                        if !due {
                            continue; // re-queued for its new time
                        }
                    }
                }

                let (job_key, job_detail) = {
                    let Some(rec) = inner.triggers.get(key) else {
                        continue;
                    };
                    let Some(job) = inner.jobs.get(&rec.job_key) else {
                        continue;
                    };
                    (rec.job_key.clone(), job.detail.clone())
                };

                // A sibling fired from an earlier batch may already be
                // executing; this fire must wait for it
                if job_detail.concurrent_execution_disallowed
                    && inner.blocked_jobs.contains(&job_key)
                {
                    if let Some(rec) = inner.triggers.get_mut(key) {
                        rec.state = TriggerState::Blocked;
                    }
                    continue;
                }

                // Fire: capture the pre-fire times, advance the schedule,
                // and hold the trigger in Executing until completion
                inner.unqueue(key);
                let (scheduled, prev, fired_trigger) = {
                    let Some(rec) = inner.triggers.get_mut(key) else {
                        continue;
                    };
                    let Some(scheduled) = rec.trigger.next_fire_time() else {
                        continue;
                    };
                    let prev = rec.trigger.previous_fire_time();
                    rec.trigger.triggered(calendar.as_deref());
                    rec.state = TriggerState::Executing;
                    (scheduled, prev, rec.trigger.clone())
                };

                let bundle = FiredBundle {
                    job_detail: job_detail.clone(),
                    next_fire_time: fired_trigger.next_fire_time(),
                    calendar: calendar.clone(),
                    fire_time: now,
                    scheduled_fire_time: scheduled,
                    previous_fire_time: prev,
                    recovering: false,
                    fire_instance_id: Uuid::new_v4(),
                    trigger: fired_trigger,
                };

                if job_detail.concurrent_execution_disallowed {
                    inner.blocked_jobs.insert(job_key.clone());
                    for sibling in inner.triggers_of_job(&job_key) {
                        if sibling == *key {
                            continue;
                        }
                        let Some(s) = inner.triggers.get(&sibling) else {
                            continue;
                        };
                        match s.state {
                            TriggerState::Waiting => {
                                inner.unqueue(&sibling);
                                if let Some(s) = inner.triggers.get_mut(&sibling) {
                                    s.state = TriggerState::Blocked;
                                }
                            }
                            TriggerState::Paused => {
                                if let Some(s) = inner.triggers.get_mut(&sibling) {
                                    s.state = TriggerState::PausedAndBlocked;
                                }
                            }
                            _ => {}
                        }
                    }
                }

                tracing::debug!(trigger = %key, fire_instance = %bundle.fire_instance_id, "Trigger fired");
                bundles.push(bundle);
            }
        }

        self.dispatch(notifications);
        bundles
    }

    fn triggered_job_complete(
        &self,
        trigger: &Trigger,
        job: &JobDetail,
        instruction: CompletedExecutionInstruction,
        executed_data: &JobDataMap,
    ) {
        let now = Utc::now();
        let mut notifications = Vec::new();

        {
            let mut inner = self.inner.lock();

            if let Some(job_rec) = inner.jobs.get_mut(&job.key) {
                if job.persist_job_data_after_execution {
                    job_rec.detail.job_data = executed_data.clone();
                }
            }
            if job.concurrent_execution_disallowed {
                inner.blocked_jobs.remove(&job.key);
                for sibling in inner.triggers_of_job(&job.key) {
                    let Some(s) = inner.triggers.get(&sibling) else {
                        continue;
                    };
                    match s.state {
                        TriggerState::Blocked => {
                            if let Some(s) = inner.triggers.get_mut(&sibling) {
                                s.state = TriggerState::Waiting;
                            }
                            inner.queue(&sibling);
                        }
                        TriggerState::PausedAndBlocked => {
                            if let Some(s) = inner.triggers.get_mut(&sibling) {
                                s.state = TriggerState::Paused;
                            }
                        }
                        _ => {}
                    }
                }
                notifications.push(Notification::SchedulingChange(None));
            }

            let key = trigger.key();
            if inner.triggers.contains_key(key) {
                match instruction {
                    CompletedExecutionInstruction::Noop => {
                        finish_fire(&mut inner, key, &mut notifications);
                    }
                    CompletedExecutionInstruction::ReExecuteJob => {
                        inner.unqueue(key);
                        if let Some(rec) = inner.triggers.get_mut(key) {
                            rec.trigger.set_next_fire_time(Some(now));
                            if rec.state == TriggerState::Executing {
                                rec.state = TriggerState::Waiting;
                            }
                        }
                        inner.queue(key);
                        notifications.push(Notification::SchedulingChange(Some(now)));
                    }
                    CompletedExecutionInstruction::SetTriggerComplete
                    | CompletedExecutionInstruction::DeleteTrigger => {
                        if let Some(removed) = inner.remove_trigger_record(key, true) {
                            notifications.push(Notification::Finalized(removed.trigger));
                        }
                        notifications.push(Notification::SchedulingChange(None));
                    }
                    CompletedExecutionInstruction::SetTriggerError => {
                        tracing::warn!(trigger = %key, "Trigger put into ERROR state");
                        inner.unqueue(key);
                        if let Some(rec) = inner.triggers.get_mut(key) {
                            rec.state = TriggerState::Error;
                        }
                        notifications.push(Notification::SchedulingChange(None));
                    }
                    CompletedExecutionInstruction::SetAllTriggersOfJobComplete => {
                        for sibling in inner.triggers_of_job(&job.key) {
                            if let Some(removed) = inner.remove_trigger_record(&sibling, true) {
                                notifications.push(Notification::Finalized(removed.trigger));
                            }
                        }
                        notifications.push(Notification::SchedulingChange(None));
                    }
                    CompletedExecutionInstruction::SetAllTriggersOfJobError => {
                        tracing::warn!(job = %job.key, "All triggers of job put into ERROR state");
                        for sibling in inner.triggers_of_job(&job.key) {
                            inner.unqueue(&sibling);
                            if let Some(rec) = inner.triggers.get_mut(&sibling) {
                                rec.state = TriggerState::Error;
                            }
                        }
                        notifications.push(Notification::SchedulingChange(None));
                    }
                }
            }
        }

        self.dispatch(notifications);
    }

    fn set_misfire_threshold(&self, threshold: Duration) {
        *self.misfire_threshold.lock() =
            ChronoDuration::from_std(threshold).unwrap_or(ChronoDuration::seconds(60));
    }
}

/// Restore a finished trigger to its post-fire state: `Waiting` and
/// re-queued when it can fire again, removed when exhausted, left paused
/// when a pause arrived mid-flight.
fn finish_fire(
    inner: &mut StoreInner,
    key: &TriggerKey,
    notifications: &mut Vec<Notification>,
) {
    let Some(rec) = inner.triggers.get(key) else {
        return;
    };
    let paused = matches!(
        rec.state,
        TriggerState::Paused | TriggerState::PausedAndBlocked
    );
    if rec.trigger.next_fire_time().is_none() {
        if let Some(removed) = inner.remove_trigger_record(key, true) {
            notifications.push(Notification::Finalized(removed.trigger));
        }
        return;
    }
    if !paused {
        if let Some(rec) = inner.triggers.get_mut(key) {
            if rec.state == TriggerState::Executing {
                rec.state = TriggerState::Waiting;
            }
        }
        inner.queue(key);
        // Wake the control loop: the re-queued fire may be due before its
        // current park expires
        let next = inner.triggers.get(key).and_then(|r| r.trigger.next_fire_time());
        notifications.push(Notification::SchedulingChange(next));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::CronExpression;
    use crate::triggers::{CronMisfireInstruction, CronSchedule, Schedule};
    use std::time::Duration as StdDuration;

    fn job(name: &str) -> JobDetail {
        JobDetail::new(JobKey::with_default_group(name), "noop")
    }

    fn due_trigger(name: &str, job_name: &str) -> Trigger {
        Trigger::builder(TriggerKey::with_default_group(name))
            .for_job(JobKey::with_default_group(job_name))
            .start_at(Utc::now() - ChronoDuration::milliseconds(50))
            .with_schedule(Schedule::repeat_forever(StdDuration::from_secs(1)))
            .build()
            .unwrap()
    }

    fn acquire_now(store: &RamJobStore, max: usize) -> Vec<Trigger> {
        store.acquire_next_triggers(Utc::now() + ChronoDuration::seconds(1), max, StdDuration::ZERO)
    }

    #[test]
    fn test_store_and_retrieve() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t", "j"))
            .unwrap();
        assert!(store.check_job_exists(&JobKey::with_default_group("j")));
        assert!(store.check_trigger_exists(&TriggerKey::with_default_group("t")));
        assert_eq!(store.get_number_of_jobs(), 1);
        assert_eq!(store.get_number_of_triggers(), 1);
        let retrieved = store
            .retrieve_trigger(&TriggerKey::with_default_group("t"))
            .unwrap();
        assert!(retrieved.next_fire_time().is_some());
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t", "j"))
            .unwrap();
        assert_eq!(
            store.store_job(job("j"), false).unwrap_err().code(),
            ErrorCode::JobAlreadyExists
        );
        assert_eq!(
            store
                .store_trigger(due_trigger("t", "j"), false)
                .unwrap_err()
                .code(),
            ErrorCode::TriggerAlreadyExists
        );
    }

    #[test]
    fn test_trigger_requires_stored_job() {
        let store = RamJobStore::new();
        let err = store.store_trigger(due_trigger("t", "ghost"), false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::JobNotFound);
    }

    #[test]
    fn test_remove_job_cascades_to_triggers() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t1", "j"))
            .unwrap();
        store.store_trigger(due_trigger("t2", "j"), false).unwrap();
        assert!(store.remove_job(&JobKey::with_default_group("j")).unwrap());
        assert_eq!(store.get_number_of_triggers(), 0);
        assert_eq!(store.get_number_of_jobs(), 0);
    }

    #[test]
    fn test_non_durable_orphan_job_departs() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t", "j"))
            .unwrap();
        assert!(store
            .remove_trigger(&TriggerKey::with_default_group("t"))
            .unwrap());
        assert!(!store.check_job_exists(&JobKey::with_default_group("j")));

        let durable = job("d").store_durably();
        store
            .store_job_and_trigger(durable, due_trigger("td", "d"))
            .unwrap();
        store
            .remove_trigger(&TriggerKey::with_default_group("td"))
            .unwrap();
        assert!(store.check_job_exists(&JobKey::with_default_group("d")));
    }

    #[test]
    fn test_acquire_orders_by_time_priority_key() {
        let store = RamJobStore::new();
        store.store_job(job("j").store_durably(), false).unwrap();

        let now = Utc::now();
        let mk = |name: &str, offset_ms: i64, priority: i32| {
            Trigger::builder(TriggerKey::with_default_group(name))
                .for_job(JobKey::with_default_group("j"))
                .start_at(now - ChronoDuration::milliseconds(offset_ms))
                .with_priority(priority)
                .with_schedule(Schedule::repeat_forever(StdDuration::from_secs(60)))
                .build()
                .unwrap()
        };
        // "late" is due earliest; "high"/"low" tie on time, priority decides;
        // equal priority falls back to key order
        store.store_trigger(mk("low", 100, 1), false).unwrap();
        store.store_trigger(mk("high", 100, 9), false).unwrap();
        store.store_trigger(mk("late", 500, 1), false).unwrap();

        let acquired = acquire_now(&store, 3);
        let names: Vec<&str> = acquired.iter().map(|t| t.key().name.as_str()).collect();
        assert_eq!(names, vec!["late", "high", "low"]);
    }

    #[test]
    fn test_acquire_respects_max_count() {
        let store = RamJobStore::new();
        store.store_job(job("j").store_durably(), false).unwrap();
        for i in 0..5 {
            store
                .store_trigger(due_trigger(&format!("t{}", i), "j"), false)
                .unwrap();
        }
        assert_eq!(acquire_now(&store, 2).len(), 2);
        // The rest are still acquirable
        assert_eq!(acquire_now(&store, 10).len(), 3);
    }

    #[test]
    fn test_acquired_not_reacquirable() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t", "j"))
            .unwrap();
        assert_eq!(acquire_now(&store, 1).len(), 1);
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group("t")),
            Some(TriggerState::Acquired)
        );
        assert!(acquire_now(&store, 1).is_empty());
    }

    #[test]
    fn test_release_returns_to_waiting() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t", "j"))
            .unwrap();
        let acquired = acquire_now(&store, 1);
        store.release_acquired_trigger(acquired[0].key());
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group("t")),
            Some(TriggerState::Waiting)
        );
        assert_eq!(acquire_now(&store, 1).len(), 1);
    }

    #[test]
    fn test_batch_excludes_same_concurrent_disallowed_job() {
        let store = RamJobStore::new();
        store
            .store_job(job("j").disallow_concurrent_execution().store_durably(), false)
            .unwrap();
        store.store_trigger(due_trigger("a", "j"), false).unwrap();
        store.store_trigger(due_trigger("b", "j"), false).unwrap();

        let acquired = acquire_now(&store, 2);
        assert_eq!(acquired.len(), 1);
        // The excluded sibling stays waiting and is acquirable in a later
        // batch ...
        let second = acquire_now(&store, 2);
        assert_eq!(second.len(), 1);
        // ... but cannot fire while the first execution is in flight
        let bundles = store.triggers_fired(&acquired);
        assert_eq!(bundles.len(), 1);
        let refused = store.triggers_fired(&second);
        assert!(refused.is_empty());
        assert_eq!(
            store.get_trigger_state(second[0].key()),
            Some(TriggerState::Blocked)
        );
    }

    #[test]
    fn test_fire_blocks_siblings_and_complete_unblocks() {
        let store = RamJobStore::new();
        store
            .store_job(job("j").disallow_concurrent_execution().store_durably(), false)
            .unwrap();
        store.store_trigger(due_trigger("a", "j"), false).unwrap();
        store.store_trigger(due_trigger("b", "j"), false).unwrap();

        let acquired = acquire_now(&store, 1);
        assert_eq!(acquired.len(), 1);
        let bundles = store.triggers_fired(&acquired);
        assert_eq!(bundles.len(), 1);

        let fired_key = acquired[0].key().clone();
        let sibling = if fired_key.name == "a" { "b" } else { "a" };
        assert_eq!(
            store.get_trigger_state(&fired_key),
            Some(TriggerState::Executing)
        );
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group(sibling)),
            Some(TriggerState::Blocked)
        );
        // Nothing is acquirable while the job is blocked
        assert!(acquire_now(&store, 2).is_empty());

        store.triggered_job_complete(
            &bundles[0].trigger,
            &bundles[0].job_detail,
            CompletedExecutionInstruction::Noop,
            &JobDataMap::new(),
        );
        assert_eq!(
            store.get_trigger_state(&fired_key),
            Some(TriggerState::Waiting)
        );
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group(sibling)),
            Some(TriggerState::Waiting)
        );
        assert_eq!(acquire_now(&store, 2).len(), 1);
    }

    #[test]
    fn test_one_shot_removed_after_completion() {
        let store = RamJobStore::new();
        let trigger = Trigger::builder(TriggerKey::with_default_group("once"))
            .for_job(JobKey::with_default_group("j"))
            .start_at(Utc::now() - ChronoDuration::milliseconds(10))
            .with_schedule(Schedule::once())
            .build()
            .unwrap();
        store.store_job_and_trigger(job("j"), trigger).unwrap();

        let acquired = acquire_now(&store, 1);
        let bundles = store.triggers_fired(&acquired);
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].next_fire_time, None);

        store.triggered_job_complete(
            &bundles[0].trigger,
            &bundles[0].job_detail,
            CompletedExecutionInstruction::Noop,
            &JobDataMap::new(),
        );
        // Trigger gone, non-durable job gone with it
        assert!(!store.check_trigger_exists(&TriggerKey::with_default_group("once")));
        assert!(!store.check_job_exists(&JobKey::with_default_group("j")));
    }

    #[test]
    fn test_set_trigger_error_is_terminal() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t", "j"))
            .unwrap();
        let acquired = acquire_now(&store, 1);
        let bundles = store.triggers_fired(&acquired);
        store.triggered_job_complete(
            &bundles[0].trigger,
            &bundles[0].job_detail,
            CompletedExecutionInstruction::SetTriggerError,
            &JobDataMap::new(),
        );
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group("t")),
            Some(TriggerState::Error)
        );
        assert!(acquire_now(&store, 1).is_empty());
    }

    #[test]
    fn test_re_execute_job_requeues_immediately() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t", "j"))
            .unwrap();
        let acquired = acquire_now(&store, 1);
        let bundles = store.triggers_fired(&acquired);
        store.triggered_job_complete(
            &bundles[0].trigger,
            &bundles[0].job_detail,
            CompletedExecutionInstruction::ReExecuteJob,
            &JobDataMap::new(),
        );
        let again = acquire_now(&store, 1);
        assert_eq!(again.len(), 1);
        assert!(again[0].next_fire_time().unwrap() <= Utc::now());
    }

    #[test]
    fn test_persisted_job_data_copied_back() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j").persist_job_data(), due_trigger("t", "j"))
            .unwrap();
        let acquired = acquire_now(&store, 1);
        let bundles = store.triggers_fired(&acquired);
        let executed = JobDataMap::new().with("count", 41);
        store.triggered_job_complete(
            &bundles[0].trigger,
            &bundles[0].job_detail,
            CompletedExecutionInstruction::Noop,
            &executed,
        );
        let stored = store.retrieve_job(&JobKey::with_default_group("j")).unwrap();
        assert_eq!(stored.job_data.get_int("count"), Some(41));
    }

    #[test]
    fn test_paused_group_catches_new_triggers() {
        let store = RamJobStore::new();
        store.store_job(job("j").store_durably(), false).unwrap();
        store.pause_trigger_group("G").unwrap();

        let trigger = Trigger::builder(TriggerKey::new("t", "G"))
            .for_job(JobKey::with_default_group("j"))
            .start_at(Utc::now())
            .with_schedule(Schedule::repeat_forever(StdDuration::from_secs(1)))
            .build()
            .unwrap();
        store.store_trigger(trigger, false).unwrap();
        assert_eq!(
            store.get_trigger_state(&TriggerKey::new("t", "G")),
            Some(TriggerState::Paused)
        );
        assert!(acquire_now(&store, 1).is_empty());

        store.resume_trigger_group("G").unwrap();
        assert_eq!(
            store.get_trigger_state(&TriggerKey::new("t", "G")),
            Some(TriggerState::Waiting)
        );
        assert_eq!(acquire_now(&store, 1).len(), 1);
    }

    #[test]
    fn test_pause_all_resume_all_round_trip() {
        let store = RamJobStore::new();
        store.store_job(job("j").store_durably(), false).unwrap();
        store.store_trigger(due_trigger("t1", "j"), false).unwrap();
        store.store_trigger(due_trigger("t2", "j"), false).unwrap();

        store.pause_all().unwrap();
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group("t1")),
            Some(TriggerState::Paused)
        );
        store.resume_all().unwrap();
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group("t1")),
            Some(TriggerState::Waiting)
        );
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group("t2")),
            Some(TriggerState::Waiting)
        );
        assert!(store.get_paused_trigger_groups().is_empty());
    }

    #[test]
    fn test_misfire_do_nothing_skips_past_fire() {
        let store = RamJobStore::new();
        store.set_misfire_threshold(StdDuration::from_millis(1));
        store.store_job(job("j").store_durably(), false).unwrap();

        let expr = CronExpression::parse("0 0 * * * ?").unwrap();
        let schedule = Schedule::Cron(
            CronSchedule::new(expr).with_misfire_instruction(CronMisfireInstruction::DoNothing),
        );
        let trigger = Trigger::builder(TriggerKey::with_default_group("hourly"))
            .for_job(JobKey::with_default_group("j"))
            .start_at(Utc::now() - ChronoDuration::hours(3))
            .with_schedule(schedule)
            .build()
            .unwrap();
        store.store_trigger(trigger, false).unwrap();

        // The overdue fire is dropped, not acquired; the trigger advances
        // to a future instant
        assert!(acquire_now(&store, 1).is_empty());
        let updated = store
            .retrieve_trigger(&TriggerKey::with_default_group("hourly"))
            .unwrap();
        assert!(updated.next_fire_time().unwrap() > Utc::now());
        assert_eq!(
            store.get_trigger_state(&TriggerKey::with_default_group("hourly")),
            Some(TriggerState::Waiting)
        );
    }

    #[test]
    fn test_replace_trigger_keeps_job() {
        let store = RamJobStore::new();
        store
            .store_job_and_trigger(job("j"), due_trigger("t", "j"))
            .unwrap();

        let replacement = Trigger::builder(TriggerKey::with_default_group("t2"))
            .start_at(Utc::now())
            .with_schedule(Schedule::repeat_forever(StdDuration::from_secs(5)))
            .build()
            .unwrap();
        assert!(store
            .replace_trigger(&TriggerKey::with_default_group("t"), replacement)
            .unwrap());
        assert!(!store.check_trigger_exists(&TriggerKey::with_default_group("t")));
        let stored = store
            .retrieve_trigger(&TriggerKey::with_default_group("t2"))
            .unwrap();
        assert_eq!(stored.job_key().unwrap(), &JobKey::with_default_group("j"));

        // Replacing a missing trigger reports false
        let other = due_trigger("x", "j");
        assert!(!store
            .replace_trigger(&TriggerKey::with_default_group("missing"), other)
            .unwrap());
    }

    #[test]
    fn test_calendar_lifecycle() {
        use crate::calendar::BaseCalendar;

        let store = RamJobStore::new();
        store
            .store_calendar("open", Arc::new(BaseCalendar::new()), false, false)
            .unwrap();
        assert_eq!(store.get_calendar_names(), vec!["open".to_string()]);
        assert_eq!(
            store
                .store_calendar("open", Arc::new(BaseCalendar::new()), false, false)
                .unwrap_err()
                .code(),
            ErrorCode::CalendarAlreadyExists
        );

        store.store_job(job("j").store_durably(), false).unwrap();
        let trigger = Trigger::builder(TriggerKey::with_default_group("t"))
            .for_job(JobKey::with_default_group("j"))
            .start_at(Utc::now())
            .modified_by_calendar("open")
            .with_schedule(Schedule::repeat_forever(StdDuration::from_secs(1)))
            .build()
            .unwrap();
        store.store_trigger(trigger, false).unwrap();

        assert_eq!(
            store.remove_calendar("open").unwrap_err().code(),
            ErrorCode::CalendarInUse
        );
        store
            .remove_trigger(&TriggerKey::with_default_group("t"))
            .unwrap();
        assert!(store.remove_calendar("open").unwrap());
    }

    #[test]
    fn test_trigger_referencing_unknown_calendar_rejected() {
        let store = RamJobStore::new();
        store.store_job(job("j").store_durably(), false).unwrap();
        let trigger = Trigger::builder(TriggerKey::with_default_group("t"))
            .for_job(JobKey::with_default_group("j"))
            .start_at(Utc::now())
            .modified_by_calendar("nope")
            .with_schedule(Schedule::repeat_forever(StdDuration::from_secs(1)))
            .build()
            .unwrap();
        assert_eq!(
            store.store_trigger(trigger, false).unwrap_err().code(),
            ErrorCode::CalendarNotFound
        );
    }

    #[test]
    fn test_group_queries() {
        let store = RamJobStore::new();
        store.store_job(job("j").store_durably(), false).unwrap();
        store.store_trigger(due_trigger("t1", "j"), false).unwrap();
        let in_group = Trigger::builder(TriggerKey::new("t2", "reports"))
            .for_job(JobKey::with_default_group("j"))
            .start_at(Utc::now())
            .with_schedule(Schedule::repeat_forever(StdDuration::from_secs(1)))
            .build()
            .unwrap();
        store.store_trigger(in_group, false).unwrap();

        assert_eq!(store.get_trigger_keys("reports").len(), 1);
        assert_eq!(store.get_trigger_keys(DEFAULT_GROUP_NAME).len(), 1);
        assert_eq!(
            store.get_trigger_group_names(),
            vec![DEFAULT_GROUP_NAME.to_string(), "reports".to_string()]
        );
        assert_eq!(
            store
                .get_triggers_for_job(&JobKey::with_default_group("j"))
                .len(),
            2
        );
    }

    use crate::jobs::DEFAULT_GROUP as DEFAULT_GROUP_NAME;
}
