//! Listener contracts and the listener manager.
//!
//! Listener registries are synchronized independently of the store lock;
//! notification happens against a snapshot of the registry, so listener
//! code may call back into the scheduler.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::error::SchedulerError;
use crate::jobs::{ExecutionContext, JobDetail, JobExecutionError, JobKey};
use crate::store::CompletedExecutionInstruction;
use crate::triggers::{Trigger, TriggerKey};

/// Observes job executions.
pub trait JobListener: Send + Sync {
    /// Registry name; used for removal.
    fn name(&self) -> &str;

    /// The job is about to execute.
    fn job_to_be_executed(&self, _ctx: &ExecutionContext) {}

    /// A trigger listener vetoed the execution.
    fn job_execution_vetoed(&self, _ctx: &ExecutionContext) {}

    /// The job finished, successfully or not.
    fn job_was_executed(&self, _ctx: &ExecutionContext, _error: Option<&JobExecutionError>) {}
}

/// Observes trigger firings.
pub trait TriggerListener: Send + Sync {
    /// Registry name; used for removal.
    fn name(&self) -> &str;

    /// The trigger fired and its job is about to run.
    fn trigger_fired(&self, _trigger: &Trigger, _ctx: &ExecutionContext) {}

    /// Return `true` to veto the job execution.
    fn veto_job_execution(&self, _trigger: &Trigger, _ctx: &ExecutionContext) -> bool {
        false
    }

    /// The trigger passed its misfire threshold unfired.
    fn trigger_misfired(&self, _trigger: &Trigger) {}

    /// The fire completed with the given instruction.
    fn trigger_complete(
        &self,
        _trigger: &Trigger,
        _ctx: &ExecutionContext,
        _instruction: CompletedExecutionInstruction,
    ) {
    }
}

/// Observes scheduler lifecycle events.
pub trait SchedulerListener: Send + Sync {
    fn scheduler_starting(&self) {}

    fn scheduler_started(&self) {}

    fn scheduler_in_standby(&self) {}

    fn scheduler_shutting_down(&self) {}

    fn scheduler_shutdown(&self) {}

    fn job_added(&self, _job: &JobDetail) {}

    fn job_deleted(&self, _key: &JobKey) {}

    fn trigger_paused(&self, _key: &TriggerKey) {}

    fn trigger_group_paused(&self, _group: &str) {}

    fn trigger_resumed(&self, _key: &TriggerKey) {}

    fn trigger_group_resumed(&self, _group: &str) {}

    /// A trigger will never fire again and left the store.
    fn trigger_finalized(&self, _trigger: &Trigger) {}

    fn scheduling_data_cleared(&self) {}

    /// An internal error the scheduler recovered from.
    fn scheduler_error(&self, _message: &str, _error: &SchedulerError) {}
}

/// Holds the three listener registries for one scheduler.
#[derive(Default)]
pub struct ListenerManager {
    job_listeners: RwLock<Vec<Arc<dyn JobListener>>>,
    trigger_listeners: RwLock<Vec<Arc<dyn TriggerListener>>>,
    scheduler_listeners: RwLock<Vec<Arc<dyn SchedulerListener>>>,
}

impl ListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>) {
        self.job_listeners.write().push(listener);
    }

    /// Remove a job listener by name; `true` when one was removed.
    pub fn remove_job_listener(&self, name: &str) -> bool {
        let mut listeners = self.job_listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    pub fn add_trigger_listener(&self, listener: Arc<dyn TriggerListener>) {
        self.trigger_listeners.write().push(listener);
    }

    /// Remove a trigger listener by name; `true` when one was removed.
    pub fn remove_trigger_listener(&self, name: &str) -> bool {
        let mut listeners = self.trigger_listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.name() != name);
        listeners.len() != before
    }

    pub fn add_scheduler_listener(&self, listener: Arc<dyn SchedulerListener>) {
        self.scheduler_listeners.write().push(listener);
    }

    pub fn clear_scheduler_listeners(&self) {
        self.scheduler_listeners.write().clear();
    }

    fn job_snapshot(&self) -> Vec<Arc<dyn JobListener>> {
        self.job_listeners.read().clone()
    }

    fn trigger_snapshot(&self) -> Vec<Arc<dyn TriggerListener>> {
        self.trigger_listeners.read().clone()
    }

    pub(crate) fn scheduler_snapshot(&self) -> Vec<Arc<dyn SchedulerListener>> {
        self.scheduler_listeners.read().clone()
    }

    // ── Notification helpers ─────────────────────────────────────────────────

    /// Notify `trigger_fired`, then poll vetoes. Returns `true` when any
    /// trigger listener vetoed the execution.
    pub(crate) fn notify_trigger_fired(&self, trigger: &Trigger, ctx: &ExecutionContext) -> bool {
        let mut vetoed = false;
        for listener in self.trigger_snapshot() {
            listener.trigger_fired(trigger, ctx);
            if listener.veto_job_execution(trigger, ctx) {
                tracing::debug!(
                    listener = listener.name(),
                    trigger = %trigger.key(),
                    "Job execution vetoed"
                );
                vetoed = true;
            }
        }
        vetoed
    }

    pub(crate) fn notify_trigger_misfired(&self, trigger: &Trigger) {
        for listener in self.trigger_snapshot() {
            listener.trigger_misfired(trigger);
        }
    }

    pub(crate) fn notify_trigger_complete(
        &self,
        trigger: &Trigger,
        ctx: &ExecutionContext,
        instruction: CompletedExecutionInstruction,
    ) {
        for listener in self.trigger_snapshot() {
            listener.trigger_complete(trigger, ctx, instruction);
        }
    }

    pub(crate) fn notify_job_to_be_executed(&self, ctx: &ExecutionContext) {
        for listener in self.job_snapshot() {
            listener.job_to_be_executed(ctx);
        }
    }

    pub(crate) fn notify_job_execution_vetoed(&self, ctx: &ExecutionContext) {
        for listener in self.job_snapshot() {
            listener.job_execution_vetoed(ctx);
        }
    }

    pub(crate) fn notify_job_was_executed(
        &self,
        ctx: &ExecutionContext,
        error: Option<&JobExecutionError>,
    ) {
        for listener in self.job_snapshot() {
            listener.job_was_executed(ctx, error);
        }
    }

    /// Run a closure against every scheduler listener.
    pub(crate) fn notify_scheduler_listeners(&self, f: impl Fn(&dyn SchedulerListener)) {
        for listener in self.scheduler_snapshot() {
            f(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTriggerListener {
        fired: AtomicUsize,
        veto: bool,
    }

    impl TriggerListener for CountingTriggerListener {
        fn name(&self) -> &str {
            "counting"
        }

        fn trigger_fired(&self, _trigger: &Trigger, _ctx: &ExecutionContext) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }

        fn veto_job_execution(&self, _trigger: &Trigger, _ctx: &ExecutionContext) -> bool {
            self.veto
        }
    }

    #[test]
    fn test_remove_by_name() {
        let manager = ListenerManager::new();
        manager.add_trigger_listener(Arc::new(CountingTriggerListener {
            fired: AtomicUsize::new(0),
            veto: false,
        }));
        assert!(manager.remove_trigger_listener("counting"));
        assert!(!manager.remove_trigger_listener("counting"));
    }
}
