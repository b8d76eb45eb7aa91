//! The worker-side wrapper around one fire.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use crate::jobs::{ExecutionContext, FiredBundle, Job, JobExecutionError, UnscheduleHint};
use crate::scheduler::ListenerManager;
use crate::store::{CompletedExecutionInstruction, JobStore};

/// Runs one fire on a worker thread: builds the execution context, walks
/// the listener protocol, invokes the job, and reports the completion
/// instruction back to the store.
///
/// The shell is the only path from a worker back into the store, and it
/// uses exactly one call: `triggered_job_complete`.
pub struct JobRunShell {
    scheduler_name: String,
    bundle: FiredBundle,
    job: Box<dyn Job>,
    store: Arc<dyn JobStore>,
    listeners: Arc<ListenerManager>,
    interrupt_flag: Arc<AtomicBool>,
}

impl JobRunShell {
    pub(crate) fn new(
        scheduler_name: impl Into<String>,
        bundle: FiredBundle,
        job: Box<dyn Job>,
        store: Arc<dyn JobStore>,
        listeners: Arc<ListenerManager>,
        interrupt_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            scheduler_name: scheduler_name.into(),
            bundle,
            job,
            store,
            listeners,
            interrupt_flag,
        }
    }

    /// Execute the fire. Never panics; never returns an error — every
    /// outcome is routed through listeners and the completion instruction.
    pub fn run(self) {
        let trigger = self.bundle.trigger.clone();
        let job_detail = self.bundle.job_detail.clone();
        let mut ctx = ExecutionContext::new(
            self.scheduler_name.clone(),
            self.bundle,
            self.interrupt_flag,
        );

        if self.listeners.notify_trigger_fired(&trigger, &ctx) {
            self.listeners.notify_job_execution_vetoed(&ctx);
            let instruction = CompletedExecutionInstruction::SetTriggerComplete;
            self.listeners
                .notify_trigger_complete(&trigger, &ctx, instruction);
            self.store.triggered_job_complete(
                &trigger,
                &job_detail,
                instruction,
                ctx.merged_job_data_map(),
            );
            return;
        }

        self.listeners.notify_job_to_be_executed(&ctx);

        tracing::debug!(
            job = %job_detail.key,
            trigger = %trigger.key(),
            fire_instance = %ctx.fire_instance_id(),
            "Executing job"
        );
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.job.execute(&mut ctx)));
        let elapsed = started.elapsed();
        ctx.set_run_time(elapsed);

        let error: Option<JobExecutionError> = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(panic) => Some(JobExecutionError::new(panic_message(panic.as_ref()))),
        };

        match &error {
            None => tracing::debug!(
                job = %job_detail.key,
                duration_ms = elapsed.as_millis() as u64,
                "Job completed"
            ),
            Some(e) => tracing::error!(
                job = %job_detail.key,
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "Job failed"
            ),
        }

        self.listeners.notify_job_was_executed(&ctx, error.as_ref());

        let instruction = completion_instruction(error.as_ref());
        self.listeners
            .notify_trigger_complete(&trigger, &ctx, instruction);
        self.store.triggered_job_complete(
            &trigger,
            &job_detail,
            instruction,
            ctx.merged_job_data_map(),
        );
    }
}

/// Map the execution outcome onto a completion instruction.
fn completion_instruction(
    error: Option<&JobExecutionError>,
) -> CompletedExecutionInstruction {
    match error {
        Some(e) if e.refire_immediately => CompletedExecutionInstruction::ReExecuteJob,
        Some(e) => match e.unschedule {
            UnscheduleHint::FiringTrigger => CompletedExecutionInstruction::SetTriggerComplete,
            UnscheduleHint::AllTriggers => {
                CompletedExecutionInstruction::SetAllTriggersOfJobComplete
            }
            UnscheduleHint::None => CompletedExecutionInstruction::SetTriggerError,
        },
        None => CompletedExecutionInstruction::Noop,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("job panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("job panicked: {}", s)
    } else {
        "job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_instruction_mapping() {
        assert_eq!(
            completion_instruction(None),
            CompletedExecutionInstruction::Noop
        );
        assert_eq!(
            completion_instruction(Some(&JobExecutionError::new("x").with_refire())),
            CompletedExecutionInstruction::ReExecuteJob
        );
        assert_eq!(
            completion_instruction(Some(
                &JobExecutionError::new("x").with_unschedule_firing_trigger()
            )),
            CompletedExecutionInstruction::SetTriggerComplete
        );
        assert_eq!(
            completion_instruction(Some(
                &JobExecutionError::new("x").with_unschedule_all_triggers()
            )),
            CompletedExecutionInstruction::SetAllTriggersOfJobComplete
        );
        assert_eq!(
            completion_instruction(Some(&JobExecutionError::new("x"))),
            CompletedExecutionInstruction::SetTriggerError
        );
    }
}
