//! The scheduler control loop.
//!
//! One OS thread drives acquisition: sleep, acquire a batch, park until the
//! earliest fire time, fire, dispatch, repeat. A condition variable carries
//! the "scheduling changed" signal from the store so the thread re-plans
//! when an earlier trigger appears mid-park.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::Result;
use crate::jobs::FiredBundle;
use crate::pool::ThreadPool;
use crate::store::JobStore;
use crate::triggers::Trigger;

/// Fires this close to their due time are considered on time.
const FIRE_TIME_TOLERANCE_MS: i64 = 2;

/// Executes bundles produced by the control loop. Implemented by the
/// scheduler core, which owns the job factory and listener registries.
pub(crate) trait BundleExecutor: Send + Sync {
    /// Dispatch one bundle to a worker. All failures are handled inside
    /// (dispatch failure records `SET_TRIGGER_ERROR` against the store).
    fn execute_bundle(&self, bundle: FiredBundle);
}

#[derive(Debug)]
struct SigState {
    halted: bool,
    paused: bool,
    signaled: bool,
    signaled_next_fire_time: Option<DateTime<Utc>>,
}

/// Shared handle between the control loop, the façade, and the store
/// signaler.
pub(crate) struct SchedulerThreadState {
    state: Mutex<SigState>,
    condvar: Condvar,
}

impl SchedulerThreadState {
    /// Created paused: the loop parks until `start` lifts the pause.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SigState {
                halted: false,
                paused: true,
                signaled: false,
                signaled_next_fire_time: None,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Wake the loop because scheduling data changed. The candidate time
    /// (when known) lets the loop decide whether re-planning is worth it.
    pub fn signal_scheduling_change(&self, candidate: Option<DateTime<Utc>>) {
        let mut state = self.state.lock();
        state.signaled = true;
        state.signaled_next_fire_time = match (state.signaled_next_fire_time, candidate) {
            (Some(existing), Some(new)) => Some(existing.min(new)),
            (existing, new) => new.or(existing),
        };
        self.condvar.notify_all();
    }

    /// Pause (standby) or unpause (run) the loop.
    pub fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        state.paused = paused;
        self.condvar.notify_all();
    }

    /// Stop the loop permanently.
    pub fn halt(&self) {
        let mut state = self.state.lock();
        state.halted = true;
        self.condvar.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted
    }
}

/// What interrupted a park.
enum ParkOutcome {
    /// Timed out (or spurious wake); proceed
    Elapsed,
    /// A signal arrived carrying the candidate next fire time
    Signaled(Option<DateTime<Utc>>),
    /// The loop should stop or re-park
    HaltedOrPaused,
}

/// The control loop. Consumed by [`SchedulerThread::spawn`].
pub(crate) struct SchedulerThread {
    state: Arc<SchedulerThreadState>,
    store: Arc<dyn JobStore>,
    pool: Arc<dyn ThreadPool>,
    executor: Arc<dyn BundleExecutor>,
    idle_wait: Duration,
    max_batch_size: usize,
    batch_time_window: Duration,
}

impl SchedulerThread {
    pub fn new(
        state: Arc<SchedulerThreadState>,
        store: Arc<dyn JobStore>,
        pool: Arc<dyn ThreadPool>,
        executor: Arc<dyn BundleExecutor>,
        idle_wait: Duration,
        max_batch_size: usize,
        batch_time_window: Duration,
    ) -> Self {
        Self {
            state,
            store,
            pool,
            executor,
            idle_wait,
            max_batch_size: max_batch_size.max(1),
            batch_time_window,
        }
    }

    /// Spawn the loop on its own named OS thread.
    pub fn spawn(self, thread_name: &str) -> Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || self.run())
            .map_err(|e| {
                crate::error::SchedulerError::with_internal(
                    crate::error::ErrorCode::SchedulerInternal,
                    "failed to spawn scheduler thread",
                    e.to_string(),
                )
            })
    }

    fn run(self) {
        tracing::info!("Scheduler thread started");

        'main: loop {
            // Standby: park until started or halted
            {
                let mut state = self.state.state.lock();
                while state.paused && !state.halted {
                    self.state.condvar.wait(&mut state);
                }
                if state.halted {
                    break;
                }
            }

            let available = self.pool.block_for_available_threads();
            if available == 0 {
                // Pool is shutting down; the halt follows shortly
                if self.state.is_halted() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }

            let batch_size = available.min(self.max_batch_size);
            let now = Utc::now();
            let no_later_than = now + chrono_duration(self.idle_wait);
            let triggers =
                self.store
                    .acquire_next_triggers(no_later_than, batch_size, self.batch_time_window);

            if triggers.is_empty() {
                match self.park(self.idle_wait) {
                    ParkOutcome::HaltedOrPaused if self.state.is_halted() => break,
                    _ => continue,
                }
            }

            // Park precisely until the earliest acquired fire time,
            // re-planning if an earlier trigger shows up meanwhile
            loop {
                let Some(first_fire) = earliest_fire_time(&triggers) else {
                    break;
                };
                let wait = first_fire - Utc::now();
                if wait <= ChronoDuration::milliseconds(FIRE_TIME_TOLERANCE_MS) {
                    break;
                }
                let wait = wait.to_std().unwrap_or(Duration::ZERO);

                match self.park(wait) {
                    ParkOutcome::Elapsed => {}
                    ParkOutcome::Signaled(candidate) => {
                        let earlier = candidate.map_or(false, |c| c < first_fire);
                        if earlier {
                            tracing::debug!("Earlier trigger arrived; re-planning batch");
                            self.release_all(&triggers);
                            continue 'main;
                        }
                    }
                    ParkOutcome::HaltedOrPaused => {
                        self.release_all(&triggers);
                        if self.state.is_halted() {
                            break 'main;
                        }
                        continue 'main;
                    }
                }
            }

            // Fire. Entries no longer fireable are dropped by the store.
            let bundles = self.store.triggers_fired(&triggers);
            tracing::debug!(
                acquired = triggers.len(),
                fired = bundles.len(),
                "Batch fired"
            );
            for bundle in bundles {
                self.executor.execute_bundle(bundle);
            }
        }

        tracing::info!("Scheduler thread exited");
    }

    /// Park up to `timeout`, waking early on signals, halt, or standby.
    fn park(&self, timeout: Duration) -> ParkOutcome {
        let mut state = self.state.state.lock();
        if state.halted || state.paused {
            return ParkOutcome::HaltedOrPaused;
        }
        if !state.signaled {
            self.state.condvar.wait_for(&mut state, timeout);
        }
        if state.halted || state.paused {
            return ParkOutcome::HaltedOrPaused;
        }
        if state.signaled {
            state.signaled = false;
            let candidate = state.signaled_next_fire_time.take();
            return ParkOutcome::Signaled(candidate);
        }
        ParkOutcome::Elapsed
    }

    fn release_all(&self, triggers: &[Trigger]) {
        for trigger in triggers {
            self.store.release_acquired_trigger(trigger.key());
        }
    }
}

fn earliest_fire_time(triggers: &[Trigger]) -> Option<DateTime<Utc>> {
    triggers.iter().filter_map(|t| t.next_fire_time()).min()
}

fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or(ChronoDuration::MAX)
}
