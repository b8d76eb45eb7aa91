//! End-to-end scheduler tests: real threads, real clocks, polling
//! assertions with generous timeouts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;

use metronome::config::SchedulerConfig;
use metronome::error::ErrorCode;
use metronome::jobs::{ExecutionContext, Job, JobDataMap, JobDetail, JobKey, JobResult};
use metronome::scheduler::{Scheduler, SchedulerFactory};
use metronome::store::TriggerState;
use metronome::triggers::{Schedule, Trigger, TriggerKey};

/// A job that counts invocations and records their instants.
struct CountingJob {
    count: Arc<AtomicUsize>,
    fire_times: Arc<Mutex<Vec<Instant>>>,
    hold: Duration,
}

impl Job for CountingJob {
    fn execute(&self, _ctx: &mut ExecutionContext) -> JobResult {
        self.fire_times.lock().push(Instant::now());
        self.count.fetch_add(1, Ordering::SeqCst);
        if !self.hold.is_zero() {
            std::thread::sleep(self.hold);
        }
        Ok(())
    }
}

struct Harness {
    scheduler: Scheduler,
    count: Arc<AtomicUsize>,
    fire_times: Arc<Mutex<Vec<Instant>>>,
}

impl Harness {
    /// Build a started scheduler with a registered counting job type.
    fn new(instance_name: &str, pool_size: usize, hold: Duration) -> Self {
        let mut config = SchedulerConfig::default();
        config.instance_name = instance_name.to_string();
        config.thread_pool.size = pool_size;
        config.idle_wait_time = Duration::from_secs(1);
        config.batch_max_count = pool_size;

        let scheduler = SchedulerFactory::new(config).build().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let fire_times = Arc::new(Mutex::new(Vec::new()));
        {
            let count = count.clone();
            let fire_times = fire_times.clone();
            scheduler.register_job("counting", move || {
                Box::new(CountingJob {
                    count: count.clone(),
                    fire_times: fire_times.clone(),
                    hold,
                })
            });
        }
        scheduler.start().unwrap();
        Self {
            scheduler,
            count,
            fire_times,
        }
    }

    fn job(&self, name: &str) -> JobDetail {
        JobDetail::new(JobKey::with_default_group(name), "counting")
    }

    fn wait_for_count(&self, at_least: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.count.load(Ordering::SeqCst) >= at_least)
    }
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

#[test]
fn test_fixed_rate_trigger_fires_exact_count() {
    let harness = Harness::new("e2e-fixed-rate", 2, Duration::ZERO);

    // Four fires total: start + 3 repeats, 250ms apart
    let trigger = Trigger::builder(TriggerKey::with_default_group("rate"))
        .start_at(Utc::now() + chrono::Duration::milliseconds(200))
        .with_schedule(Schedule::repeat(Duration::from_millis(250), 3))
        .build()
        .unwrap();
    harness
        .scheduler
        .schedule_job(harness.job("rate-job"), trigger)
        .unwrap();

    assert!(harness.wait_for_count(4, Duration::from_secs(10)));
    // The fifth fire never happens
    std::thread::sleep(Duration::from_millis(800));
    assert_eq!(harness.count.load(Ordering::SeqCst), 4);

    // Consecutive fires are spaced roughly one interval apart
    let times = harness.fire_times.lock();
    for pair in times.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= Duration::from_millis(100), "gap was {:?}", gap);
    }
    drop(times);

    // An exhausted one-shot trigger and its non-durable job depart
    assert!(wait_until(Duration::from_secs(2), || {
        !harness
            .scheduler
            .job_exists(&JobKey::with_default_group("rate-job"))
    }));

    harness.scheduler.shutdown(true);
}

#[test]
fn test_concurrent_execution_disallowed_serializes() {
    let harness = Harness::new("e2e-no-concurrent", 3, Duration::from_millis(300));

    let job = harness.job("exclusive").disallow_concurrent_execution();
    let now = Utc::now();
    let t = |name: &str| {
        Trigger::builder(TriggerKey::with_default_group(name))
            .for_job(JobKey::with_default_group("exclusive"))
            .start_at(now)
            .with_schedule(Schedule::once())
            .build()
            .unwrap()
    };

    harness.scheduler.schedule_job(job, t("a")).unwrap();
    harness.scheduler.schedule(t("b")).unwrap();

    // Both fires happen, one after the other
    assert!(harness.wait_for_count(2, Duration::from_secs(10)));
    let times = harness.fire_times.lock();
    assert_eq!(times.len(), 2);
    let gap = times[1].duration_since(times[0]);
    assert!(
        gap >= Duration::from_millis(250),
        "executions overlapped; gap was {:?}",
        gap
    );
    drop(times);

    harness.scheduler.shutdown(true);
}

#[test]
fn test_pause_resume_trigger_group() {
    let harness = Harness::new("e2e-pause-group", 2, Duration::ZERO);

    harness.scheduler.pause_triggers("G").unwrap();

    let trigger = Trigger::builder(TriggerKey::new("paused-t", "G"))
        .start_at(Utc::now())
        .with_schedule(Schedule::repeat_forever(Duration::from_millis(200)))
        .build()
        .unwrap();
    harness
        .scheduler
        .schedule_job(harness.job("paused-job"), trigger)
        .unwrap();

    // A trigger scheduled into a paused group does not fire
    std::thread::sleep(Duration::from_millis(600));
    assert_eq!(harness.count.load(Ordering::SeqCst), 0);
    assert_eq!(
        harness
            .scheduler
            .get_trigger_state(&TriggerKey::new("paused-t", "G")),
        Some(TriggerState::Paused)
    );

    harness.scheduler.resume_triggers("G").unwrap();
    assert!(harness.wait_for_count(1, Duration::from_secs(10)));
    assert_eq!(
        harness
            .scheduler
            .get_trigger_state(&TriggerKey::new("paused-t", "G")),
        Some(TriggerState::Waiting)
    );

    harness.scheduler.shutdown(true);
}

#[test]
fn test_trigger_job_fires_once_immediately() {
    let harness = Harness::new("e2e-trigger-now", 2, Duration::ZERO);

    let job = harness.job("manual").store_durably();
    harness.scheduler.add_job(job, false).unwrap();
    harness
        .scheduler
        .trigger_job(
            &JobKey::with_default_group("manual"),
            Some(JobDataMap::new().with("reason", "on demand")),
        )
        .unwrap();

    assert!(harness.wait_for_count(1, Duration::from_secs(10)));
    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(harness.count.load(Ordering::SeqCst), 1);
    // The durable job survives its one-shot trigger
    assert!(harness
        .scheduler
        .job_exists(&JobKey::with_default_group("manual")));

    harness.scheduler.shutdown(true);
}

#[test]
fn test_shutdown_waits_for_running_jobs() {
    let harness = Harness::new("e2e-shutdown-wait", 3, Duration::from_millis(400));

    let now = Utc::now();
    for name in ["s1", "s2"] {
        let trigger = Trigger::builder(TriggerKey::with_default_group(name))
            .start_at(now)
            .with_schedule(Schedule::once())
            .build()
            .unwrap();
        harness
            .scheduler
            .schedule_job(harness.job(&format!("{}-job", name)), trigger)
            .unwrap();
    }

    // Wait until both executions are in flight (or at least started)
    assert!(harness.wait_for_count(2, Duration::from_secs(10)));
    harness.scheduler.shutdown(true);

    // Both jobs finished before shutdown returned
    assert_eq!(harness.count.load(Ordering::SeqCst), 2);

    // Scheduling after shutdown fails with a shutdown error
    let trigger = Trigger::builder(TriggerKey::with_default_group("late"))
        .with_schedule(Schedule::once())
        .build()
        .unwrap();
    let err = harness
        .scheduler
        .schedule_job(harness.job("late-job"), trigger)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::SchedulerShutdown);
}

#[test]
fn test_standby_stops_firing_until_restart() {
    let harness = Harness::new("e2e-standby", 2, Duration::ZERO);

    let trigger = Trigger::builder(TriggerKey::with_default_group("steady"))
        .start_at(Utc::now())
        .with_schedule(Schedule::repeat_forever(Duration::from_millis(150)))
        .build()
        .unwrap();
    harness
        .scheduler
        .schedule_job(harness.job("steady-job"), trigger)
        .unwrap();
    assert!(harness.wait_for_count(1, Duration::from_secs(10)));

    harness.scheduler.standby().unwrap();
    assert!(harness.scheduler.is_in_standby());
    // Let in-flight work drain, then confirm the counter stops moving
    std::thread::sleep(Duration::from_millis(300));
    let frozen = harness.count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(harness.count.load(Ordering::SeqCst), frozen);

    harness.scheduler.start().unwrap();
    assert!(harness.wait_for_count(frozen + 1, Duration::from_secs(10)));

    harness.scheduler.shutdown(true);
}

#[test]
fn test_interrupt_is_observable_by_job() {
    struct InterruptibleJob {
        interrupted: Arc<AtomicUsize>,
    }

    impl Job for InterruptibleJob {
        fn execute(&self, ctx: &mut ExecutionContext) -> JobResult {
            let deadline = Instant::now() + Duration::from_secs(10);
            while Instant::now() < deadline {
                if ctx.is_interrupt_requested() {
                    self.interrupted.fetch_add(1, Ordering::SeqCst);
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        }
    }

    let mut config = SchedulerConfig::default();
    config.instance_name = "e2e-interrupt".to_string();
    config.thread_pool.size = 1;
    config.idle_wait_time = Duration::from_secs(1);
    let scheduler = SchedulerFactory::new(config).build().unwrap();

    let interrupted = Arc::new(AtomicUsize::new(0));
    {
        let interrupted = interrupted.clone();
        scheduler.register_job("interruptible", move || {
            Box::new(InterruptibleJob {
                interrupted: interrupted.clone(),
            })
        });
    }
    scheduler.start().unwrap();

    let job_key = JobKey::with_default_group("stuck");
    let trigger = Trigger::builder(TriggerKey::with_default_group("stuck-t"))
        .start_at(Utc::now())
        .with_schedule(Schedule::once())
        .build()
        .unwrap();
    scheduler
        .schedule_job(
            JobDetail::new(job_key.clone(), "interruptible"),
            trigger,
        )
        .unwrap();

    // Wait for the execution to be in flight, then interrupt it
    assert!(wait_until(Duration::from_secs(10), || {
        !scheduler.get_currently_executing_jobs().is_empty()
    }));
    assert!(scheduler.interrupt_job(&job_key));
    assert!(wait_until(Duration::from_secs(5), || {
        interrupted.load(Ordering::SeqCst) == 1
    }));

    scheduler.shutdown(true);
}

#[test]
fn test_schedule_unschedule_schedule_round_trip() {
    let harness = Harness::new("e2e-round-trip", 1, Duration::ZERO);

    let key = TriggerKey::with_default_group("rt");
    let build = || {
        Trigger::builder(TriggerKey::with_default_group("rt"))
            .for_job(JobKey::with_default_group("rt-job"))
            .start_at(Utc::now() + chrono::Duration::seconds(60))
            .with_schedule(Schedule::repeat_forever(Duration::from_secs(60)))
            .build()
            .unwrap()
    };

    harness
        .scheduler
        .schedule_job(harness.job("rt-job").store_durably(), build())
        .unwrap();
    assert_eq!(
        harness.scheduler.get_trigger_state(&key),
        Some(TriggerState::Waiting)
    );

    assert!(harness.scheduler.unschedule_job(&key).unwrap());
    assert_eq!(harness.scheduler.get_trigger_state(&key), None);

    // Re-scheduling restores the same observable state
    harness.scheduler.schedule(build()).unwrap();
    assert_eq!(
        harness.scheduler.get_trigger_state(&key),
        Some(TriggerState::Waiting)
    );

    harness.scheduler.shutdown(true);
}
