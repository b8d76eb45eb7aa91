//! Worker pool: a fixed set of pre-created OS threads with blocking
//! hand-off semantics.
//!
//! The scheduler thread calls [`ThreadPool::block_for_available_threads`]
//! before acquiring a batch, so it never reserves more triggers than it can
//! dispatch, then hands each fire to an idle worker through
//! [`ThreadPool::run_in_thread`].

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of work handed to a worker.
pub type Task = Box<dyn FnOnce() + Send>;

/// The pool contract the scheduler drives.
pub trait ThreadPool: Send + Sync {
    /// Number of worker threads.
    fn pool_size(&self) -> usize;

    /// Block until at least one worker is free; returns how many are.
    /// Returns `0` only when the pool is shutting down.
    fn block_for_available_threads(&self) -> usize;

    /// Hand a task to a worker. Returns `false` only when the pool is
    /// shutting down and no longer accepts work.
    fn run_in_thread(&self, task: Task) -> bool;

    /// Stop intake; with `wait_for_jobs`, join workers after they finish
    /// what they hold.
    fn shutdown(&self, wait_for_jobs: bool);
}

#[derive(Default)]
struct PoolState {
    idle: usize,
    pending: VecDeque<Task>,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Workers wait here for tasks
    workers: Condvar,
    /// Clients wait here for a free worker
    clients: Condvar,
    executed: AtomicU64,
}

/// Fixed-size pool of pre-created worker threads.
pub struct SimpleThreadPool {
    size: usize,
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SimpleThreadPool {
    /// Spawn `size` (≥ 1) workers named `<name>-worker-<n>`.
    pub fn new(size: usize, name: &str) -> crate::error::Result<Self> {
        let size = size.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            workers: Condvar::new(),
            clients: Condvar::new(),
            executed: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(size);
        for n in 0..size {
            let shared = shared.clone();
            let thread_name = format!("{}-worker-{}", name, n);
            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker_loop(shared))
                .map_err(|e| {
                    crate::error::SchedulerError::with_internal(
                        crate::error::ErrorCode::SchedulerInternal,
                        "failed to spawn worker thread",
                        e.to_string(),
                    )
                })?;
            handles.push(handle);
        }

        tracing::info!(workers = size, "Thread pool started");
        Ok(Self {
            size,
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// Tasks run to completion so far.
    pub fn tasks_executed(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            state.idle += 1;
            shared.clients.notify_all();
            loop {
                if let Some(task) = state.pending.pop_front() {
                    state.idle -= 1;
                    break Some(task);
                }
                if state.shutdown {
                    state.idle -= 1;
                    break None;
                }
                shared.workers.wait(&mut state);
            }
        };

        let Some(task) = task else { break };
        // A panicking task must not take its worker down with it
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            tracing::error!("Worker task panicked");
        }
        shared.executed.fetch_add(1, Ordering::Relaxed);
    }
}

impl ThreadPool for SimpleThreadPool {
    fn pool_size(&self) -> usize {
        self.size
    }

    fn block_for_available_threads(&self) -> usize {
        let mut state = self.shared.state.lock();
        loop {
            if state.shutdown {
                return 0;
            }
            let available = state.idle.saturating_sub(state.pending.len());
            if available > 0 {
                return available;
            }
            self.shared.clients.wait(&mut state);
        }
    }

    fn run_in_thread(&self, task: Task) -> bool {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return false;
        }
        state.pending.push_back(task);
        self.shared.workers.notify_one();
        true
    }

    fn shutdown(&self, wait_for_jobs: bool) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.shared.workers.notify_all();
            self.shared.clients.notify_all();
        }
        if wait_for_jobs {
            let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
            for handle in handles {
                let _ = handle.join();
            }
        }
        tracing::info!(waited = wait_for_jobs, "Thread pool shut down");
    }
}
