//! Process-wide registry of scheduler instances.

use dashmap::DashMap;
use std::sync::OnceLock;

use crate::error::{ErrorCode, Result, SchedulerError};
use crate::scheduler::Scheduler;

static GLOBAL: OnceLock<SchedulerRepository> = OnceLock::new();

/// Registry of live schedulers, keyed by instance name. Schedulers register
/// here when built by the factory and deregister on shutdown.
#[derive(Default)]
pub struct SchedulerRepository {
    schedulers: DashMap<String, Scheduler>,
}

impl SchedulerRepository {
    /// The process-wide registry.
    pub fn global() -> &'static SchedulerRepository {
        GLOBAL.get_or_init(SchedulerRepository::default)
    }

    /// Register a scheduler under its instance name.
    pub fn bind(&self, scheduler: Scheduler) -> Result<()> {
        let name = scheduler.instance_name().to_string();
        if self.schedulers.contains_key(&name) {
            return Err(SchedulerError::already_exists(
                ErrorCode::SchedulerAlreadyExists,
                format!("scheduler '{}'", name),
            ));
        }
        self.schedulers.insert(name, scheduler);
        Ok(())
    }

    /// Look a scheduler up by instance name.
    pub fn lookup(&self, name: &str) -> Option<Scheduler> {
        self.schedulers.get(name).map(|entry| entry.value().clone())
    }

    /// Deregister by instance name; `true` when one was registered.
    pub fn remove(&self, name: &str) -> bool {
        self.schedulers.remove(name).is_some()
    }

    /// Handles to every registered scheduler.
    pub fn lookup_all(&self) -> Vec<Scheduler> {
        self.schedulers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_singleton() {
        let a = SchedulerRepository::global() as *const _;
        let b = SchedulerRepository::global() as *const _;
        assert_eq!(a, b);
    }
}
