//! Builds scheduler instances from configuration.

use std::path::Path;
use std::sync::Arc;

use crate::config::{JobStoreKind, SchedulerConfig, ThreadPoolKind};
use crate::error::Result;
use crate::pool::{SimpleThreadPool, ThreadPool};
use crate::scheduler::{Scheduler, SchedulerRepository};
use crate::store::{JobStore, RamJobStore};

/// Constructs a [`Scheduler`] with its pool and store from a
/// [`SchedulerConfig`], and registers it in the process-wide
/// [`SchedulerRepository`]. Component choices come from the config's
/// enumerated tables.
#[derive(Debug, Clone, Default)]
pub struct SchedulerFactory {
    config: SchedulerConfig,
}

impl SchedulerFactory {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Factory for a scheduler with all defaults.
    pub fn default_scheduler() -> Result<Scheduler> {
        Self::new(SchedulerConfig::default()).build()
    }

    /// Factory from a properties file (see
    /// [`SchedulerConfig::from_properties_file`]).
    pub fn from_properties_file(path: impl AsRef<Path>) -> Result<Scheduler> {
        Self::new(SchedulerConfig::from_properties_file(path)?).build()
    }

    /// Build the scheduler and register it.
    pub fn build(&self) -> Result<Scheduler> {
        let config = self.config.clone().validated()?;

        let pool: Arc<dyn ThreadPool> = match config.thread_pool.kind {
            ThreadPoolKind::Simple => Arc::new(SimpleThreadPool::new(
                config.thread_pool.size,
                &config.instance_name,
            )?),
        };
        let store: Arc<dyn JobStore> = match config.job_store.kind {
            JobStoreKind::Ram => Arc::new(RamJobStore::new()),
        };

        let scheduler = Scheduler::new(config, store, pool)?;
        SchedulerRepository::global().bind(scheduler.clone())?;
        tracing::info!(
            scheduler = %scheduler.instance_name(),
            "Scheduler built and registered"
        );
        Ok(scheduler)
    }
}
