//! Configuration management.
//!
//! Two surfaces feed a [`SchedulerConfig`]:
//!
//! - Direct construction / serde deserialization (each field carries a
//!   default, so partial documents work).
//! - A flat properties file ([`PropertySet`]) using the recognized
//!   `metronome.*` keys, with `$@<other.key>` cross-references resolved by a
//!   two-pass expansion before typed extraction.
//!
//! Component choices (`metronome.jobstore.kind`, `metronome.threadpool.kind`)
//! are an enumerated table; unknown values are configuration errors.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{ErrorCode, Result, SchedulerError};

/// Floor for `idle_wait_time`; shorter waits turn the scheduler thread into
/// a busy loop.
pub const MIN_IDLE_WAIT: Duration = Duration::from_millis(1000);

/// Main scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduler instance name
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Scheduler instance id
    #[serde(default = "default_instance_id")]
    pub instance_id: String,

    /// Name for the scheduler thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Worker pool configuration
    #[serde(default)]
    pub thread_pool: ThreadPoolConfig,

    /// Job store configuration
    #[serde(default)]
    pub job_store: JobStoreConfig,

    /// How long the scheduler thread parks when no triggers are due
    #[serde(default = "default_idle_wait_time", with = "humantime_serde")]
    pub idle_wait_time: Duration,

    /// Maximum triggers acquired in one batch
    #[serde(default = "default_batch_max_count")]
    pub batch_max_count: usize,

    /// How far ahead of now a batch may reach for triggers
    #[serde(default, with = "humantime_serde")]
    pub batch_time_window: Duration,

    /// How late a fire time may be before it counts as a misfire
    #[serde(default = "default_misfire_threshold", with = "humantime_serde")]
    pub misfire_threshold: Duration,

    /// Whether shutdown skips joining the scheduler thread
    #[serde(default)]
    pub make_scheduler_thread_daemon: bool,

    /// Request interruption of running jobs on shutdown(wait=false)
    #[serde(default)]
    pub interrupt_jobs_on_shutdown: bool,

    /// Request interruption of running jobs on shutdown(wait=true)
    #[serde(default)]
    pub interrupt_jobs_on_shutdown_with_wait: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            instance_id: default_instance_id(),
            thread_name: default_thread_name(),
            thread_pool: ThreadPoolConfig::default(),
            job_store: JobStoreConfig::default(),
            idle_wait_time: default_idle_wait_time(),
            batch_max_count: default_batch_max_count(),
            batch_time_window: Duration::ZERO,
            misfire_threshold: default_misfire_threshold(),
            make_scheduler_thread_daemon: false,
            interrupt_jobs_on_shutdown: false,
            interrupt_jobs_on_shutdown_with_wait: false,
        }
    }
}

impl SchedulerConfig {
    /// Validate and clamp values that have hard floors.
    pub fn validated(mut self) -> Result<Self> {
        if self.thread_pool.size < 1 {
            return Err(SchedulerError::configuration(
                "metronome.threadpool.size",
                "must be at least 1",
            ));
        }
        if self.batch_max_count < 1 {
            return Err(SchedulerError::configuration(
                "metronome.scheduler.batch_max_count",
                "must be at least 1",
            ));
        }
        if self.idle_wait_time < MIN_IDLE_WAIT {
            self.idle_wait_time = MIN_IDLE_WAIT;
        }
        Ok(self)
    }

    /// Build a configuration from an expanded property set.
    pub fn from_properties(props: &PropertySet) -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = props.get("metronome.scheduler.instance_name") {
            config.instance_name = v.to_string();
        }
        if let Some(v) = props.get("metronome.scheduler.instance_id") {
            config.instance_id = v.to_string();
        }
        if let Some(v) = props.get("metronome.scheduler.thread_name") {
            config.thread_name = v.to_string();
        }
        if let Some(v) = props.get_parsed::<u64>("metronome.scheduler.idle_wait_time")? {
            config.idle_wait_time = Duration::from_millis(v);
        }
        if let Some(v) = props.get_parsed::<usize>("metronome.scheduler.batch_max_count")? {
            config.batch_max_count = v;
        }
        if let Some(v) = props.get_parsed::<u64>("metronome.scheduler.batch_time_window")? {
            config.batch_time_window = Duration::from_millis(v);
        }
        if let Some(v) = props.get_parsed::<u64>("metronome.scheduler.misfire_threshold")? {
            config.misfire_threshold = Duration::from_millis(v);
        }
        if let Some(v) = props.get_parsed::<bool>("metronome.scheduler.make_daemon")? {
            config.make_scheduler_thread_daemon = v;
        }
        if let Some(v) = props.get_parsed::<bool>("metronome.scheduler.interrupt_jobs_on_shutdown")?
        {
            config.interrupt_jobs_on_shutdown = v;
        }
        if let Some(v) =
            props.get_parsed::<bool>("metronome.scheduler.interrupt_jobs_on_shutdown_with_wait")?
        {
            config.interrupt_jobs_on_shutdown_with_wait = v;
        }
        if let Some(v) = props.get("metronome.threadpool.kind") {
            config.thread_pool.kind = v.parse()?;
        }
        if let Some(v) = props.get_parsed::<usize>("metronome.threadpool.size")? {
            config.thread_pool.size = v;
        }
        if let Some(v) = props.get("metronome.jobstore.kind") {
            config.job_store.kind = v.parse()?;
        }

        config.validated()
    }

    /// Load a configuration from a properties file.
    pub fn from_properties_file(path: impl AsRef<Path>) -> Result<Self> {
        let props = PropertySet::load_file(path)?;
        Self::from_properties(&props)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadPoolConfig {
    /// Pool implementation to construct
    #[serde(default)]
    pub kind: ThreadPoolKind,

    /// Number of worker threads
    #[serde(default = "default_thread_pool_size")]
    pub size: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            kind: ThreadPoolKind::default(),
            size: default_thread_pool_size(),
        }
    }
}

/// Recognized thread pool implementations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPoolKind {
    /// Fixed-size pool of pre-created OS threads
    #[default]
    Simple,
}

impl std::str::FromStr for ThreadPoolKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "simple" => Ok(Self::Simple),
            other => Err(SchedulerError::configuration(
                "metronome.threadpool.kind",
                format!("unknown thread pool '{}'", other),
            )),
        }
    }
}

/// Job store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobStoreConfig {
    /// Store implementation to construct
    #[serde(default)]
    pub kind: JobStoreKind,
}

/// Recognized job store implementations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStoreKind {
    /// Non-persistent in-memory store
    #[default]
    Ram,
}

impl std::str::FromStr for JobStoreKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ram" => Ok(Self::Ram),
            other => Err(SchedulerError::configuration(
                "metronome.jobstore.kind",
                format!("unknown job store '{}'", other),
            )),
        }
    }
}

// Default value functions
fn default_instance_name() -> String {
    "MetronomeScheduler".to_string()
}

fn default_instance_id() -> String {
    "NON_CLUSTERED".to_string()
}

fn default_thread_name() -> String {
    "metronome-scheduler".to_string()
}

fn default_thread_pool_size() -> usize {
    10
}

fn default_idle_wait_time() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_max_count() -> usize {
    1
}

fn default_misfire_threshold() -> Duration {
    Duration::from_secs(60)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Property Set
// ═══════════════════════════════════════════════════════════════════════════════

/// A flat `key = value` property map with `$@<other.key>` cross-references.
///
/// References are resolved by a two-pass expansion: the raw map is read
/// first, then every `$@` reference is replaced with the referenced raw
/// value. Nested references resolve up to a small depth; cycles and unknown
/// keys are configuration errors.
#[derive(Debug, Clone, Default)]
pub struct PropertySet {
    entries: BTreeMap<String, String>,
}

const MAX_REF_DEPTH: usize = 8;

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key = value` lines. Blank lines and lines starting with `#` or
    /// `!` are ignored. Reference expansion runs after all lines are read.
    pub fn load_str(input: &str) -> Result<Self> {
        let mut raw = BTreeMap::new();
        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                SchedulerError::configuration(line, "expected 'key = value'")
            })?;
            raw.insert(key.trim().to_string(), value.trim().to_string());
        }

        let mut expanded = BTreeMap::new();
        for (key, value) in &raw {
            expanded.insert(key.clone(), expand_refs(&raw, key, value, 0)?);
        }
        Ok(Self { entries: expanded })
    }

    /// Read and parse a properties file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::with_internal(
                ErrorCode::InvalidConfiguration,
                format!("cannot read properties file '{}'", path.display()),
                e.to_string(),
            )
        })?;
        Self::load_str(&text)
    }

    /// Insert a property (no reference expansion).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Get a property parsed into `T`, or `None` when absent.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.entries.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                SchedulerError::configuration(key, format!("unparseable value '{}': {}", raw, e))
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replace every `$@<key>` occurrence in `value` with the referenced raw
/// value. A reference key is the longest run of `[A-Za-z0-9_.]` after `$@`.
fn expand_refs(
    raw: &BTreeMap<String, String>,
    owner: &str,
    value: &str,
    depth: usize,
) -> Result<String> {
    if depth > MAX_REF_DEPTH {
        return Err(SchedulerError::configuration(
            owner,
            "property reference chain too deep (cycle?)",
        ));
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(idx) = rest.find("$@") {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 2..];
        let key_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after.len());
        if key_len == 0 {
            return Err(SchedulerError::configuration(owner, "empty '$@' reference"));
        }
        let key = &after[..key_len];
        let referenced = raw.get(key).ok_or_else(|| {
            SchedulerError::configuration(owner, format!("unknown property reference '$@{}'", key))
        })?;
        out.push_str(&expand_refs(raw, owner, referenced, depth + 1)?);
        rest = &after[key_len..];
    }
    out.push_str(rest);
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
