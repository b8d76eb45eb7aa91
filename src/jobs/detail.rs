//! Job identity and metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Group assigned to jobs and triggers created without an explicit one.
pub const DEFAULT_GROUP: &str = "DEFAULT";

// ═══════════════════════════════════════════════════════════════════════════════
// Job Key
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identity of a job: `(name, group)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    /// Create a key in the given group.
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Create a key in the default group.
    pub fn with_default_group(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_GROUP)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

impl Ord for JobKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.group
            .cmp(&other.group)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for JobKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Data Map
// ═══════════════════════════════════════════════════════════════════════════════

/// A scalar value held in a [`JobDataMap`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for DataValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
        }
    }
}

/// String-keyed map of scalar values carried by jobs and triggers.
///
/// For a firing, the trigger's map overlays the job's map (see
/// [`JobDataMap::merged`]). Maps handed to an execution are snapshots; user
/// mutation only becomes visible to later fires when the job sets
/// `persist_job_data_after_execution` and the store copies the map back on
/// completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDataMap {
    entries: BTreeMap<String, DataValue>,
}

impl JobDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, returning the previous one if present.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Option<DataValue> {
        self.entries.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.put(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(DataValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key) {
            Some(DataValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.entries.get(key) {
            Some(DataValue::Float(v)) => Some(*v),
            Some(DataValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key) {
            Some(DataValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<DataValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The merged map for a firing: `overlay` (the trigger's map) wins over
    /// `self` (the job's map) on key collisions.
    pub fn merged(&self, overlay: &JobDataMap) -> JobDataMap {
        let mut entries = self.entries.clone();
        for (k, v) in &overlay.entries {
            entries.insert(k.clone(), v.clone());
        }
        JobDataMap { entries }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Detail
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity and metadata for a stored job.
///
/// `job_type` names the implementation to instantiate through the
/// [`JobFactory`](crate::jobs::JobFactory) registry. `durable` keeps the job
/// in the store when its last trigger departs; `requests_recovery` marks it
/// for re-fire after a hard stop (meaningful only to persistent stores).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetail {
    /// Unique identity
    pub key: JobKey,
    /// Registered job implementation name
    pub job_type: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Data handed to every execution
    pub job_data: JobDataMap,
    /// Retain the job when no trigger references it
    pub durable: bool,
    /// Re-fire after a hard stop
    pub requests_recovery: bool,
    /// At most one execution in flight across all triggers of this job
    pub concurrent_execution_disallowed: bool,
    /// Copy the executed context's job data back into the store on completion
    pub persist_job_data_after_execution: bool,
}

impl JobDetail {
    /// Create a job bound to a registered job type.
    pub fn new(key: JobKey, job_type: impl Into<String>) -> Self {
        Self {
            key,
            job_type: job_type.into(),
            description: None,
            job_data: JobDataMap::new(),
            durable: false,
            requests_recovery: false,
            concurrent_execution_disallowed: false,
            persist_job_data_after_execution: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_job_data(mut self, job_data: JobDataMap) -> Self {
        self.job_data = job_data;
        self
    }

    pub fn store_durably(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn with_recovery(mut self) -> Self {
        self.requests_recovery = true;
        self
    }

    pub fn disallow_concurrent_execution(mut self) -> Self {
        self.concurrent_execution_disallowed = true;
        self
    }

    pub fn persist_job_data(mut self) -> Self {
        self.persist_job_data_after_execution = true;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_is_group_then_name() {
        let mut keys = vec![
            JobKey::new("b", "g2"),
            JobKey::new("a", "g2"),
            JobKey::new("z", "g1"),
        ];
        keys.sort();
        assert_eq!(keys[0], JobKey::new("z", "g1"));
        assert_eq!(keys[1], JobKey::new("a", "g2"));
        assert_eq!(keys[2], JobKey::new("b", "g2"));
    }

    #[test]
    fn test_default_group() {
        let key = JobKey::with_default_group("cleanup");
        assert_eq!(key.group, DEFAULT_GROUP);
        assert_eq!(key.to_string(), "DEFAULT.cleanup");
    }

    #[test]
    fn test_data_map_typed_accessors() {
        let map = JobDataMap::new()
            .with("retries", 3)
            .with("ratio", 0.5)
            .with("verbose", true)
            .with("target", "backlog");
        assert_eq!(map.get_int("retries"), Some(3));
        assert_eq!(map.get_float("ratio"), Some(0.5));
        assert_eq!(map.get_float("retries"), Some(3.0));
        assert_eq!(map.get_bool("verbose"), Some(true));
        assert_eq!(map.get_string("target"), Some("backlog"));
        assert_eq!(map.get_string("retries"), None);
    }

    #[test]
    fn test_merged_overlay_wins() {
        let job_map = JobDataMap::new().with("a", 1).with("b", 2);
        let trigger_map = JobDataMap::new().with("b", 20).with("c", 30);
        let merged = job_map.merged(&trigger_map);
        assert_eq!(merged.get_int("a"), Some(1));
        assert_eq!(merged.get_int("b"), Some(20));
        assert_eq!(merged.get_int("c"), Some(30));
    }

    #[test]
    fn test_data_map_serde() {
        let map = JobDataMap::new().with("n", 7).with("s", "x");
        let json = serde_json::to_string(&map).unwrap();
        let back: JobDataMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn test_job_detail_builder() {
        let detail = JobDetail::new(JobKey::with_default_group("reindex"), "reindex_job")
            .with_description("rebuild the search index")
            .store_durably()
            .disallow_concurrent_execution();
        assert!(detail.durable);
        assert!(detail.concurrent_execution_disallowed);
        assert!(!detail.persist_job_data_after_execution);
        assert_eq!(detail.job_type, "reindex_job");
    }
}
