//! Workflow records: one execution of a collaboration pattern.

use chrono::{DateTime, Utc};
use conclave_common::TaskOutcome;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Step outcomes keyed by `agent:task`, in the order steps first ran.
///
/// A repeated key overwrites the earlier outcome in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowResults {
    entries: Vec<(String, TaskOutcome)>,
}

impl WorkflowResults {
    pub fn insert(&mut self, key: String, outcome: TaskOutcome) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = outcome,
            None => self.entries.push((key, outcome)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&TaskOutcome> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, outcome)| outcome)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskOutcome)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for WorkflowResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, outcome) in &self.entries {
            map.serialize_entry(key, outcome)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    pub id: Uuid,
    pub pattern_name: String,
    pub status: WorkflowStatus,
    pub context: Value,
    pub results: WorkflowResults,
    /// Step outputs published under each step's `output_key`.
    pub outputs: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl Workflow {
    pub(crate) fn new(pattern_name: impl Into<String>, context: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            pattern_name: pattern_name.into(),
            status: WorkflowStatus::Pending,
            context,
            results: WorkflowResults::default(),
            outputs: HashMap::new(),
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Move to a terminal status and stamp the end time.
    pub(crate) fn finish(&mut self, status: WorkflowStatus, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.end_time = Some(now);
        self.duration_ms = self
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0) as u64);
    }
}

/// Merge `value` into `context` under `key`.
///
/// A null context becomes an object; any other non-object context is kept
/// under `"context"` next to the new key.
pub(crate) fn merge_into(context: &mut Value, key: &str, value: Value) {
    if context.is_null() {
        *context = Value::Object(Map::new());
    }
    if !context.is_object() {
        let previous = context.take();
        let mut map = Map::new();
        map.insert("context".into(), previous);
        *context = Value::Object(map);
    }
    if let Value::Object(map) = context {
        map.insert(key.to_string(), value);
    }
}
