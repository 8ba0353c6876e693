//! Task result envelope shared by agents, the registry and the orchestrator.

use crate::error::ConclaveError;
use crate::protocol::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A structured task failure.
///
/// Task logic reports ordinary failures with this type instead of panicking
/// or returning a crate-level error; the agent folds it into a
/// [`TaskOutcome`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::TaskFailed, message)
    }

    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for TaskError {}

impl From<&ConclaveError> for TaskError {
    fn from(err: &ConclaveError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: None,
        }
    }
}

/// Timing collected around one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    /// Wall-clock execution time in milliseconds.
    pub execution_time: u64,
    /// Registry key of the agent that ran the task. Filled in by the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionMetrics {
    pub fn new(elapsed: Duration) -> Self {
        Self {
            execution_time: elapsed.as_millis() as u64,
            agent_id: None,
            completed_at: Utc::now(),
        }
    }
}

/// Result envelope returned by every task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub metrics: ExecutionMetrics,
}

impl TaskOutcome {
    pub fn success(result: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            metrics: ExecutionMetrics::new(elapsed),
        }
    }

    pub fn failure(error: TaskError, elapsed: Duration) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            metrics: ExecutionMetrics::new(elapsed),
        }
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.metrics.agent_id = Some(agent_id.into());
        self
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    /// Convert into a plain result, turning a failed outcome into
    /// [`ConclaveError::TaskFailed`].
    pub fn into_result(self, agent: &str, task: &str) -> Result<Value, ConclaveError> {
        if self.success {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(ConclaveError::TaskFailed {
                agent: agent.to_string(),
                task: task.to_string(),
                message: self
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_shape() {
        let outcome = TaskOutcome::success(json!({"v": 5}), Duration::from_millis(12))
            .with_agent_id("alpha");

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["result"]["v"], json!(5));
        assert_eq!(value["metrics"]["executionTime"], json!(12));
        assert_eq!(value["metrics"]["agentId"], json!("alpha"));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_failure_into_result() {
        let outcome = TaskOutcome::failure(TaskError::new("disk full"), Duration::ZERO);
        assert_eq!(outcome.error_message(), Some("disk full"));

        let err = outcome.into_result("beta", "t2").unwrap_err();
        match err {
            ConclaveError::TaskFailed { agent, task, message } => {
                assert_eq!(agent, "beta");
                assert_eq!(task, "t2");
                assert_eq!(message, "disk full");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_task_error_default_code() {
        let err = TaskError::new("nope");
        assert_eq!(err.code, ErrorCode::TaskFailed.code());

        let err = TaskError::with_code(ErrorCode::InvalidParams, "bad input")
            .with_data(json!({"field": "path"}));
        assert_eq!(err.code, -32602);
        assert!(err.data.is_some());
    }
}
