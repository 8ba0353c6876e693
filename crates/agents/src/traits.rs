//! The task contract concrete agents implement.
//!
//! Task logic lives outside this crate. An implementation only has to say
//! what it can do and how to do it; lifecycle, state persistence and status
//! tracking are handled by [`Agent`](crate::Agent).

use async_trait::async_trait;
use conclave_common::{Result, TaskError};
use serde_json::{json, Value};

#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Capabilities advertised for discovery, in declaration order.
    fn capabilities(&self) -> &[String];

    /// Whether this handler accepts the given task.
    ///
    /// Defaults to checking the task name against the capability list.
    fn can_handle(&self, task: &str) -> bool {
        self.capabilities().iter().any(|c| c == task)
    }

    /// Runs once the persisted state has been loaded.
    async fn on_initialize(&self, _state: &mut Value) -> Result<()> {
        Ok(())
    }

    /// Execute one task. Ordinary failures are reported as [`TaskError`].
    async fn on_execute(
        &self,
        task: &str,
        context: &Value,
        state: &mut Value,
    ) -> std::result::Result<Value, TaskError>;

    /// Runs after the final state has been persisted. Any changes made to
    /// `state` here are persisted again before the agent stops.
    async fn on_cleanup(&self, _state: &mut Value) -> Result<()> {
        Ok(())
    }

    /// Handle a direct message from another agent.
    async fn on_message(&self, _from: &str, _payload: &Value) -> std::result::Result<Value, TaskError> {
        Ok(json!({ "received": true }))
    }
}
