//! Lifecycle and activity events published by an agent.

use crate::status::AgentStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    StatusChanged {
        agent: String,
        from: AgentStatus,
        to: AgentStatus,
    },
    StateLoaded {
        agent: String,
    },
    StatePersisted {
        agent: String,
    },
    TaskCompleted {
        agent: String,
        task: String,
        execution_time_ms: u64,
    },
    TaskFailed {
        agent: String,
        task: String,
        error: String,
    },
    MessageReceived {
        agent: String,
        from: String,
    },
}
