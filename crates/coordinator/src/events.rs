//! Events published by the registry and the orchestrator.

use chrono::{DateTime, Utc};
use conclave_common::Request;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    AgentRegistered {
        agent: String,
        capabilities: Vec<String>,
    },
    AgentUnregistered {
        agent: String,
    },
    InvocationStarted {
        agent: String,
        task: String,
    },
    InvocationCompleted {
        agent: String,
        task: String,
        success: bool,
        execution_time_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Created {
        workflow_id: Uuid,
        pattern: String,
    },
    Started {
        workflow_id: Uuid,
        pattern: String,
    },
    StepStarted {
        workflow_id: Uuid,
        step: usize,
        agent: String,
        task: String,
    },
    StepCompleted {
        workflow_id: Uuid,
        step: usize,
        agent: String,
        task: String,
        success: bool,
    },
    Completed {
        workflow_id: Uuid,
        duration_ms: u64,
    },
    Failed {
        workflow_id: Uuid,
        error: String,
    },
    Cancelled {
        workflow_id: Uuid,
    },
    Swept {
        workflow_id: Uuid,
    },
    MessageSent {
        from: String,
        to: String,
        #[serde(skip)]
        request: Request,
    },
    MessageReceived {
        from: String,
        to: String,
        result: Option<Value>,
    },
    MessageFailed {
        from: String,
        to: String,
        error: String,
    },
    BroadcastDelivered {
        from: String,
        delivered: usize,
        failed: usize,
        at: DateTime<Utc>,
    },
}
