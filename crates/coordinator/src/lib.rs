//! Agent registry and workflow orchestrator for Conclave.
//!
//! The coordinator is the central hub that:
//! 1. Owns the directory of registered agents and their lifecycles
//! 2. Drives every task execution through [`AgentRegistry::invoke`]
//! 3. Routes inter-agent JSON-RPC traffic over an in-process [`MessageBus`]
//! 4. Runs collaboration patterns and ad-hoc multi-agent compositions
//!
//! # Architecture
//!
//! ```text
//!  Caller
//!    │  create_workflow / execute_parallel / broadcast_message
//!    ▼
//! ┌──────────────────┐
//! │   Orchestrator   │  patterns, workflow records, retention sweep
//! └────────┬─────────┘
//!          │ invoke
//!          ▼
//! ┌──────────────────┐   request / notify   ┌──────────────┐
//! │  AgentRegistry   │◀────────────────────▶│  MessageBus  │
//! └────────┬─────────┘                      └──────────────┘
//!    ┌─────┴─────┬──────────┐
//!    ▼           ▼          ▼
//! [alpha]     [beta]     [gamma]
//!  Agent       Agent      Agent
//! ```

pub mod bus;
pub mod config;
pub mod events;
pub mod orchestrator;
pub mod pattern;
pub mod registry;
pub mod telemetry;
pub mod workflow;

pub use bus::MessageBus;
pub use config::CoordinatorConfig;
pub use events::{RegistryEvent, WorkflowEvent};
pub use orchestrator::{
    AgentRequest, BroadcastDelivery, Orchestrator, ParallelOutcome, ParallelTask, PipelineResult,
    PipelineStep, RetentionSweeper, Transform,
};
pub use pattern::{CollaborationPattern, WorkflowStep};
pub use registry::{AgentMetrics, AgentRegistry, AgentSummary, RegistryStatus};
pub use workflow::{Workflow, WorkflowResults, WorkflowStatus};
