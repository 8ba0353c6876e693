//! Workflow orchestration across registered agents.
//!
//! Patterns are fixed, ordered step lists executed as workflows:
//! - Steps run strictly in order, never overlapping
//! - A step may publish its result under an output key for later steps
//! - The first failing step fails the whole workflow
//!
//! Alongside patterns the orchestrator offers ad-hoc primitives: point to
//! point requests, broadcast, parallel fan-out/join and pipelines with
//! custom context transforms.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Orchestrator::new();
//! orchestrator.register_pattern(
//!     CollaborationPattern::new("handoff")
//!         .add_step(WorkflowStep::new("alpha", "t1").with_output("o1"))
//!         .add_step(WorkflowStep::new("beta", "t2").with_input("o1")),
//! );
//!
//! let id = orchestrator.create_workflow("handoff", json!({}))?;
//! let workflow = orchestrator.execute_workflow(id, &registry).await?;
//! ```

use crate::config::CoordinatorConfig;
use crate::events::WorkflowEvent;
use crate::pattern::{result_key, CollaborationPattern};
use crate::registry::AgentRegistry;
use crate::workflow::{merge_into, Workflow, WorkflowStatus};
use chrono::{DateTime, Utc};
use conclave_common::{ConclaveError, Request, Result, TaskError, TaskOutcome};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A point-to-point task request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRequest {
    pub task: String,
    pub context: Value,
}

impl AgentRequest {
    pub fn new(task: impl Into<String>, context: Value) -> Self {
        Self {
            task: task.into(),
            context,
        }
    }
}

/// Per-target result of a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastDelivery {
    pub agent: String,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One independent unit of a parallel fan-out.
#[derive(Debug, Clone, PartialEq)]
pub struct ParallelTask {
    pub agent: String,
    pub task: String,
    pub context: Value,
}

impl ParallelTask {
    pub fn new(agent: impl Into<String>, task: impl Into<String>, context: Value) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
            context,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParallelOutcome {
    pub agent: String,
    pub task: String,
    pub outcome: TaskOutcome,
}

impl ParallelOutcome {
    pub fn success(&self) -> bool {
        self.outcome.success
    }
}

/// Computes the next pipeline context from the current one and a step's
/// outcome.
pub type Transform = Arc<dyn Fn(&Value, &TaskOutcome) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct PipelineStep {
    pub agent: String,
    pub task: String,
    transform: Option<Transform>,
}

impl PipelineStep {
    pub fn new(agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
            transform: None,
        }
    }

    pub fn with_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&Value, &TaskOutcome) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    fn next_context(&self, context: &Value, outcome: &TaskOutcome) -> Value {
        match &self.transform {
            Some(transform) => transform(context, outcome),
            None => {
                let mut next = context.clone();
                merge_into(
                    &mut next,
                    &result_key(&self.agent, &self.task),
                    outcome.result.clone().unwrap_or(Value::Null),
                );
                next
            }
        }
    }
}

impl std::fmt::Debug for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineStep")
            .field("agent", &self.agent)
            .field("task", &self.task)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    /// Context after the last step's transform.
    pub context: Value,
    pub steps: Vec<ParallelOutcome>,
    pub duration_ms: u64,
}

struct WorkflowEntry {
    workflow: Workflow,
    cancel: CancellationToken,
}

/// Aborts the background retention sweep when dropped.
pub struct RetentionSweeper {
    handle: JoinHandle<()>,
}

impl RetentionSweeper {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct Orchestrator {
    patterns: RwLock<HashMap<String, CollaborationPattern>>,
    workflows: RwLock<HashMap<Uuid, WorkflowEntry>>,
    retention: Duration,
    sweep_interval: Duration,
    next_request_id: AtomicU64,
    events: broadcast::Sender<WorkflowEvent>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }

    /// Build an orchestrator with the configured timings and patterns.
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let orchestrator = Self {
            patterns: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            retention: config.workflow_retention(),
            sweep_interval: config.sweep_interval(),
            next_request_id: AtomicU64::new(1),
            events,
        };
        for pattern in &config.patterns {
            orchestrator.register_pattern(pattern.clone());
        }
        orchestrator
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: WorkflowEvent) {
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------

    /// Register a pattern, replacing any pattern with the same name.
    pub fn register_pattern(&self, pattern: CollaborationPattern) -> Option<CollaborationPattern> {
        info!(pattern = %pattern.name, steps = pattern.steps.len(), "Registered pattern");
        self.patterns.write().insert(pattern.name.clone(), pattern)
    }

    pub fn pattern(&self, name: &str) -> Option<CollaborationPattern> {
        self.patterns.read().get(name).cloned()
    }

    /// All patterns, sorted by name.
    pub fn patterns(&self) -> Vec<CollaborationPattern> {
        let mut patterns: Vec<_> = self.patterns.read().values().cloned().collect();
        patterns.sort_by(|a, b| a.name.cmp(&b.name));
        patterns
    }

    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    /// Store a `Pending` workflow for a registered pattern.
    pub fn create_workflow(&self, pattern_name: &str, context: Value) -> Result<Uuid> {
        if !self.patterns.read().contains_key(pattern_name) {
            return Err(ConclaveError::PatternNotFound(pattern_name.to_string()));
        }

        let workflow = Workflow::new(pattern_name, context);
        let id = workflow.id;
        self.workflows.write().insert(
            id,
            WorkflowEntry {
                workflow,
                cancel: CancellationToken::new(),
            },
        );

        debug!(workflow_id = %id, pattern = %pattern_name, "Created workflow");
        self.emit(WorkflowEvent::Created {
            workflow_id: id,
            pattern: pattern_name.to_string(),
        });
        Ok(id)
    }

    /// Create and immediately execute a workflow.
    pub async fn run_pattern(
        &self,
        pattern_name: &str,
        context: Value,
        registry: &AgentRegistry,
    ) -> Result<Workflow> {
        let id = self.create_workflow(pattern_name, context)?;
        self.execute_workflow(id, registry).await
    }

    /// Execute a `Pending` workflow's steps in order.
    ///
    /// Returns the completed workflow. On failure the workflow is recorded as
    /// `Failed` and the step's error is returned. Cancellation is observed
    /// between steps; the step in flight runs to completion.
    pub async fn execute_workflow(&self, id: Uuid, registry: &AgentRegistry) -> Result<Workflow> {
        let start_time = Instant::now();

        let (pattern_name, context, cancel) = {
            let mut workflows = self.workflows.write();
            let entry = workflows
                .get_mut(&id)
                .ok_or_else(|| ConclaveError::WorkflowNotFound(id.to_string()))?;
            if entry.workflow.status != WorkflowStatus::Pending {
                return Err(ConclaveError::InvalidWorkflowState {
                    id: id.to_string(),
                    status: entry.workflow.status.to_string(),
                });
            }
            entry.workflow.status = WorkflowStatus::Running;
            entry.workflow.start_time = Some(Utc::now());
            (
                entry.workflow.pattern_name.clone(),
                entry.workflow.context.clone(),
                entry.cancel.clone(),
            )
        };

        let pattern = match self.pattern(&pattern_name) {
            Some(pattern) => pattern,
            None => {
                return self.fail_workflow(id, ConclaveError::PatternNotFound(pattern_name));
            }
        };

        info!(
            workflow_id = %id,
            pattern = %pattern.name,
            step_count = pattern.steps.len(),
            "Starting workflow"
        );
        self.emit(WorkflowEvent::Started {
            workflow_id: id,
            pattern: pattern.name.clone(),
        });

        for (i, step) in pattern.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(workflow_id = %id, step = i + 1, "Workflow cancelled before step");
                return Err(ConclaveError::WorkflowCancelled(id.to_string()));
            }

            let mut step_context = context.clone();
            if let Some(input_key) = &step.input_key {
                match self.output(id, input_key) {
                    Some(value) => merge_into(&mut step_context, input_key, value),
                    None => debug!(
                        workflow_id = %id,
                        input_key = %input_key,
                        "No output published under input key"
                    ),
                }
            }

            info!(
                workflow_id = %id,
                step = i + 1,
                agent = %step.agent,
                task = %step.task,
                "Executing workflow step"
            );
            self.emit(WorkflowEvent::StepStarted {
                workflow_id: id,
                step: i,
                agent: step.agent.clone(),
                task: step.task.clone(),
            });

            if !registry.has(&step.agent) {
                return self.fail_workflow(id, ConclaveError::AgentNotFound(step.agent.clone()));
            }

            let outcome = match registry.invoke(&step.agent, &step.task, step_context).await {
                Ok(outcome) => outcome,
                Err(e) => return self.fail_workflow(id, e),
            };

            let success = outcome.success;
            let failure = outcome.error_message().map(str::to_string);
            let published = outcome.result.clone();
            self.with_workflow(id, |wf| {
                wf.results.insert(step.result_key(), outcome);
                if success {
                    if let Some(output_key) = &step.output_key {
                        wf.outputs
                            .insert(output_key.clone(), published.unwrap_or(Value::Null));
                    }
                }
            });
            self.emit(WorkflowEvent::StepCompleted {
                workflow_id: id,
                step: i,
                agent: step.agent.clone(),
                task: step.task.clone(),
                success,
            });

            if !success {
                return self.fail_workflow(
                    id,
                    ConclaveError::TaskFailed {
                        agent: step.agent.clone(),
                        task: step.task.clone(),
                        message: failure.unwrap_or_else(|| "unknown error".into()),
                    },
                );
            }
        }

        if cancel.is_cancelled() {
            return Err(ConclaveError::WorkflowCancelled(id.to_string()));
        }

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let workflow = self
            .with_workflow(id, |wf| {
                wf.finish(WorkflowStatus::Completed, None);
                wf.duration_ms = Some(duration_ms);
                wf.clone()
            })
            .ok_or_else(|| ConclaveError::WorkflowNotFound(id.to_string()))?;

        info!(workflow_id = %id, duration_ms = duration_ms, "Workflow completed");
        self.emit(WorkflowEvent::Completed {
            workflow_id: id,
            duration_ms,
        });
        Ok(workflow)
    }

    fn with_workflow<T>(&self, id: Uuid, f: impl FnOnce(&mut Workflow) -> T) -> Option<T> {
        self.workflows
            .write()
            .get_mut(&id)
            .map(|entry| f(&mut entry.workflow))
    }

    fn output(&self, id: Uuid, key: &str) -> Option<Value> {
        self.workflows
            .read()
            .get(&id)
            .and_then(|entry| entry.workflow.outputs.get(key).cloned())
    }

    /// Record a step failure and hand the error back to the caller.
    ///
    /// A workflow cancelled while the failing step ran keeps its
    /// `Cancelled` status.
    fn fail_workflow<T>(&self, id: Uuid, err: ConclaveError) -> Result<T> {
        let message = err.to_string();
        let failed = self
            .with_workflow(id, |wf| {
                if wf.status == WorkflowStatus::Running {
                    wf.finish(WorkflowStatus::Failed, Some(message.clone()));
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if failed {
            error!(workflow_id = %id, error = %message, "Workflow failed");
            self.emit(WorkflowEvent::Failed {
                workflow_id: id,
                error: message,
            });
        }
        Err(err)
    }

    /// Cancel a running workflow. The loop stops before its next step.
    pub fn cancel_workflow(&self, id: Uuid) -> Result<()> {
        {
            let mut workflows = self.workflows.write();
            let entry = workflows
                .get_mut(&id)
                .ok_or_else(|| ConclaveError::WorkflowNotFound(id.to_string()))?;
            if entry.workflow.status != WorkflowStatus::Running {
                return Err(ConclaveError::InvalidWorkflowState {
                    id: id.to_string(),
                    status: entry.workflow.status.to_string(),
                });
            }
            entry.workflow.finish(WorkflowStatus::Cancelled, None);
            entry.cancel.cancel();
        }

        info!(workflow_id = %id, "Workflow cancelled");
        self.emit(WorkflowEvent::Cancelled { workflow_id: id });
        Ok(())
    }

    pub fn get_workflow(&self, id: Uuid) -> Option<Workflow> {
        self.workflows.read().get(&id).map(|e| e.workflow.clone())
    }

    /// All workflows, oldest first.
    pub fn list_workflows(&self) -> Vec<Workflow> {
        let mut workflows: Vec<_> = self
            .workflows
            .read()
            .values()
            .map(|e| e.workflow.clone())
            .collect();
        workflows.sort_by_key(|wf| wf.created_at);
        workflows
    }

    /// Remove terminal workflows that ended more than the retention window
    /// before `now`. Returns how many were removed.
    pub fn sweep_workflows(&self, now: DateTime<Utc>) -> usize {
        let retention = self.retention;
        let expired: Vec<Uuid> = {
            let mut workflows = self.workflows.write();
            let expired: Vec<Uuid> = workflows
                .values()
                .filter(|e| e.workflow.status.is_terminal())
                .filter(|e| {
                    e.workflow
                        .end_time
                        .and_then(|end| now.signed_duration_since(end).to_std().ok())
                        .map(|age| age > retention)
                        .unwrap_or(false)
                })
                .map(|e| e.workflow.id)
                .collect();
            for id in &expired {
                workflows.remove(id);
            }
            expired
        };

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Swept expired workflows");
        }
        for id in &expired {
            self.emit(WorkflowEvent::Swept { workflow_id: *id });
        }
        expired.len()
    }

    /// Run [`sweep_workflows`](Self::sweep_workflows) on the configured
    /// interval until the returned handle or the orchestrator is dropped.
    pub fn spawn_retention_sweeper(self: &Arc<Self>) -> RetentionSweeper {
        let orchestrator: Weak<Self> = Arc::downgrade(self);
        let period = self.sweep_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                match orchestrator.upgrade() {
                    Some(orchestrator) => {
                        orchestrator.sweep_workflows(Utc::now());
                    }
                    None => break,
                }
            }
        });

        RetentionSweeper { handle }
    }

    // ------------------------------------------------------------------
    // Ad-hoc primitives
    // ------------------------------------------------------------------

    /// Invoke one task on `to` on behalf of `from`.
    ///
    /// A failed outcome is returned as `TaskFailed` carrying the remote
    /// error message.
    pub async fn send_request(
        &self,
        from: &str,
        to: &str,
        request: AgentRequest,
        registry: &AgentRegistry,
    ) -> Result<TaskOutcome> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let message = Request::new(id, request.task.clone(), Some(request.context.clone()));

        debug!(from = %from, to = %to, task = %request.task, id = id, "Sending request");
        self.emit(WorkflowEvent::MessageSent {
            from: from.to_string(),
            to: to.to_string(),
            request: message,
        });

        match registry.invoke(to, &request.task, request.context).await {
            Ok(outcome) if outcome.success => {
                self.emit(WorkflowEvent::MessageReceived {
                    from: from.to_string(),
                    to: to.to_string(),
                    result: outcome.result.clone(),
                });
                Ok(outcome)
            }
            Ok(outcome) => {
                let message = outcome
                    .error_message()
                    .unwrap_or("unknown error")
                    .to_string();
                warn!(from = %from, to = %to, task = %request.task, error = %message, "Request failed");
                self.emit(WorkflowEvent::MessageFailed {
                    from: from.to_string(),
                    to: to.to_string(),
                    error: message.clone(),
                });
                Err(ConclaveError::TaskFailed {
                    agent: to.to_string(),
                    task: request.task,
                    message,
                })
            }
            Err(e) => {
                warn!(from = %from, to = %to, task = %request.task, error = %e, "Request failed");
                self.emit(WorkflowEvent::MessageFailed {
                    from: from.to_string(),
                    to: to.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Deliver `payload` to every listed agent concurrently.
    ///
    /// Each target is isolated; one failure never aborts the others.
    pub async fn broadcast_message(
        &self,
        from: &str,
        agents: &[String],
        payload: Value,
        registry: &AgentRegistry,
    ) -> Vec<BroadcastDelivery> {
        let deliveries = agents.iter().map(|key| {
            let payload = payload.clone();
            async move {
                let result = match registry.get(key) {
                    Some(agent) => agent.receive_message(from, payload).await,
                    None => Err(ConclaveError::AgentNotFound(key.clone())),
                };
                match result {
                    Ok(response) => BroadcastDelivery {
                        agent: key.clone(),
                        delivered: true,
                        response: Some(response),
                        error: None,
                    },
                    Err(e) => {
                        warn!(from = %from, agent = %key, error = %e, "Broadcast delivery failed");
                        BroadcastDelivery {
                            agent: key.clone(),
                            delivered: false,
                            response: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        });
        let results = join_all(deliveries).await;

        let delivered = results.iter().filter(|d| d.delivered).count();
        info!(
            from = %from,
            delivered = delivered,
            failed = results.len() - delivered,
            "Broadcast finished"
        );
        self.emit(WorkflowEvent::BroadcastDelivered {
            from: from.to_string(),
            delivered,
            failed: results.len() - delivered,
            at: Utc::now(),
        });
        results
    }

    /// Invoke independent tasks concurrently and join every outcome.
    ///
    /// Never fails: invocation errors are reported inline as unsuccessful
    /// outcomes, in input order.
    pub async fn execute_parallel(
        &self,
        tasks: Vec<ParallelTask>,
        registry: &AgentRegistry,
    ) -> Vec<ParallelOutcome> {
        info!(task_count = tasks.len(), "Starting parallel execution");

        let runs = tasks.into_iter().map(|t| async move {
            let outcome = match registry.invoke(&t.agent, &t.task, t.context).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(agent = %t.agent, task = %t.task, error = %e, "Parallel task failed");
                    TaskOutcome::failure(TaskError::from(&e), Duration::ZERO)
                        .with_agent_id(t.agent.clone())
                }
            };
            ParallelOutcome {
                agent: t.agent,
                task: t.task,
                outcome,
            }
        });
        let outcomes = join_all(runs).await;

        debug!(
            succeeded = outcomes.iter().filter(|o| o.success()).count(),
            total = outcomes.len(),
            "Parallel execution finished"
        );
        outcomes
    }

    /// Run steps in order, threading a context through each step's
    /// transform. Stops at the first failure.
    pub async fn execute_pipeline(
        &self,
        steps: Vec<PipelineStep>,
        initial_context: Value,
        registry: &AgentRegistry,
    ) -> Result<PipelineResult> {
        let start_time = Instant::now();
        let mut context = initial_context;
        let mut results = Vec::with_capacity(steps.len());

        info!(step_count = steps.len(), "Starting pipeline");

        for (i, step) in steps.iter().enumerate() {
            debug!(step = i + 1, agent = %step.agent, task = %step.task, "Executing pipeline step");

            let outcome = registry
                .invoke(&step.agent, &step.task, context.clone())
                .await
                .map_err(|e| {
                    error!(step = i + 1, agent = %step.agent, error = %e, "Pipeline step failed");
                    e
                })?;

            if !outcome.success {
                let message = outcome
                    .error_message()
                    .unwrap_or("unknown error")
                    .to_string();
                error!(step = i + 1, agent = %step.agent, error = %message, "Pipeline step failed");
                return Err(ConclaveError::TaskFailed {
                    agent: step.agent.clone(),
                    task: step.task.clone(),
                    message,
                });
            }

            context = step.next_context(&context, &outcome);
            results.push(ParallelOutcome {
                agent: step.agent.clone(),
                task: step.task.clone(),
                outcome,
            });
        }

        Ok(PipelineResult {
            context,
            steps: results,
            duration_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("patterns", &self.patterns.read().len())
            .field("workflows", &self.workflows.read().len())
            .field("retention", &self.retention)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::WorkflowStep;
    use serde_json::json;

    fn handoff() -> CollaborationPattern {
        CollaborationPattern::new("handoff")
            .add_step(WorkflowStep::new("alpha", "t1").with_output("o1"))
            .add_step(WorkflowStep::new("beta", "t2").with_input("o1"))
    }

    #[test]
    fn test_patterns_from_config() {
        let config = CoordinatorConfig {
            patterns: vec![handoff(), CollaborationPattern::new("a-first")],
            ..Default::default()
        };
        let orchestrator = Orchestrator::from_config(&config);

        let names: Vec<_> = orchestrator.patterns().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["a-first", "handoff"]);
        assert_eq!(orchestrator.pattern("handoff").unwrap().steps.len(), 2);
    }

    #[test]
    fn test_create_workflow_requires_pattern() {
        let orchestrator = Orchestrator::new();
        let err = orchestrator.create_workflow("missing", json!({})).unwrap_err();
        assert!(matches!(err, ConclaveError::PatternNotFound(ref p) if p == "missing"));
    }

    #[test]
    fn test_created_workflow_is_pending() {
        let orchestrator = Orchestrator::new();
        orchestrator.register_pattern(handoff());

        let id = orchestrator.create_workflow("handoff", json!({"x": 1})).unwrap();
        let workflow = orchestrator.get_workflow(id).unwrap();

        assert_eq!(workflow.status, WorkflowStatus::Pending);
        assert_eq!(workflow.context, json!({"x": 1}));
        assert!(workflow.results.is_empty());
        assert!(workflow.start_time.is_none());
    }

    #[test]
    fn test_cancel_requires_running() {
        let orchestrator = Orchestrator::new();
        orchestrator.register_pattern(handoff());
        let id = orchestrator.create_workflow("handoff", json!({})).unwrap();

        let err = orchestrator.cancel_workflow(id).unwrap_err();
        assert!(matches!(err, ConclaveError::InvalidWorkflowState { ref status, .. } if status == "pending"));
        assert!(matches!(
            orchestrator.cancel_workflow(Uuid::new_v4()),
            Err(ConclaveError::WorkflowNotFound(_))
        ));
    }

    #[test]
    fn test_sweep_respects_retention() {
        let orchestrator = Orchestrator::new();
        orchestrator.register_pattern(handoff());
        let done = orchestrator.create_workflow("handoff", json!({})).unwrap();
        let pending = orchestrator.create_workflow("handoff", json!({})).unwrap();
        orchestrator.with_workflow(done, |wf| wf.finish(WorkflowStatus::Completed, None));

        let now = Utc::now();
        assert_eq!(orchestrator.sweep_workflows(now), 0);
        assert_eq!(
            orchestrator.sweep_workflows(now + chrono::Duration::seconds(3601)),
            1
        );

        assert!(orchestrator.get_workflow(done).is_none());
        assert!(orchestrator.get_workflow(pending).is_some());
    }

    #[test]
    fn test_default_pipeline_merge() {
        let step = PipelineStep::new("alpha", "t1");
        let outcome = TaskOutcome::success(json!({"v": 1}), Duration::ZERO);
        let next = step.next_context(&json!({"seed": true}), &outcome);
        assert_eq!(next, json!({"seed": true, "alpha:t1": {"v": 1}}));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let orchestrator = Arc::new(Orchestrator::new());
        let sweeper = orchestrator.spawn_retention_sweeper();
        assert!(!sweeper.is_finished());
        drop(sweeper);
        drop(orchestrator);
    }
}
