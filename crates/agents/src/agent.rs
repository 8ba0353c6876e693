//! The agent: identity, status, persisted state and a task handler.

use crate::events::AgentEvent;
use crate::state::StateStore;
use crate::status::AgentStatus;
use crate::traits::TaskHandler;
use conclave_common::{
    Communicator, ConclaveError, ErrorCode, Message, Notification, Result, TaskError, TaskOutcome,
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

/// Method name used when another agent's message is handed to this agent's
/// communicator.
pub const AGENT_MESSAGE_METHOD: &str = "agent.message";

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An independently addressable worker.
///
/// Prefer driving execution through the registry's `invoke`, which owns the
/// busy guard; calling [`Agent::execute`] directly bypasses it.
pub struct Agent {
    key: String,
    capabilities: Vec<String>,
    handler: Box<dyn TaskHandler>,
    status: RwLock<AgentStatus>,
    state: Mutex<Value>,
    store: StateStore,
    communicator: Arc<Communicator>,
    events: broadcast::Sender<AgentEvent>,
}

impl Agent {
    pub fn new(
        key: impl Into<String>,
        handler: impl TaskHandler + 'static,
        state_root: impl AsRef<Path>,
    ) -> Self {
        let key = key.into();
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);

        Self {
            capabilities: handler.capabilities().to_vec(),
            handler: Box::new(handler),
            status: RwLock::new(AgentStatus::Idle),
            state: Mutex::new(json!({})),
            store: StateStore::new(state_root, &key),
            communicator: Arc::new(Communicator::new(key.clone())),
            events,
            key,
        }
    }

    /// Replace the communicator with one using the given request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.communicator = Arc::new(Communicator::new(self.key.clone()).with_timeout(timeout));
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn can_handle(&self, task: &str) -> bool {
        self.handler.can_handle(task)
    }

    pub fn status(&self) -> AgentStatus {
        *self.status.read()
    }

    pub fn communicator(&self) -> &Arc<Communicator> {
        &self.communicator
    }

    pub fn state_path(&self) -> &Path {
        self.store.path()
    }

    /// Snapshot of the current state document.
    pub async fn state(&self) -> Value {
        self.state.lock().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Apply a status change if the lifecycle allows it.
    pub fn transition(&self, to: AgentStatus) -> Result<()> {
        let from = {
            let mut status = self.status.write();
            let from = *status;
            if !from.can_transition_to(to) {
                return Err(ConclaveError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            *status = to;
            from
        };

        debug!(agent = %self.key, from = %from, to = %to, "Agent status changed");
        self.emit(AgentEvent::StatusChanged {
            agent: self.key.clone(),
            from,
            to,
        });
        Ok(())
    }

    /// Load persisted state and run the handler's init hook.
    ///
    /// Ends in `Ready` on success or `Error` on failure. A no-op on an agent
    /// that is already ready.
    pub async fn initialize(&self) -> Result<()> {
        if self.status() == AgentStatus::Ready {
            return Ok(());
        }
        self.transition(AgentStatus::Initializing)?;
        info!(agent = %self.key, capabilities = ?self.capabilities, "Initializing agent");

        match self.load_and_init().await {
            Ok(()) => {
                self.transition(AgentStatus::Ready)?;
                info!(agent = %self.key, "Agent ready");
                Ok(())
            }
            Err(e) => {
                error!(agent = %self.key, error = %e, "Agent initialization failed");
                self.transition(AgentStatus::Error)?;
                Err(e)
            }
        }
    }

    async fn load_and_init(&self) -> Result<()> {
        let loaded = self.store.load().await?;
        let mut state = self.state.lock().await;
        *state = loaded;
        self.emit(AgentEvent::StateLoaded {
            agent: self.key.clone(),
        });
        self.handler.on_initialize(&mut state).await
    }

    /// Run one task and fold any failure into the returned outcome.
    pub async fn execute(&self, task: &str, context: &Value) -> TaskOutcome {
        let started = Instant::now();

        if !self.handler.can_handle(task) {
            warn!(agent = %self.key, task = %task, "Unsupported task");
            let err = TaskError::with_code(
                ErrorCode::CapabilityNotFound,
                format!("Agent {} cannot handle task: {}", self.key, task),
            );
            self.emit(AgentEvent::TaskFailed {
                agent: self.key.clone(),
                task: task.to_string(),
                error: err.message.clone(),
            });
            return TaskOutcome::failure(err, started.elapsed());
        }

        debug!(agent = %self.key, task = %task, "Executing task");

        let mut state = self.state.lock().await;
        let outcome = match self.handler.on_execute(task, context, &mut state).await {
            Ok(result) => match self.store.save(&state).await {
                Ok(()) => {
                    self.emit(AgentEvent::StatePersisted {
                        agent: self.key.clone(),
                    });
                    TaskOutcome::success(result, started.elapsed())
                }
                Err(e) => {
                    error!(agent = %self.key, task = %task, error = %e, "Failed to persist state");
                    TaskOutcome::failure(
                        TaskError::with_code(
                            ErrorCode::AgentError,
                            format!("Failed to persist state: {}", e),
                        ),
                        started.elapsed(),
                    )
                }
            },
            Err(err) => {
                warn!(agent = %self.key, task = %task, error = %err, "Task failed");
                TaskOutcome::failure(err, started.elapsed())
            }
        };
        drop(state);

        match &outcome.error {
            None => self.emit(AgentEvent::TaskCompleted {
                agent: self.key.clone(),
                task: task.to_string(),
                execution_time_ms: outcome.metrics.execution_time,
            }),
            Some(err) => self.emit(AgentEvent::TaskFailed {
                agent: self.key.clone(),
                task: task.to_string(),
                error: err.message.clone(),
            }),
        }

        outcome
    }

    /// Persist the final state, run the cleanup hook and stop.
    ///
    /// Changes the hook makes to the state are persisted as well.
    pub async fn cleanup(&self) -> Result<()> {
        if self.status().is_terminal() {
            return Ok(());
        }
        info!(agent = %self.key, "Cleaning up agent");

        let result = async {
            let mut state = self.state.lock().await;
            self.store.save(&state).await?;
            self.emit(AgentEvent::StatePersisted {
                agent: self.key.clone(),
            });

            let persisted = state.clone();
            self.handler.on_cleanup(&mut state).await?;
            if *state != persisted {
                self.store.save(&state).await?;
                self.emit(AgentEvent::StatePersisted {
                    agent: self.key.clone(),
                });
            }
            Ok(())
        }
        .await;

        self.communicator.detach();

        if let Err(e) = result {
            error!(agent = %self.key, error = %e, "Agent cleanup failed");
            let _ = self.transition(AgentStatus::Error);
            return Err(e);
        }

        self.transition(AgentStatus::Stopped)
    }

    /// Accept a direct message from another agent.
    ///
    /// The message is handed to this agent's communicator as an
    /// [`AGENT_MESSAGE_METHOD`] notification, so registered notification
    /// handlers observe it, then to the handler's `on_message` hook whose
    /// value is returned as the acknowledgement.
    pub async fn receive_message(&self, from: &str, payload: Value) -> Result<Value> {
        let status = self.status();
        if status.is_terminal() {
            return Err(ConclaveError::AgentNotReady {
                key: self.key.clone(),
                status: status.to_string(),
            });
        }

        debug!(agent = %self.key, from = %from, "Received message");
        let notification = Notification::new(
            AGENT_MESSAGE_METHOD,
            Some(json!({ "from": from, "payload": payload.clone() })),
        );
        self.communicator
            .handle_message(Message::Notification(notification))
            .await;
        self.emit(AgentEvent::MessageReceived {
            agent: self.key.clone(),
            from: from.to_string(),
        });

        self.handler
            .on_message(from, &payload)
            .await
            .map_err(|e| ConclaveError::TaskFailed {
                agent: self.key.clone(),
                task: AGENT_MESSAGE_METHOD.to_string(),
                message: e.message,
            })
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("key", &self.key)
            .field("capabilities", &self.capabilities)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CounterHandler {
        capabilities: Vec<String>,
        init_calls: Arc<AtomicUsize>,
        fail_init: bool,
        mark_closed: bool,
    }

    impl CounterHandler {
        fn new() -> Self {
            Self {
                capabilities: vec!["count".into(), "fail".into()],
                init_calls: Arc::new(AtomicUsize::new(0)),
                fail_init: false,
                mark_closed: false,
            }
        }
    }

    #[async_trait]
    impl TaskHandler for CounterHandler {
        fn capabilities(&self) -> &[String] {
            &self.capabilities
        }

        async fn on_initialize(&self, _state: &mut Value) -> Result<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(ConclaveError::Agent("init exploded".into()));
            }
            Ok(())
        }

        async fn on_execute(
            &self,
            task: &str,
            _context: &Value,
            state: &mut Value,
        ) -> std::result::Result<Value, TaskError> {
            match task {
                "count" => {
                    let n = state["count"].as_u64().unwrap_or(0) + 1;
                    state["count"] = json!(n);
                    Ok(json!({ "count": n }))
                }
                _ => Err(TaskError::new("asked to fail")),
            }
        }

        async fn on_cleanup(&self, state: &mut Value) -> Result<()> {
            if self.mark_closed {
                state["closed"] = json!(true);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_initialize_reaches_ready() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new("counter", CounterHandler::new(), dir.path());
        assert_eq!(agent.status(), AgentStatus::Idle);

        agent.initialize().await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Ready);
        assert_eq!(agent.state().await, json!({}));

        // Second call is a no-op.
        agent.initialize().await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_init_ends_in_error() {
        let dir = TempDir::new().unwrap();
        let mut handler = CounterHandler::new();
        handler.fail_init = true;
        let calls = handler.init_calls.clone();
        let agent = Agent::new("broken", handler, dir.path());

        assert!(agent.initialize().await.is_err());
        assert_eq!(agent.status(), AgentStatus::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_persists_state() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new("counter", CounterHandler::new(), dir.path());
        agent.initialize().await.unwrap();

        let outcome = agent.execute("count", &json!({})).await;
        assert!(outcome.success);
        assert_eq!(outcome.result, Some(json!({"count": 1})));

        let on_disk: Value =
            serde_json::from_slice(&std::fs::read(agent.state_path()).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"count": 1}));
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let agent = Agent::new("counter", CounterHandler::new(), dir.path());
            agent.initialize().await.unwrap();
            agent.execute("count", &json!({})).await;
            agent.execute("count", &json!({})).await;
            agent.cleanup().await.unwrap();
            assert_eq!(agent.status(), AgentStatus::Stopped);
        }

        let agent = Agent::new("counter", CounterHandler::new(), dir.path());
        agent.initialize().await.unwrap();
        let outcome = agent.execute("count", &json!({})).await;
        assert_eq!(outcome.result, Some(json!({"count": 3})));
    }

    #[tokio::test]
    async fn test_unsupported_task_is_structured_failure() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new("counter", CounterHandler::new(), dir.path());
        agent.initialize().await.unwrap();

        let outcome = agent.execute("paint", &json!({})).await;
        assert!(!outcome.success);
        let err = outcome.error.unwrap();
        assert_eq!(err.code, ErrorCode::CapabilityNotFound.code());
        assert!(err.message.contains("paint"));
    }

    #[tokio::test]
    async fn test_task_failure_is_structured() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new("counter", CounterHandler::new(), dir.path());
        agent.initialize().await.unwrap();
        let mut events = agent.subscribe();

        let outcome = agent.execute("fail", &json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_message(), Some("asked to fail"));
        assert!(matches!(
            events.recv().await.unwrap(),
            AgentEvent::TaskFailed { ref task, .. } if task == "fail"
        ));
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new("counter", CounterHandler::new(), dir.path());

        let err = agent.transition(AgentStatus::Busy).unwrap_err();
        assert!(matches!(err, ConclaveError::InvalidStateTransition { .. }));
        assert_eq!(agent.status(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn test_receive_message_reaches_communicator_handlers() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new("counter", CounterHandler::new(), dir.path());
        agent.initialize().await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        agent
            .communicator()
            .on_notification(AGENT_MESSAGE_METHOD, move |n: Notification| {
                let counter = counter.clone();
                async move {
                    assert_eq!(n.params.unwrap()["from"], json!("boss"));
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            });

        let ack = agent
            .receive_message("boss", json!({"note": "hi"}))
            .await
            .unwrap();
        assert_eq!(ack, json!({"received": true}));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stopped_agent_rejects_messages() {
        let dir = TempDir::new().unwrap();
        let agent = Agent::new("counter", CounterHandler::new(), dir.path());
        agent.initialize().await.unwrap();
        agent.cleanup().await.unwrap();

        let err = agent.receive_message("boss", json!(null)).await.unwrap_err();
        assert!(matches!(err, ConclaveError::AgentNotReady { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_hook_changes_are_persisted() {
        let dir = TempDir::new().unwrap();
        let mut handler = CounterHandler::new();
        handler.mark_closed = true;
        let agent = Agent::new("counter", handler, dir.path());
        agent.initialize().await.unwrap();
        agent.execute("count", &json!({})).await;

        agent.cleanup().await.unwrap();

        let on_disk: Value =
            serde_json::from_slice(&std::fs::read(agent.state_path()).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"count": 1, "closed": true}));
        assert_eq!(agent.status(), AgentStatus::Stopped);
    }
}
