//! Agent directory and the single path for driving task execution.
//!
//! The registry owns every registered agent's lifecycle. It is the only
//! component that flips an agent between `Ready` and `Busy`, and it does so
//! under a per-agent single-slot lock so two invocations can never interleave
//! against the same agent.

use crate::bus::MessageBus;
use crate::config::CoordinatorConfig;
use crate::events::RegistryEvent;
use chrono::{DateTime, Utc};
use conclave_agents::{Agent, AgentStatus, TaskHandler};
use conclave_common::{ConclaveError, Outbound, Result, TaskOutcome};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Invocation counters for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_execution_ms: u64,
    pub last_invoked_at: Option<DateTime<Utc>>,
}

impl AgentMetrics {
    fn record(&mut self, success: bool, execution_ms: u64) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_execution_ms += execution_ms;
        self.last_invoked_at = Some(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSummary {
    pub key: String,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    pub metrics: AgentMetrics,
}

/// Registry-wide snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStatus {
    pub total: usize,
    pub ready: usize,
    pub busy: usize,
    pub errored: usize,
    pub agents: Vec<AgentSummary>,
}

struct Entry {
    agent: Arc<Agent>,
    slot: Arc<tokio::sync::Mutex<()>>,
    metrics: Mutex<AgentMetrics>,
}

impl Entry {
    fn summary(&self) -> AgentSummary {
        AgentSummary {
            key: self.agent.key().to_string(),
            status: self.agent.status(),
            capabilities: self.agent.capabilities().to_vec(),
            metrics: self.metrics.lock().clone(),
        }
    }
}

#[derive(Default)]
struct Directory {
    entries: HashMap<String, Arc<Entry>>,
    /// Registration order.
    order: Vec<String>,
    /// Keys whose initialization is still running.
    reserved: HashSet<String>,
}

impl Directory {
    fn ordered(&self) -> impl Iterator<Item = &Arc<Entry>> {
        self.order.iter().filter_map(|key| self.entries.get(key))
    }
}

/// Releases a key reserved by `register` if the registration is abandoned
/// before the agent is published.
struct Reservation<'a> {
    directory: &'a RwLock<Directory>,
    key: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.directory.write().reserved.remove(&self.key);
    }
}

/// Holds the agent's slot for one invocation and puts the agent back to
/// `Ready` when dropped, on every exit path.
struct BusyGuard {
    agent: Arc<Agent>,
    _slot: OwnedMutexGuard<()>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.agent.status() == AgentStatus::Busy {
            if let Err(e) = self.agent.transition(AgentStatus::Ready) {
                warn!(agent = %self.agent.key(), error = %e, "Failed to release agent");
            }
        }
    }
}

pub struct AgentRegistry {
    directory: RwLock<Directory>,
    bus: Arc<MessageBus>,
    events: broadcast::Sender<RegistryEvent>,
    state_root: PathBuf,
    request_timeout: Duration,
}

impl AgentRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_config(&CoordinatorConfig::default())
    }

    pub fn with_config(config: &CoordinatorConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Arc::new_cyclic(|registry| Self {
            directory: RwLock::new(Directory::default()),
            bus: Arc::new(MessageBus::new(registry.clone())),
            events,
            state_root: config.state_root.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Build an agent that persists under this registry's state root and
    /// uses its request timeout.
    pub fn create_agent(&self, key: impl Into<String>, handler: impl TaskHandler + 'static) -> Agent {
        Agent::new(key, handler, &self.state_root).with_request_timeout(self.request_timeout)
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    /// Add an agent and run its initialization.
    ///
    /// The key is not visible to lookups until initialization has settled.
    /// When initialization fails the agent stays registered in `Error` status
    /// and the failure is returned. A stopped agent is rejected outright.
    /// Dropping the returned future before it settles releases the key.
    pub async fn register(&self, agent: Agent) -> Result<()> {
        let key = agent.key().to_string();
        let status = agent.status();
        if status.is_terminal() {
            return Err(ConclaveError::InvalidStateTransition {
                from: status.to_string(),
                to: AgentStatus::Initializing.to_string(),
            });
        }

        let reservation = {
            let mut dir = self.directory.write();
            if dir.entries.contains_key(&key) || !dir.reserved.insert(key.clone()) {
                return Err(ConclaveError::AlreadyRegistered(key));
            }
            Reservation {
                directory: &self.directory,
                key: key.clone(),
            }
        };

        let agent = Arc::new(agent);
        let bus: Arc<dyn Outbound> = self.bus.clone();
        agent.communicator().attach(bus);

        let init = agent.initialize().await;
        let capabilities = agent.capabilities().to_vec();

        {
            let mut dir = self.directory.write();
            dir.entries.insert(
                key.clone(),
                Arc::new(Entry {
                    agent,
                    slot: Arc::new(tokio::sync::Mutex::new(())),
                    metrics: Mutex::new(AgentMetrics::default()),
                }),
            );
            dir.order.push(key.clone());
        }
        drop(reservation);

        match &init {
            Ok(()) => info!(agent = %key, capabilities = ?capabilities, "Registered agent"),
            Err(e) => error!(agent = %key, error = %e, "Registered agent failed to initialize"),
        }
        self.emit(RegistryEvent::AgentRegistered {
            agent: key,
            capabilities,
        });

        init
    }

    /// Clean up and remove an agent, waiting for any in-flight invocation.
    ///
    /// The agent is removed even when its cleanup fails; the failure is
    /// returned.
    pub async fn unregister(&self, key: &str) -> Result<()> {
        let entry = self
            .entry(key)
            .ok_or_else(|| ConclaveError::AgentNotFound(key.to_string()))?;

        let _slot = entry.slot.clone().lock_owned().await;

        // A concurrent unregister may have removed the agent while we waited.
        let current = self.entry(key);
        if !current.is_some_and(|e| Arc::ptr_eq(&e, &entry)) {
            return Err(ConclaveError::AgentNotFound(key.to_string()));
        }

        let cleanup = entry.agent.cleanup().await;

        {
            let mut dir = self.directory.write();
            dir.entries.remove(key);
            dir.order.retain(|k| k != key);
        }

        info!(agent = %key, "Unregistered agent");
        self.emit(RegistryEvent::AgentUnregistered {
            agent: key.to_string(),
        });
        cleanup
    }

    fn entry(&self, key: &str) -> Option<Arc<Entry>> {
        self.directory.read().entries.get(key).cloned()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Agent>> {
        self.entry(key).map(|e| e.agent.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        self.directory.read().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.directory.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summaries in registration order.
    pub fn list(&self) -> Vec<AgentSummary> {
        self.directory.read().ordered().map(|e| e.summary()).collect()
    }

    /// Agents advertising `capability`, in registration order.
    pub fn find_by_capability(&self, capability: &str) -> Vec<Arc<Agent>> {
        self.directory
            .read()
            .ordered()
            .filter(|e| e.agent.has_capability(capability))
            .map(|e| e.agent.clone())
            .collect()
    }

    /// Run one task on one agent.
    ///
    /// Fails with `AgentNotFound` for an unknown key, `AgentBusy` while
    /// another invocation holds the agent, and `AgentNotReady` when the agent
    /// is not `Ready`. Task failures come back as an unsuccessful outcome.
    pub async fn invoke(&self, key: &str, task: &str, context: Value) -> Result<TaskOutcome> {
        let entry = self
            .entry(key)
            .ok_or_else(|| ConclaveError::AgentNotFound(key.to_string()))?;

        let slot = entry
            .slot
            .clone()
            .try_lock_owned()
            .map_err(|_| ConclaveError::AgentBusy(key.to_string()))?;

        let status = entry.agent.status();
        if status != AgentStatus::Ready {
            return Err(ConclaveError::AgentNotReady {
                key: key.to_string(),
                status: status.to_string(),
            });
        }
        entry.agent.transition(AgentStatus::Busy)?;
        let guard = BusyGuard {
            agent: entry.agent.clone(),
            _slot: slot,
        };

        debug!(agent = %key, task = %task, "Invoking agent");
        self.emit(RegistryEvent::InvocationStarted {
            agent: key.to_string(),
            task: task.to_string(),
        });

        let start_time = Instant::now();
        let mut outcome = entry.agent.execute(task, &context).await;
        let execution_ms = start_time.elapsed().as_millis() as u64;
        drop(guard);

        outcome.metrics.execution_time = execution_ms;
        entry.metrics.lock().record(outcome.success, execution_ms);

        info!(
            agent = %key,
            task = %task,
            success = outcome.success,
            duration_ms = execution_ms,
            "Invocation completed"
        );
        self.emit(RegistryEvent::InvocationCompleted {
            agent: key.to_string(),
            task: task.to_string(),
            success: outcome.success,
            execution_time_ms: execution_ms,
        });

        Ok(outcome.with_agent_id(key))
    }

    pub fn metrics(&self, key: &str) -> Option<AgentMetrics> {
        self.entry(key).map(|e| e.metrics.lock().clone())
    }

    pub fn get_status(&self) -> RegistryStatus {
        let agents = self.list();
        let count = |status: AgentStatus| agents.iter().filter(|a| a.status == status).count();

        RegistryStatus {
            total: agents.len(),
            ready: count(AgentStatus::Ready),
            busy: count(AgentStatus::Busy),
            errored: count(AgentStatus::Error),
            agents,
        }
    }

    /// Unregister every agent in registration order.
    pub async fn shutdown(&self) {
        let keys = self.directory.read().order.clone();
        info!(agents = keys.len(), "Shutting down registry");

        for key in keys {
            if let Err(e) = self.unregister(&key).await {
                warn!(agent = %key, error = %e, "Agent cleanup failed during shutdown");
            }
        }

        let mut dir = self.directory.write();
        dir.entries.clear();
        dir.order.clear();
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.directory.read().order)
            .field("state_root", &self.state_root)
            .finish()
    }
}
