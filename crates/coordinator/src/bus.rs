//! In-process transport between registered agents.
//!
//! Every registered agent's communicator is attached to the registry's bus.
//! A request sent through a communicator becomes a registry invocation on
//! the target (method = task, params = context); the outcome travels back to
//! the requester as a response or error message. Notifications, responses
//! and error messages are handed straight to the target's communicator.
//!
//! Invocations run on their own task: a requester that times out stops
//! waiting, but the target's work runs to completion.

use crate::registry::AgentRegistry;
use async_trait::async_trait;
use conclave_common::{
    ConclaveError, ErrorMessage, Message, Outbound, Request, Response, Result, TaskOutcome,
};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub struct MessageBus {
    registry: Weak<AgentRegistry>,
}

impl MessageBus {
    pub(crate) fn new(registry: Weak<AgentRegistry>) -> Self {
        Self { registry }
    }

    fn registry(&self) -> Result<Arc<AgentRegistry>> {
        self.registry
            .upgrade()
            .ok_or_else(|| ConclaveError::Agent("Registry has been dropped".into()))
    }

    fn dispatch_request(registry: Arc<AgentRegistry>, from: String, to: String, request: Request) {
        tokio::spawn(async move {
            let context = request.params.unwrap_or_else(|| json!({}));
            let reply = match registry.invoke(&to, &request.method, context).await {
                Ok(outcome) => outcome_reply(request.id, outcome),
                Err(e) => Message::Error(e.to_error_message(Some(request.id))),
            };

            // The requester may have gone away while the task ran.
            match registry.get(&from) {
                Some(requester) => {
                    requester.communicator().handle_message(reply).await;
                }
                None => debug!(from = %from, to = %to, "Dropping reply for unregistered requester"),
            }
        });
    }
}

fn outcome_reply(id: conclave_common::RequestId, outcome: TaskOutcome) -> Message {
    match outcome.error {
        None => Message::Response(Response::new(id, outcome.result.unwrap_or(Value::Null))),
        Some(err) => {
            let mut message = ErrorMessage::new(Some(id), err.code, err.message);
            message.data = err.data;
            Message::Error(message)
        }
    }
}

#[async_trait]
impl Outbound for MessageBus {
    async fn deliver(&self, from: &str, to: &str, message: Message) -> Result<()> {
        let registry = self.registry()?;

        match message {
            Message::Request(request) => {
                if !registry.has(to) {
                    return Err(ConclaveError::AgentNotFound(to.to_string()));
                }
                debug!(from = %from, to = %to, method = %request.method, id = %request.id, "Routing request");
                Self::dispatch_request(registry, from.to_string(), to.to_string(), request);
                Ok(())
            }
            Message::Batch(entries) => {
                for entry in entries {
                    match entry {
                        Ok(message) => self.deliver(from, to, message).await?,
                        Err(e) => warn!(from = %from, to = %to, error = %e, "Skipping invalid batch entry"),
                    }
                }
                Ok(())
            }
            other => {
                let target = registry
                    .get(to)
                    .ok_or_else(|| ConclaveError::AgentNotFound(to.to_string()))?;
                debug!(from = %from, to = %to, kind = %other.kind(), "Routing message");
                target.communicator().handle_message(other).await;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("connected", &(self.registry.strong_count() > 0))
            .finish()
    }
}
