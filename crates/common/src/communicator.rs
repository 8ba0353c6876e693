//! Per-agent message endpoint built on the wire protocol.
//!
//! A [`Communicator`] owns two pieces of state: a monotonic request counter
//! and the table of pending requests keyed by id. Outbound requests become
//! futures that settle exactly once, from a matching response, a matching
//! error message, or the timeout. Inbound messages are routed by kind to
//! registered handlers.
//!
//! A timeout only abandons the caller's wait. Work already dispatched to the
//! remote side keeps running; nothing is sent to cancel it.

use crate::error::{ConclaveError, Result};
use crate::protocol::{
    self, BatchEntry, ErrorCode, ErrorMessage, Incoming, Message, Notification, Request, RequestId,
    Response,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Baseline wait for a response before a request is rejected.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport seam: how a communicator hands a message to its target.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn deliver(&self, from: &str, to: &str, message: Message) -> Result<()>;
}

/// A message in transit between two endpoints.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub message: Message,
}

/// Outbound that pushes envelopes into an unbounded channel.
///
/// Useful for tests and for bridging to a transport that runs elsewhere.
#[derive(Clone)]
pub struct ChannelOutbound {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelOutbound {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Outbound for ChannelOutbound {
    async fn deliver(&self, from: &str, to: &str, message: Message) -> Result<()> {
        self.tx
            .send(Envelope {
                from: from.to_string(),
                to: to.to_string(),
                message,
            })
            .map_err(|_| ConclaveError::NotConnected(from.to_string()))
    }
}

type RequestHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type NotificationHandler = Arc<dyn Fn(Notification) -> BoxFuture<'static, ()> + Send + Sync>;

struct PendingRequest {
    target: String,
    method: String,
    issued_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

/// Removes a pending entry when the waiting future goes away, whatever the
/// reason. Entries already settled are gone, so this is then a no-op.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<RequestId, PendingRequest>>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

pub struct Communicator {
    agent_id: String,
    next_id: AtomicU64,
    timeout: Duration,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    outbound: RwLock<Option<Arc<dyn Outbound>>>,
}

impl Communicator {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            next_id: AtomicU64::new(1),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            pending: Mutex::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            outbound: RwLock::new(None),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn attach(&self, outbound: Arc<dyn Outbound>) {
        *self.outbound.write() = Some(outbound);
    }

    pub fn detach(&self) {
        *self.outbound.write() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.outbound.read().is_some()
    }

    /// Register the handler for inbound requests with this method.
    pub fn on_request<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let handler: RequestHandler = Arc::new(move |req| Box::pin(handler(req)));
        self.request_handlers.write().insert(method.into(), handler);
    }

    /// Register the handler for inbound notifications with this method.
    pub fn on_notification<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: NotificationHandler = Arc::new(move |n| Box::pin(handler(n)));
        self.notification_handlers
            .write()
            .insert(method.into(), handler);
    }

    fn outbound(&self) -> Result<Arc<dyn Outbound>> {
        self.outbound
            .read()
            .clone()
            .ok_or_else(|| ConclaveError::NotConnected(self.agent_id.clone()))
    }

    /// Send a request and wait for its reply.
    pub async fn request(&self, target: &str, method: &str, params: Option<Value>) -> Result<Value> {
        let outbound = self.outbound()?;
        let id = RequestId::from(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();

        self.pending.lock().insert(
            id.clone(),
            PendingRequest {
                target: target.to_string(),
                method: method.to_string(),
                issued_at: Instant::now(),
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        debug!(
            agent = %self.agent_id,
            target = %target,
            method = %method,
            id = %id,
            "Sending request"
        );

        let request = Request::new(id.clone(), method, params);
        outbound
            .deliver(&self.agent_id, target, Message::Request(request))
            .await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(settled)) => settled,
            Ok(Err(_)) => Err(ConclaveError::Agent(format!(
                "Pending request {} was dropped without a reply",
                id
            ))),
            Err(_) => {
                warn!(
                    agent = %self.agent_id,
                    target = %target,
                    method = %method,
                    id = %id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(ConclaveError::RequestTimeout {
                    id,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, target: &str, method: &str, params: Option<Value>) -> Result<()> {
        let outbound = self.outbound()?;
        debug!(agent = %self.agent_id, target = %target, method = %method, "Sending notification");
        outbound
            .deliver(
                &self.agent_id,
                target,
                Message::Notification(Notification::new(method, params)),
            )
            .await
    }

    /// Parse an inbound message and dispatch it. Returns the reply to send
    /// back, if the message calls for one.
    pub async fn handle_message(&self, input: impl Into<Incoming>) -> Option<Message> {
        match protocol::parse(input) {
            Ok(Message::Batch(entries)) => self.handle_batch(entries).await,
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                warn!(agent = %self.agent_id, error = %e, "Rejecting inbound message");
                Some(Message::Error(e.to_error_message()))
            }
        }
    }

    async fn dispatch(&self, message: Message) -> Option<Message> {
        match message {
            Message::Request(req) => Some(self.handle_request(req).await),
            Message::Notification(n) => {
                self.handle_notification(n).await;
                None
            }
            Message::Response(resp) => {
                self.handle_response(resp);
                None
            }
            Message::Error(err) => {
                self.handle_error(err);
                None
            }
            Message::Batch(_) => Some(Message::Error(ErrorMessage::new(
                None,
                ErrorCode::InvalidRequest.code(),
                "Nested batch",
            ))),
        }
    }

    pub async fn handle_request(&self, request: Request) -> Message {
        let handler = self.request_handlers.read().get(&request.method).cloned();
        let Some(handler) = handler else {
            debug!(agent = %self.agent_id, method = %request.method, "No handler for request");
            return Message::Error(ErrorMessage::new(
                Some(request.id),
                ErrorCode::MethodNotFound.code(),
                format!("Method not found: {}", request.method),
            ));
        };

        let id = request.id.clone();
        match handler(request).await {
            Ok(result) => Message::Response(Response::new(id, result)),
            Err(e) => Message::Error(e.to_error_message(Some(id))),
        }
    }

    pub async fn handle_notification(&self, notification: Notification) {
        let handler = self
            .notification_handlers
            .read()
            .get(&notification.method)
            .cloned();
        match handler {
            Some(handler) => handler(notification).await,
            None => debug!(
                agent = %self.agent_id,
                method = %notification.method,
                "No handler for notification"
            ),
        }
    }

    pub fn handle_response(&self, response: Response) {
        let Some(pending) = self.pending.lock().remove(&response.id) else {
            debug!(agent = %self.agent_id, id = %response.id, "Dropping uncorrelated response");
            return;
        };
        debug!(
            agent = %self.agent_id,
            id = %response.id,
            target = %pending.target,
            method = %pending.method,
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            "Request resolved"
        );
        let _ = pending.tx.send(Ok(response.result));
    }

    pub fn handle_error(&self, error: ErrorMessage) {
        let Some(id) = error.id.clone() else {
            warn!(
                agent = %self.agent_id,
                code = error.code,
                message = %error.message,
                "Received error without id"
            );
            return;
        };
        let Some(pending) = self.pending.lock().remove(&id) else {
            debug!(agent = %self.agent_id, id = %id, "Dropping uncorrelated error");
            return;
        };
        debug!(
            agent = %self.agent_id,
            id = %id,
            target = %pending.target,
            code = error.code,
            "Request rejected"
        );
        let _ = pending.tx.send(Err(ConclaveError::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }));
    }

    /// Process batch elements in order; the reply holds the non-empty
    /// replies in the same order.
    pub async fn handle_batch(&self, entries: Vec<BatchEntry>) -> Option<Message> {
        let mut replies = Vec::new();
        for entry in entries {
            let reply = match entry {
                Ok(message) => self.dispatch(message).await,
                Err(e) => Some(Message::Error(e.to_error_message())),
            };
            replies.extend(reply);
        }

        if replies.is_empty() {
            None
        } else {
            Some(Message::batch(replies))
        }
    }
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("agent_id", &self.agent_id)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending_count())
            .finish()
    }
}
