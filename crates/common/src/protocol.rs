//! Wire protocol for inter-agent messages.
//!
//! Messages use JSON-RPC 2.0 framing. Every message carries the exact
//! `"jsonrpc": "2.0"` tag; anything else is rejected as `InvalidRequest`.
//!
//! The protocol layer is transport-agnostic: it only turns values into typed
//! [`Message`]s and back. Delivery is the job of the
//! [`Communicator`](crate::communicator::Communicator) and whatever
//! [`Outbound`](crate::communicator::Outbound) it is attached to.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Identifiers and error codes
// ---------------------------------------------------------------------------

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for RequestId {
    fn from(value: i32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self::Number(value as i64)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Standard JSON-RPC error codes plus the agent-domain extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    AgentNotFound,
    AgentBusy,
    AgentError,
    CapabilityNotFound,
    TaskFailed,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        Self::ParseError,
        Self::InvalidRequest,
        Self::MethodNotFound,
        Self::InvalidParams,
        Self::InternalError,
        Self::AgentNotFound,
        Self::AgentBusy,
        Self::AgentError,
        Self::CapabilityNotFound,
        Self::TaskFailed,
    ];

    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::AgentNotFound => -32001,
            Self::AgentBusy => -32002,
            Self::AgentError => -32003,
            Self::CapabilityNotFound => -32004,
            Self::TaskFailed => -32005,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Whether the code belongs to the JSON-RPC standard table.
    pub fn is_standard(self) -> bool {
        self.code() <= -32600
    }

    pub fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::AgentNotFound => "Agent not found",
            Self::AgentBusy => "Agent busy",
            Self::AgentError => "Agent error",
            Self::CapabilityNotFound => "Capability not found",
            Self::TaskFailed => "Task failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.code())
    }
}

/// A message that failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct ProtocolError {
    pub code: ErrorCode,
    pub message: String,
    /// Id of the offending message, when one could be recovered.
    pub id: Option<RequestId>,
}

impl ProtocolError {
    pub fn new(code: ErrorCode, message: impl Into<String>, id: Option<RequestId>) -> Self {
        Self {
            code,
            message: message.into(),
            id,
        }
    }

    fn invalid(message: impl Into<String>, id: Option<RequestId>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message, id)
    }

    pub fn to_error_message(&self) -> ErrorMessage {
        ErrorMessage {
            id: self.id.clone(),
            code: self.code.code(),
            message: self.message.clone(),
            data: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A request that expects no reply. Never carries an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Value,
}

impl Response {
    pub fn new(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            id: id.into(),
            result,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub id: Option<RequestId>,
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl ErrorMessage {
    pub fn new(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn from_code(id: Option<RequestId>, code: ErrorCode) -> Self {
        Self::new(id, code.code(), code.default_message())
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// The table entry for this code, if it is a known one.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

/// One parsed element of a batch.
pub type BatchEntry = std::result::Result<Message, ProtocolError>;

/// A parsed protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
    Error(ErrorMessage),
    /// Ordered per-element parse results.
    Batch(Vec<BatchEntry>),
}

/// Discriminant of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Notification,
    Response,
    Error,
    Batch,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Notification => "notification",
            Self::Response => "response",
            Self::Error => "error",
            Self::Batch => "batch",
        };
        f.write_str(s)
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request(_) => MessageKind::Request,
            Self::Notification(_) => MessageKind::Notification,
            Self::Response(_) => MessageKind::Response,
            Self::Error(_) => MessageKind::Error,
            Self::Batch(_) => MessageKind::Batch,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Error(e) => e.id.as_ref(),
            Self::Notification(_) | Self::Batch(_) => None,
        }
    }

    /// Build a batch out of already-valid messages.
    pub fn batch(messages: impl IntoIterator<Item = Message>) -> Self {
        Self::Batch(messages.into_iter().map(Ok).collect())
    }
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Notification> for Message {
    fn from(value: Notification) -> Self {
        Self::Notification(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

impl From<ErrorMessage> for Message {
    fn from(value: ErrorMessage) -> Self {
        Self::Error(value)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Anything [`parse`] accepts: encoded text, a structured value, or a
/// message that is already typed.
#[derive(Debug, Clone)]
pub enum Incoming {
    Text(String),
    Value(Value),
    Message(Message),
}

impl From<&str> for Incoming {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Incoming {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for Incoming {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Message> for Incoming {
    fn from(value: Message) -> Self {
        Self::Message(value)
    }
}

/// Parse and validate an incoming message.
pub fn parse(input: impl Into<Incoming>) -> std::result::Result<Message, ProtocolError> {
    match input.into() {
        Incoming::Message(message) => Ok(message),
        Incoming::Value(value) => parse_value(value),
        Incoming::Text(text) => {
            let value: Value = serde_json::from_str(&text).map_err(|e| {
                ProtocolError::new(ErrorCode::ParseError, format!("Malformed JSON: {}", e), None)
            })?;
            parse_value(value)
        }
    }
}

/// Check that a value is a well-formed message without keeping the result.
///
/// A batch is valid only if every element is.
pub fn validate(value: &Value) -> std::result::Result<(), ProtocolError> {
    match parse_value(value.clone())? {
        Message::Batch(entries) => entries
            .into_iter()
            .try_for_each(|entry| entry.map(|_| ())),
        _ => Ok(()),
    }
}

fn parse_value(value: Value) -> std::result::Result<Message, ProtocolError> {
    match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ProtocolError::invalid("Empty batch", None));
            }
            let entries = items
                .into_iter()
                .map(|item| match item {
                    Value::Array(_) => Err(ProtocolError::invalid("Nested batch", None)),
                    other => parse_single(other),
                })
                .collect();
            Ok(Message::Batch(entries))
        }
        other => parse_single(other),
    }
}

fn parse_single(value: Value) -> std::result::Result<Message, ProtocolError> {
    let Value::Object(mut obj) = value else {
        return Err(ProtocolError::invalid("Message must be a JSON object", None));
    };

    let id = obj.get("id").and_then(RequestId::from_value);

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(_) => return Err(ProtocolError::invalid("Unsupported protocol version", id)),
        None => return Err(ProtocolError::invalid("Missing protocol version", id)),
    }

    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");

    if has_result || has_error {
        if has_result && has_error {
            return Err(ProtocolError::invalid(
                "Response cannot carry both result and error",
                id,
            ));
        }
        let Some(raw_id) = obj.remove("id") else {
            return Err(ProtocolError::invalid("Response is missing id", None));
        };

        if let Some(error) = obj.remove("error") {
            let id = match raw_id {
                Value::Null => None,
                other => Some(
                    RequestId::from_value(&other)
                        .ok_or_else(|| ProtocolError::invalid("Invalid id type", None))?,
                ),
            };
            return parse_error_object(error, id).map(Message::Error);
        }

        let id = RequestId::from_value(&raw_id)
            .ok_or_else(|| ProtocolError::invalid("Response id must be a string or integer", None))?;
        let result = obj.remove("result").unwrap_or(Value::Null);
        return Ok(Message::Response(Response { id, result }));
    }

    let method = match obj.remove("method") {
        Some(Value::String(method)) => method,
        _ => return Err(ProtocolError::invalid("Request is missing method", id)),
    };
    let params = obj.remove("params");

    match obj.remove("id") {
        None | Some(Value::Null) => Ok(Message::Notification(Notification { method, params })),
        Some(raw) => {
            let id = RequestId::from_value(&raw).ok_or_else(|| {
                ProtocolError::invalid("Request id must be a string or integer", None)
            })?;
            Ok(Message::Request(Request { id, method, params }))
        }
    }
}

fn parse_error_object(
    error: Value,
    id: Option<RequestId>,
) -> std::result::Result<ErrorMessage, ProtocolError> {
    let Value::Object(mut error) = error else {
        return Err(ProtocolError::invalid("Error must be an object", id));
    };
    let code = error
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| ProtocolError::invalid("Error code must be an integer", id.clone()))?;
    let message = match error.remove("message") {
        Some(Value::String(message)) => message,
        _ => return Err(ProtocolError::invalid("Error message must be a string", id)),
    };
    Ok(ErrorMessage {
        id,
        code,
        message,
        data: error.remove("data"),
    })
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Render a message in its wire shape.
pub fn to_value(message: &Message) -> Value {
    match message {
        Message::Batch(entries) => Value::Array(
            entries
                .iter()
                .map(|entry| match entry {
                    Ok(message) => to_value(message),
                    Err(e) => to_value(&Message::Error(e.to_error_message())),
                })
                .collect(),
        ),
        single => Value::Object(single_to_map(single)),
    }
}

/// Encode a message as JSON text.
pub fn serialize(message: &Message) -> String {
    to_value(message).to_string()
}

fn single_to_map(message: &Message) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));

    match message {
        Message::Request(r) => {
            map.insert("id".into(), r.id.to_value());
            map.insert("method".into(), Value::from(r.method.as_str()));
            if let Some(params) = &r.params {
                map.insert("params".into(), params.clone());
            }
        }
        Message::Notification(n) => {
            map.insert("method".into(), Value::from(n.method.as_str()));
            if let Some(params) = &n.params {
                map.insert("params".into(), params.clone());
            }
        }
        Message::Response(r) => {
            map.insert("id".into(), r.id.to_value());
            map.insert("result".into(), r.result.clone());
        }
        Message::Error(e) => {
            map.insert(
                "id".into(),
                e.id.as_ref().map(RequestId::to_value).unwrap_or(Value::Null),
            );
            let mut error = Map::new();
            error.insert("code".into(), Value::from(e.code));
            error.insert("message".into(), Value::from(e.message.as_str()));
            if let Some(data) = &e.data {
                error.insert("data".into(), data.clone());
            }
            map.insert("error".into(), Value::Object(error));
        }
        Message::Batch(_) => unreachable!("batches are rendered as arrays"),
    }

    map
}
