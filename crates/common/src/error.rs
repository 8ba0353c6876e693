//! Error types for Conclave.

use crate::protocol::{ErrorCode, ErrorMessage, ProtocolError, RequestId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConclaveError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent is busy: {0}")]
    AgentBusy(String),

    #[error("Agent {key} is not ready (status: {status})")]
    AgentNotReady { key: String, status: String },

    #[error("Agent already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("No agent provides capability: {0}")]
    CapabilityNotFound(String),

    #[error("Task {task} failed on agent {agent}: {message}")]
    TaskFailed {
        agent: String,
        task: String,
        message: String,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Request {id} timed out after {timeout_ms}ms")]
    RequestTimeout { id: RequestId, timeout_ms: u64 },

    #[error("Communicator for {0} is not attached to a transport")]
    NotConnected(String),

    #[error("Pattern not found: {0}")]
    PatternNotFound(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow {id} is {status}")]
    InvalidWorkflowState { id: String, status: String },

    #[error("Workflow cancelled: {0}")]
    WorkflowCancelled(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConclaveError {
    /// Wire code for this error. Errors without a dedicated code map to
    /// `InternalError`; remote errors keep the code they arrived with.
    pub fn code(&self) -> i64 {
        let code = match self {
            Self::Protocol(e) => e.code,
            Self::Remote { code, .. } => return *code,
            Self::AgentNotFound(_) => ErrorCode::AgentNotFound,
            Self::AgentBusy(_) => ErrorCode::AgentBusy,
            Self::AgentNotReady { .. } | Self::AlreadyRegistered(_) | Self::Agent(_) => {
                ErrorCode::AgentError
            }
            Self::InvalidStateTransition { .. } => ErrorCode::AgentError,
            Self::CapabilityNotFound(_) => ErrorCode::CapabilityNotFound,
            Self::TaskFailed { .. } => ErrorCode::TaskFailed,
            Self::Serialization(_) => ErrorCode::InvalidParams,
            _ => ErrorCode::InternalError,
        };
        code.code()
    }

    /// Render this error as a protocol error message replying to `id`.
    pub fn to_error_message(&self, id: Option<RequestId>) -> ErrorMessage {
        let data = match self {
            Self::Remote { data, .. } => data.clone(),
            _ => None,
        };
        ErrorMessage {
            id,
            code: self.code(),
            message: self.to_string(),
            data,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConclaveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_codes() {
        assert_eq!(ConclaveError::AgentNotFound("a".into()).code(), -32001);
        assert_eq!(ConclaveError::AgentBusy("a".into()).code(), -32002);
        assert_eq!(
            ConclaveError::TaskFailed {
                agent: "a".into(),
                task: "t".into(),
                message: "boom".into(),
            }
            .code(),
            -32005
        );
        assert_eq!(
            ConclaveError::RequestTimeout {
                id: RequestId::Number(1),
                timeout_ms: 10,
            }
            .code(),
            ErrorCode::InternalError.code()
        );
    }

    #[test]
    fn test_remote_error_keeps_code_and_data() {
        let err = ConclaveError::Remote {
            code: -32099,
            message: "custom".into(),
            data: Some(serde_json::json!({"hint": 1})),
        };
        let msg = err.to_error_message(Some(RequestId::Number(4)));
        assert_eq!(msg.code, -32099);
        assert_eq!(msg.id, Some(RequestId::Number(4)));
        assert_eq!(msg.data, Some(serde_json::json!({"hint": 1})));
    }

    #[test]
    fn test_not_found_names_key() {
        let err = ConclaveError::AgentNotFound("ghost".into());
        assert!(err.to_string().contains("ghost"));
    }
}
