//! Common types shared across Conclave crates.
//!
//! This crate provides the error taxonomy, the wire protocol agents use to
//! talk to each other, the per-agent [`Communicator`], and the result
//! envelope every task execution produces.

pub mod communicator;
pub mod error;
pub mod protocol;
pub mod task;

pub use communicator::{ChannelOutbound, Communicator, Envelope, Outbound, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ConclaveError, Result};
pub use protocol::{
    ErrorCode, ErrorMessage, Message, MessageKind, Notification, ProtocolError, Request, RequestId,
    Response,
};
pub use task::{ExecutionMetrics, TaskError, TaskOutcome};
