//! Agent lifecycle, task contract and persisted state.
//!
//! An [`Agent`] wraps a [`TaskHandler`] with everything the coordinator needs
//! to drive it:
//!
//! - **Status**: a small lifecycle state machine ([`AgentStatus`])
//! - **State**: one JSON document persisted per agent ([`StateStore`])
//! - **Messaging**: a dedicated JSON-RPC [`Communicator`](conclave_common::Communicator)
//! - **Events**: a broadcast stream of [`AgentEvent`]s
//!
//! # Lifecycle
//!
//! ```text
//! ┌──────┐  initialize  ┌──────────────┐        ┌───────┐ invoke ┌──────┐
//! │ Idle │─────────────▶│ Initializing │───────▶│ Ready │◀──────▶│ Busy │
//! └──────┘              └──────┬───────┘        └───┬───┘        └──────┘
//!                              │ failure            │ cleanup
//!                              ▼                    ▼
//!                          ┌───────┐           ┌─────────┐
//!                          │ Error │──────────▶│ Stopped │
//!                          └───────┘           └─────────┘
//! ```

pub mod agent;
pub mod events;
pub mod state;
pub mod status;
pub mod traits;

pub use agent::{Agent, AGENT_MESSAGE_METHOD};
pub use events::AgentEvent;
pub use state::StateStore;
pub use status::AgentStatus;
pub use traits::TaskHandler;
