//! Agent lifecycle status and the transitions allowed between them.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Initializing,
    Ready,
    Busy,
    Error,
    Stopped,
}

impl AgentStatus {
    pub fn can_transition_to(self, to: AgentStatus) -> bool {
        use AgentStatus::*;

        match (self, to) {
            (Stopped, _) => false,
            (_, Error) => true,
            (Idle, Initializing) | (Error, Initializing) => true,
            (Initializing, Ready) => true,
            (Ready, Busy) | (Busy, Ready) => true,
            (Idle, Stopped) | (Ready, Stopped) | (Error, Stopped) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == AgentStatus::Stopped
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::AgentStatus::*;

    #[test]
    fn test_happy_path() {
        assert!(Idle.can_transition_to(Initializing));
        assert!(Initializing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Stopped));
        assert!(Idle.can_transition_to(Stopped));
    }

    #[test]
    fn test_error_reachable_from_live_states() {
        for from in [Idle, Initializing, Ready, Busy, Error] {
            assert!(from.can_transition_to(Error), "{from} -> error");
        }
        assert!(Error.can_transition_to(Stopped));
        assert!(Error.can_transition_to(Initializing));
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!Idle.can_transition_to(Ready));
        assert!(!Idle.can_transition_to(Busy));
        assert!(!Busy.can_transition_to(Stopped));
        assert!(!Initializing.can_transition_to(Busy));
        assert!(!Ready.can_transition_to(Initializing));
    }

    #[test]
    fn test_stopped_is_terminal() {
        assert!(Stopped.is_terminal());
        for to in [Idle, Initializing, Ready, Busy, Error, Stopped] {
            assert!(!Stopped.can_transition_to(to));
        }
    }
}
