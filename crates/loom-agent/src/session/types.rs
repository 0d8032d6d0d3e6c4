use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::time::Duration;

/// Execution loop states. Terminal states never transition further.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Planning,
    AwaitingPermission,
    Executing,
    Completed,
    Errored,
    Cancelled,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::AwaitingPermission => "awaiting_permission",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: &LoopState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        if matches!(next, LoopState::Errored | LoopState::Cancelled) {
            return true;
        }

        match self {
            LoopState::Idle => matches!(next, LoopState::Planning),
            LoopState::Planning => {
                matches!(next, LoopState::AwaitingPermission | LoopState::Completed)
            }
            LoopState::AwaitingPermission => matches!(next, LoopState::Executing),
            LoopState::Executing => matches!(next, LoopState::Planning),
            _ => false,
        }
    }
}

impl Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-task settings resolved from the runtime config and run options.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopSettings {
    pub model: String,
    pub system_prompt: String,
    pub step_limit: usize,
    pub tool_timeout: Option<Duration>,
    pub backend_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_cycle_is_allowed() {
        let cycle = [
            LoopState::Idle,
            LoopState::Planning,
            LoopState::AwaitingPermission,
            LoopState::Executing,
            LoopState::Planning,
            LoopState::Completed,
        ];
        for pair in cycle.windows(2) {
            assert!(
                pair[0].can_transition_to(&pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn terminal_states_are_final_and_shortcuts_are_rejected() {
        assert!(!LoopState::Completed.can_transition_to(&LoopState::Planning));
        assert!(!LoopState::Cancelled.can_transition_to(&LoopState::Cancelled));
        assert!(!LoopState::Idle.can_transition_to(&LoopState::Executing));
        assert!(!LoopState::Executing.can_transition_to(&LoopState::Completed));
        assert!(LoopState::AwaitingPermission.can_transition_to(&LoopState::Cancelled));
    }
}
