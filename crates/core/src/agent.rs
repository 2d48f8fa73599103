//! Agent state and operating modes.

use serde::{Deserialize, Serialize};

/// Runtime state of one agent instance. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    /// Waiting for the user; options were surfaced
    Pause,
    /// Finished, by a terminal tool or by cancellation
    Final,
    /// The LLM call exhausted its retries
    Error,
}

impl AgentState {
    /// Whether the ReAct loop stops at this state.
    pub fn ends_loop(&self) -> bool {
        matches!(self, AgentState::Pause | AgentState::Final | AgentState::Error)
    }
}

/// Operating mode; shapes the system prompt and a few built-ins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Auto,
    #[default]
    Act,
    Plan,
    Flash,
}

impl AgentMode {
    /// Resolve a mode key. Unknown keys fall back to [`AgentMode::Act`].
    pub fn from_key(key: &str) -> Self {
        match key {
            "auto" => AgentMode::Auto,
            "plan" => AgentMode::Plan,
            "flash" => AgentMode::Flash,
            _ => AgentMode::Act,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            AgentMode::Auto => "auto",
            AgentMode::Act => "act",
            AgentMode::Plan => "plan",
            AgentMode::Flash => "flash",
        }
    }

    /// Label shown in the environment message.
    pub fn label(&self) -> &'static str {
        match self {
            AgentMode::Auto => "Automatic mode",
            AgentMode::Act => "Execution mode",
            AgentMode::Plan => "Planning mode",
            AgentMode::Flash => "Flash mode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_state_starts_idle() {
        assert_eq!(AgentState::default(), AgentState::Idle);
        assert!(!AgentState::Running.ends_loop());
        assert!(AgentState::Pause.ends_loop());
    }

    #[test]
    fn unknown_mode_falls_back_to_act() {
        assert_eq!(AgentMode::from_key("plan"), AgentMode::Plan);
        assert_eq!(AgentMode::from_key("turbo"), AgentMode::Act);
        assert_eq!(AgentMode::Flash.label(), "Flash mode");
    }

    #[test]
    fn mode_serializes_as_key() {
        assert_eq!(serde_json::to_string(&AgentMode::Auto).unwrap(), r#""auto""#);
    }
}
