//! Agent identity, descriptor, lifecycle state, and output types.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Unique identifier of an agent within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&AgentId> for AgentId {
    fn from(id: &AgentId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for AgentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of an agent. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Ready for dispatch (initial state)
    #[default]
    Idle,
    /// Executing an invocation
    Busy,
    /// Suspended mid-invocation with a checkpoint
    Paused,
    /// Last invocation failed; needs an explicit reset
    Failed,
}

impl AgentState {
    /// Whether `self -> to` is an edge of the lifecycle table.
    pub fn can_transition_to(self, to: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, to),
            (Idle, Busy)
                | (Busy, Idle)
                | (Busy, Failed)
                | (Busy, Paused)
                | (Paused, Busy)
                | (Failed, Idle)
        )
    }

    /// Whether the agent may be removed from the registry in this state.
    pub fn is_removable(self) -> bool {
        matches!(self, AgentState::Idle | AgentState::Failed)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Paused => write!(f, "paused"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "busy" => Ok(Self::Busy),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown agent state: {other}")),
        }
    }
}

/// Static description of an agent, supplied at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique id
    pub id: AgentId,

    /// Display name
    pub name: String,

    /// Instruction text (system prompt)
    #[serde(default)]
    pub instruction: String,

    /// Model identifier passed to the model provider
    pub model: String,

    /// Ordered capability (tool) names
    #[serde(default)]
    pub tools: Vec<String>,
}

impl AgentDescriptor {
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instruction: String::new(),
            model: model.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }

    /// Whether this agent advertises the given capability.
    pub fn has_capability(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}

/// Point-in-time view of a registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub model: String,
    pub tools: Vec<String>,
    pub state: AgentState,
    pub has_checkpoint: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One agent's contribution to a request (a parallel branch, a pipeline
/// stage, or a loop iteration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_id: AgentId,
    pub output: String,
}

impl AgentOutput {
    pub fn new(agent_id: impl Into<AgentId>, output: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            output: output.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_starts_idle() {
        assert_eq!(AgentState::default(), AgentState::Idle);
    }

    #[test]
    fn state_parses_from_display_form() {
        assert_eq!("Paused".parse::<AgentState>(), Ok(AgentState::Paused));
        assert_eq!(AgentState::Failed.to_string().parse(), Ok(AgentState::Failed));
        assert!("sleeping".parse::<AgentState>().is_err());
    }

    #[test]
    fn transition_table_is_exact() {
        use AgentState::*;
        let all = [Idle, Busy, Paused, Failed];
        let legal = [
            (Idle, Busy),
            (Busy, Idle),
            (Busy, Failed),
            (Busy, Paused),
            (Paused, Busy),
            (Failed, Idle),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn only_idle_and_failed_are_removable() {
        assert!(AgentState::Idle.is_removable());
        assert!(AgentState::Failed.is_removable());
        assert!(!AgentState::Busy.is_removable());
        assert!(!AgentState::Paused.is_removable());
    }

    #[test]
    fn descriptor_builder() {
        let d = AgentDescriptor::new("concierge_001", "AI Concierge", "llama-3.3-70b-versatile")
            .with_instruction("Be warm")
            .with_tool("google_search");
        assert!(d.has_capability("google_search"));
        assert!(!d.has_capability("code_execution"));
        assert_eq!(d.id.as_str(), "concierge_001");
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&AgentState::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
    }
}
