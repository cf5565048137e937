//! Error types for the Conclave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them so callers can still match on the precise kind.

use thiserror::Error;

use crate::agent::{AgentId, AgentOutput, AgentState};

/// The top-level error type for all Conclave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Registry / state machine ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- A2A bus ---
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    // --- Session memory ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- A single agent invocation ---
    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    // --- Mode-level outcomes ---
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    // --- Collaborators called outside an agent invocation ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(AgentId),

    #[error("Duplicate agent id: {0}")]
    DuplicateId(AgentId),

    #[error("Agent {agent_id} is {state} and cannot be removed")]
    Busy { agent_id: AgentId, state: AgentState },

    #[error("Agent {agent_id} is unavailable (currently {state})")]
    Unavailable { agent_id: AgentId, state: AgentState },

    #[error("Invalid transition for agent {agent_id}: {from} -> {to}")]
    InvalidTransition {
        agent_id: AgentId,
        from: AgentState,
        to: AgentState,
    },

    #[error("Registry full: capacity is {capacity} agents")]
    RegistryFull { capacity: usize },

    #[error("Agent {0} has no saved checkpoint")]
    NoCheckpoint(AgentId),

    #[error("Checkpoint rejected: {0}")]
    Checkpoint(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BusError {
    #[error("Recipient not found: {0}")]
    RecipientNotFound(AgentId),

    #[error("Message has no recipient")]
    MissingRecipient,

    #[error("Inbox closed for agent {0}")]
    InboxClosed(AgentId),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MemoryError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} is archived and read-only")]
    SessionArchived(String),

    #[error("Session {session_id} already holds the maximum of {limit} facts")]
    FactLimit { session_id: String, limit: usize },

    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// A failure of one agent invocation, tagged with the agent and the stage
/// that failed (`dispatch`, `generate`, `tool:<name>`).
#[derive(Debug, Clone, Error, PartialEq)]
#[error("agent {agent_id} failed at {stage}: {source}")]
pub struct InvocationError {
    pub agent_id: AgentId,
    pub stage: String,
    #[source]
    pub source: InvocationFailure,
}

impl InvocationError {
    pub fn new(
        agent_id: impl Into<AgentId>,
        stage: impl Into<String>,
        source: impl Into<InvocationFailure>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            stage: stage.into(),
            source: source.into(),
        }
    }

    /// Whether the underlying failure was a timeout of the external call.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.source,
            InvocationFailure::Provider(ProviderError::Timeout(_))
                | InvocationFailure::Tool(ToolError::Timeout { .. })
        )
    }
}

/// What went wrong inside an invocation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvocationFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("invocation abandoned")]
    Abandoned,
}

/// Mode-level outcomes that callers must be able to tell apart.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestrationError {
    #[error("No agents available for this request")]
    NoAgents,

    #[error("Too many agents requested: {requested} (max {max})")]
    TooManyAgents { requested: usize, max: usize },

    #[error("All {} agents failed", .failures.len())]
    AllAgentsFailed { failures: Vec<InvocationError> },

    #[error(
        "Pipeline aborted at stage {failed_stage} ({}) after {} completed stages: {cause}",
        .cause.agent_id,
        .completed.len()
    )]
    PartialPipelineFailure {
        failed_stage: usize,
        cause: InvocationError,
        completed: Vec<AgentOutput>,
    },

    #[error("Did not converge after {iterations} iterations")]
    NotConverged {
        iterations: usize,
        best_output: String,
        best_score: Option<f64>,
    },

    #[error("Request cancelled")]
    Cancelled,
}
