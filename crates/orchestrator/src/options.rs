//! Request options and results for [`Orchestrator::process`](crate::Orchestrator::process).

use conclave_core::error::InvocationError;
use conclave_core::{AgentId, AgentOutput, AgentState, SessionId};
use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

use crate::mode::ExecutionMode;

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Agents to use, in order. Empty means the mode's default selection.
    pub agents: Vec<AgentId>,

    /// Agent that grades loop-mode iterations (defaults to the primary)
    pub evaluator_agent: Option<AgentId>,

    /// Overrides the configured loop iteration cap
    pub max_iterations: Option<usize>,

    /// Cancels the whole request; in-flight invocations are abandoned.
    pub cancel: CancellationToken,
}

impl ProcessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, id: impl Into<AgentId>) -> Self {
        self.agents.push(id.into());
        self
    }

    pub fn with_agents<I, A>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<AgentId>,
    {
        self.agents.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn with_evaluator_agent(mut self, id: impl Into<AgentId>) -> Self {
        self.evaluator_agent = Some(id.into());
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// The aggregated result of a successful request.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// Id shared by every observability record of this request
    pub trace_id: String,
    pub session_id: SessionId,
    pub mode: ExecutionMode,

    /// Final answer: the agent's output, the attributed concatenation in
    /// parallel mode, the last stage in sequential mode, or the converged
    /// iteration in loop mode.
    pub output: String,

    /// Every successful contribution, in the order it was produced
    pub outputs: Vec<AgentOutput>,

    /// Per-agent failures recovered into a partial result (parallel only)
    pub failures: Vec<InvocationError>,

    /// Loop iterations run (1 for the other modes)
    pub iterations: usize,

    pub converged: bool,

    /// Evaluator score of the returned output, if it gave one
    pub score: Option<f64>,

    pub duration_ms: u64,
}

impl ProcessResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// What `resume_agent` did.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeOutcome {
    /// The parked invocation was woken and continues inside its request.
    Attached,
    /// Nobody was waiting; the work was finished from the checkpoint.
    Continued(AgentOutput),
}

/// Point-in-time system status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub total_agents: usize,
    pub active_sessions: usize,
    pub archived_sessions: usize,
    pub registered_tools: usize,
    pub agents: BTreeMap<String, AgentState>,
}
