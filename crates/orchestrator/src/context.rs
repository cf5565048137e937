//! Per-request execution context.

use conclave_agent::AgentHandle;
use conclave_core::error::InvocationError;
use conclave_core::{AgentOutput, SessionId};
use std::sync::Arc;

use crate::mode::ExecutionMode;
use crate::options::ProcessResult;

/// Transient state owned by exactly one in-flight `process` call.
pub(crate) struct ExecutionContext {
    pub trace_id: String,
    pub session_id: SessionId,
    pub mode: ExecutionMode,
    /// The user's request text
    pub input: String,
    /// Session context captured before the request was appended
    pub context: String,
    pub agents: Vec<Arc<AgentHandle>>,
    pub outputs: Vec<AgentOutput>,
    pub failures: Vec<InvocationError>,
    pub output: String,
    pub iterations: usize,
    pub converged: bool,
    pub score: Option<f64>,
}

impl ExecutionContext {
    pub fn new(
        trace_id: String,
        session_id: SessionId,
        mode: ExecutionMode,
        input: String,
        agents: Vec<Arc<AgentHandle>>,
    ) -> Self {
        Self {
            trace_id,
            session_id,
            mode,
            input,
            context: String::new(),
            agents,
            outputs: Vec::new(),
            failures: Vec::new(),
            output: String::new(),
            iterations: 1,
            converged: false,
            score: None,
        }
    }

    pub fn into_result(self, duration_ms: u64) -> ProcessResult {
        ProcessResult {
            trace_id: self.trace_id,
            session_id: self.session_id,
            mode: self.mode,
            output: self.output,
            outputs: self.outputs,
            failures: self.failures,
            iterations: self.iterations,
            converged: self.converged,
            score: self.score,
            duration_ms,
        }
    }
}
