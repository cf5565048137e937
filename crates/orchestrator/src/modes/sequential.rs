//! sequential: a pipeline where each stage refines the previous output.

use conclave_core::Result;
use conclave_core::error::OrchestrationError;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::orchestrator::Orchestrator;

/// Prompt for a stage after the first.
pub(crate) fn stage_prompt(input: &str, previous_agent: &str, previous_output: &str) -> String {
    format!("Original request:\n{input}\n\nOutput from {previous_agent}:\n{previous_output}")
}

impl Orchestrator {
    pub(crate) async fn run_sequential(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let agents = ctx.agents.clone();

        for (stage, handle) in agents.iter().enumerate() {
            let prompt = match ctx.outputs.last() {
                Some(prev) => stage_prompt(&ctx.input, prev.agent_id.as_str(), &prev.output),
                None => ctx.input.clone(),
            };

            let outcome = match self
                .invoke_agent(ctx, handle, &prompt, format!("stage:{stage}"))
                .await
            {
                Ok(outcome) => outcome,
                Err(cause) => {
                    warn!(
                        stage,
                        agent_id = %handle.id(),
                        completed = ctx.outputs.len(),
                        "Pipeline stage failed"
                    );
                    return Err(OrchestrationError::PartialPipelineFailure {
                        failed_stage: stage,
                        cause,
                        completed: ctx.outputs.clone(),
                    }
                    .into());
                }
            };

            debug!(stage, agent_id = %handle.id(), "Pipeline stage completed");
            self.record_output(ctx, handle.id(), &outcome.output, &format!("stage:{stage}"))?;
            ctx.output = outcome.output;
        }
        Ok(())
    }
}
