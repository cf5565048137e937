//! parallel: fan the same input out to every selected agent, then
//! aggregate with attribution.

use conclave_core::Result;
use conclave_core::error::OrchestrationError;
use futures::future::join_all;
use tracing::{info, warn};

use crate::context::ExecutionContext;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    pub(crate) async fn run_parallel(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let agents = ctx.agents.clone();
        let results = {
            let shared: &ExecutionContext = ctx;
            join_all(agents.iter().enumerate().map(|(i, handle)| {
                self.invoke_agent(shared, handle, &shared.input, format!("branch:{i}"))
            }))
            .await
        };

        let mut sections = Vec::new();
        for (i, (handle, result)) in agents.iter().zip(results).enumerate() {
            match result {
                Ok(outcome) => {
                    self.record_output(ctx, handle.id(), &outcome.output, &format!("branch:{i}"))?;
                    sections.push(format!("[{}]: {}", handle.id(), outcome.output));
                }
                Err(e) => {
                    warn!(agent_id = %handle.id(), error = %e, "Parallel branch failed");
                    ctx.failures.push(e);
                }
            }
        }

        if sections.is_empty() {
            return Err(OrchestrationError::AllAgentsFailed {
                failures: std::mem::take(&mut ctx.failures),
            }
            .into());
        }

        info!(
            succeeded = sections.len(),
            failed = ctx.failures.len(),
            "Parallel fan-out joined"
        );
        ctx.output = sections.join("\n\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_helpers::*;
    use crate::{ExecutionMode, ProcessOptions};
    use conclave_core::error::{AgentError, InvocationFailure, OrchestrationError};
    use conclave_core::{AgentState, Error, Message, SessionId};
    use std::sync::Arc;

    #[tokio::test]
    async fn one_failure_is_recorded_as_partial_result() {
        let model = Arc::new(
            ScriptedModel::new()
                .reply("model-a", "A says hi")
                .fail("model-b", "overloaded")
                .reply("model-c", "C says hi"),
        );
        let orchestrator = orchestrator(
            model,
            &[("a", "model-a"), ("b", "model-b"), ("c", "model-c")],
        );
        let sid = SessionId::from("s");

        let result = orchestrator
            .process(&sid, Message::user("hi"), ExecutionMode::Parallel, ProcessOptions::new())
            .await
            .unwrap();

        assert_eq!(result.output, "[a]: A says hi\n\n[c]: C says hi");
        assert!(result.is_partial());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].agent_id.as_str(), "b");
        assert_eq!(orchestrator.get_agent(&"b".into()).unwrap().state, AgentState::Failed);

        let session = orchestrator.get_session(&sid).unwrap();
        let senders: Vec<&str> = session.entries.iter().map(|m| m.sender()).collect();
        assert_eq!(senders, vec!["user", "a", "c"]);
    }

    #[tokio::test]
    async fn all_failures_yield_all_agents_failed() {
        let model = Arc::new(ScriptedModel::new().fail("model-a", "x").fail("model-b", "y"));
        let orchestrator = orchestrator(model, &[("a", "model-a"), ("b", "model-b")]);

        let err = orchestrator
            .process(&SessionId::from("s"), Message::user("hi"), ExecutionMode::Parallel, ProcessOptions::new())
            .await
            .unwrap_err();
        let Error::Orchestration(OrchestrationError::AllAgentsFailed { failures }) = err else {
            panic!("expected AllAgentsFailed, got {err:?}");
        };
        let ids: Vec<&str> = failures.iter().map(|f| f.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn too_many_agents_is_rejected_before_dispatch() {
        let mut config = test_config(&[("a", "m"), ("b", "m"), ("c", "m")]);
        config.orchestrator.max_parallel = 2;
        let model = Arc::new(ScriptedModel::new());
        let orchestrator = orchestrator_from(config, model.clone());

        let err = orchestrator
            .process(&SessionId::from("s"), Message::user("hi"), ExecutionMode::Parallel, ProcessOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Orchestration(OrchestrationError::TooManyAgents { requested: 3, max: 2 })
        ));
        assert_eq!(model.total_calls(), 0);
    }

    #[tokio::test]
    async fn branches_run_concurrently() {
        let model = Arc::new(GatedModel::new("ok"));
        let orchestrator = Arc::new(orchestrator(model.clone(), &[("a", "m"), ("b", "m")]));

        let request = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .process(&SessionId::from("s"), Message::user("hi"), ExecutionMode::Parallel, ProcessOptions::new())
                    .await
            })
        };
        settle().await;
        // Both invocations are in flight before either is allowed to finish
        assert_eq!(model.entered(), 2);

        model.release(2);
        let result = request.await.unwrap().unwrap();
        assert_eq!(result.outputs.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_selection_records_dispatch_failure() {
        let model = Arc::new(GatedModel::new("ok"));
        model.release(1);
        let orchestrator = orchestrator(model, &[("a", "m")]);

        let result = orchestrator
            .process(
                &SessionId::from("s"),
                Message::user("hi"),
                ExecutionMode::Parallel,
                ProcessOptions::new().with_agents(["a", "a"]),
            )
            .await
            .unwrap();
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.failures[0].stage, "dispatch");
        assert!(matches!(
            result.failures[0].source,
            InvocationFailure::Agent(AgentError::Unavailable { .. })
        ));
    }
}
