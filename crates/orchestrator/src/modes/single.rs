//! single: one agent answers.

use conclave_core::Result;
use conclave_core::error::OrchestrationError;

use crate::context::ExecutionContext;
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    pub(crate) async fn run_single(&self, ctx: &mut ExecutionContext) -> Result<()> {
        let Some(handle) = ctx.agents.first().cloned() else {
            return Err(OrchestrationError::NoAgents.into());
        };

        let outcome = self
            .invoke_agent(ctx, &handle, &ctx.input, "single".into())
            .await?;
        self.record_output(ctx, handle.id(), &outcome.output, "single")?;
        ctx.output = outcome.output;
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
    async fn uses_first_registered_agent_by_default() {
        let model = Arc::new(ScriptedModel::new().reply("model-a", "Hello!"));
        let orchestrator = orchestrator(model, &[("a", "model-a"), ("b", "model-b")]);
        let sid = SessionId::from("s");

        let result = orchestrator
            .process(&sid, Message::user("hi"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap();

        assert_eq!(result.output, "Hello!");
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs[0].agent_id.as_str(), "a");

        let session = orchestrator.get_session(&sid).unwrap();
        let entries: Vec<(&str, &str)> = session
            .entries
            .iter()
            .map(|m| (m.sender(), m.content()))
            .collect();
        assert_eq!(entries, vec![("user", "hi"), ("a", "Hello!")]);
    }

    #[tokio::test]
    async fn honours_configured_default_agent() {
        let mut config = test_config(&[("a", "model-a"), ("b", "model-b")]);
        config.orchestrator.default_agent = Some("b".into());
        let model = Arc::new(ScriptedModel::new());
        let orchestrator = orchestrator_from(config, model.clone());

        orchestrator
            .process(&SessionId::from("s"), Message::user("hi"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap();
        assert_eq!(model.calls_for("model-a"), 0);
        assert_eq!(model.calls_for("model-b"), 1);
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let orchestrator = orchestrator(Arc::new(ScriptedModel::new()), &[("a", "model-a")]);
        let err = orchestrator
            .process(
                &SessionId::from("s"),
                Message::user("hi"),
                ExecutionMode::Single,
                ProcessOptions::new().with_agent("ghost"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::NotFound(id)) if id.as_str() == "ghost"));
    }

    #[tokio::test]
    async fn empty_registry_has_no_agents() {
        let orchestrator = orchestrator(Arc::new(ScriptedModel::new()), &[]);
        let err = orchestrator
            .process(&SessionId::from("s"), Message::user("hi"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Orchestration(OrchestrationError::NoAgents)));
    }

    #[tokio::test]
    async fn failure_is_surfaced_with_agent_and_stage() {
        let model = Arc::new(ScriptedModel::new().fail("model-a", "overloaded"));
        let orchestrator = orchestrator(model, &[("a", "model-a")]);

        let err = orchestrator
            .process(&SessionId::from("s"), Message::user("hi"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap_err();
        let Error::Invocation(e) = err else {
            panic!("expected an invocation error, got {err:?}");
        };
        assert_eq!(e.agent_id.as_str(), "a");
        assert_eq!(e.stage, "generate");
        assert!(matches!(e.source, InvocationFailure::Provider(_)));
        assert_eq!(orchestrator.get_agent(&"a".into()).unwrap().state, AgentState::Failed);
    }

    #[tokio::test]
    async fn busy_agent_is_unavailable_to_a_second_request() {
        let model = Arc::new(GatedModel::new("done"));
        let orchestrator = Arc::new(orchestrator(model.clone(), &[("a", "m")]));

        let first = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .process(&SessionId::from("s1"), Message::user("one"), ExecutionMode::Single, ProcessOptions::new())
                    .await
            })
        };
        settle().await;

        let err = orchestrator
            .process(&SessionId::from("s2"), Message::user("two"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap_err();
        let Error::Invocation(e) = err else {
            panic!("expected an invocation error, got {err:?}");
        };
        assert_eq!(e.stage, "dispatch");
        assert!(matches!(
            e.source,
            InvocationFailure::Agent(AgentError::Unavailable { state: AgentState::Busy, .. })
        ));

        model.release(1);
        assert_eq!(first.await.unwrap().unwrap().output, "done");
    }
}
