//! The Orchestrator — the single entry point for requests and agent control.

use chrono::Utc;
use conclave_agent::{AgentFilter, AgentHandle, AgentRegistry, AgentRunner, InvocationOutcome, Resumed};
use conclave_bus::{A2aBus, render_inbox};
use conclave_config::{AppConfig, OrchestratorConfig};
use conclave_core::error::{InvocationError, OrchestrationError};
use conclave_core::{
    AgentDescriptor, AgentId, AgentOutput, AgentState, AgentSummary, Checkpoint, DomainEvent,
    EventBus, InvocationEvent, Message, MetricsSnapshot, ModelProvider, ObservabilitySink, Result,
    SessionId, ToolRegistry,
};
use conclave_memory::{ModelSummarizer, SessionSnapshot, SessionStore, Summarizer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::evaluator::Evaluator;
use crate::mode::ExecutionMode;
use crate::options::{ProcessOptions, ProcessResult, ResumeOutcome, SystemStatus};

/// Routes requests to agents under one of the four execution modes.
///
/// Owns the registry, the session store, the A2A bus and the runner; all
/// are shared behind `Arc` so concurrent `process` calls can proceed
/// independently.
pub struct Orchestrator {
    pub(crate) config: OrchestratorConfig,
    default_model: String,
    pub(crate) registry: Arc<AgentRegistry>,
    store: Arc<SessionStore>,
    bus: Arc<A2aBus>,
    runner: Arc<AgentRunner>,
    events: Arc<EventBus>,
    sinks: Vec<Arc<dyn ObservabilitySink>>,
    pub(crate) evaluator: Option<Arc<dyn Evaluator>>,
}

impl Orchestrator {
    /// Build the engine from configuration and register the seeded agents.
    pub fn new(
        config: &AppConfig,
        provider: Arc<dyn ModelProvider>,
        tools: ToolRegistry,
    ) -> Result<Self> {
        let events = Arc::new(EventBus::default());
        let registry = Arc::new(
            AgentRegistry::new(config.orchestrator.max_agents).with_events(events.clone()),
        );
        let summarizer = Arc::new(
            ModelSummarizer::new(provider.clone(), config.summary_model())
                .with_timeout(config.orchestrator.invocation_timeout()),
        );
        let store = Arc::new(
            SessionStore::new(config.memory.clone(), summarizer).with_events(events.clone()),
        );
        let bus = Arc::new(A2aBus::new(registry.clone(), config.bus.inbox_capacity));
        let runner = Arc::new(
            AgentRunner::new(provider, Arc::new(tools))
                .with_timeout(config.orchestrator.invocation_timeout())
                .with_temperature(config.default_temperature)
                .with_max_tokens(config.default_max_tokens),
        );

        let orchestrator = Self {
            config: config.orchestrator.clone(),
            default_model: config.default_model.clone(),
            registry,
            store,
            bus,
            runner,
            sinks: vec![events.clone() as Arc<dyn ObservabilitySink>],
            events,
            evaluator: None,
        };

        for descriptor in &config.agents {
            orchestrator.register_agent(descriptor.clone())?;
        }

        info!(
            agents = orchestrator.registry.len(),
            tools = orchestrator.runner.tools().len(),
            provider = orchestrator.runner.provider_name(),
            "Orchestrator ready"
        );
        Ok(orchestrator)
    }

    /// Add an observability sink. Every invocation record goes to all sinks.
    pub fn with_sink(mut self, sink: Arc<dyn ObservabilitySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Use a custom loop-mode evaluator instead of agent grading.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Replace the compaction summarizer. Call before any session exists.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.store = Arc::new(
            SessionStore::new(self.store.config().clone(), summarizer)
                .with_events(self.events.clone()),
        );
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<A2aBus> {
        &self.bus
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // ── Requests ──────────────────────────────────────────────────────

    /// Run one request against a session.
    ///
    /// The session context is read before the request is appended; every
    /// output is written back before this returns, including on
    /// `PartialPipelineFailure` and `NotConverged`.
    pub async fn process(
        &self,
        session_id: &SessionId,
        message: Message,
        mode: ExecutionMode,
        options: ProcessOptions,
    ) -> Result<ProcessResult> {
        let started = Instant::now();
        self.store.open(session_id)?;
        let agents = self.select_agents(mode, &options)?;

        let trace_id = uuid::Uuid::new_v4().to_string();
        let mut ctx = ExecutionContext::new(
            trace_id.clone(),
            session_id.clone(),
            mode,
            message.content().to_string(),
            agents,
        );
        info!(
            session_id = %session_id,
            mode = %mode,
            agents = ctx.agents.len(),
            trace_id = %trace_id,
            "Processing request"
        );

        let outcome = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                warn!(session_id = %session_id, mode = %mode, "Request cancelled");
                Err(OrchestrationError::Cancelled.into())
            }
            result = self.run(&mut ctx, message, &options) => result,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(()) => info!(session_id = %session_id, mode = %mode, duration_ms, "Request completed"),
            Err(e) => warn!(session_id = %session_id, mode = %mode, duration_ms, error = %e, "Request failed"),
        }
        self.events.publish(DomainEvent::RequestCompleted {
            trace_id,
            session_id: session_id.clone(),
            mode: mode.to_string(),
            success: outcome.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        outcome.map(|()| ctx.into_result(duration_ms))
    }

    async fn run(
        &self,
        ctx: &mut ExecutionContext,
        message: Message,
        options: &ProcessOptions,
    ) -> Result<()> {
        ctx.context = self.store.get_context(&ctx.session_id).await?;
        self.store.append(&ctx.session_id, message)?;

        match ctx.mode {
            ExecutionMode::Single => self.run_single(ctx).await,
            ExecutionMode::Parallel => self.run_parallel(ctx).await,
            ExecutionMode::Sequential => self.run_sequential(ctx).await,
            ExecutionMode::Loop => self.run_loop(ctx, options).await,
        }
    }

    fn select_agents(
        &self,
        mode: ExecutionMode,
        options: &ProcessOptions,
    ) -> Result<Vec<Arc<AgentHandle>>> {
        let ids = match mode {
            ExecutionMode::Single | ExecutionMode::Loop => vec![self.primary_agent(options)?],
            ExecutionMode::Parallel | ExecutionMode::Sequential => {
                if options.agents.is_empty() {
                    self.registry.ids()
                } else {
                    options.agents.clone()
                }
            }
        };

        if ids.is_empty() {
            return Err(OrchestrationError::NoAgents.into());
        }
        if mode == ExecutionMode::Parallel && ids.len() > self.config.max_parallel {
            return Err(OrchestrationError::TooManyAgents {
                requested: ids.len(),
                max: self.config.max_parallel,
            }
            .into());
        }

        ids.iter()
            .map(|id| self.registry.get(id).map_err(Into::into))
            .collect()
    }

    fn primary_agent(&self, options: &ProcessOptions) -> Result<AgentId> {
        options
            .agents
            .first()
            .cloned()
            .or_else(|| self.config.default_agent.as_deref().map(AgentId::from))
            .or_else(|| self.registry.ids().into_iter().next())
            .ok_or_else(|| OrchestrationError::NoAgents.into())
    }

    /// Run one agent invocation and emit its observability record.
    /// Pending inbox messages are folded into the context once the agent
    /// has been dispatched, so a rejected dispatch leaves them queued.
    pub(crate) async fn invoke_agent(
        &self,
        ctx: &ExecutionContext,
        handle: &AgentHandle,
        prompt: &str,
        step: String,
    ) -> std::result::Result<InvocationOutcome, InvocationError> {
        let bus = &self.bus;
        let agent_id = handle.id();

        let started = Instant::now();
        let result = self
            .runner
            .invoke_with(
                handle,
                Some(ctx.session_id.clone()),
                prompt,
                &ctx.context,
                move || async move { render_inbox(&bus.drain(agent_id).await) },
            )
            .await;

        self.emit(InvocationEvent {
            trace_id: ctx.trace_id.clone(),
            session_id: ctx.session_id.clone(),
            agent_id: handle.id().clone(),
            mode: ctx.mode.to_string(),
            step,
            success: result.is_ok(),
            latency_ms: started.elapsed().as_millis() as u64,
            tokens: result.as_ref().map(|o| o.tokens).unwrap_or(0),
            error: result.as_ref().err().map(|e| e.to_string()),
            timestamp: Utc::now(),
        });
        result
    }

    /// Append an agent's output to the session and to the request's outputs.
    pub(crate) fn record_output(
        &self,
        ctx: &mut ExecutionContext,
        agent_id: &AgentId,
        output: &str,
        step: &str,
    ) -> Result<()> {
        let message = Message::from_agent(agent_id, output)
            .with_metadata("trace_id", ctx.trace_id.clone())
            .with_metadata("mode", ctx.mode.as_str())
            .with_metadata("step", step);
        self.store.append(&ctx.session_id, message)?;
        ctx.outputs.push(AgentOutput::new(agent_id, output));
        Ok(())
    }

    fn emit(&self, event: InvocationEvent) {
        debug!(
            agent_id = %event.agent_id,
            step = %event.step,
            success = event.success,
            latency_ms = event.latency_ms,
            "Invocation recorded"
        );
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }

    // ── Agent control ─────────────────────────────────────────────────

    /// Register an agent. An empty model falls back to the default model.
    pub fn register_agent(&self, mut descriptor: AgentDescriptor) -> Result<AgentId> {
        if descriptor.model.is_empty() {
            descriptor.model = self.default_model.clone();
        }
        Ok(self.registry.register(descriptor)?)
    }

    pub fn unregister_agent(&self, id: &AgentId) -> Result<AgentDescriptor> {
        let descriptor = self.registry.unregister(id)?;
        self.bus.forget(id);
        Ok(descriptor)
    }

    pub fn get_agent(&self, id: &AgentId) -> Result<AgentSummary> {
        Ok(self.registry.get(id)?.summary())
    }

    pub fn list_agents(&self, filter: &AgentFilter) -> Vec<AgentSummary> {
        self.registry.list(filter)
    }

    pub fn pause_agent(&self, id: &AgentId) -> Result<()> {
        Ok(self.registry.pause(id)?)
    }

    /// Resume a paused agent.
    ///
    /// If the invocation that parked it is gone, the work is finished here
    /// from the checkpoint and the output is appended to the checkpoint's
    /// session.
    pub async fn resume_agent(&self, id: &AgentId) -> Result<ResumeOutcome> {
        let blob = match self.registry.resume(id)? {
            Resumed::Attached => return Ok(ResumeOutcome::Attached),
            Resumed::Orphaned(blob) => blob,
        };

        let handle = self.registry.get(id)?;
        let session_id = Checkpoint::from_blob(&blob)
            .ok()
            .and_then(|c| c.session_id);

        let started = Instant::now();
        let result = self.runner.continue_from(&handle, &blob).await;
        if let Some(session_id) = &session_id {
            self.emit(InvocationEvent {
                trace_id: uuid::Uuid::new_v4().to_string(),
                session_id: session_id.clone(),
                agent_id: id.clone(),
                mode: "resume".into(),
                step: "continue".into(),
                success: result.is_ok(),
                latency_ms: started.elapsed().as_millis() as u64,
                tokens: result.as_ref().map(|o| o.tokens).unwrap_or(0),
                error: result.as_ref().err().map(|e| e.to_string()),
                timestamp: Utc::now(),
            });
        }

        let outcome = result?;
        if let Some(session_id) = &session_id {
            self.store.append(
                session_id,
                Message::from_agent(id, outcome.output.clone()).with_metadata("step", "resumed"),
            )?;
        }
        Ok(ResumeOutcome::Continued(AgentOutput::new(id, outcome.output)))
    }

    /// `failed -> idle`.
    pub fn reset_agent(&self, id: &AgentId) -> Result<()> {
        Ok(self.registry.reset(id)?)
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_session(&self, id: &SessionId) -> Result<SessionSnapshot> {
        Ok(self.store.snapshot(id)?)
    }

    /// Metrics merged from every sink.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let mut merged = MetricsSnapshot::default();
        for sink in &self.sinks {
            let snapshot = sink.metrics();
            merged.counters.extend(snapshot.counters);
            merged.timers.extend(snapshot.timers);
        }
        merged
    }

    pub fn status(&self) -> SystemStatus {
        let agents: std::collections::BTreeMap<String, AgentState> = self
            .registry
            .list(&AgentFilter::all())
            .into_iter()
            .map(|a| (a.id.to_string(), a.state))
            .collect();
        SystemStatus {
            total_agents: agents.len(),
            active_sessions: self.store.active_count(),
            archived_sessions: self.store.archived_count(),
            registered_tools: self.runner.tools().len(),
            agents,
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("store", &self.store)
            .field("runner", &self.runner)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use conclave_core::error::{AgentError, MemoryError};
    use conclave_core::Error;

    #[tokio::test]
    async fn seeds_agents_from_config() {
        let mut config = test_config(&[("a", "model-a"), ("b", "")]);
        config.default_model = "fallback".into();
        let orchestrator =
            Orchestrator::new(&config, Arc::new(ScriptedModel::new()), ToolRegistry::new()).unwrap();

        assert_eq!(orchestrator.registry().len(), 2);
        assert_eq!(orchestrator.get_agent(&"b".into()).unwrap().model, "fallback");
    }

    #[tokio::test]
    async fn duplicate_seed_is_rejected() {
        let config = test_config(&[("a", "m"), ("a", "m")]);
        let err = Orchestrator::new(&config, Arc::new(ScriptedModel::new()), ToolRegistry::new())
            .unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn archived_session_rejects_requests() {
        let orchestrator = orchestrator(Arc::new(ScriptedModel::new()), &[("a", "model-a")]);
        let sid = SessionId::from("s");
        orchestrator.store().open(&sid).unwrap();
        orchestrator.store().archive(&sid).unwrap();

        let err = orchestrator
            .process(&sid, Message::user("hi"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Memory(MemoryError::SessionArchived(_))));
    }

    #[tokio::test]
    async fn pending_inbox_messages_reach_the_prompt() {
        let model = Arc::new(ScriptedModel::new());
        let orchestrator = orchestrator(model.clone(), &[("a", "model-a"), ("b", "model-b")]);
        orchestrator
            .bus()
            .direct(Message::from_agent(&"b".into(), "The user prefers trains").to("a"))
            .await
            .unwrap();

        orchestrator
            .process(
                &SessionId::from("s"),
                Message::user("Plan my route"),
                ExecutionMode::Single,
                ProcessOptions::new().with_agent("a"),
            )
            .await
            .unwrap();

        let requests = model.requests_for("model-a");
        let request = &requests[0];
        assert!(request.prompt.contains("Messages from other agents:\n- [b] The user prefers trains"));
        assert!(request.prompt.ends_with("Plan my route"));
        assert_eq!(orchestrator.bus().pending(&"a".into()), 0);
    }

    #[tokio::test]
    async fn rejected_dispatch_leaves_inbox_queued() {
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
        assert_eq!(orchestrator.get_agent(&"a".into()).unwrap().state, AgentState::Busy);

        orchestrator
            .bus()
            .direct(Message::user("read this next").to("a"))
            .await
            .unwrap();
        let err = orchestrator
            .process(&SessionId::from("s2"), Message::user("two"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Invocation(ref e) if e.stage == "dispatch"));
        assert_eq!(orchestrator.bus().pending(&"a".into()), 1);

        model.release(2);
        first.await.unwrap().unwrap();
        orchestrator
            .process(&SessionId::from("s2"), Message::user("three"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap();
        assert_eq!(orchestrator.bus().pending(&"a".into()), 0);
    }

    #[tokio::test]
    async fn cancelled_request_fails_busy_agent() {
        let model = Arc::new(GatedModel::new("never"));
        let orchestrator = Arc::new(orchestrator(model.clone(), &[("a", "m")]));
        let cancel = tokio_util::sync::CancellationToken::new();

        let request = {
            let (orchestrator, cancel) = (orchestrator.clone(), cancel.clone());
            tokio::spawn(async move {
                orchestrator
                    .process(
                        &SessionId::from("s"),
                        Message::user("hi"),
                        ExecutionMode::Single,
                        ProcessOptions::new().with_cancel(cancel),
                    )
                    .await
            })
        };
        settle().await;
        assert_eq!(model.entered(), 1);
        assert_eq!(orchestrator.get_agent(&"a".into()).unwrap().state, AgentState::Busy);

        cancel.cancel();
        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Orchestration(OrchestrationError::Cancelled)));

        let summary = orchestrator.get_agent(&"a".into()).unwrap();
        assert_eq!(summary.state, AgentState::Failed);
        assert!(!summary.has_checkpoint);
        assert_eq!(summary.last_error.as_deref(), Some("invocation abandoned"));

        orchestrator.reset_agent(&"a".into()).unwrap();
        assert_eq!(orchestrator.get_agent(&"a".into()).unwrap().state, AgentState::Idle);
    }

    #[tokio::test]
    async fn every_invocation_is_recorded() {
        let telemetry = Arc::new(conclave_telemetry::TelemetryEngine::new());
        let model = Arc::new(ScriptedModel::new().fail("model-b", "overloaded"));
        let orchestrator = orchestrator(model, &[("a", "model-a"), ("b", "model-b")])
            .with_sink(telemetry.clone());
        let mut events = orchestrator.events().subscribe();

        let result = orchestrator
            .process(
                &SessionId::from("s"),
                Message::user("hi"),
                ExecutionMode::Parallel,
                ProcessOptions::new(),
            )
            .await
            .unwrap();

        let trace = telemetry.get_trace(&result.trace_id).unwrap();
        assert_eq!(trace.spans.len(), 2);
        assert_eq!(trace.failure_count(), 1);
        assert_eq!(orchestrator.get_metrics().counter("agent.invocations"), 2);

        let mut finished = 0;
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            match event.as_ref() {
                DomainEvent::InvocationFinished(_) => finished += 1,
                DomainEvent::RequestCompleted { success, .. } => completed = *success,
                _ => {}
            }
        }
        assert_eq!(finished, 2);
        assert!(completed);
    }

    #[tokio::test]
    async fn status_reports_agents_and_sessions() {
        let orchestrator = orchestrator(Arc::new(ScriptedModel::new()), &[("a", "model-a")]);
        orchestrator
            .process(&SessionId::from("s1"), Message::user("hi"), ExecutionMode::Single, ProcessOptions::new())
            .await
            .unwrap();
        orchestrator.store().open(&SessionId::from("s2")).unwrap();
        orchestrator.store().archive(&SessionId::from("s2")).unwrap();

        let status = orchestrator.status();
        assert_eq!(status.total_agents, 1);
        assert_eq!(status.active_sessions, 1);
        assert_eq!(status.archived_sessions, 1);
        assert_eq!(status.agents.get("a"), Some(&AgentState::Idle));
    }

    #[tokio::test]
    async fn unregister_forgets_inbox() {
        let orchestrator = orchestrator(Arc::new(ScriptedModel::new()), &[("a", "m"), ("b", "m")]);
        orchestrator
            .bus()
            .direct(Message::user("note").to("b"))
            .await
            .unwrap();
        orchestrator.unregister_agent(&"b".into()).unwrap();
        assert_eq!(orchestrator.bus().pending(&"b".into()), 0);
        assert!(matches!(
            orchestrator.get_agent(&"b".into()),
            Err(Error::Agent(AgentError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn paused_request_survives_cancellation_and_resumes_from_checkpoint() {
        let model = Arc::new(GatedModel::new(
            "Checking.\nuse_tool: {\"name\": \"echo\", \"params\": {\"city\": \"Lisbon\"}}\nDone.",
        ));
        let echo = Arc::new(EchoTool::default());
        let mut tools = ToolRegistry::new();
        tools.register(echo.clone());
        let config = test_config(&[]);
        let orchestrator = Arc::new(
            Orchestrator::new(&config, model.clone(), tools).unwrap(),
        );
        orchestrator
            .register_agent(AgentDescriptor::new("a", "A", "m").with_tool("echo"))
            .unwrap();

        let sid = SessionId::from("s");
        let cancel = tokio_util::sync::CancellationToken::new();
        let request = {
            let (orchestrator, sid, cancel) = (orchestrator.clone(), sid.clone(), cancel.clone());
            tokio::spawn(async move {
                orchestrator
                    .process(
                        &sid,
                        Message::user("weather?"),
                        ExecutionMode::Single,
                        ProcessOptions::new().with_cancel(cancel),
                    )
                    .await
            })
        };
        settle().await;
        assert_eq!(model.entered(), 1);

        // Pause mid-generation, then let the model answer: the run parks at
        // the tool directive.
        orchestrator.pause_agent(&"a".into()).unwrap();
        model.release(1);
        settle().await;
        assert_eq!(orchestrator.get_agent(&"a".into()).unwrap().state, AgentState::Paused);
        assert_eq!(echo.calls(), 0);

        cancel.cancel();
        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Orchestration(OrchestrationError::Cancelled)));
        let summary = orchestrator.get_agent(&"a".into()).unwrap();
        assert_eq!(summary.state, AgentState::Paused);
        assert!(summary.has_checkpoint);

        let outcome = orchestrator.resume_agent(&"a".into()).await.unwrap();
        let ResumeOutcome::Continued(output) = outcome else {
            panic!("expected the orphaned checkpoint to be continued");
        };
        assert_eq!(
            output.output,
            "Checking.\nTool result: {\"city\":\"Lisbon\"}\nDone."
        );
        assert_eq!(model.entered(), 1);
        assert_eq!(echo.calls(), 1);
        assert_eq!(orchestrator.get_agent(&"a".into()).unwrap().state, AgentState::Idle);

        let session = orchestrator.get_session(&sid).unwrap();
        assert_eq!(session.entries.last().unwrap().content(), output.output);
    }
}
