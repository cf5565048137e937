//! One agent invocation, driven as a sequence of resumable steps.
//!
//! An invocation is a **generate** step (one model call) followed by one
//! step per `use_tool:` directive in the generated text. The checkpoint is
//! saved at every step boundary; a paused agent parks there until resumed,
//! and a resumed run never repeats a step it already completed.

use conclave_core::error::{InvocationError, ProviderError, ToolError};
use conclave_core::{
    AgentDescriptor, Checkpoint, InvocationRequest, ModelProvider, ModelResponse, SessionId,
    ToolCall, ToolRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::slot::AgentHandle;

const TOOL_DIRECTIVE: &str = "use_tool:";

/// The finished result of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    pub output: String,
    /// Tokens reported by the model, 0 when unknown
    pub tokens: u32,
}

/// Runs agents against the model and tool collaborators.
pub struct AgentRunner {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    /// Bound on each external call, not on time spent paused
    timeout: Duration,
    temperature: f32,
    max_tokens: Option<u32>,
}

/// Forces the agent out of `busy` if the invocation future is dropped
/// before it reaches a terminal state.
struct InvocationGuard<'a> {
    handle: &'a AgentHandle,
    armed: bool,
}

impl Drop for InvocationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.handle.abandon();
        }
    }
}

impl AgentRunner {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            timeout: Duration::from_secs(60),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// The agent's instruction extended with the tools it may call.
    pub fn system_prompt(&self, descriptor: &AgentDescriptor) -> String {
        let available = self.tools.describe(&descriptor.tools);
        if available.is_empty() {
            return descriptor.instruction.clone();
        }
        format!(
            "{}\n\nAvailable tools:\n{}",
            descriptor.instruction,
            available.join("\n")
        )
    }

    /// Dispatch `prompt` to an idle agent and run it to completion.
    ///
    /// Fails fast with stage `dispatch` if the agent is not idle. Dropping
    /// the returned future while the agent is `busy` forces it to `failed`.
    pub async fn invoke(
        &self,
        handle: &AgentHandle,
        session_id: Option<SessionId>,
        prompt: &str,
        context: &str,
    ) -> Result<InvocationOutcome, InvocationError> {
        self.invoke_with(handle, session_id, prompt, context, || async { None })
            .await
    }

    /// Like [`invoke`](Self::invoke), but `extend_context` runs only after
    /// the agent went `busy`. Whatever it returns is appended to `context`;
    /// a failed dispatch never calls it.
    pub async fn invoke_with<F, Fut>(
        &self,
        handle: &AgentHandle,
        session_id: Option<SessionId>,
        prompt: &str,
        context: &str,
        extend_context: F,
    ) -> Result<InvocationOutcome, InvocationError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        let mut checkpoint = Checkpoint::start(
            handle.id().clone(),
            session_id,
            self.system_prompt(handle.descriptor()),
            prompt,
            context,
        );
        let blob = checkpoint
            .to_blob()
            .map_err(|e| InvocationError::new(handle.id(), "dispatch", e))?;
        handle
            .begin(blob)
            .map_err(|e| InvocationError::new(handle.id(), "dispatch", e))?;
        let guard = InvocationGuard {
            handle,
            armed: true,
        };

        debug!(agent_id = %handle.id(), "Invocation dispatched");
        if let Some(extra) = extend_context().await {
            checkpoint.context = if checkpoint.context.is_empty() {
                extra
            } else {
                format!("{}\n\n{extra}", checkpoint.context)
            };
        }
        self.drive(guard, checkpoint).await
    }

    /// Continue an orphaned checkpoint blob after a `resume` that reported
    /// nobody attached. The agent is already `busy`; an undecodable blob
    /// fails it.
    pub async fn continue_from(
        &self,
        handle: &AgentHandle,
        blob: &[u8],
    ) -> Result<InvocationOutcome, InvocationError> {
        let checkpoint = match Checkpoint::from_blob(blob) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                let err = InvocationError::new(handle.id(), "checkpoint", e);
                Self::fail(handle, &err).await;
                return Err(err);
            }
        };
        info!(
            agent_id = %handle.id(),
            cursor = checkpoint.cursor,
            "Continuing invocation from checkpoint"
        );
        let guard = InvocationGuard {
            handle,
            armed: true,
        };
        self.drive(guard, checkpoint).await
    }

    async fn drive(
        &self,
        mut guard: InvocationGuard<'_>,
        mut checkpoint: Checkpoint,
    ) -> Result<InvocationOutcome, InvocationError> {
        let handle = guard.handle;

        let result = match self.run_steps(handle, &mut checkpoint).await {
            Ok(()) => self.complete(handle, &checkpoint).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            Self::fail(handle, e).await;
        }
        guard.armed = false;

        result.map(|()| InvocationOutcome {
            output: checkpoint.partial_output(),
            tokens: checkpoint.tokens,
        })
    }

    /// `busy -> failed`, parking first if the agent is paused.
    async fn fail(handle: &AgentHandle, error: &InvocationError) {
        let reason = error.to_string();
        while !handle.try_fail(&reason) {
            handle.wait_resumed().await;
        }
    }

    async fn run_steps(
        &self,
        handle: &AgentHandle,
        checkpoint: &mut Checkpoint,
    ) -> Result<(), InvocationError> {
        if checkpoint.generated.is_none() {
            self.boundary(handle, checkpoint).await?;
            let response = self.generate(handle.descriptor(), checkpoint).await?;
            checkpoint.tokens += response.usage.map(|u| u.total_tokens).unwrap_or(0);
            checkpoint.generated = Some(response.text);
        }

        let lines: Vec<String> = checkpoint
            .generated
            .as_deref()
            .unwrap_or_default()
            .split('\n')
            .map(str::to_string)
            .collect();

        while checkpoint.cursor < lines.len() {
            let line = &lines[checkpoint.cursor];
            match tool_directive(line) {
                Some(payload) => {
                    self.boundary(handle, checkpoint).await?;
                    let rendered = self.run_tool(handle.descriptor(), payload).await?;
                    checkpoint.output.push(rendered);
                }
                None => checkpoint.output.push(line.clone()),
            }
            checkpoint.cursor += 1;
        }
        Ok(())
    }

    /// Save progress; park here while the agent is paused.
    async fn boundary(
        &self,
        handle: &AgentHandle,
        checkpoint: &mut Checkpoint,
    ) -> Result<(), InvocationError> {
        let blob = checkpoint
            .to_blob()
            .map_err(|e| InvocationError::new(handle.id(), "checkpoint", e))?;
        if !handle.save_progress(blob) {
            return Ok(());
        }

        debug!(agent_id = %handle.id(), cursor = checkpoint.cursor, "Parked at step boundary");
        handle.wait_resumed().await;

        if let Some(blob) = handle.checkpoint_blob() {
            *checkpoint = Checkpoint::from_blob(&blob)
                .map_err(|e| InvocationError::new(handle.id(), "checkpoint", e))?;
        }
        Ok(())
    }

    async fn complete(
        &self,
        handle: &AgentHandle,
        checkpoint: &Checkpoint,
    ) -> Result<(), InvocationError> {
        let blob = checkpoint
            .to_blob()
            .map_err(|e| InvocationError::new(handle.id(), "checkpoint", e))?;
        while !handle.try_complete(blob.clone()) {
            handle.wait_resumed().await;
        }
        info!(
            agent_id = %handle.id(),
            lines = checkpoint.output.len(),
            tokens = checkpoint.tokens,
            "Invocation completed"
        );
        Ok(())
    }

    async fn generate(
        &self,
        descriptor: &AgentDescriptor,
        checkpoint: &Checkpoint,
    ) -> Result<ModelResponse, InvocationError> {
        let prompt = if checkpoint.context.is_empty() {
            checkpoint.prompt.clone()
        } else {
            format!("{}\n\n{}", checkpoint.context, checkpoint.prompt)
        };

        let mut request = InvocationRequest::new(&descriptor.model, prompt)
            .with_system(&checkpoint.system)
            .with_temperature(self.temperature);
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        match tokio::time::timeout(self.timeout, self.provider.invoke(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(InvocationError::new(&descriptor.id, "generate", e)),
            Err(_) => Err(InvocationError::new(
                &descriptor.id,
                "generate",
                ProviderError::Timeout(format!(
                    "no response from {} within {}s",
                    self.provider.name(),
                    self.timeout.as_secs()
                )),
            )),
        }
    }

    /// Execute one directive. Only a timeout fails the invocation; every
    /// other problem is rendered into the output for the agent's reader.
    async fn run_tool(
        &self,
        descriptor: &AgentDescriptor,
        payload: &str,
    ) -> Result<String, InvocationError> {
        let call: ToolCall = match serde_json::from_str(payload) {
            Ok(call) => call,
            Err(e) => return Ok(format!("Tool execution error: {e}")),
        };

        let tool = match self.tools.get(&call.name) {
            Some(tool) if descriptor.has_capability(&call.name) => tool,
            _ => {
                debug!(agent_id = %descriptor.id, tool = %call.name, "Tool not available to agent");
                return Ok(format!("Tool '{}' not found", call.name));
            }
        };

        debug!(agent_id = %descriptor.id, tool = %call.name, "Executing tool");
        match tokio::time::timeout(self.timeout, tool.call(call.arguments)).await {
            Ok(Ok(result)) => Ok(format!("Tool result: {result}")),
            Ok(Err(e)) => {
                warn!(agent_id = %descriptor.id, tool = %call.name, error = %e, "Tool call failed");
                Ok(format!("Tool execution error: {e}"))
            }
            Err(_) => Err(InvocationError::new(
                &descriptor.id,
                format!("tool:{}", call.name),
                ToolError::Timeout {
                    tool_name: call.name,
                    timeout_secs: self.timeout.as_secs(),
                },
            )),
        }
    }
}

impl std::fmt::Debug for AgentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("provider", &self.provider.name())
            .field("tools", &self.tools.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// The JSON payload of a `use_tool:` line.
fn tool_directive(line: &str) -> Option<&str> {
    line.trim_start()
        .strip_prefix(TOOL_DIRECTIVE)
        .map(str::trim)
}
