//! Test doubles shared by the orchestrator's unit tests.

use async_trait::async_trait;
use conclave_config::AppConfig;
use conclave_core::error::{ProviderError, ToolError};
use conclave_core::{
    AgentDescriptor, InvocationRequest, ModelProvider, ModelResponse, Tool, ToolRegistry,
    ToolResult,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

use crate::Orchestrator;

/// Replies scripted per model name, consumed in order. An exhausted script
/// answers `"ok"`.
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ProviderError>>>>,
    requests: Mutex<Vec<InvocationRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, model: &str, text: &str) -> Self {
        self.push(model, Ok(text.to_string()));
        self
    }

    pub fn fail(self, model: &str, message: &str) -> Self {
        self.push(
            model,
            Err(ProviderError::ApiError {
                status_code: 503,
                message: message.to_string(),
            }),
        );
        self
    }

    fn push(&self, model: &str, entry: Result<String, ProviderError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(entry);
    }

    pub fn requests_for(&self, model: &str) -> Vec<InvocationRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model == model)
            .cloned()
            .collect()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.requests_for(model).len()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: InvocationRequest) -> Result<ModelResponse, ProviderError> {
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front);
        self.requests.lock().unwrap().push(request);
        match next {
            Some(Ok(text)) => Ok(ModelResponse::text(text)),
            Some(Err(e)) => Err(e),
            None => Ok(ModelResponse::text("ok")),
        }
    }
}

/// Blocks every invocation until the test releases a permit.
pub struct GatedModel {
    reply: String,
    entered: AtomicUsize,
    gate: Semaphore,
}

impl GatedModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            entered: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        }
    }

    /// Invocations that have reached the model so far.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl ModelProvider for GatedModel {
    fn name(&self) -> &str {
        "gated"
    }

    async fn invoke(&self, _request: InvocationRequest) -> Result<ModelResponse, ProviderError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        permit.forget();
        Ok(ModelResponse::text(self.reply.clone()))
    }
}

#[derive(Default)]
pub struct EchoTool {
    calls: AtomicUsize,
}

impl EchoTool {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the arguments back"
    }

    async fn call(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(arguments)
    }
}

/// Default configuration with exactly the given `(id, model)` agents.
pub fn test_config(agents: &[(&str, &str)]) -> AppConfig {
    let mut config = AppConfig::default();
    config.agents = agents
        .iter()
        .map(|(id, model)| AgentDescriptor::new(*id, id.to_uppercase(), *model))
        .collect();
    config
}

pub fn orchestrator(provider: Arc<dyn ModelProvider>, agents: &[(&str, &str)]) -> Orchestrator {
    orchestrator_from(test_config(agents), provider)
}

pub fn orchestrator_from(config: AppConfig, provider: Arc<dyn ModelProvider>) -> Orchestrator {
    Orchestrator::new(&config, provider, ToolRegistry::new()).unwrap()
}

/// Let spawned tasks run until they park.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
