//! The summarization seam used by compaction.

use async_trait::async_trait;
use conclave_core::error::MemoryError;
use conclave_core::{InvocationRequest, Message, ModelProvider};
use std::sync::Arc;
use std::time::Duration;

use crate::token::render_entry;

/// Folds a run of episodic entries into one summary text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, entries: &[Message]) -> Result<String, MemoryError>;
}

/// Summarizer backed by the model invocation collaborator.
pub struct ModelSummarizer {
    provider: Arc<dyn ModelProvider>,
    model: String,
    timeout: Duration,
    max_tokens: u32,
}

impl ModelSummarizer {
    pub fn new(provider: Arc<dyn ModelProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: Duration::from_secs(60),
            max_tokens: 512,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn build_prompt(entries: &[Message]) -> String {
        let transcript: Vec<String> = entries.iter().map(render_entry).collect();
        format!(
            "Summarize the following conversation in a few sentences. Keep names, \
             decisions, and open questions.\n\n{}",
            transcript.join("\n")
        )
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, entries: &[Message]) -> Result<String, MemoryError> {
        let request = InvocationRequest::new(&self.model, Self::build_prompt(entries))
            .with_system("You compress conversation history for an assistant's memory.")
            .with_temperature(0.2)
            .with_max_tokens(self.max_tokens);

        let response = tokio::time::timeout(self.timeout, self.provider.invoke(request))
            .await
            .map_err(|_| {
                MemoryError::Summarization(format!("timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| MemoryError::Summarization(e.to_string()))?;

        Ok(response.text.trim().to_string())
    }
}
