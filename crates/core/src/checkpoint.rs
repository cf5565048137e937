//! Checkpoint — the serialized snapshot of an agent's in-progress work.
//!
//! A checkpoint is stored as an opaque, versioned JSON blob rather than a
//! live object, so a paused invocation can be resumed by a different task
//! or a fresh process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::error::AgentError;
use crate::message::SessionId;

/// Schema version written into every blob. Bump on incompatible changes.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

/// Everything needed to continue an invocation without repeating
/// completed steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema_version: u32,

    pub agent_id: AgentId,

    /// Session the finished output belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// System prompt the invocation was started with
    pub system: String,

    /// The in-progress prompt
    pub prompt: String,

    /// Session context captured at dispatch
    #[serde(default)]
    pub context: String,

    /// Raw model text, once the generate step has completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,

    /// Number of lines of `generated` already processed
    #[serde(default)]
    pub cursor: usize,

    /// Partial output buffer (processed lines)
    #[serde(default)]
    pub output: Vec<String>,

    #[serde(default)]
    pub tokens: u32,

    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A checkpoint for an invocation that has not completed any step yet.
    pub fn start(
        agent_id: AgentId,
        session_id: Option<SessionId>,
        system: impl Into<String>,
        prompt: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            agent_id,
            session_id,
            system: system.into(),
            prompt: prompt.into(),
            context: context.into(),
            generated: None,
            cursor: 0,
            output: Vec::new(),
            tokens: 0,
            created_at: Utc::now(),
        }
    }

    /// The partial output produced so far.
    pub fn partial_output(&self) -> String {
        self.output.join("\n")
    }

    /// Lines of generated text not processed yet.
    pub fn remaining_lines(&self) -> usize {
        self.generated
            .as_deref()
            .map(|g| g.split('\n').count().saturating_sub(self.cursor))
            .unwrap_or(0)
    }

    pub fn to_blob(&self) -> Result<Vec<u8>, AgentError> {
        serde_json::to_vec(self).map_err(|e| AgentError::Checkpoint(e.to_string()))
    }

    /// Decode a blob, rejecting any schema version other than the current one.
    pub fn from_blob(blob: &[u8]) -> Result<Self, AgentError> {
        let value: serde_json::Value =
            serde_json::from_slice(blob).map_err(|e| AgentError::Checkpoint(e.to_string()))?;
        let version = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| AgentError::Checkpoint("missing schema_version".into()))?;
        if version != u64::from(CHECKPOINT_SCHEMA_VERSION) {
            return Err(AgentError::Checkpoint(format!(
                "unsupported schema version {version} (expected {CHECKPOINT_SCHEMA_VERSION})"
            )));
        }
        serde_json::from_value(value).map_err(|e| AgentError::Checkpoint(e.to_string()))
    }
}
