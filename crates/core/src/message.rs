//! Message and Session domain types.
//!
//! Messages are the value objects that flow through the whole system:
//! caller sends a message → Orchestrator dispatches it → agents answer with
//! new messages → the Session Memory Store logs them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentId;

/// Sender id used for messages that come from the caller rather than an agent.
pub const USER_SENDER: &str = "user";

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&SessionId> for SessionId {
    fn from(id: &SessionId) -> Self {
        id.clone()
    }
}

impl std::borrow::Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable message.
///
/// Fields are read through accessors; the `with_*` builders consume the
/// value, so a message can only be shaped before it is shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (idempotency key for the session log)
    id: String,

    /// The text content
    content: String,

    /// `"user"` or the id of the producing agent
    sender: String,

    /// Named recipient for direct A2A delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipient: Option<AgentId>,

    timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    /// Create a message with an explicit sender.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            sender: sender.into(),
            recipient: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a message from the caller.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(USER_SENDER, content)
    }

    /// Create a message produced by an agent.
    pub fn from_agent(agent_id: &AgentId, content: impl Into<String>) -> Self {
        Self::new(agent_id.as_str(), content)
    }

    /// Create a synthetic entry (e.g. a compaction summary).
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Address this message to a single agent.
    pub fn to(mut self, recipient: impl Into<AgentId>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }

    /// Override the generated id (retries re-send the same id).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipient(&self) -> Option<&AgentId> {
        self.recipient.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    /// Whether this message was sent by the given agent.
    pub fn is_from(&self, agent_id: &AgentId) -> bool {
        self.sender == agent_id.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_has_unique_id() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.sender(), USER_SENDER);
        assert!(a.recipient().is_none());
    }

    #[test]
    fn builders_shape_the_message() {
        let sender = AgentId::from("concierge_001");
        let msg = Message::from_agent(&sender, "handoff")
            .to("assistant_001")
            .with_id("m-1")
            .with_metadata("topic", "travel");
        assert_eq!(msg.id(), "m-1");
        assert!(msg.is_from(&sender));
        assert_eq!(msg.recipient().map(|r| r.as_str()), Some("assistant_001"));
        assert_eq!(msg.metadata()["topic"], "travel");
    }

    #[test]
    fn message_serde_roundtrip_keeps_id() {
        let msg = Message::user("Hello").with_id("fixed");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn session_id_display() {
        let id = SessionId::from("s-42");
        assert_eq!(id.to_string(), "s-42");
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
