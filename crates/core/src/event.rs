//! Domain events and the observability seam.
//!
//! Events are published when something interesting happens in the engine
//! (a state transition, a compaction, a finished request). Components can
//! subscribe to react without tight coupling.
//!
//! [`ObservabilitySink`] is the narrower, fire-and-forget interface the
//! Orchestrator reports every agent invocation to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::agent::{AgentId, AgentState};
use crate::message::SessionId;

/// One agent invocation, as reported to the observability collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEvent {
    /// Id of the `process` call this invocation belongs to
    pub trace_id: String,
    pub session_id: SessionId,
    pub agent_id: AgentId,
    /// Execution mode name (`single`, `parallel`, `sequential`, `loop`)
    pub mode: String,
    /// Role of the invocation inside the mode (`stage:1`, `iteration:2`, `evaluate:2`, ...)
    pub step: String,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(default)]
    pub tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Summary statistics of a timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Aggregated counters and timers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub timers: BTreeMap<String, TimerSummary>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// Receiver of per-invocation records.
///
/// `record` must never block or fail the caller.
pub trait ObservabilitySink: Send + Sync {
    fn record(&self, event: InvocationEvent);

    /// Aggregated view, if the sink keeps one.
    fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot::default()
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ObservabilitySink for NoopSink {
    fn record(&self, _event: InvocationEvent) {}
}

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    AgentRegistered {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    AgentUnregistered {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },

    /// A lifecycle transition was applied
    AgentStateChanged {
        agent_id: AgentId,
        from: AgentState,
        to: AgentState,
        timestamp: DateTime<Utc>,
    },

    /// An agent invocation finished (successfully or not)
    InvocationFinished(InvocationEvent),

    /// Episodic entries were folded into a summary
    SessionCompacted {
        session_id: SessionId,
        summarized: usize,
        kept: usize,
        timestamp: DateTime<Utc>,
    },

    SessionArchived {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },

    /// A `process` call returned
    RequestCompleted {
        trace_id: String,
        session_id: SessionId,
        mode: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl ObservabilitySink for EventBus {
    fn record(&self, event: InvocationEvent) {
        self.publish(DomainEvent::InvocationFinished(event));
    }
}
