//! Observability for Conclave: invocation tracing, counters, latency timers,
//! per-agent statistics and a success-rate leaderboard.
//!
//! [`TelemetryEngine`] implements [`conclave_core::ObservabilitySink`], so the
//! Orchestrator reports every agent invocation to it directly.

pub mod engine;
pub mod model;

pub use engine::{FAILURES, INVOCATIONS, LATENCY_MS, TelemetryEngine};
pub use model::{AgentStats, LeaderboardEntry, Span, Trace};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
