//! # Conclave Core
//!
//! Domain types, traits, and error definitions for the Conclave multi-agent
//! orchestration engine. This crate has **no runtime machinery** of its own —
//! it defines the domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model invocation, tool capability,
//! observability sink) is a trait here. Implementations live in their
//! respective crates or in the embedding application. This enables:
//! - Swapping model backends without touching the orchestration logic
//! - Easy testing with scripted / failing / gated doubles
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod checkpoint;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentDescriptor, AgentId, AgentOutput, AgentState, AgentSummary};
pub use checkpoint::{CHECKPOINT_SCHEMA_VERSION, Checkpoint};
pub use error::{Error, Result};
pub use event::{
    DomainEvent, EventBus, InvocationEvent, MetricsSnapshot, NoopSink, ObservabilitySink,
    TimerSummary,
};
pub use message::{Message, SessionId, USER_SENDER};
pub use provider::{InvocationRequest, ModelProvider, ModelResponse, Usage};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
