//! Data model for traces, spans, timers and per-agent statistics.

use chrono::{DateTime, Utc};
use conclave_core::{InvocationEvent, TimerSummary};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of most recent samples a timer summarizes.
pub const TIMER_WINDOW: usize = 100;

// ── Span ──────────────────────────────────────────────────────────────────

/// One agent invocation inside a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub agent_id: String,
    /// Role of the invocation inside its mode (`stage:0`, `iteration:2`, ...)
    pub step: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&InvocationEvent> for Span {
    fn from(e: &InvocationEvent) -> Self {
        let started_at = e.timestamp - chrono::Duration::milliseconds(e.latency_ms as i64);
        Self {
            agent_id: e.agent_id.to_string(),
            step: e.step.clone(),
            started_at,
            duration_ms: e.latency_ms,
            success: e.success,
            tokens: e.tokens,
            error: e.error.clone(),
        }
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All invocations of one `process` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub id: String,
    pub session_id: String,
    pub mode: String,
    pub spans: Vec<Span>,
    pub started_at: DateTime<Utc>,
}

impl Trace {
    pub fn new(id: impl Into<String>, session_id: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            mode: mode.into(),
            spans: Vec::new(),
            started_at: Utc::now(),
        }
    }

    pub fn add_span(&mut self, span: Span) {
        if span.started_at < self.started_at {
            self.started_at = span.started_at;
        }
        self.spans.push(span);
    }

    /// Sum of span durations in milliseconds.
    pub fn total_duration_ms(&self) -> u64 {
        self.spans.iter().map(|s| s.duration_ms).sum()
    }

    pub fn total_tokens(&self) -> u32 {
        self.spans.iter().map(|s| s.tokens).sum()
    }

    pub fn failure_count(&self) -> usize {
        self.spans.iter().filter(|s| !s.success).count()
    }
}

// ── Timer ─────────────────────────────────────────────────────────────────

/// A latency timer keeping the most recent [`TIMER_WINDOW`] samples.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    samples: VecDeque<f64>,
    total_count: u64,
}

impl Timer {
    pub fn observe(&mut self, value: f64) {
        if self.samples.len() == TIMER_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        self.total_count += 1;
    }

    /// Lifetime number of observations.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Statistics over the retained window.
    pub fn summary(&self) -> TimerSummary {
        if self.samples.is_empty() {
            return TimerSummary::default();
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let sum: f64 = sorted.iter().sum();
        TimerSummary {
            count: sorted.len() as u64,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            avg: sum / sorted.len() as f64,
            p50: percentile(&sorted, 50),
            p95: percentile(&sorted, 95),
            p99: percentile(&sorted, 99),
        }
    }
}

/// Nearest-rank percentile over sorted values.
fn percentile(sorted: &[f64], pct: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = pct * sorted.len() / 100;
    sorted[index.min(sorted.len() - 1)]
}

// ── Per-agent statistics ──────────────────────────────────────────────────

/// Running totals for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent_id: String,
    pub executions: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
    pub total_tokens: u64,
}

impl AgentStats {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn success_rate(&self) -> f64 {
        self.successes as f64 / self.executions.max(1) as f64
    }

    pub fn error_rate(&self) -> f64 {
        self.errors as f64 / self.executions.max(1) as f64
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.total_latency_ms as f64 / self.executions.max(1) as f64
    }
}

/// One row of the agent leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub agent_id: String,
    /// Success rate × 100
    pub score: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub executions: u64,
}

impl From<&AgentStats> for LeaderboardEntry {
    fn from(s: &AgentStats) -> Self {
        Self {
            agent_id: s.agent_id.clone(),
            score: s.success_rate() * 100.0,
            success_rate: s.success_rate(),
            error_rate: s.error_rate(),
            avg_latency_ms: s.avg_latency_ms(),
            executions: s.executions,
        }
    }
}
