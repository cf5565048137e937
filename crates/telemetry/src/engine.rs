//! Thread-safe telemetry engine — collects invocation records, groups them
//! into traces, and serves counters, timers and per-agent reports.

use crate::TelemetryError;
use crate::model::*;
use conclave_core::{InvocationEvent, MetricsSnapshot, ObservabilitySink};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

/// Counter incremented once per agent invocation.
pub const INVOCATIONS: &str = "agent.invocations";
/// Counter incremented once per failed agent invocation.
pub const FAILURES: &str = "agent.failures";
/// Timer fed with every invocation's latency.
pub const LATENCY_MS: &str = "agent.latency_ms";

/// Retained traces before the oldest are pruned.
const MAX_TRACES: usize = 5_000;

/// The core telemetry engine.
///
/// Thread-safe via `RwLock`. Recording never blocks on I/O and never fails.
pub struct TelemetryEngine {
    /// All recorded traces (most recent last).
    traces: RwLock<Vec<Trace>>,
    counters: RwLock<BTreeMap<String, u64>>,
    timers: RwLock<BTreeMap<String, Timer>>,
    agents: RwLock<HashMap<String, AgentStats>>,
}

impl TelemetryEngine {
    pub fn new() -> Self {
        Self {
            traces: RwLock::new(Vec::new()),
            counters: RwLock::new(BTreeMap::new()),
            timers: RwLock::new(BTreeMap::new()),
            agents: RwLock::new(HashMap::new()),
        }
    }

    // ── Recording ─────────────────────────────────────────────────────

    /// Increment a counter by `by`.
    pub fn increment(&self, name: &str, by: u64) {
        *self.counters.write().entry(name.to_string()).or_default() += by;
    }

    /// Add a sample to a timer.
    pub fn observe(&self, name: &str, value: f64) {
        self.timers
            .write()
            .entry(name.to_string())
            .or_default()
            .observe(value);
    }

    /// Record one agent invocation: counters, timers, agent stats, trace span.
    pub fn record_invocation(&self, event: &InvocationEvent) {
        self.increment(INVOCATIONS, 1);
        self.increment(&format!("{INVOCATIONS}.{}", event.mode), 1);
        if !event.success {
            self.increment(FAILURES, 1);
            self.increment(&format!("{FAILURES}.{}", event.mode), 1);
        }
        self.observe(LATENCY_MS, event.latency_ms as f64);

        {
            let mut agents = self.agents.write();
            let stats = agents
                .entry(event.agent_id.to_string())
                .or_insert_with(|| AgentStats::new(event.agent_id.as_str()));
            stats.executions += 1;
            if event.success {
                stats.successes += 1;
            } else {
                stats.errors += 1;
            }
            stats.total_latency_ms += event.latency_ms;
            stats.total_tokens += u64::from(event.tokens);
        }

        let mut traces = self.traces.write();
        if let Some(trace) = traces.iter_mut().rev().find(|t| t.id == event.trace_id) {
            trace.add_span(Span::from(event));
            return;
        }

        if traces.len() >= MAX_TRACES {
            let drain = MAX_TRACES / 10;
            traces.drain(..drain);
        }
        let mut trace = Trace::new(&event.trace_id, event.session_id.as_str(), &event.mode);
        trace.add_span(Span::from(event));
        traces.push(trace);

        tracing::trace!(
            trace_id = %event.trace_id,
            agent_id = %event.agent_id,
            success = event.success,
            latency_ms = event.latency_ms,
            "Telemetry: invocation recorded"
        );
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    pub fn timer_summary(&self, name: &str) -> Option<conclave_core::TimerSummary> {
        self.timers.read().get(name).map(Timer::summary)
    }

    /// Get a specific trace by ID.
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces.read().iter().find(|t| t.id == trace_id).cloned()
    }

    /// List recent traces (most recent first).
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        self.traces.read().iter().rev().take(limit).cloned().collect()
    }

    /// Get traces for a specific session.
    pub fn traces_for_session(&self, session_id: &str) -> Vec<Trace> {
        self.traces
            .read()
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Total number of traces recorded.
    pub fn trace_count(&self) -> usize {
        self.traces.read().len()
    }

    /// Statistics for one agent.
    pub fn agent_stats(&self, agent_id: &str) -> Result<AgentStats, TelemetryError> {
        self.agents
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| TelemetryError::UnknownAgent(agent_id.to_string()))
    }

    /// Agents ranked by success rate, best first. Ties go to the agent with
    /// more executions, then by id.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let agents = self.agents.read();
        let mut board: Vec<LeaderboardEntry> = agents.values().map(LeaderboardEntry::from).collect();
        board.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.executions.cmp(&a.executions))
                .then(a.agent_id.cmp(&b.agent_id))
        });
        board
    }

    /// Counters and timer summaries.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.read().clone(),
            timers: self
                .timers
                .read()
                .iter()
                .map(|(name, t)| (name.clone(), t.summary()))
                .collect(),
        }
    }

    /// Render counters and timers in the Prometheus text exposition format.
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();
        for (name, value) in self.counters.read().iter() {
            let metric = prometheus_name(name);
            let _ = writeln!(out, "# TYPE {metric} counter");
            let _ = writeln!(out, "{metric} {value}");
        }
        for (name, timer) in self.timers.read().iter() {
            let metric = prometheus_name(name);
            let s = timer.summary();
            let _ = writeln!(out, "# TYPE {metric} summary");
            let _ = writeln!(out, "{metric}{{quantile=\"0.5\"}} {}", s.p50);
            let _ = writeln!(out, "{metric}{{quantile=\"0.95\"}} {}", s.p95);
            let _ = writeln!(out, "{metric}{{quantile=\"0.99\"}} {}", s.p99);
            let _ = writeln!(out, "{metric}_count {}", timer.total_count());
        }
        out
    }

    /// Everything the engine holds, as pretty JSON.
    pub fn export_json(&self) -> Result<String, TelemetryError> {
        let report = serde_json::json!({
            "metrics": self.snapshot(),
            "leaderboard": self.leaderboard(),
            "recent_traces": self.recent_traces(20),
        });
        Ok(serde_json::to_string_pretty(&report)?)
    }

    /// Remove traces older than the given cutoff. Returns the number removed.
    pub fn prune_before(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let mut traces = self.traces.write();
        let before = traces.len();
        traces.retain(|t| t.started_at >= cutoff);
        before - traces.len()
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservabilitySink for TelemetryEngine {
    fn record(&self, event: InvocationEvent) {
        self.record_invocation(&event);
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.snapshot()
    }
}

fn prometheus_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("conclave_{cleaned}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn make_engine() -> TelemetryEngine {
        TelemetryEngine::new()
    }

    fn event(trace: &str, agent: &str, success: bool, latency_ms: u64) -> InvocationEvent {
        InvocationEvent {
            trace_id: trace.into(),
            session_id: "s-1".into(),
            agent_id: agent.into(),
            mode: "parallel".into(),
            step: "branch".into(),
            success,
            latency_ms,
            tokens: 10,
            error: (!success).then(|| "boom".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn records_counters_and_timer() {
        let engine = make_engine();
        engine.record(event("t1", "a", true, 100));
        engine.record(event("t1", "b", false, 300));

        assert_eq!(engine.counter(INVOCATIONS), 2);
        assert_eq!(engine.counter(FAILURES), 1);
        assert_eq!(engine.counter("agent.invocations.parallel"), 2);
        let timer = engine.timer_summary(LATENCY_MS).unwrap();
        assert_eq!(timer.count, 2);
        assert_eq!(timer.max, 300.0);
        assert!((timer.avg - 200.0).abs() < 1e-9);
    }

    #[test]
    fn spans_group_by_trace() {
        let engine = make_engine();
        engine.record(event("t1", "a", true, 10));
        engine.record(event("t1", "b", true, 20));
        engine.record(event("t2", "a", false, 5));

        assert_eq!(engine.trace_count(), 2);
        let t1 = engine.get_trace("t1").unwrap();
        assert_eq!(t1.spans.len(), 2);
        assert_eq!(t1.total_duration_ms(), 30);
        assert_eq!(t1.mode, "parallel");
        assert_eq!(engine.get_trace("t2").unwrap().failure_count(), 1);
        assert_eq!(engine.traces_for_session("s-1").len(), 2);
        assert_eq!(engine.recent_traces(1)[0].id, "t2");
    }

    #[test]
    fn leaderboard_ranks_by_success_rate() {
        let engine = make_engine();
        engine.record(event("t", "steady", true, 10));
        engine.record(event("t", "steady", true, 10));
        engine.record(event("t", "flaky", true, 10));
        engine.record(event("t", "flaky", false, 10));

        let board = engine.leaderboard();
        assert_eq!(board[0].agent_id, "steady");
        assert!((board[0].score - 100.0).abs() < 1e-9);
        assert_eq!(board[1].agent_id, "flaky");
        assert!((board[1].score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn agent_stats_unknown_agent() {
        let engine = make_engine();
        engine.record(event("t", "a", true, 40));
        assert_eq!(engine.agent_stats("a").unwrap().executions, 1);
        assert!(matches!(
            engine.agent_stats("ghost"),
            Err(TelemetryError::UnknownAgent(_))
        ));
    }

    #[test]
    fn prometheus_export_has_type_headers() {
        let engine = make_engine();
        engine.record(event("t", "a", true, 40));
        let text = engine.export_prometheus();
        assert!(text.contains("# TYPE conclave_agent_invocations counter"));
        assert!(text.contains("conclave_agent_invocations 1"));
        assert!(text.contains("# TYPE conclave_agent_latency_ms summary"));
        assert!(text.contains("conclave_agent_latency_ms{quantile=\"0.5\"} 40"));
        assert!(text.contains("conclave_agent_latency_ms_count 1"));
    }

    #[test]
    fn sink_metrics_matches_snapshot() {
        let engine = make_engine();
        engine.record(event("t", "a", true, 40));
        let metrics = ObservabilitySink::metrics(&engine);
        assert_eq!(metrics.counter(INVOCATIONS), 1);
        assert!(metrics.timers.contains_key(LATENCY_MS));
    }

    #[test]
    fn export_json_includes_leaderboard() {
        let engine = make_engine();
        engine.record(event("t", "a", true, 40));
        let json = engine.export_json().unwrap();
        assert!(json.contains("leaderboard"));
        assert!(json.contains("\"a\""));
    }

    #[test]
    fn prune_old_traces() {
        let engine = make_engine();
        engine.record(event("t1", "a", true, 1));
        engine.record(event("t2", "a", true, 1));
        let pruned = engine.prune_before(Utc::now() + Duration::hours(1));
        assert_eq!(pruned, 2);
        assert_eq!(engine.trace_count(), 0);
    }
}
