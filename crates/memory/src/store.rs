//! The Session Memory Store.
//!
//! Sessions live in a map keyed by id; each session sits behind its own
//! lock, so turns on different sessions never contend. No lock is held
//! while the summarizer runs: compaction snapshots the prefix, releases the
//! session, summarizes, then swaps the prefix back in. Appends that land in
//! the meantime only ever extend the log, so the prefix is still intact.

use chrono::{DateTime, Utc};
use conclave_config::MemoryConfig;
use conclave_core::error::MemoryError;
use conclave_core::{DomainEvent, EventBus, Message, SessionId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{Session, SessionSnapshot};
use crate::summarizer::Summarizer;
use crate::token::{estimate_entry_tokens, estimate_tokens, render_entry};

type SessionCell = Arc<Mutex<Session>>;

/// Per-session episodic logs and fact maps with compaction.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, SessionCell>>,
    config: MemoryConfig,
    summarizer: Arc<dyn Summarizer>,
    events: Option<Arc<EventBus>>,
}

/// Clears the session's in-flight flag even if the compaction future is dropped.
struct CompactionGuard(SessionCell);

impl Drop for CompactionGuard {
    fn drop(&mut self) {
        self.0.lock().compacting = false;
    }
}

/// What a compaction pass is about to fold.
struct CompactionPlan {
    prefix: Vec<Message>,
    boundary_id: String,
}

impl SessionStore {
    pub fn new(config: MemoryConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            summarizer,
            events: None,
        }
    }

    /// Publish compaction and archive events to the given bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn cell(&self, id: &SessionId) -> Result<SessionCell, MemoryError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| MemoryError::SessionNotFound(id.to_string()))
    }

    fn cell_or_create(&self, id: &SessionId) -> SessionCell {
        if let Some(cell) = self.sessions.read().get(id) {
            return cell.clone();
        }
        self.sessions
            .write()
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(session_id = %id, "Session created");
                Arc::new(Mutex::new(Session::new(id.clone())))
            })
            .clone()
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    // ── Writes ────────────────────────────────────────────────────────

    /// Create the session if it is unseen. Fails if it is archived.
    pub fn open(&self, id: &SessionId) -> Result<(), MemoryError> {
        let cell = self.cell_or_create(id);
        let session = cell.lock();
        if session.archived {
            return Err(MemoryError::SessionArchived(id.to_string()));
        }
        Ok(())
    }

    /// Append to the episodic log. Re-appending a known message id is a
    /// no-op; returns whether the message was appended.
    pub fn append(&self, id: &SessionId, message: Message) -> Result<bool, MemoryError> {
        let cell = self.cell_or_create(id);
        let mut session = cell.lock();
        if session.archived {
            return Err(MemoryError::SessionArchived(id.to_string()));
        }
        let message_id = message.id().to_string();
        let appended = session.push(message);
        if !appended {
            debug!(session_id = %id, message_id = %message_id, "Duplicate append ignored");
        }
        Ok(appended)
    }

    /// Long-term fact write, last-write-wins.
    pub fn set_fact(
        &self,
        id: &SessionId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), MemoryError> {
        let key = key.into();
        let cell = self.cell_or_create(id);
        let mut session = cell.lock();
        if session.archived {
            return Err(MemoryError::SessionArchived(id.to_string()));
        }
        if !session.facts.contains_key(&key) && session.facts.len() >= self.config.max_facts {
            return Err(MemoryError::FactLimit {
                session_id: id.to_string(),
                limit: self.config.max_facts,
            });
        }
        session.facts.insert(key, value.into());
        session.last_activity = Utc::now();
        Ok(())
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub fn get_fact(&self, id: &SessionId, key: &str) -> Option<String> {
        let cell = self.cell(id).ok()?;
        let session = cell.lock();
        session.facts.get(key).cloned()
    }

    pub fn facts(&self, id: &SessionId) -> Result<BTreeMap<String, String>, MemoryError> {
        Ok(self.cell(id)?.lock().facts.clone())
    }

    pub fn snapshot(&self, id: &SessionId) -> Result<SessionSnapshot, MemoryError> {
        Ok(self.cell(id)?.lock().snapshot())
    }

    /// Text view of a session within the context budget: the long-term
    /// facts (all of them unless they alone outgrow the budget) plus the
    /// newest episodic entries that fit what is left. Runs at most one
    /// compaction pass first if the log is over its limits.
    pub async fn get_context(&self, id: &SessionId) -> Result<String, MemoryError> {
        let cell = self.cell(id)?;

        let plan = self.plan_compaction(id, &cell);
        if let Some(plan) = plan {
            let _guard = CompactionGuard(cell.clone());
            match self.summarizer.summarize(&plan.prefix).await {
                Ok(summary) => self.apply_compaction(id, &cell, plan, summary),
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Compaction failed, serving uncompacted context");
                }
            }
        }

        let session = cell.lock();
        Ok(render_context(&session, self.config.context_budget_tokens))
    }

    fn plan_compaction(&self, id: &SessionId, cell: &SessionCell) -> Option<CompactionPlan> {
        let mut session = cell.lock();
        let keep = self.config.keep_recent;
        let over_limit = session.log.len() > self.config.compaction_threshold
            || session.token_count > self.config.context_budget_tokens;
        if session.archived || session.compacting || !over_limit || session.log.len() <= keep {
            return None;
        }

        let prefix_len = session.log.len() - keep;
        let prefix = session.log[..prefix_len].to_vec();
        let boundary_id = prefix[prefix_len - 1].id().to_string();
        session.compacting = true;
        debug!(session_id = %id, prefix_len, "Compaction planned");
        Some(CompactionPlan { prefix, boundary_id })
    }

    fn apply_compaction(&self, id: &SessionId, cell: &SessionCell, plan: CompactionPlan, summary: String) {
        let prefix_len = plan.prefix.len();
        let mut session = cell.lock();
        let intact = session
            .log
            .get(prefix_len - 1)
            .is_some_and(|m| m.id() == plan.boundary_id);
        if !intact {
            warn!(session_id = %id, "Episodic prefix changed during compaction, skipping");
            return;
        }

        let entry = Message::system(format!("Summary of earlier conversation: {summary}"))
            .with_metadata("compacted_entries", prefix_len);
        session.replace_prefix(prefix_len, entry);
        let kept = session.log.len() - 1;
        drop(session);

        info!(session_id = %id, summarized = prefix_len, kept, "Session compacted");
        self.publish(DomainEvent::SessionCompacted {
            session_id: id.clone(),
            summarized: prefix_len,
            kept,
            timestamp: Utc::now(),
        });
    }

    // ── Archiving ─────────────────────────────────────────────────────

    /// Make a session read-only.
    pub fn archive(&self, id: &SessionId) -> Result<(), MemoryError> {
        let cell = self.cell(id)?;
        cell.lock().archived = true;
        info!(session_id = %id, "Session archived");
        self.publish(DomainEvent::SessionArchived {
            session_id: id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Make an archived session writable again.
    pub fn reactivate(&self, id: &SessionId) -> Result<(), MemoryError> {
        let cell = self.cell(id)?;
        let mut session = cell.lock();
        session.archived = false;
        session.last_activity = Utc::now();
        info!(session_id = %id, "Session reactivated");
        Ok(())
    }

    /// Archive every session idle for at least `archive_after_secs` as of `now`.
    pub fn archive_idle(&self, now: DateTime<Utc>) -> Vec<SessionId> {
        let threshold = chrono::Duration::seconds(self.config.archive_after_secs as i64);
        let cells: Vec<(SessionId, SessionCell)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, cell)| (id.clone(), cell.clone()))
            .collect();

        let mut archived = Vec::new();
        for (id, cell) in cells {
            let mut session = cell.lock();
            if !session.archived && now - session.last_activity >= threshold {
                session.archived = true;
                archived.push(id);
            }
        }

        for id in &archived {
            info!(session_id = %id, "Idle session archived");
            self.publish(DomainEvent::SessionArchived {
                session_id: id.clone(),
                timestamp: now,
            });
        }
        archived
    }

    /// Run [`archive_idle`](Self::archive_idle) every `every` until `cancel` fires.
    pub fn spawn_archive_sweeper(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Archive sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        store.archive_idle(Utc::now());
                    }
                }
            }
        })
    }

    // ── Counts ────────────────────────────────────────────────────────

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn archived_count(&self) -> usize {
        self.sessions.read().values().filter(|c| c.lock().archived).count()
    }

    pub fn active_count(&self) -> usize {
        self.session_count() - self.archived_count()
    }

    /// Session ids, sorted.
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ── Snapshots ─────────────────────────────────────────────────────

    /// Write every session to `path` as JSON. Returns the number written.
    pub fn save_to(&self, path: &Path) -> Result<usize, MemoryError> {
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .values()
            .map(|c| c.lock().clone())
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MemoryError::Storage(format!("Failed to create snapshot directory: {e}"))
            })?;
        }
        let json = serde_json::to_string_pretty(&sessions)
            .map_err(|e| MemoryError::Storage(format!("Failed to serialize sessions: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| MemoryError::Storage(format!("Failed to write session snapshot: {e}")))?;

        debug!(path = %path.display(), count = sessions.len(), "Sessions saved");
        Ok(sessions.len())
    }

    /// Load sessions written by [`save_to`](Self::save_to), replacing any
    /// in-memory session with the same id. A missing file loads nothing.
    pub fn load_from(&self, path: &Path) -> Result<usize, MemoryError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(MemoryError::Storage(format!("Failed to read session snapshot: {e}")));
            }
        };
        let sessions: Vec<Session> = serde_json::from_str(&content)
            .map_err(|e| MemoryError::Storage(format!("Corrupted session snapshot: {e}")))?;

        let count = sessions.len();
        let mut map = self.sessions.write();
        for session in sessions {
            map.insert(session.id.clone(), Arc::new(Mutex::new(session)));
        }
        debug!(path = %path.display(), count, "Sessions loaded");
        Ok(count)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish()
    }
}

const FACTS_HEADER: &str = "Known facts:";

fn omitted_facts(count: usize) -> String {
    format!("({count} more facts)")
}

/// Facts in key order, as many as `budget` allows, followed by a count of
/// the ones left out. Returns the section and its estimated cost.
fn render_facts(facts: &BTreeMap<String, String>, budget: usize) -> Option<(String, usize)> {
    if facts.is_empty() {
        return None;
    }

    let marker_cost = estimate_tokens(&omitted_facts(facts.len())) + 1;
    let mut used = estimate_tokens(FACTS_HEADER);
    let mut lines = Vec::new();
    for (i, (key, value)) in facts.iter().enumerate() {
        let line = format!("- {key}: {value}");
        let cost = estimate_tokens(&line) + 1;
        let reserve = if i + 1 < facts.len() { marker_cost } else { 0 };
        if used + cost + reserve > budget {
            break;
        }
        used += cost;
        lines.push(line);
    }

    let omitted = facts.len() - lines.len();
    if omitted > 0 {
        if used + marker_cost > budget {
            return None;
        }
        lines.push(omitted_facts(omitted));
        used += marker_cost;
    }
    Some((format!("{FACTS_HEADER}\n{}", lines.join("\n")), used))
}

/// Facts first, then the newest entries that fit what is left of `budget`.
fn render_context(session: &Session, budget: usize) -> String {
    let mut sections = Vec::new();
    let mut remaining = budget;

    if let Some((section, cost)) = render_facts(&session.facts, budget) {
        remaining = remaining.saturating_sub(cost + 1);
        sections.push(section);
    }

    const HEADER: &str = "Conversation:";
    let header_cost = estimate_tokens(HEADER) + 1;
    if remaining > header_cost {
        remaining -= header_cost;
        let mut lines = Vec::new();
        for message in session.log.iter().rev() {
            let cost = estimate_entry_tokens(message);
            if cost > remaining {
                break;
            }
            remaining -= cost;
            lines.push(render_entry(message));
        }
        if !lines.is_empty() {
            lines.reverse();
            sections.push(format!("{HEADER}\n{}", lines.join("\n")));
        }
    }

    sections.join("\n\n")
}
