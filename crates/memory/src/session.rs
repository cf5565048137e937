//! Per-session state: the episodic log, the long-term fact map, and the
//! running size counter.

use chrono::{DateTime, Utc};
use conclave_core::{Message, SessionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::token::{estimate_entries_tokens, estimate_entry_tokens};

/// Mutable session record. Only the store touches it, under the session's lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub(crate) id: SessionId,
    /// Append-only episodic log (compaction replaces its oldest prefix)
    pub(crate) log: Vec<Message>,
    pub(crate) facts: BTreeMap<String, String>,
    /// Estimated tokens of the episodic log
    pub(crate) token_count: usize,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_activity: DateTime<Utc>,
    #[serde(default)]
    pub(crate) archived: bool,
    #[serde(default)]
    pub(crate) compactions: u32,
    /// Every message id ever appended, including compacted ones
    #[serde(default)]
    pub(crate) seen: HashSet<String>,
    #[serde(skip)]
    pub(crate) compacting: bool,
}

impl Session {
    pub(crate) fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            log: Vec::new(),
            facts: BTreeMap::new(),
            token_count: 0,
            created_at: now,
            last_activity: now,
            archived: false,
            compactions: 0,
            seen: HashSet::new(),
            compacting: false,
        }
    }

    /// Append unless the id was seen before. Returns whether it was appended.
    pub(crate) fn push(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id().to_string()) {
            return false;
        }
        self.token_count += estimate_entry_tokens(&message);
        self.last_activity = Utc::now();
        self.log.push(message);
        true
    }

    /// Swap the oldest `prefix_len` entries for one synthetic summary entry.
    pub(crate) fn replace_prefix(&mut self, prefix_len: usize, summary: Message) {
        self.log.splice(..prefix_len, std::iter::once(summary));
        self.token_count = estimate_entries_tokens(&self.log);
        self.compactions += 1;
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            entries: self.log.clone(),
            facts: self.facts.clone(),
            token_count: self.token_count,
            created_at: self.created_at,
            last_activity: self.last_activity,
            archived: self.archived,
            compactions: self.compactions,
        }
    }
}

/// Read-only copy of a session, detached from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub entries: Vec<Message>,
    pub facts: BTreeMap<String, String>,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub archived: bool,
    pub compactions: u32,
}
