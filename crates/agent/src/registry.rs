//! The Agent Registry — owns the set of agents and enforces identity and
//! capacity invariants.

use chrono::Utc;
use conclave_core::error::AgentError;
use conclave_core::{AgentDescriptor, AgentId, AgentState, AgentSummary, DomainEvent, EventBus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::slot::{AgentHandle, Resumed};

/// Filter for [`AgentRegistry::list`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentFilter {
    pub capability: Option<String>,
    pub state: Option<AgentState>,
}

impl AgentFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_capability(capability: impl Into<String>) -> Self {
        Self {
            capability: Some(capability.into()),
            state: None,
        }
    }

    pub fn in_state(state: AgentState) -> Self {
        Self {
            capability: None,
            state: Some(state),
        }
    }

    fn matches(&self, summary: &AgentSummary) -> bool {
        self.capability
            .as_ref()
            .is_none_or(|c| summary.tools.iter().any(|t| t == c))
            && self.state.is_none_or(|s| summary.state == s)
    }
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<AgentId, Arc<AgentHandle>>,
    /// Registration order
    order: Vec<AgentId>,
}

/// The set of registered agents.
pub struct AgentRegistry {
    inner: RwLock<Inner>,
    capacity: usize,
    events: Option<Arc<EventBus>>,
}

impl AgentRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
            events: None,
        }
    }

    /// Publish registry and lifecycle events to the given bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }

    /// Add an agent. Fails without mutating anything on a duplicate id or
    /// when the registry is at capacity.
    pub fn register(&self, descriptor: AgentDescriptor) -> Result<AgentId, AgentError> {
        let id = descriptor.id.clone();
        {
            let mut inner = self.inner.write();
            if inner.by_id.contains_key(&id) {
                return Err(AgentError::DuplicateId(id));
            }
            if inner.order.len() >= self.capacity {
                return Err(AgentError::RegistryFull {
                    capacity: self.capacity,
                });
            }
            let handle = Arc::new(AgentHandle::new(descriptor, self.events.clone()));
            inner.by_id.insert(id.clone(), handle);
            inner.order.push(id.clone());
        }

        info!(agent_id = %id, "Agent registered");
        self.publish(DomainEvent::AgentRegistered {
            agent_id: id.clone(),
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    /// Remove an agent that is `idle` or `failed`.
    pub fn unregister(&self, id: &AgentId) -> Result<AgentDescriptor, AgentError> {
        let handle = {
            let mut inner = self.inner.write();
            let handle = inner
                .by_id
                .get(id)
                .cloned()
                .ok_or_else(|| AgentError::NotFound(id.clone()))?;
            handle.mark_removed()?;
            inner.by_id.remove(id);
            inner.order.retain(|a| a != id);
            handle
        };

        info!(agent_id = %id, "Agent unregistered");
        self.publish(DomainEvent::AgentUnregistered {
            agent_id: id.clone(),
            timestamp: Utc::now(),
        });
        Ok(handle.descriptor().clone())
    }

    pub fn get(&self, id: &AgentId) -> Result<Arc<AgentHandle>, AgentError> {
        self.inner
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.inner.read().by_id.contains_key(id)
    }

    /// Ids in registration order.
    pub fn ids(&self) -> Vec<AgentId> {
        self.inner.read().order.clone()
    }

    /// Snapshot of matching agents in registration order. Later registry
    /// changes do not affect the returned list.
    pub fn list(&self, filter: &AgentFilter) -> Vec<AgentSummary> {
        let handles: Vec<Arc<AgentHandle>> = {
            let inner = self.inner.read();
            inner
                .order
                .iter()
                .filter_map(|id| inner.by_id.get(id).cloned())
                .collect()
        };
        handles
            .iter()
            .map(|h| h.summary())
            .filter(|s| filter.matches(s))
            .collect()
    }

    pub fn state(&self, id: &AgentId) -> Result<AgentState, AgentError> {
        Ok(self.get(id)?.state())
    }

    /// `busy -> paused`.
    pub fn pause(&self, id: &AgentId) -> Result<(), AgentError> {
        self.get(id)?.pause()
    }

    /// `paused -> busy`. See [`Resumed`] for who continues the work.
    pub fn resume(&self, id: &AgentId) -> Result<Resumed, AgentError> {
        self.get(id)?.resume()
    }

    /// `failed -> idle`.
    pub fn reset(&self, id: &AgentId) -> Result<(), AgentError> {
        self.get(id)?.reset()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.ids())
            .field("capacity", &self.capacity)
            .finish()
    }
}
