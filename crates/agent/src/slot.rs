//! Per-agent state slot — the lifecycle state machine.
//!
//! Every transition is a check-and-set under the slot's own lock, so a
//! pause racing a completion resolves to exactly one winner: either the
//! agent ends `idle` (the pause fails with `InvalidTransition`) or it ends
//! `paused` (the completion parks until resumed).

use chrono::Utc;
use conclave_core::error::AgentError;
use conclave_core::{AgentDescriptor, AgentId, AgentState, AgentSummary, DomainEvent, EventBus};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct SlotState {
    state: AgentState,
    /// Versioned checkpoint blob of the attached (or orphaned) invocation
    checkpoint: Option<Vec<u8>>,
    last_error: Option<String>,
    /// An invocation task currently owns this agent
    attached: bool,
    removed: bool,
}

/// Result of a successful `paused -> busy` transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Resumed {
    /// The invocation that was paused is still alive and has been woken.
    Attached,
    /// Nobody is waiting on this checkpoint; the caller owns the
    /// continuation and must run it from the blob.
    Orphaned(Vec<u8>),
}

/// A registered agent: its descriptor plus its state slot.
pub struct AgentHandle {
    descriptor: AgentDescriptor,
    slot: Mutex<SlotState>,
    resume: Notify,
    events: Option<Arc<EventBus>>,
}

impl AgentHandle {
    pub(crate) fn new(descriptor: AgentDescriptor, events: Option<Arc<EventBus>>) -> Self {
        Self {
            descriptor,
            slot: Mutex::new(SlotState::default()),
            resume: Notify::new(),
            events,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> AgentState {
        self.slot.lock().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.slot.lock().last_error.clone()
    }

    pub fn checkpoint_blob(&self) -> Option<Vec<u8>> {
        self.slot.lock().checkpoint.clone()
    }

    pub fn summary(&self) -> AgentSummary {
        let slot = self.slot.lock();
        AgentSummary {
            id: self.descriptor.id.clone(),
            name: self.descriptor.name.clone(),
            model: self.descriptor.model.clone(),
            tools: self.descriptor.tools.clone(),
            state: slot.state,
            has_checkpoint: slot.checkpoint.is_some(),
            last_error: slot.last_error.clone(),
        }
    }

    fn transitioned(&self, from: AgentState, to: AgentState) {
        debug!(agent_id = %self.descriptor.id, %from, %to, "Agent state changed");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::AgentStateChanged {
                agent_id: self.descriptor.id.clone(),
                from,
                to,
                timestamp: Utc::now(),
            });
        }
    }

    fn invalid(&self, from: AgentState, to: AgentState) -> AgentError {
        AgentError::InvalidTransition {
            agent_id: self.descriptor.id.clone(),
            from,
            to,
        }
    }

    // ── Transitions driven by callers ─────────────────────────────────

    /// `busy -> paused`. The attached invocation parks at its next step
    /// boundary; the slot already holds its latest checkpoint.
    pub(crate) fn pause(&self) -> Result<(), AgentError> {
        let mut slot = self.slot.lock();
        if slot.state != AgentState::Busy {
            return Err(self.invalid(slot.state, AgentState::Paused));
        }
        slot.state = AgentState::Paused;
        drop(slot);
        info!(agent_id = %self.descriptor.id, "Agent paused");
        self.transitioned(AgentState::Busy, AgentState::Paused);
        Ok(())
    }

    /// `paused -> busy`.
    pub(crate) fn resume(&self) -> Result<Resumed, AgentError> {
        let mut slot = self.slot.lock();
        if slot.state != AgentState::Paused {
            return Err(self.invalid(slot.state, AgentState::Busy));
        }
        let Some(blob) = slot.checkpoint.clone() else {
            return Err(AgentError::NoCheckpoint(self.descriptor.id.clone()));
        };
        slot.state = AgentState::Busy;
        let outcome = if slot.attached {
            Resumed::Attached
        } else {
            slot.attached = true;
            Resumed::Orphaned(blob)
        };
        drop(slot);

        info!(agent_id = %self.descriptor.id, orphaned = matches!(outcome, Resumed::Orphaned(_)), "Agent resumed");
        self.transitioned(AgentState::Paused, AgentState::Busy);
        self.resume.notify_waiters();
        Ok(outcome)
    }

    /// `failed -> idle`.
    pub(crate) fn reset(&self) -> Result<(), AgentError> {
        let mut slot = self.slot.lock();
        if slot.state != AgentState::Failed {
            return Err(self.invalid(slot.state, AgentState::Idle));
        }
        slot.state = AgentState::Idle;
        slot.last_error = None;
        drop(slot);
        info!(agent_id = %self.descriptor.id, "Agent reset");
        self.transitioned(AgentState::Failed, AgentState::Idle);
        Ok(())
    }

    /// Mark removed if the state allows it. Holds the slot lock so no
    /// dispatch can slip in between the check and the removal.
    pub(crate) fn mark_removed(&self) -> Result<(), AgentError> {
        let mut slot = self.slot.lock();
        if !slot.state.is_removable() {
            return Err(AgentError::Busy {
                agent_id: self.descriptor.id.clone(),
                state: slot.state,
            });
        }
        slot.removed = true;
        Ok(())
    }

    // ── Transitions driven by the attached invocation ─────────────────

    /// `idle -> busy` on dispatch, storing the initial checkpoint.
    pub(crate) fn begin(&self, checkpoint: Vec<u8>) -> Result<(), AgentError> {
        let mut slot = self.slot.lock();
        if slot.removed {
            return Err(AgentError::NotFound(self.descriptor.id.clone()));
        }
        if slot.state != AgentState::Idle {
            return Err(AgentError::Unavailable {
                agent_id: self.descriptor.id.clone(),
                state: slot.state,
            });
        }
        slot.state = AgentState::Busy;
        slot.checkpoint = Some(checkpoint);
        slot.attached = true;
        drop(slot);
        self.transitioned(AgentState::Idle, AgentState::Busy);
        Ok(())
    }

    /// Record progress at a step boundary. Returns `true` if the agent is
    /// paused and the invocation must park.
    pub(crate) fn save_progress(&self, checkpoint: Vec<u8>) -> bool {
        let mut slot = self.slot.lock();
        slot.checkpoint = Some(checkpoint);
        slot.state == AgentState::Paused
    }

    /// Wait until the agent is no longer paused.
    pub(crate) async fn wait_resumed(&self) {
        loop {
            let notified = self.resume.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let paused = self.slot.lock().state == AgentState::Paused;
            if !paused {
                return;
            }
            notified.await;
        }
    }

    /// `busy -> idle`, clearing the checkpoint. Returns `false` without
    /// changing anything if the agent is paused.
    pub(crate) fn try_complete(&self, checkpoint: Vec<u8>) -> bool {
        let mut slot = self.slot.lock();
        match slot.state {
            AgentState::Paused => {
                slot.checkpoint = Some(checkpoint);
                false
            }
            from => {
                slot.state = AgentState::Idle;
                slot.checkpoint = None;
                slot.attached = false;
                drop(slot);
                self.transitioned(from, AgentState::Idle);
                true
            }
        }
    }

    /// `busy -> failed` with the triggering error attached. Returns `false`
    /// without changing anything if the agent is paused.
    pub(crate) fn try_fail(&self, error: &str) -> bool {
        let mut slot = self.slot.lock();
        match slot.state {
            AgentState::Paused => false,
            from => {
                slot.state = AgentState::Failed;
                slot.last_error = Some(error.to_string());
                slot.checkpoint = None;
                slot.attached = false;
                drop(slot);
                warn!(agent_id = %self.descriptor.id, error, "Agent failed");
                self.transitioned(from, AgentState::Failed);
                true
            }
        }
    }

    /// The invocation was dropped mid-flight. A busy agent is forced to
    /// `failed`; a paused one keeps its checkpoint for a later resume.
    pub(crate) fn abandon(&self) {
        let mut slot = self.slot.lock();
        slot.attached = false;
        if slot.state != AgentState::Busy {
            return;
        }
        slot.state = AgentState::Failed;
        slot.last_error = Some("invocation abandoned".into());
        slot.checkpoint = None;
        drop(slot);
        warn!(agent_id = %self.descriptor.id, "Invocation abandoned, agent forced to failed");
        self.transitioned(AgentState::Busy, AgentState::Failed);
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.descriptor.id)
            .field("state", &self.state())
            .finish()
    }
}
