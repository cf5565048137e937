//! A2A bus — agent-to-agent message delivery, decoupled from execution modes.
//!
//! Every registered agent gets a bounded inbound queue on first delivery.
//! Three delivery modes are supported:
//!
//! - **direct**: exactly one named recipient, `RecipientNotFound` if absent
//! - **broadcast**: every `idle` or `busy` agent except the sender, best-effort
//! - **topic**: every subscriber of a topic except the sender, best-effort
//!
//! Senders wait only for the enqueue, never for the recipient to process the
//! message. Each inbox is a FIFO channel, so messages from one sender to one
//! recipient arrive in send order.

use conclave_agent::{AgentFilter, AgentRegistry};
use conclave_core::error::BusError;
use conclave_core::{AgentId, AgentState, Message};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Heading under which pending inbox messages are folded into a prompt.
pub const INBOX_HEADING: &str = "Messages from other agents:";

/// One agent's inbound queue.
struct Inbox {
    tx: mpsc::Sender<Message>,
    rx: Mutex<mpsc::Receiver<Message>>,
}

impl Inbox {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Outcome of a best-effort fan-out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryReport {
    pub delivered: Vec<AgentId>,
    pub failed: Vec<(AgentId, String)>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The agent-to-agent bus.
pub struct A2aBus {
    registry: Arc<AgentRegistry>,
    inboxes: RwLock<HashMap<AgentId, Arc<Inbox>>>,
    topics: RwLock<HashMap<String, BTreeSet<AgentId>>>,
    inbox_capacity: usize,
}

impl A2aBus {
    pub fn new(registry: Arc<AgentRegistry>, inbox_capacity: usize) -> Self {
        Self {
            registry,
            inboxes: RwLock::new(HashMap::new()),
            topics: RwLock::new(HashMap::new()),
            inbox_capacity: inbox_capacity.max(1),
        }
    }

    fn inbox(&self, id: &AgentId) -> Arc<Inbox> {
        if let Some(inbox) = self.inboxes.read().get(id) {
            return inbox.clone();
        }
        self.inboxes
            .write()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Inbox::new(self.inbox_capacity)))
            .clone()
    }

    /// Deliver to the message's recipient, waiting for queue space if the
    /// inbox is full.
    pub async fn direct(&self, message: Message) -> Result<(), BusError> {
        let recipient = message.recipient().cloned().ok_or(BusError::MissingRecipient)?;
        if !self.registry.contains(&recipient) {
            return Err(BusError::RecipientNotFound(recipient));
        }

        let inbox = self.inbox(&recipient);
        inbox
            .tx
            .send(message)
            .await
            .map_err(|_| BusError::InboxClosed(recipient.clone()))?;
        debug!(recipient = %recipient, "Direct message delivered");
        Ok(())
    }

    /// Deliver to every `idle` or `busy` agent except the sender.
    pub fn broadcast(&self, message: Message) -> DeliveryReport {
        let recipients: Vec<AgentId> = self
            .registry
            .list(&AgentFilter::all())
            .into_iter()
            .filter(|a| matches!(a.state, AgentState::Idle | AgentState::Busy))
            .map(|a| a.id)
            .filter(|id| !message.is_from(id))
            .collect();
        self.fan_out(recipients, &message)
    }

    /// Subscribe a registered agent to a topic.
    pub fn subscribe(&self, agent_id: &AgentId, topic: &str) -> Result<(), BusError> {
        if !self.registry.contains(agent_id) {
            return Err(BusError::RecipientNotFound(agent_id.clone()));
        }
        self.topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .insert(agent_id.clone());
        debug!(agent_id = %agent_id, topic, "Subscribed to topic");
        Ok(())
    }

    pub fn unsubscribe(&self, agent_id: &AgentId, topic: &str) {
        let mut topics = self.topics.write();
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(agent_id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<AgentId> {
        self.topics
            .read()
            .get(topic)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deliver to every subscriber of `topic` except the sender.
    pub fn publish(&self, topic: &str, message: Message) -> DeliveryReport {
        let recipients: Vec<AgentId> = self
            .subscribers(topic)
            .into_iter()
            .filter(|id| !message.is_from(id))
            .collect();
        self.fan_out(recipients, &message)
    }

    fn fan_out(&self, recipients: Vec<AgentId>, message: &Message) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for id in recipients {
            if !self.registry.contains(&id) {
                report.failed.push((id, "agent no longer registered".into()));
                continue;
            }
            match self.inbox(&id).tx.try_send(message.clone()) {
                Ok(()) => report.delivered.push(id),
                Err(e) => {
                    warn!(recipient = %id, error = %e, "Bus delivery failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        debug!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Fan-out finished"
        );
        report
    }

    /// Take everything currently queued for an agent, oldest first.
    pub async fn drain(&self, agent_id: &AgentId) -> Vec<Message> {
        let Some(inbox) = self.inboxes.read().get(agent_id).cloned() else {
            return Vec::new();
        };
        let mut rx = inbox.rx.lock().await;
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Wait for the next message for an agent.
    pub async fn recv(&self, agent_id: &AgentId) -> Result<Message, BusError> {
        if !self.registry.contains(agent_id) {
            return Err(BusError::RecipientNotFound(agent_id.clone()));
        }
        let inbox = self.inbox(agent_id);
        let mut rx = inbox.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| BusError::InboxClosed(agent_id.clone()))
    }

    pub fn pending(&self, agent_id: &AgentId) -> usize {
        self.inboxes
            .read()
            .get(agent_id)
            .map(|i| i.pending())
            .unwrap_or(0)
    }

    /// Drop an agent's inbox and subscriptions after it is unregistered.
    pub fn forget(&self, agent_id: &AgentId) {
        self.inboxes.write().remove(agent_id);
        self.topics.write().retain(|_, subscribers| {
            subscribers.remove(agent_id);
            !subscribers.is_empty()
        });
    }
}

impl std::fmt::Debug for A2aBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("A2aBus")
            .field("inboxes", &self.inboxes.read().len())
            .field("topics", &self.topics.read().len())
            .field("inbox_capacity", &self.inbox_capacity)
            .finish()
    }
}

/// Render drained messages as a prompt section, or `None` if there are none.
pub fn render_inbox(messages: &[Message]) -> Option<String> {
    if messages.is_empty() {
        return None;
    }
    let lines: Vec<String> = messages
        .iter()
        .map(|m| format!("- [{}] {}", m.sender(), m.content()))
        .collect();
    Some(format!("{INBOX_HEADING}\n{}", lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conclave_agent::AgentRunner;
    use conclave_core::error::ProviderError;
    use conclave_core::{
        AgentDescriptor, InvocationRequest, ModelProvider, ModelResponse, ToolRegistry,
    };
    use std::time::Duration;

    struct StalledProvider;

    #[async_trait]
    impl ModelProvider for StalledProvider {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn invoke(&self, _request: InvocationRequest) -> Result<ModelResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ModelResponse::text(""))
        }
    }

    /// Leave `id` busy on a model call that never returns.
    async fn make_busy(registry: &Arc<AgentRegistry>, id: &str) {
        let runner = AgentRunner::new(Arc::new(StalledProvider), Arc::new(ToolRegistry::new()));
        let handle = registry.get(&id.into()).unwrap();
        tokio::spawn(async move {
            let _ = runner.invoke(&handle, None, "work", "").await;
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.state(&id.into()).unwrap(), AgentState::Busy);
    }

    fn setup(ids: &[&str], capacity: usize) -> (Arc<AgentRegistry>, A2aBus) {
        let registry = Arc::new(AgentRegistry::new(16));
        for id in ids {
            registry
                .register(AgentDescriptor::new(*id, *id, "m"))
                .unwrap();
        }
        let bus = A2aBus::new(registry.clone(), capacity);
        (registry, bus)
    }

    fn contents(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.content()).collect()
    }

    #[tokio::test]
    async fn direct_delivers_in_send_order() {
        let (_, bus) = setup(&["a", "b"], 8);
        let a = AgentId::from("a");
        for i in 0..3 {
            bus.direct(Message::from_agent(&a, format!("m{i}")).to("b"))
                .await
                .unwrap();
        }
        assert_eq!(bus.pending(&"b".into()), 3);
        let inbox = bus.drain(&"b".into()).await;
        assert_eq!(contents(&inbox), vec!["m0", "m1", "m2"]);
        assert_eq!(bus.pending(&"b".into()), 0);
    }

    #[tokio::test]
    async fn direct_to_unknown_agent_fails() {
        let (_, bus) = setup(&["a"], 8);
        let err = bus
            .direct(Message::user("hello").to("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err, BusError::RecipientNotFound("ghost".into()));

        let err = bus.direct(Message::user("nowhere")).await.unwrap_err();
        assert_eq!(err, BusError::MissingRecipient);
    }

    #[tokio::test]
    async fn broadcast_skips_sender_and_unavailable_agents() {
        let (registry, bus) = setup(&["a", "b", "c", "d"], 8);
        make_busy(&registry, "c").await;
        registry.pause(&"c".into()).unwrap();
        make_busy(&registry, "d").await;

        let report = bus.broadcast(Message::from_agent(&"a".into(), "heads up"));
        assert_eq!(report.delivered, vec![AgentId::from("b"), AgentId::from("d")]);
        assert!(report.is_complete());
        assert!(bus.drain(&"a".into()).await.is_empty());
        assert!(bus.drain(&"c".into()).await.is_empty());
        assert_eq!(contents(&bus.drain(&"d".into()).await), vec!["heads up"]);
    }

    #[tokio::test]
    async fn broadcast_is_best_effort_when_an_inbox_is_full() {
        let (_, bus) = setup(&["a", "b", "c"], 1);
        bus.direct(Message::user("filler").to("b")).await.unwrap();

        let report = bus.broadcast(Message::from_agent(&"a".into(), "news"));
        assert_eq!(report.delivered, vec![AgentId::from("c")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), "b");
        assert_eq!(contents(&bus.drain(&"c".into()).await), vec!["news"]);
    }

    #[tokio::test]
    async fn topics_reach_subscribers_only() {
        let (_, bus) = setup(&["a", "b", "c"], 8);
        bus.subscribe(&"a".into(), "research").unwrap();
        bus.subscribe(&"b".into(), "research").unwrap();
        assert!(matches!(
            bus.subscribe(&"ghost".into(), "research"),
            Err(BusError::RecipientNotFound(_))
        ));

        let report = bus.publish("research", Message::from_agent(&"a".into(), "found it"));
        assert_eq!(report.delivered, vec![AgentId::from("b")]);
        assert!(bus.drain(&"c".into()).await.is_empty());

        bus.unsubscribe(&"b".into(), "research");
        assert_eq!(bus.subscribers("research"), vec![AgentId::from("a")]);
    }

    #[tokio::test]
    async fn forget_drops_inbox_and_subscriptions() {
        let (registry, bus) = setup(&["a", "b"], 8);
        bus.subscribe(&"b".into(), "t").unwrap();
        bus.direct(Message::user("x").to("b")).await.unwrap();

        registry.unregister(&"b".into()).unwrap();
        bus.forget(&"b".into());
        assert_eq!(bus.pending(&"b".into()), 0);
        assert!(bus.subscribers("t").is_empty());
        assert!(matches!(
            bus.direct(Message::user("y").to("b")).await,
            Err(BusError::RecipientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn recv_waits_for_delivery() {
        let (_registry, bus) = setup(&["a", "b"], 8);
        let bus = Arc::new(bus);
        let waiter = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.recv(&"b".into()).await })
        };
        tokio::task::yield_now().await;
        bus.direct(Message::user("ping").to("b")).await.unwrap();
        let message = waiter.await.unwrap().unwrap();
        assert_eq!(message.content(), "ping");
    }

    #[test]
    fn render_inbox_lists_senders() {
        assert_eq!(render_inbox(&[]), None);
        let rendered = render_inbox(&[
            Message::from_agent(&"a".into(), "one"),
            Message::user("two"),
        ])
        .unwrap();
        assert_eq!(rendered, "Messages from other agents:\n- [a] one\n- [user] two");
    }
}
