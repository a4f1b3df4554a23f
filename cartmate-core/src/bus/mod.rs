//! Message bus module provides reliable delivery between agents.
//!
//! The bus decouples a sender from the recipient's availability at send
//! time. Each subscribed agent owns a bounded inbox; tracked unicast
//! publishes create a delivery record that is retried with exponential
//! backoff until acknowledged or exhausted. Exhausted deliveries are
//! dead-lettered and reported back to the sender as a synthetic
//! `delivery_failure` notification so the caller can degrade instead of
//! hanging.
//!
//! Ordering: messages from one sender to one recipient are enqueued in
//! send order (a single FIFO inbox per recipient); redeliveries may arrive
//! out of order. No ordering is guaranteed across different sender/
//! recipient pairs.

mod delivery;
pub use delivery::{BusConfig, BusStats, DeadLetter, DeliveryHandle, DeliveryOutcome};

use crate::error::{Error, Result};
use crate::protocol::{Envelope, MessageContext, MessageType, Payload, Recipient};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, Notify, RwLock};
use tracing::{debug, warn};

/// Sender id used on bus-synthesized envelopes.
pub const BUS_AGENT_ID: &str = "bus";

/// Notification event emitted to a sender when delivery is exhausted.
pub const DELIVERY_FAILURE_EVENT: &str = "delivery_failure";

struct Subscriber {
    agent_type: String,
    tx: mpsc::Sender<Envelope>,
}

struct PendingDelivery {
    acked: Arc<AtomicBool>,
    notify: Arc<Notify>,
    resolver: oneshot::Sender<DeliveryOutcome>,
}

/// Bounded window of recently seen ids, used for duplicate suppression.
#[derive(Default)]
pub(crate) struct SeenWindow {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenWindow {
    /// Records an id, evicting the oldest when the window is full.
    /// Returns false if the id was already present.
    pub(crate) fn insert(&mut self, id: &str, cap: usize) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        while self.ids.len() >= cap {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            } else {
                break;
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }
}

struct BusInner {
    config: BusConfig,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    pending: Mutex<HashMap<String, PendingDelivery>>,
    seen: Mutex<SeenWindow>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    stats: Mutex<BusStats>,
    frontend_tx: broadcast::Sender<Envelope>,
}

/// Reliable in-process message bus with acknowledgment tracking.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        let (frontend_tx, _) = broadcast::channel(config.inbox_capacity.max(16));
        Self {
            inner: Arc::new(BusInner {
                config,
                subscribers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                seen: Mutex::new(SeenWindow::default()),
                dead_letters: Mutex::new(Vec::new()),
                stats: Mutex::new(BusStats::default()),
                frontend_tx,
            }),
        }
    }

    /// Registers an agent's inbox and returns its receiving half. The
    /// `agent_type` is retained for type-filtered broadcasts. Subscribing
    /// again replaces the previous inbox.
    pub async fn subscribe(
        &self,
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
    ) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(self.inner.config.inbox_capacity);
        let mut subscribers = self.inner.subscribers.write().await;
        subscribers.insert(
            agent_id.into(),
            Subscriber {
                agent_type: agent_type.into(),
                tx,
            },
        );
        rx
    }

    /// Removes an agent's inbox. Pending deliveries to it will run out
    /// their retry budget and fail.
    pub async fn unsubscribe(&self, agent_id: &str) {
        self.inner.subscribers.write().await.remove(agent_id);
    }

    /// Publishes a unicast envelope to the named agent's inbox.
    ///
    /// Does not block for acknowledgment: a delivery record is created and
    /// retried in the background; the returned handle may be awaited for
    /// the final outcome or dropped. Publishing an `Acknowledgment`
    /// envelope retires the referenced record instead of being enqueued.
    pub async fn publish_to_agent(
        &self,
        agent_id: &str,
        envelope: Envelope,
    ) -> Result<DeliveryHandle> {
        envelope.validate()?;
        if envelope.to_agent.agent_id() != Some(agent_id) {
            return Err(Error::validation(format!(
                "envelope addressed to {:?}, published to {agent_id}",
                envelope.to_agent
            )));
        }

        // Acknowledgments share the retire path with the `acknowledge` API.
        if let Payload::Acknowledgment { message_id } = &envelope.payload {
            let message_id = message_id.clone();
            self.acknowledge(&message_id).await;
            let (tx, rx) = oneshot::channel();
            let _ = tx.send(DeliveryOutcome::Acknowledged);
            return Ok(DeliveryHandle::new(envelope.id, rx));
        }

        if !self.record_seen(&envelope.id).await {
            let reason = format!("duplicate message id {}", envelope.id);
            self.push_dead_letter(envelope, reason.clone()).await;
            return Err(Error::protocol(reason));
        }

        if !self.inner.subscribers.read().await.contains_key(agent_id) {
            let reason = format!("no subscriber for agent {agent_id}");
            self.push_dead_letter(envelope, reason.clone()).await;
            return Err(Error::UnknownAgent(agent_id.to_string()));
        }

        {
            let mut stats = self.inner.stats.lock().await;
            stats.publishes_total += 1;
        }

        let acked = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let (resolver, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(
                envelope.id.clone(),
                PendingDelivery {
                    acked: Arc::clone(&acked),
                    notify: Arc::clone(&notify),
                    resolver,
                },
            );
        }

        let handle = DeliveryHandle::new(envelope.id.clone(), rx);
        self.deliver_to_inbox(agent_id, envelope.clone()).await;

        let bus = self.clone();
        let target = agent_id.to_string();
        tokio::spawn(async move {
            bus.retry_loop(target, envelope, acked, notify).await;
        });

        Ok(handle)
    }

    /// Retires a delivery record. Safe to call more than once; a repeat
    /// acknowledgment for an already-retired id is a no-op.
    pub async fn acknowledge(&self, message_id: &str) {
        let removed = {
            let mut pending = self.inner.pending.lock().await;
            pending.remove(message_id)
        };
        match removed {
            Some(record) => {
                record.acked.store(true, Ordering::SeqCst);
                record.notify.notify_waiters();
                let _ = record.resolver.send(DeliveryOutcome::Acknowledged);
                let mut stats = self.inner.stats.lock().await;
                stats.acknowledged_total += 1;
            }
            None => {
                debug!(message_id, "acknowledgment for unknown or retired delivery");
            }
        }
    }

    /// Broadcasts an envelope to every subscribed agent, optionally
    /// filtered by agent type. Fire-and-forget: no delivery records.
    ///
    /// `FrontendNotification` envelopes are routed to the human-facing
    /// channel (see [`MessageBus::subscribe_frontend`]) rather than agent
    /// inboxes; visibility messages are not for programmatic consumption
    /// by other agents. Returns the fan-out count.
    pub async fn broadcast(&self, envelope: Envelope, type_filter: Option<&str>) -> Result<usize> {
        envelope.validate()?;
        if envelope.to_agent != Recipient::Broadcast {
            return Err(Error::validation("broadcast requires a broadcast recipient"));
        }
        if !self.record_seen(&envelope.id).await {
            let reason = format!("duplicate message id {}", envelope.id);
            self.push_dead_letter(envelope, reason.clone()).await;
            return Err(Error::protocol(reason));
        }

        if envelope.message_type() == MessageType::FrontendNotification {
            let receivers = self.inner.frontend_tx.send(envelope).unwrap_or(0);
            return Ok(receivers);
        }

        let targets: Vec<(String, mpsc::Sender<Envelope>)> = {
            let subscribers = self.inner.subscribers.read().await;
            subscribers
                .iter()
                .filter(|(id, sub)| {
                    *id != &envelope.from_agent
                        && type_filter.map_or(true, |t| sub.agent_type == t)
                })
                .map(|(id, sub)| (id.clone(), sub.tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (agent_id, tx) in targets {
            match tx.try_send(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(%agent_id, %err, "broadcast delivery dropped");
                }
            }
        }

        let mut stats = self.inner.stats.lock().await;
        stats.deliveries_total += delivered as u64;
        Ok(delivered)
    }

    /// Subscribes to the human-facing channel carrying every
    /// `FrontendNotification` that passes through the bus.
    pub fn subscribe_frontend(&self) -> broadcast::Receiver<Envelope> {
        self.inner.frontend_tx.subscribe()
    }

    /// Snapshot of the bus counters.
    pub async fn stats(&self) -> BusStats {
        *self.inner.stats.lock().await
    }

    /// Snapshot of retained dead letters, oldest first.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().await.clone()
    }

    async fn retry_loop(
        &self,
        target: String,
        envelope: Envelope,
        acked: Arc<AtomicBool>,
        notify: Arc<Notify>,
    ) {
        let config = self.inner.config.clone();
        let mut attempt = 1u32;
        loop {
            let _ = tokio::time::timeout(config.ack_timeout, notify.notified()).await;
            if acked.load(Ordering::SeqCst) {
                return;
            }
            if attempt >= config.max_attempts {
                break;
            }
            attempt += 1;
            tokio::time::sleep(config.backoff_delay(attempt)).await;
            if acked.load(Ordering::SeqCst) {
                return;
            }
            debug!(message_id = %envelope.id, attempt, "redelivering unacknowledged message");
            {
                let mut stats = self.inner.stats.lock().await;
                stats.retries_total += 1;
            }
            self.deliver_to_inbox(&target, envelope.clone()).await;
        }

        // Exhausted: retire the record as failed and tell the sender.
        let removed = {
            let mut pending = self.inner.pending.lock().await;
            pending.remove(&envelope.id)
        };
        if let Some(record) = removed {
            if record.acked.load(Ordering::SeqCst) {
                return;
            }
            let _ = record
                .resolver
                .send(DeliveryOutcome::Failed { attempts: attempt });
        } else {
            return;
        }

        warn!(
            message_id = %envelope.id,
            %target,
            attempts = attempt,
            "delivery failed after exhausting retries"
        );
        {
            let mut stats = self.inner.stats.lock().await;
            stats.failures_total += 1;
        }
        self.push_dead_letter(
            envelope.clone(),
            format!("undelivered to {target} after {attempt} attempts"),
        )
        .await;
        self.notify_sender_of_failure(&envelope, attempt).await;
    }

    /// Synthesizes a `delivery_failure` notification back to the original
    /// sender so the waiting side can degrade instead of hanging. Delivered
    /// untracked to avoid recursive retry records.
    async fn notify_sender_of_failure(&self, failed: &Envelope, attempts: u32) {
        let mut context = MessageContext {
            session_id: failed.context.session_id.clone(),
            conversation_id: failed.context.conversation_id.clone(),
            in_reply_to: Some(failed.id.clone()),
        };
        if context.conversation_id.trim().is_empty() {
            context = MessageContext::new();
        }

        let body = serde_json::json!({
            "message_id": failed.id,
            "target_agent": failed.to_agent.agent_id(),
            "attempts": attempts,
        });
        let notification = match Envelope::notification(
            BUS_AGENT_ID,
            Recipient::Agent(failed.from_agent.clone()),
            DELIVERY_FAILURE_EVENT,
            body,
            context,
        ) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "could not synthesize delivery failure notification");
                return;
            }
        };
        self.deliver_to_inbox(&failed.from_agent, notification).await;
    }

    async fn deliver_to_inbox(&self, agent_id: &str, envelope: Envelope) {
        let tx = {
            let subscribers = self.inner.subscribers.read().await;
            subscribers.get(agent_id).map(|sub| sub.tx.clone())
        };
        let Some(tx) = tx else {
            debug!(%agent_id, "delivery skipped: no subscriber");
            return;
        };
        match tx.try_send(envelope) {
            Ok(()) => {
                let mut stats = self.inner.stats.lock().await;
                stats.deliveries_total += 1;
            }
            Err(err) => {
                warn!(%agent_id, %err, "inbox delivery failed");
            }
        }
    }

    async fn record_seen(&self, id: &str) -> bool {
        let mut seen = self.inner.seen.lock().await;
        seen.insert(id, self.inner.config.max_seen_ids)
    }

    async fn push_dead_letter(&self, envelope: Envelope, reason: String) {
        let mut dead = self.inner.dead_letters.lock().await;
        if dead.len() >= self.inner.config.max_dead_letters {
            dead.remove(0);
        }
        dead.push(DeadLetter { envelope, reason });
        let mut stats = self.inner.stats.lock().await;
        stats.dead_letters_total += 1;
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{NotificationKind, RequestKind};
    use serde_json::json;
    use std::time::{Duration, Instant};

    fn fast_config() -> BusConfig {
        BusConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            ack_timeout: Duration::from_millis(30),
            inbox_capacity: 16,
            max_dead_letters: 16,
            max_seen_ids: 64,
        }
    }

    fn request_envelope(to: &str) -> Envelope {
        Envelope::request(
            "orchestrator",
            to,
            RequestKind::SearchProducts,
            json!({"query": "boots"}),
            MessageContext::for_session("session-1"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_delivers_and_acknowledge_retires() {
        let bus = MessageBus::new(fast_config());
        let mut inbox = bus.subscribe("worker", "product_discovery").await;

        let envelope = request_envelope("worker");
        let handle = bus.publish_to_agent("worker", envelope.clone()).await.unwrap();

        let received = inbox.recv().await.unwrap();
        assert_eq!(received.id, envelope.id);

        bus.acknowledge(&received.id).await;
        assert_eq!(handle.outcome().await, DeliveryOutcome::Acknowledged);

        let stats = bus.stats().await;
        assert_eq!(stats.acknowledged_total, 1);
        assert_eq!(stats.failures_total, 0);
    }

    #[tokio::test]
    async fn test_unacknowledged_delivery_retries_then_fails() {
        let bus = MessageBus::new(fast_config());
        let mut worker_inbox = bus.subscribe("worker", "product_discovery").await;
        let mut sender_inbox = bus.subscribe("orchestrator", "orchestrator").await;

        let envelope = request_envelope("worker");
        let handle = bus.publish_to_agent("worker", envelope.clone()).await.unwrap();

        // All attempts arrive without ever being acknowledged, with growing
        // gaps between them.
        let mut arrivals = Vec::new();
        for _ in 0..3 {
            let received =
                tokio::time::timeout(Duration::from_secs(2), worker_inbox.recv())
                    .await
                    .expect("attempt should arrive")
                    .unwrap();
            assert_eq!(received.id, envelope.id);
            arrivals.push(Instant::now());
        }
        let first_gap = arrivals[1] - arrivals[0];
        let second_gap = arrivals[2] - arrivals[1];
        assert!(second_gap > first_gap, "backoff must grow: {first_gap:?} vs {second_gap:?}");

        assert_eq!(
            handle.outcome().await,
            DeliveryOutcome::Failed { attempts: 3 }
        );

        // Exactly one synthetic failure notification reaches the sender.
        let notification =
            tokio::time::timeout(Duration::from_secs(2), sender_inbox.recv())
                .await
                .expect("failure notification should arrive")
                .unwrap();
        match &notification.payload {
            Payload::Notification { event, body } => {
                assert_eq!(event, DELIVERY_FAILURE_EVENT);
                assert_eq!(body["message_id"], envelope.id);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(sender_inbox.try_recv().is_err());

        // No further attempts reach the worker.
        assert!(worker_inbox.try_recv().is_err());

        let stats = bus.stats().await;
        assert_eq!(stats.retries_total, 2);
        assert_eq!(stats.failures_total, 1);
        assert_eq!(bus.dead_letters().await.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_message_id_is_rejected_and_dead_lettered() {
        let bus = MessageBus::new(fast_config());
        let mut inbox = bus.subscribe("worker", "product_discovery").await;

        let envelope = request_envelope("worker");
        bus.publish_to_agent("worker", envelope.clone()).await.unwrap();
        let received = inbox.recv().await.unwrap();
        bus.acknowledge(&received.id).await;

        let result = bus.publish_to_agent("worker", envelope).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(bus.dead_letters().await.len(), 1);
        assert!(inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_to_unknown_agent_fails() {
        let bus = MessageBus::new(fast_config());
        let envelope = request_envelope("ghost");
        let result = bus.publish_to_agent("ghost", envelope).await;
        assert!(matches!(result, Err(Error::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn test_per_pair_ordering_is_preserved() {
        let bus = MessageBus::new(fast_config());
        let mut inbox = bus.subscribe("worker", "product_discovery").await;

        let mut ids = Vec::new();
        for _ in 0..8 {
            let envelope = request_envelope("worker");
            ids.push(envelope.id.clone());
            bus.publish_to_agent("worker", envelope).await.unwrap();
        }

        for expected in &ids {
            let received = inbox.recv().await.unwrap();
            assert_eq!(&received.id, expected);
            bus.acknowledge(&received.id).await;
        }
    }

    #[tokio::test]
    async fn test_ack_envelope_retires_delivery() {
        let bus = MessageBus::new(fast_config());
        let mut inbox = bus.subscribe("worker", "product_discovery").await;
        bus.subscribe("orchestrator", "orchestrator").await;

        let envelope = request_envelope("worker");
        let handle = bus.publish_to_agent("worker", envelope).await.unwrap();
        let received = inbox.recv().await.unwrap();

        let ack = Envelope::acknowledgment("worker", "orchestrator", received.id.clone()).unwrap();
        bus.publish_to_agent("orchestrator", ack).await.unwrap();

        assert_eq!(handle.outcome().await, DeliveryOutcome::Acknowledged);
    }

    #[tokio::test]
    async fn test_broadcast_respects_type_filter_and_skips_sender() {
        let bus = MessageBus::new(fast_config());
        let mut discovery_inbox = bus.subscribe("pd-1", "product_discovery").await;
        let mut price_inbox = bus.subscribe("pc-1", "price_comparison").await;
        let mut sender_inbox = bus.subscribe("orchestrator", "orchestrator").await;

        let envelope = Envelope::notification(
            "orchestrator",
            Recipient::Broadcast,
            "catalog_refreshed",
            json!({}),
            MessageContext::new(),
        )
        .unwrap();
        let delivered = bus
            .broadcast(envelope, Some("product_discovery"))
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(discovery_inbox.recv().await.is_some());
        assert!(price_inbox.try_recv().is_err());
        assert!(sender_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_frontend_notifications_reach_frontend_channel_only() {
        let bus = MessageBus::new(fast_config());
        let mut agent_inbox = bus.subscribe("pd-1", "product_discovery").await;
        let mut frontend = bus.subscribe_frontend();

        let envelope = Envelope::frontend_notification(
            "pd-1",
            NotificationKind::AgentAction,
            "Product Discovery Agent",
            "Searching the catalog",
            MessageContext::for_session("session-9"),
        )
        .unwrap();
        bus.broadcast(envelope, None).await.unwrap();

        let forwarded = frontend.recv().await.unwrap();
        assert_eq!(forwarded.message_type(), MessageType::FrontendNotification);
        assert!(agent_inbox.try_recv().is_err());
    }
}
