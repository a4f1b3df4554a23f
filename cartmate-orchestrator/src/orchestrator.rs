//! The orchestrator control loop.
//!
//! Single entry point for a user turn: decides direct-answer vs delegation,
//! fans out concurrent sub-requests through the bus, streams progress
//! events, and synthesizes the final reply. Turns serialize per session;
//! delegations within a turn run concurrently. Every turn terminates with
//! a final `Text` event no matter how many delegations fail.

use crate::context::{ConversationContext, PendingDelegation, TurnSender};
use crate::delegation::{
    await_responses, ActiveDelegation, DelegationOutcome, DelegationReply, PendingDelegations,
};
use crate::events::{AgentStep, EventSink, FrontendEvent, StepType, TextContent};
use crate::intent::{Intent, IntentAnalyzer};
use crate::synthesis::{synthesize, CapabilityPriority, SynthesisResult};
use async_trait::async_trait;
use cartmate_core::agent::{AgentConfig, AgentRuntime, TaskHandler, Visibility};
use cartmate_core::bus::{MessageBus, DELIVERY_FAILURE_EVENT};
use cartmate_core::error::{Error, Result};
use cartmate_core::protocol::{Envelope, MessageContext, NotificationKind, Payload, RequestKind};
use cartmate_core::registry::{AgentStatus, Coordinator, Registration};
use cartmate_llm::{prompt, ChatCompletion};
use cartmate_session::SessionStore;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Agent id the orchestrator registers under
    pub agent_id: String,
    /// Display name used in visibility notifications
    pub display_name: String,
    /// Per-delegation response deadline
    pub delegation_timeout: Duration,
    /// Bound on retained turn history per session
    pub max_turn_history: usize,
    /// Bound on remembered recently shown products
    pub max_recent_products: usize,
    /// TTL applied when persisting session context
    pub session_ttl: Duration,
    /// Buffer size of each turn's event stream
    pub event_buffer: usize,
    /// Capability ranking for conflict resolution during synthesis
    pub priorities: CapabilityPriority,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_id: "orchestrator".to_string(),
            display_name: "Orchestrator".to_string(),
            delegation_timeout: Duration::from_secs(15),
            max_turn_history: 20,
            max_recent_products: 10,
            session_ttl: Duration::from_secs(3600),
            event_buffer: 32,
            priorities: CapabilityPriority::default(),
        }
    }
}

/// Inbox handler for the orchestrator's own agent runtime: routes response
/// envelopes and bus delivery-failure notices into the pending-delegation
/// map. The orchestrator does not accept delegated requests itself.
struct OrchestratorHandler {
    pending: PendingDelegations,
}

#[async_trait]
impl TaskHandler for OrchestratorHandler {
    async fn handle(
        &self,
        _action: RequestKind,
        _params: Value,
        _context: &MessageContext,
    ) -> Result<Value> {
        Err(Error::handler("orchestrator does not accept delegated requests"))
    }

    async fn on_response(&self, envelope: Envelope) {
        if let Payload::Response { request_id, .. } = &envelope.payload {
            let request_id = request_id.clone();
            self.pending
                .resolve(&request_id, DelegationReply::Response(envelope))
                .await;
        }
    }

    async fn on_notification(&self, event: &str, body: Value) {
        if event != DELIVERY_FAILURE_EVENT {
            debug!(event, "notification ignored");
            return;
        }
        if let Some(message_id) = body.get("message_id").and_then(Value::as_str) {
            self.pending
                .resolve(message_id, DelegationReply::DeliveryFailed)
                .await;
        }
    }
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    coordinator: Coordinator,
    bus: MessageBus,
    store: Arc<dyn SessionStore>,
    analyzer: Arc<dyn IntentAnalyzer>,
    chat: Option<Arc<dyn ChatCompletion>>,
    pending: PendingDelegations,
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    runtime: RwLock<Option<AgentRuntime>>,
}

/// The conversational coordinator for all sessions.
/// Cheap to clone; clones share the same orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        coordinator: Coordinator,
        bus: MessageBus,
        store: Arc<dyn SessionStore>,
        analyzer: Arc<dyn IntentAnalyzer>,
        chat: Option<Arc<dyn ChatCompletion>>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                coordinator,
                bus,
                store,
                analyzer,
                chat,
                pending: PendingDelegations::new(),
                session_locks: Mutex::new(HashMap::new()),
                runtime: RwLock::new(None),
            }),
        }
    }

    /// Registers the orchestrator as an agent and starts consuming its
    /// inbox (responses and delivery-failure notices).
    pub async fn start(&self) -> Result<()> {
        let agent_config = AgentConfig::new(self.inner.config.agent_id.clone(), "orchestrator")
            .with_display_name(self.inner.config.display_name.clone())
            .with_capabilities(vec![
                "conversation".into(),
                "intent_analysis".into(),
                "agent_coordination".into(),
                "response_synthesis".into(),
            ]);

        let runtime = AgentRuntime::new(
            agent_config,
            self.inner.coordinator.clone(),
            self.inner.bus.clone(),
            Arc::new(OrchestratorHandler {
                pending: self.inner.pending.clone(),
            }),
        );
        runtime.start().await?;
        *self.inner.runtime.write().await = Some(runtime);
        info!("orchestrator started");
        Ok(())
    }

    /// Stops the orchestrator's agent runtime.
    pub async fn stop(&self) {
        if let Some(runtime) = self.inner.runtime.write().await.take() {
            runtime.stop().await;
        }
    }

    /// Processes one user turn and returns its event stream.
    ///
    /// The stream always carries at least one progress event before any
    /// delegation and ends with a terminal `Text` event followed by
    /// `TypingIndicator(false)`, even if every delegation fails. Turns for
    /// the same session are processed one at a time in arrival order.
    pub fn process_user_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> mpsc::Receiver<FrontendEvent> {
        let (tx, rx) = mpsc::channel(self.inner.config.event_buffer);
        let sink = EventSink::new(tx);
        let this = self.clone();
        let session_id = session_id.to_string();
        let text = text.to_string();

        tokio::spawn(async move {
            let lock = this.session_lock(&session_id).await;
            let _turn_guard = lock.lock().await;
            this.run_turn(&session_id, &text, &sink).await;
        });

        rx
    }

    /// Clears session context. Returns the `ChatReset` event to forward
    /// unless the reset was requested silently.
    pub async fn reset_session(
        &self,
        session_id: &str,
        silent: bool,
    ) -> Result<Option<FrontendEvent>> {
        self.inner.store.delete(session_id).await?;
        info!(session_id, silent, "session context cleared");
        Ok(if silent {
            None
        } else {
            Some(FrontendEvent::ChatReset)
        })
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.session_locks.lock().await;
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn run_turn(&self, session_id: &str, text: &str, sink: &EventSink) {
        sink.typing(true).await;

        let mut context = self.load_context(session_id).await;
        context.push_turn(TurnSender::User, text, self.inner.config.max_turn_history);

        // Intent analysis failure degrades to general conversation.
        let intent = match self.inner.analyzer.analyze(text, &context).await {
            Ok(intent) => intent,
            Err(err) => {
                warn!(%err, "intent analysis failed, treating as general conversation");
                Intent::general()
            }
        };

        let result = if intent.is_direct() {
            self.answer_directly(text, &context).await
        } else {
            self.run_delegations(text, &intent, &mut context, sink).await
        };

        context.push_turn(
            TurnSender::Assistant,
            result.message.clone(),
            self.inner.config.max_turn_history,
        );
        if let Some(products) = &result.products {
            context.record_products(products, self.inner.config.max_recent_products);
        }
        context.pending_delegations.clear();
        self.store_context(&context).await;

        sink.text(TextContent {
            message: result.message,
            products: result.products,
        })
        .await;
        sink.typing(false).await;
    }

    async fn run_delegations(
        &self,
        text: &str,
        intent: &Intent,
        context: &mut ConversationContext,
        sink: &EventSink,
    ) -> SynthesisResult {
        let visibility = Visibility::new(
            self.inner.bus.clone(),
            self.inner.config.agent_id.clone(),
            self.inner.config.display_name.clone(),
        );

        let mut steps = Vec::new();
        let mut active = Vec::new();
        let mut outcomes = Vec::new();

        for spec in &intent.delegations {
            visibility
                .notify(
                    NotificationKind::AgentDelegation,
                    format!("Calling {}", spec.display_name),
                    MessageContext::for_session(&context.session_id),
                )
                .await;

            let candidates = self.inner.coordinator.discover(&spec.agent_type).await;
            let Some(target) = pick_agent(&candidates) else {
                warn!(agent_type = %spec.agent_type, "no active agent for capability");
                steps.push(AgentStep::new(
                    spec.agent_type.clone(),
                    StepType::Error,
                    spec.display_name.clone(),
                    "Capability unavailable",
                ));
                outcomes.push(DelegationOutcome::Unavailable {
                    agent_type: spec.agent_type.clone(),
                });
                continue;
            };

            let envelope = match Envelope::request(
                self.inner.config.agent_id.clone(),
                target.agent_id.clone(),
                spec.action,
                spec.params.clone(),
                MessageContext::for_session(&context.session_id),
            ) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(%err, "could not build delegation request");
                    outcomes.push(DelegationOutcome::Failed {
                        agent_type: spec.agent_type.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            let rx = self.inner.pending.register(envelope.id.clone()).await;
            context.pending_delegations.insert(
                envelope.id.clone(),
                PendingDelegation {
                    agent_type: spec.agent_type.clone(),
                    deadline: Utc::now()
                        + chrono::Duration::from_std(self.inner.config.delegation_timeout)
                            .unwrap_or_else(|_| chrono::Duration::seconds(15)),
                },
            );

            match self
                .inner
                .bus
                .publish_to_agent(&target.agent_id, envelope.clone())
                .await
            {
                Ok(_handle) => {
                    steps.push(AgentStep::new(
                        spec.agent_type.clone(),
                        StepType::Calling,
                        spec.display_name.clone(),
                        "Connecting...",
                    ));
                    active.push(ActiveDelegation {
                        request_id: envelope.id,
                        agent_type: spec.agent_type.clone(),
                        deadline: self.inner.config.delegation_timeout,
                        rx,
                    });
                }
                Err(err) => {
                    warn!(%err, agent_id = %target.agent_id, "delegation publish failed");
                    self.inner.pending.discard(&envelope.id).await;
                    steps.push(AgentStep::new(
                        spec.agent_type.clone(),
                        StepType::Error,
                        spec.display_name.clone(),
                        "Capability unavailable",
                    ));
                    outcomes.push(DelegationOutcome::Unavailable {
                        agent_type: spec.agent_type.clone(),
                    });
                }
            }
        }

        sink.steps(steps).await;
        outcomes.extend(await_responses(&self.inner.pending, active).await);
        sink.update_steps(final_steps(&outcomes)).await;

        synthesize(
            text,
            &outcomes,
            context,
            self.inner.chat.as_ref(),
            &self.inner.config.priorities,
        )
        .await
    }

    /// Answers without delegation, through the chat endpoint when
    /// configured and with a canned fallback otherwise (including when the
    /// endpoint itself is unreachable).
    async fn answer_directly(&self, text: &str, context: &ConversationContext) -> SynthesisResult {
        let fallback =
            "I'm here to help with your shopping needs! What can I assist you with today?";
        let message = match &self.inner.chat {
            Some(chat) => {
                let prompt = prompt::conversation_prompt(text, &context.summary(8));
                match chat.complete(&prompt).await {
                    Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
                    Ok(_) => fallback.to_string(),
                    Err(err) => {
                        warn!(%err, "conversation call failed, using fallback reply");
                        fallback.to_string()
                    }
                }
            }
            None => fallback.to_string(),
        };
        SynthesisResult {
            message,
            products: None,
        }
    }

    async fn load_context(&self, session_id: &str) -> ConversationContext {
        match self.inner.store.get(session_id).await {
            Ok(Some(raw)) => ConversationContext::from_json(&raw).unwrap_or_else(|err| {
                warn!(%err, session_id, "stored context unreadable, starting fresh");
                ConversationContext::new(session_id)
            }),
            Ok(None) => ConversationContext::new(session_id),
            Err(err) => {
                warn!(%err, session_id, "session store read failed, starting fresh");
                ConversationContext::new(session_id)
            }
        }
    }

    async fn store_context(&self, context: &ConversationContext) {
        let encoded = match context.to_json() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(%err, "could not encode session context");
                return;
            }
        };
        if let Err(err) = self
            .inner
            .store
            .set(&context.session_id, encoded, self.inner.config.session_ttl)
            .await
        {
            warn!(%err, session_id = %context.session_id, "session store write failed");
        }
    }
}

/// Chooses the agent to delegate to. Discovery returns only active
/// registrations; the policy is simply the first match.
fn pick_agent(candidates: &[Registration]) -> Option<&Registration> {
    candidates.iter().find(|r| r.status == AgentStatus::Active)
}

fn final_steps(outcomes: &[DelegationOutcome]) -> Vec<AgentStep> {
    outcomes
        .iter()
        .map(|outcome| match outcome {
            DelegationOutcome::Success { .. } => AgentStep::new(
                outcome.agent_type(),
                StepType::Success,
                outcome.display_name(),
                "Completed",
            ),
            DelegationOutcome::Failed { error, .. } => AgentStep::new(
                outcome.agent_type(),
                StepType::Error,
                outcome.display_name(),
                format!("Failed: {error}"),
            ),
            DelegationOutcome::TimedOut { .. } => AgentStep::new(
                outcome.agent_type(),
                StepType::Error,
                outcome.display_name(),
                "No response in time",
            ),
            DelegationOutcome::Unavailable { .. } => AgentStep::new(
                outcome.agent_type(),
                StepType::Error,
                outcome.display_name(),
                "Capability unavailable",
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{DelegationSpec, PRICE_COMPARISON, PRODUCT_DISCOVERY};
    use cartmate_core::bus::BusConfig;
    use cartmate_session::MemorySessionStore;
    use serde_json::json;
    use std::time::Instant;

    struct FixedIntentAnalyzer {
        intent: Intent,
    }

    #[async_trait]
    impl IntentAnalyzer for FixedIntentAnalyzer {
        async fn analyze(&self, _message: &str, _context: &ConversationContext) -> Result<Intent> {
            Ok(self.intent.clone())
        }
    }

    struct ProductsHandler;

    #[async_trait]
    impl TaskHandler for ProductsHandler {
        async fn handle(
            &self,
            _action: RequestKind,
            _params: Value,
            _context: &MessageContext,
        ) -> Result<Value> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(json!({
                "products": [
                    {"id": "p1", "name": "Red Jacket", "price": 89.0},
                    {"id": "p2", "name": "Crimson Windbreaker", "price": 74.0}
                ]
            }))
        }
    }

    fn fast_bus() -> MessageBus {
        MessageBus::new(BusConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            ack_timeout: Duration::from_millis(50),
            inbox_capacity: 32,
            max_dead_letters: 32,
            max_seen_ids: 256,
        })
    }

    fn search_intent() -> Intent {
        Intent {
            delegations: vec![DelegationSpec::new(
                PRODUCT_DISCOVERY,
                RequestKind::SearchProducts,
                json!({"query": "red jacket"}),
            )],
        }
    }

    async fn orchestrator_with(
        bus: &MessageBus,
        coordinator: &Coordinator,
        intent: Intent,
        delegation_timeout: Duration,
    ) -> Orchestrator {
        let config = OrchestratorConfig {
            delegation_timeout,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            coordinator.clone(),
            bus.clone(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(FixedIntentAnalyzer { intent }),
            None,
        );
        orchestrator.start().await.unwrap();
        orchestrator
    }

    async fn drain(mut rx: mpsc::Receiver<FrontendEvent>) -> Vec<FrontendEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn terminal_text(events: &[FrontendEvent]) -> &TextContent {
        events
            .iter()
            .find_map(|e| match e {
                FrontendEvent::Text { content } => Some(content),
                _ => None,
            })
            .expect("turn must end with a text event")
    }

    fn error_steps(events: &[FrontendEvent]) -> Vec<&AgentStep> {
        events
            .iter()
            .flat_map(|e| match e {
                FrontendEvent::AgentCommunication { steps }
                | FrontendEvent::AgentCommunicationUpdate { steps } => steps.iter().collect(),
                _ => Vec::new(),
            })
            .filter(|s| s.step_type == StepType::Error)
            .collect()
    }

    #[tokio::test]
    async fn test_healthy_delegation_returns_products() {
        let bus = fast_bus();
        let coordinator = Coordinator::default();
        let agent = AgentRuntime::new(
            AgentConfig::new("pd-1", PRODUCT_DISCOVERY)
                .with_display_name("Product Discovery Agent"),
            coordinator.clone(),
            bus.clone(),
            Arc::new(ProductsHandler),
        );
        agent.start().await.unwrap();

        let orchestrator =
            orchestrator_with(&bus, &coordinator, search_intent(), Duration::from_secs(2)).await;

        let events =
            drain(orchestrator.process_user_message("session-1", "find me a red jacket")).await;

        let text = terminal_text(&events);
        assert_eq!(text.products.as_ref().unwrap().len(), 2);
        assert!(error_steps(&events).is_empty());
        assert!(matches!(
            events.last(),
            Some(FrontendEvent::TypingIndicator { is_typing: false })
        ));

        agent.stop().await;
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_missing_capability_degrades_gracefully() {
        let bus = fast_bus();
        let coordinator = Coordinator::default();
        let orchestrator = orchestrator_with(
            &bus,
            &coordinator,
            search_intent(),
            Duration::from_millis(200),
        )
        .await;

        let started = Instant::now();
        let events =
            drain(orchestrator.process_user_message("session-1", "find me a red jacket")).await;

        // Terminates quickly with a degraded direct answer naming the gap.
        assert!(started.elapsed() < Duration::from_secs(2));
        let text = terminal_text(&events);
        assert!(text.message.contains("couldn't look that up right now"));
        assert!(text.products.is_none());

        let errors = error_steps(&events);
        assert!(!errors.is_empty());
        assert!(errors
            .iter()
            .any(|s| s.agent_name == "Product Discovery Agent"));

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_timeout_isolation_uses_fast_agent_only() {
        let bus = fast_bus();
        let coordinator = Coordinator::default();

        let fast_agent = AgentRuntime::new(
            AgentConfig::new("pd-1", PRODUCT_DISCOVERY)
                .with_display_name("Product Discovery Agent"),
            coordinator.clone(),
            bus.clone(),
            Arc::new(ProductsHandler),
        );
        fast_agent.start().await.unwrap();

        // A registered subscriber that never answers: requests land in an
        // inbox nobody drains.
        coordinator
            .register("pc-1", PRICE_COMPARISON, vec!["compare_prices".into()])
            .await
            .unwrap();
        let _silent_inbox = bus.subscribe("pc-1", PRICE_COMPARISON).await;

        let intent = Intent {
            delegations: vec![
                DelegationSpec::new(
                    PRODUCT_DISCOVERY,
                    RequestKind::SearchProducts,
                    json!({"query": "watch"}),
                ),
                DelegationSpec::new(
                    PRICE_COMPARISON,
                    RequestKind::ComparePrices,
                    json!({"product": {"name": "watch"}}),
                ),
            ],
        };

        let orchestrator =
            orchestrator_with(&bus, &coordinator, intent, Duration::from_millis(300)).await;

        let started = Instant::now();
        let events =
            drain(orchestrator.process_user_message("session-1", "compare watch prices")).await;
        let elapsed = started.elapsed();

        // Synthesis used the fast agent's products; the silent agent only
        // cost its own deadline, not more.
        let text = terminal_text(&events);
        assert_eq!(text.products.as_ref().unwrap().len(), 2);
        assert!(error_steps(&events)
            .iter()
            .any(|s| s.agent_name == "Price Comparison Agent"));
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");

        fast_agent.stop().await;
        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_turns_for_same_session_serialize() {
        let bus = fast_bus();
        let coordinator = Coordinator::default();

        struct SlowAnalyzer {
            spans: Arc<Mutex<Vec<(Instant, Instant)>>>,
        }

        #[async_trait]
        impl IntentAnalyzer for SlowAnalyzer {
            async fn analyze(
                &self,
                _message: &str,
                _context: &ConversationContext,
            ) -> Result<Intent> {
                let started = Instant::now();
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.spans.lock().await.push((started, Instant::now()));
                Ok(Intent::general())
            }
        }

        let spans = Arc::new(Mutex::new(Vec::new()));
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            coordinator.clone(),
            bus.clone(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(SlowAnalyzer {
                spans: Arc::clone(&spans),
            }),
            None,
        );
        orchestrator.start().await.unwrap();

        let first = orchestrator.process_user_message("session-1", "hello");
        let second = orchestrator.process_user_message("session-1", "hello again");
        let (first_events, second_events) = tokio::join!(drain(first), drain(second));
        assert!(!terminal_text(&first_events).message.is_empty());
        assert!(!terminal_text(&second_events).message.is_empty());

        let spans = spans.lock().await;
        assert_eq!(spans.len(), 2);
        let (a_start, a_end) = spans[0];
        let (b_start, b_end) = spans[1];
        let overlaps = a_start < b_end && b_start < a_end;
        assert!(!overlaps, "turns for one session must not interleave");

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_reset_session_clears_context() {
        let bus = fast_bus();
        let coordinator = Coordinator::default();
        let store = Arc::new(MemorySessionStore::new());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            coordinator.clone(),
            bus.clone(),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::new(FixedIntentAnalyzer {
                intent: Intent::general(),
            }),
            None,
        );
        orchestrator.start().await.unwrap();

        drain(orchestrator.process_user_message("session-1", "hello")).await;
        assert!(store.get("session-1").await.unwrap().is_some());

        let event = orchestrator.reset_session("session-1", false).await.unwrap();
        assert_eq!(event, Some(FrontendEvent::ChatReset));
        assert!(store.get("session-1").await.unwrap().is_none());

        // Silent reset emits nothing.
        let event = orchestrator.reset_session("session-1", true).await.unwrap();
        assert_eq!(event, None);

        orchestrator.stop().await;
    }
}
