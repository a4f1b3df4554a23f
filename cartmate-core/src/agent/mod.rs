//! Base agent runtime implementing the reusable request/response contract.
//!
//! Every specialized agent supplies only a [`TaskHandler`]; the runtime
//! owns the rest of the lifecycle: registering with the coordinator,
//! subscribing to the agent's channel on the bus, dispatching inbound
//! envelopes, replying with success or error responses, acknowledging
//! handled messages, and reporting degradation after repeated handler
//! failures.
//!
//! The caller of a request always receives either a success response or an
//! error response — a handler failure never escapes as silence.

use crate::bus::{DeliveryHandle, MessageBus, SeenWindow};
use crate::error::{Error, Result};
use crate::protocol::{Envelope, MessageContext, NotificationKind, Payload, RequestKind};
use crate::registry::{AgentStatus, Coordinator};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// The task-handling seam a specialized agent implements.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Processes one delegated request and returns its result payload.
    /// Errors are converted into error responses by the runtime.
    async fn handle(
        &self,
        action: RequestKind,
        params: Value,
        context: &MessageContext,
    ) -> Result<Value>;

    /// Fire-and-forget listener for notifications. Absence of interest is
    /// not an error; the default does nothing.
    async fn on_notification(&self, _event: &str, _body: Value) {}

    /// Listener for response envelopes addressed to this agent. The
    /// default logs and drops them.
    async fn on_response(&self, envelope: Envelope) {
        debug!(message_id = %envelope.id, "unhandled response envelope");
    }
}

/// Lifecycle state of an agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Starting,
    Registering,
    Active,
    Degraded,
    Stopped,
}

/// Configuration for an agent runtime.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Unique agent identifier
    pub agent_id: String,
    /// Discovery category, e.g. "product_discovery"
    pub agent_type: String,
    /// Human-readable name used in visibility notifications
    pub display_name: String,
    /// Capability labels announced to the coordinator
    pub capabilities: Vec<String>,
    /// Budget for a single handler invocation
    pub handler_timeout: Duration,
    /// Consecutive handler failures before reporting `Degraded`
    pub degraded_after: u32,
    /// Interval between coordinator heartbeats
    pub heartbeat_interval: Duration,
    /// Registration attempts before startup fails fatally
    pub register_attempts: u32,
    /// Delay between registration attempts
    pub register_backoff: Duration,
    /// Size of the answered-request dedup window
    pub answered_window: usize,
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        Self {
            display_name: agent_id.clone(),
            agent_id,
            agent_type: agent_type.into(),
            capabilities: Vec::new(),
            handler_timeout: Duration::from_secs(10),
            degraded_after: 3,
            heartbeat_interval: Duration::from_secs(15),
            register_attempts: 3,
            register_backoff: Duration::from_millis(200),
            answered_window: 1024,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Helper for emitting human-facing visibility notifications from inside a
/// task handler, without handing the handler the whole runtime.
#[derive(Clone)]
pub struct Visibility {
    bus: MessageBus,
    agent_id: String,
    agent_name: String,
}

impl Visibility {
    pub fn new(
        bus: MessageBus,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
        }
    }

    /// Broadcasts an "agent X is doing Y" message to the frontend channel.
    pub async fn notify(
        &self,
        kind: NotificationKind,
        text: impl Into<String>,
        context: MessageContext,
    ) {
        let envelope = match Envelope::frontend_notification(
            self.agent_id.clone(),
            kind,
            self.agent_name.clone(),
            text,
            context,
        ) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "could not build frontend notification");
                return;
            }
        };
        if let Err(err) = self.bus.broadcast(envelope, None).await {
            warn!(%err, "frontend notification dropped");
        }
    }
}

struct RuntimeInner {
    config: AgentConfig,
    coordinator: Coordinator,
    bus: MessageBus,
    handler: Arc<dyn TaskHandler>,
    state: RwLock<AgentState>,
    answered: Mutex<SeenWindow>,
    error_streak: AtomicU32,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The reusable runtime every specialized agent runs on.
/// Cheap to clone; clones share the same agent.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

impl AgentRuntime {
    pub fn new(
        config: AgentConfig,
        coordinator: Coordinator,
        bus: MessageBus,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                coordinator,
                bus,
                handler,
                state: RwLock::new(AgentState::Starting),
                answered: Mutex::new(SeenWindow::default()),
                error_streak: AtomicU32::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.config.agent_id
    }

    pub async fn state(&self) -> AgentState {
        *self.inner.state.read().await
    }

    /// Visibility helper bound to this agent, for use inside handlers.
    pub fn visibility(&self) -> Visibility {
        Visibility::new(
            self.inner.bus.clone(),
            self.inner.config.agent_id.clone(),
            self.inner.config.display_name.clone(),
        )
    }

    /// Registers with the coordinator, subscribes to the bus, and spawns
    /// the message loop and heartbeat ticker.
    ///
    /// Fails only if registration cannot complete within the configured
    /// attempts; that failure is reported upward, not swallowed.
    pub async fn start(&self) -> Result<()> {
        *self.inner.state.write().await = AgentState::Registering;
        self.register_with_retries().await?;

        let inbox = self
            .inner
            .bus
            .subscribe(
                self.inner.config.agent_id.clone(),
                self.inner.config.agent_type.clone(),
            )
            .await;
        *self.inner.state.write().await = AgentState::Active;
        info!(agent_id = %self.inner.config.agent_id, "agent active");

        let runtime = self.clone();
        let loop_task = tokio::spawn(async move {
            runtime.run_loop(inbox).await;
        });

        let runtime = self.clone();
        let heartbeat_task = tokio::spawn(async move {
            runtime.heartbeat_loop().await;
        });

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(loop_task);
        tasks.push(heartbeat_task);
        Ok(())
    }

    /// Deregisters and stops the background tasks.
    pub async fn stop(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        drop(tasks);

        self.inner.bus.unsubscribe(&self.inner.config.agent_id).await;
        self.inner
            .coordinator
            .deregister(&self.inner.config.agent_id)
            .await;
        *self.inner.state.write().await = AgentState::Stopped;
        info!(agent_id = %self.inner.config.agent_id, "agent stopped");
    }

    /// Sends a request to another agent through the bus.
    pub async fn send_request(
        &self,
        to_agent: &str,
        action: RequestKind,
        params: Value,
        context: MessageContext,
    ) -> Result<DeliveryHandle> {
        let envelope = Envelope::request(
            self.inner.config.agent_id.clone(),
            to_agent,
            action,
            params,
            context,
        )?;
        self.inner.bus.publish_to_agent(to_agent, envelope).await
    }

    /// Broadcasts a visibility message to the human-facing channel.
    pub async fn send_frontend_notification(
        &self,
        kind: NotificationKind,
        text: impl Into<String>,
        context: MessageContext,
    ) {
        self.visibility().notify(kind, text, context).await;
    }

    async fn register_with_retries(&self) -> Result<()> {
        let config = &self.inner.config;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .inner
                .coordinator
                .register(
                    config.agent_id.clone(),
                    config.agent_type.clone(),
                    config.capabilities.clone(),
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(err) if attempt < config.register_attempts => {
                    warn!(
                        agent_id = %config.agent_id,
                        attempt,
                        %err,
                        "registration attempt failed, retrying"
                    );
                    tokio::time::sleep(config.register_backoff * attempt).await;
                }
                Err(err) => {
                    error!(agent_id = %config.agent_id, %err, "registration failed fatally");
                    return Err(err);
                }
            }
        }
    }

    async fn heartbeat_loop(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self
                .inner
                .coordinator
                .heartbeat(&self.inner.config.agent_id)
                .await
            {
                warn!(agent_id = %self.inner.config.agent_id, %err, "heartbeat failed");
            }
        }
    }

    async fn run_loop(&self, mut inbox: mpsc::Receiver<Envelope>) {
        while let Some(envelope) = inbox.recv().await {
            self.dispatch(envelope).await;
        }
        debug!(agent_id = %self.inner.config.agent_id, "inbox closed, message loop ending");
    }

    /// Dispatches one inbound envelope and acknowledges it afterwards.
    /// A handler-level failure still results in an error response followed
    /// by acknowledgment; only transport failures reach the bus retry path.
    async fn dispatch(&self, envelope: Envelope) {
        let message_id = envelope.id.clone();
        match envelope.payload.clone() {
            Payload::Request { action, params } => {
                self.handle_request(&envelope, action, params).await;
            }
            Payload::Notification { event, body } => {
                self.inner.handler.on_notification(&event, body).await;
            }
            Payload::Response { .. } => {
                self.inner.handler.on_response(envelope).await;
            }
            Payload::Acknowledgment { .. } => {
                debug!(agent_id = %self.inner.config.agent_id, "stray acknowledgment in inbox");
            }
            Payload::FrontendNotification { .. } => {
                // Visibility traffic is not for agents.
            }
        }
        self.inner.bus.acknowledge(&message_id).await;
    }

    async fn handle_request(&self, request: &Envelope, action: RequestKind, params: Value) {
        {
            let mut answered = self.inner.answered.lock().await;
            if !answered.insert(&request.id, self.inner.config.answered_window) {
                debug!(
                    agent_id = %self.inner.config.agent_id,
                    request_id = %request.id,
                    "duplicate request redelivery, re-acknowledging without a second response"
                );
                return;
            }
        }

        let outcome = tokio::time::timeout(
            self.inner.config.handler_timeout,
            self.inner.handler.handle(action, params, &request.context),
        )
        .await;

        let agent_id = self.inner.config.agent_id.clone();
        let response = match outcome {
            Ok(Ok(body)) => {
                self.record_success().await;
                Envelope::response_to(request, agent_id, body)
            }
            Ok(Err(err)) => {
                self.record_failure().await;
                warn!(
                    agent_id = %self.inner.config.agent_id,
                    request_id = %request.id,
                    %err,
                    "task handler failed"
                );
                Envelope::error_response_to(request, agent_id, err.to_string())
            }
            Err(_) => {
                self.record_failure().await;
                warn!(
                    agent_id = %self.inner.config.agent_id,
                    request_id = %request.id,
                    "task handler timed out"
                );
                Envelope::error_response_to(
                    request,
                    agent_id,
                    Error::timeout(format!(
                        "handler exceeded {:?}",
                        self.inner.config.handler_timeout
                    ))
                    .to_string(),
                )
            }
        };

        match response {
            Ok(response) => {
                if let Err(err) = self
                    .inner
                    .bus
                    .publish_to_agent(&request.from_agent, response)
                    .await
                {
                    error!(
                        agent_id = %self.inner.config.agent_id,
                        request_id = %request.id,
                        %err,
                        "could not publish response"
                    );
                }
            }
            Err(err) => {
                error!(request_id = %request.id, %err, "could not build response envelope");
            }
        }
    }

    async fn record_success(&self) {
        let was_failing = self.inner.error_streak.swap(0, Ordering::SeqCst) > 0;
        if was_failing && *self.inner.state.read().await == AgentState::Degraded {
            *self.inner.state.write().await = AgentState::Active;
            if let Err(err) = self
                .inner
                .coordinator
                .set_status(&self.inner.config.agent_id, AgentStatus::Active)
                .await
            {
                warn!(%err, "could not restore active status");
            }
        }
    }

    async fn record_failure(&self) {
        let streak = self.inner.error_streak.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.inner.config.degraded_after
            && *self.inner.state.read().await == AgentState::Active
        {
            warn!(
                agent_id = %self.inner.config.agent_id,
                streak,
                "repeated handler failures, reporting degraded"
            );
            *self.inner.state.write().await = AgentState::Degraded;
            if let Err(err) = self
                .inner
                .coordinator
                .set_status(&self.inner.config.agent_id, AgentStatus::Degraded)
                .await
            {
                warn!(%err, "could not report degraded status");
            }
        }
    }
}
