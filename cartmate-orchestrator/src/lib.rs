//! CartMate Orchestrator
//! The control loop that receives user turns, delegates to specialized
//! agents through the coordination layer, and streams progress events to
//! the human-facing channel.

pub mod context;
pub mod delegation;
pub mod events;
pub mod intent;
mod orchestrator;
pub mod synthesis;

pub use context::{ConversationContext, Turn, TurnSender};
pub use delegation::{DelegationOutcome, DelegationReply, PendingDelegations};
pub use events::{AgentStep, EventSink, FrontendEvent, StepType, TextContent};
pub use intent::{
    DelegationSpec, Intent, IntentAnalyzer, LlmIntentAnalyzer, RuleBasedIntentAnalyzer,
    CART_MANAGEMENT, CHECKOUT, PRICE_COMPARISON, PRODUCT_DISCOVERY,
};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use synthesis::{CapabilityPriority, SynthesisResult};
