//! CartMate A2A Core
//! Provides the agent-to-agent coordination substrate: message protocol,
//! coordinator/registry, reliable message bus, and the base agent runtime.

pub mod agent;
pub mod bus;
pub mod error;
pub mod protocol;
pub mod registry;

// Re-export commonly used types
pub use agent::{AgentConfig, AgentRuntime, AgentState, TaskHandler, Visibility};
pub use bus::{BusConfig, DeliveryHandle, DeliveryOutcome, MessageBus};
pub use error::{Error, Result};
pub use protocol::{
    Envelope, MessageContext, MessageType, NotificationKind, Payload, Recipient, RequestKind,
};
pub use registry::{AgentStatus, Coordinator, Registration, RegistryConfig};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PROTOCOL_VERSION: &str = "1.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants() {
        assert!(!VERSION.is_empty());
        assert!(!PROTOCOL_VERSION.is_empty());
    }
}
