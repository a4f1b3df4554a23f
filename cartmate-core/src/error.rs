//! Error handling for the CartMate A2A layer.
//!
//! This module provides a centralized error type and result alias shared by
//! the protocol, coordinator, message bus, and agent runtime. Variants map
//! onto the failure taxonomy of the coordination layer: protocol violations
//! are rejected before transmission, delivery failures surface after the
//! bus exhausts its retries, and handler failures travel inside error
//! responses rather than crashing an agent.
//!
//! # Examples
//!
//! ```rust
//! use cartmate_core::error::{Error, Result};
//!
//! fn validate_agent_id(id: &str) -> Result<()> {
//!     if id.is_empty() {
//!         return Err(Error::validation("agent id cannot be empty"));
//!     }
//!     Ok(())
//! }
//! ```

use std::io;
use thiserror::Error;

/// Comprehensive error type for A2A coordination operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed envelope or protocol misuse (rejected at the boundary)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// The bus could not deliver a message after exhausting retries
    #[error("Delivery failure: {0}")]
    Delivery(String),

    /// An agent's task handler failed while processing a request
    #[error("Handler error: {0}")]
    Handler(String),

    /// An operation referenced an agent the registry does not know
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// A bounded wait elapsed before the awaited event arrived
    #[error("Timeout exceeded: {0}")]
    Timeout(String),

    /// A capability back-end (LLM, catalog, price search) failed
    #[error("External service error: {0}")]
    ExternalService(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Session store errors
    #[error("Session error: {0}")]
    Session(String),

    /// I/O operation failures
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Catch-all for other errors
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Convenience type alias for Results with CartMate errors.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error with the given message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Creates a new delivery failure with the given message.
    pub fn delivery(msg: impl Into<String>) -> Self {
        Error::Delivery(msg.into())
    }

    /// Creates a new handler error with the given message.
    pub fn handler(msg: impl Into<String>) -> Self {
        Error::Handler(msg.into())
    }

    /// Creates a new timeout error with the given message.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    /// Creates a new external service error with the given message.
    pub fn external(msg: impl Into<String>) -> Self {
        Error::ExternalService(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
