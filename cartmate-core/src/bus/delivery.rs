//! Delivery tracking for the message bus.
//!
//! Each tracked unicast publish creates a delivery record that lives until
//! the recipient acknowledges the message or the bus exhausts its retry
//! budget. Retry intervals grow by exponential backoff.

use crate::protocol::Envelope;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;

/// Configuration for bus delivery behavior.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum delivery attempts per tracked message
    pub max_attempts: u32,
    /// Base delay for exponential backoff between redeliveries
    pub base_delay: Duration,
    /// How long to wait for an acknowledgment before redelivering
    pub ack_timeout: Duration,
    /// Capacity of each per-agent inbox
    pub inbox_capacity: usize,
    /// Retained dead-letter entries
    pub max_dead_letters: usize,
    /// Size of the duplicate-id window
    pub max_seen_ids: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            ack_timeout: Duration::from_secs(5),
            inbox_capacity: 64,
            max_dead_letters: 256,
            max_seen_ids: 4096,
        }
    }
}

impl BusConfig {
    /// Backoff delay preceding the given attempt: `base_delay * 2^(attempt-1)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Final outcome of a tracked delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The recipient acknowledged the message
    Acknowledged,
    /// All attempts were exhausted without acknowledgment
    Failed {
        /// How many deliveries were attempted
        attempts: u32,
    },
}

/// Handle returned from a tracked publish. Awaiting it is optional; the
/// retry machinery runs regardless.
#[derive(Debug)]
pub struct DeliveryHandle {
    message_id: String,
    rx: oneshot::Receiver<DeliveryOutcome>,
}

impl DeliveryHandle {
    pub(crate) fn new(message_id: String, rx: oneshot::Receiver<DeliveryOutcome>) -> Self {
        Self { message_id, rx }
    }

    /// Id of the tracked message.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Waits for the delivery to settle. Returns `Failed { attempts: 0 }`
    /// if the bus dropped the record without resolving it (shutdown).
    pub async fn outcome(self) -> DeliveryOutcome {
        self.rx
            .await
            .unwrap_or(DeliveryOutcome::Failed { attempts: 0 })
    }
}

/// An undeliverable or rejected envelope retained for audit and debugging.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub envelope: Envelope,
    pub reason: String,
}

/// Runtime counters for operational visibility.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusStats {
    /// Tracked unicast publishes accepted by the bus
    pub publishes_total: u64,
    /// Envelopes handed to an inbox (including redeliveries and broadcast fan-out)
    pub deliveries_total: u64,
    /// Redelivery attempts after an ack timeout
    pub retries_total: u64,
    /// Deliveries retired by acknowledgment
    pub acknowledged_total: u64,
    /// Deliveries that exhausted all attempts
    pub failures_total: u64,
    /// Dead-letter entries ever recorded
    pub dead_letters_total: u64,
}
