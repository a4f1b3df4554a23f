//! Coordinator module handles agent registration, discovery, and liveness.
//!
//! The coordinator is the central directory of the mesh. Agents self-register
//! on startup, refresh their record through heartbeats, and are swept to
//! `Unavailable` when heartbeats go stale. Discovery answers "who can do X"
//! and returns only agents that are still answering.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Liveness/health status of a registered agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered and answering normally; the only state discovery returns
    Active,
    /// Its handler has been failing repeatedly; hidden from discovery
    /// until it recovers
    Degraded,
    /// Heartbeats went stale; hidden from discovery but retained
    Unavailable,
}

/// A coordinator-held registration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// Unique agent identifier
    pub agent_id: String,
    /// Category used for discovery, e.g. "product_discovery"
    pub agent_type: String,
    /// Task labels the agent claims to handle
    pub capabilities: Vec<String>,
    /// Current status
    pub status: AgentStatus,
    /// Time of the last heartbeat (or registration)
    pub last_heartbeat: DateTime<Utc>,
    /// Time of first registration
    pub registered_at: DateTime<Utc>,
}

/// Configuration for registry liveness bookkeeping.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Heartbeat age beyond which an agent is considered stale
    pub stale_after: Duration,
    /// Interval between background staleness sweeps
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(45),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    agents: HashMap<String, Registration>,
    by_type: HashMap<String, Vec<String>>,
}

/// Central directory of agents: registration, discovery, liveness.
/// Cheap to clone; clones share the same registry state.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<RwLock<RegistryState>>,
    config: RegistryConfig,
}

impl Coordinator {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            config,
        }
    }

    /// Registers an agent, or updates its record if the id is already known.
    ///
    /// Re-registration refreshes type, capabilities, status, and heartbeat.
    /// Multiple agents may share an `agent_type`; discovery returns all
    /// matches and the caller chooses.
    pub async fn register(
        &self,
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Result<Registration> {
        let agent_id = agent_id.into();
        let agent_type = agent_type.into();
        if agent_id.trim().is_empty() {
            return Err(Error::validation("agent_id must not be empty"));
        }
        if agent_type.trim().is_empty() {
            return Err(Error::validation("agent_type must not be empty"));
        }

        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(existing) = state.agents.get(&agent_id).cloned() {
            if existing.agent_type != agent_type {
                remove_type_index(&mut state.by_type, &existing.agent_type, &agent_id);
            }
            let updated = Registration {
                agent_type: agent_type.clone(),
                capabilities,
                status: AgentStatus::Active,
                last_heartbeat: now,
                ..existing
            };
            state.agents.insert(agent_id.clone(), updated.clone());
            insert_type_index(&mut state.by_type, &agent_type, &agent_id);
            debug!(agent_id = %agent_id, "re-registered agent");
            return Ok(updated);
        }

        let registration = Registration {
            agent_id: agent_id.clone(),
            agent_type: agent_type.clone(),
            capabilities,
            status: AgentStatus::Active,
            last_heartbeat: now,
            registered_at: now,
        };
        state.agents.insert(agent_id.clone(), registration.clone());
        insert_type_index(&mut state.by_type, &agent_type, &agent_id);
        info!(agent_id = %agent_id, agent_type = %agent_type, "registered agent");
        Ok(registration)
    }

    /// Returns every `Active` registration of the given type.
    ///
    /// An empty result means "capability unavailable" and is not an error;
    /// callers are expected to degrade gracefully.
    pub async fn discover(&self, agent_type: &str) -> Vec<Registration> {
        let state = self.state.read().await;
        state
            .by_type
            .get(agent_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.agents.get(id))
                    .filter(|r| r.status == AgentStatus::Active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns every `Active` registration claiming the capability.
    pub async fn discover_capability(&self, capability: &str) -> Vec<Registration> {
        let state = self.state.read().await;
        state
            .agents
            .values()
            .filter(|r| r.status == AgentStatus::Active)
            .filter(|r| r.capabilities.iter().any(|c| c == capability))
            .cloned()
            .collect()
    }

    /// Looks up a single registration by id.
    pub async fn get(&self, agent_id: &str) -> Option<Registration> {
        self.state.read().await.agents.get(agent_id).cloned()
    }

    /// Refreshes an agent's heartbeat. A stale agent that heartbeats again
    /// is restored to `Active`.
    pub async fn heartbeat(&self, agent_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let registration = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))?;
        registration.last_heartbeat = Utc::now();
        if registration.status == AgentStatus::Unavailable {
            registration.status = AgentStatus::Active;
            info!(agent_id = %agent_id, "agent back from unavailable");
        }
        Ok(())
    }

    /// Reports a status change for an agent (e.g. the runtime flagging
    /// itself degraded after repeated handler failures).
    pub async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let registration = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::UnknownAgent(agent_id.to_string()))?;
        if registration.status != status {
            info!(agent_id = %agent_id, ?status, "agent status changed");
            registration.status = status;
        }
        Ok(())
    }

    /// Removes a registration. Idempotent if the id is already absent.
    pub async fn deregister(&self, agent_id: &str) {
        let mut state = self.state.write().await;
        if let Some(removed) = state.agents.remove(agent_id) {
            remove_type_index(&mut state.by_type, &removed.agent_type, agent_id);
            info!(agent_id = %agent_id, "deregistered agent");
        }
    }

    /// Lists every registration, including unavailable ones.
    pub async fn list(&self) -> Vec<Registration> {
        let mut all: Vec<_> = self.state.read().await.agents.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    /// Scans for stale heartbeats and transitions them to `Unavailable`.
    /// Records are retained for audit, only hidden from discovery.
    /// Returns how many registrations were transitioned.
    pub async fn sweep_stale(&self) -> usize {
        let threshold = ChronoDuration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| ChronoDuration::seconds(45));
        let cutoff = Utc::now() - threshold;
        let mut swept = 0;

        let mut state = self.state.write().await;
        for registration in state.agents.values_mut() {
            if registration.status != AgentStatus::Unavailable
                && registration.last_heartbeat < cutoff
            {
                warn!(
                    agent_id = %registration.agent_id,
                    last_heartbeat = %registration.last_heartbeat,
                    "marking agent unavailable after stale heartbeat"
                );
                registration.status = AgentStatus::Unavailable;
                swept += 1;
            }
        }
        swept
    }

    /// Spawns the periodic staleness sweeper.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let interval = coordinator.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let swept = coordinator.sweep_stale().await;
                if swept > 0 {
                    debug!(swept, "staleness sweep complete");
                }
            }
        })
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

fn insert_type_index(by_type: &mut HashMap<String, Vec<String>>, agent_type: &str, agent_id: &str) {
    let ids = by_type.entry(agent_type.to_string()).or_default();
    if !ids.iter().any(|id| id == agent_id) {
        ids.push(agent_id.to_string());
    }
}

fn remove_type_index(by_type: &mut HashMap<String, Vec<String>>, agent_type: &str, agent_id: &str) {
    if let Some(ids) = by_type.get_mut(agent_type) {
        ids.retain(|id| id != agent_id);
        if ids.is_empty() {
            by_type.remove(agent_type);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RegistryConfig {
        RegistryConfig {
            stale_after: Duration::from_millis(50),
            sweep_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_register_and_discover() {
        let coordinator = Coordinator::default();
        coordinator
            .register("pd-1", "product_discovery", vec!["search_products".into()])
            .await
            .unwrap();
        coordinator
            .register("pd-2", "product_discovery", vec!["search_products".into()])
            .await
            .unwrap();
        coordinator
            .register("pc-1", "price_comparison", vec!["compare_prices".into()])
            .await
            .unwrap();

        let found = coordinator.discover("product_discovery").await;
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.agent_type == "product_discovery"));

        let by_capability = coordinator.discover_capability("compare_prices").await;
        assert_eq!(by_capability.len(), 1);
        assert_eq!(by_capability[0].agent_id, "pc-1");

        assert!(coordinator.discover("checkout").await.is_empty());
    }

    #[tokio::test]
    async fn test_reregistration_is_idempotent() {
        let coordinator = Coordinator::default();
        coordinator
            .register("pd-1", "product_discovery", vec!["search_products".into()])
            .await
            .unwrap();
        let updated = coordinator
            .register(
                "pd-1",
                "product_discovery",
                vec!["search_products".into(), "get_product_details".into()],
            )
            .await
            .unwrap();

        assert_eq!(updated.capabilities.len(), 2);
        assert_eq!(coordinator.discover("product_discovery").await.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent_fails() {
        let coordinator = Coordinator::default();
        let result = coordinator.heartbeat("ghost").await;
        assert!(matches!(result, Err(Error::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn test_deregister_hides_agent() {
        let coordinator = Coordinator::default();
        coordinator
            .register("pd-1", "product_discovery", vec![])
            .await
            .unwrap();
        coordinator.deregister("pd-1").await;
        assert!(coordinator.discover("product_discovery").await.is_empty());

        // Idempotent on repeat.
        coordinator.deregister("pd-1").await;
    }

    #[tokio::test]
    async fn test_sweep_marks_stale_agents_unavailable() {
        let coordinator = Coordinator::new(test_config());
        coordinator
            .register("pd-1", "product_discovery", vec![])
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let swept = coordinator.sweep_stale().await;
        assert_eq!(swept, 1);

        // Hidden from discovery, retained in the full listing.
        assert!(coordinator.discover("product_discovery").await.is_empty());
        let all = coordinator.list().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, AgentStatus::Unavailable);

        // A fresh heartbeat restores the agent.
        coordinator.heartbeat("pd-1").await.unwrap();
        assert_eq!(coordinator.discover("product_discovery").await.len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_agents_are_hidden_from_discovery() {
        let coordinator = Coordinator::default();
        coordinator
            .register("pd-1", "product_discovery", vec!["search_products".into()])
            .await
            .unwrap();
        coordinator
            .set_status("pd-1", AgentStatus::Degraded)
            .await
            .unwrap();

        assert!(coordinator.discover("product_discovery").await.is_empty());
        assert!(coordinator
            .discover_capability("search_products")
            .await
            .is_empty());

        // The record is retained, and recovery restores discoverability.
        assert_eq!(coordinator.list().await.len(), 1);
        coordinator
            .set_status("pd-1", AgentStatus::Active)
            .await
            .unwrap();
        assert_eq!(coordinator.discover("product_discovery").await.len(), 1);
    }
}
