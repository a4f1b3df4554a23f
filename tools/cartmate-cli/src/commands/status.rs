//! Registry inspection command.

use crate::commands::DemoMesh;
use cartmate_core::registry::AgentStatus;
use console::style;

/// Prints every registration the demo coordinator holds.
pub async fn list_agents(mesh: &DemoMesh) -> anyhow::Result<()> {
    let registrations = mesh.coordinator.list().await;
    if registrations.is_empty() {
        println!("no agents registered");
        return Ok(());
    }

    for registration in registrations {
        let status = match registration.status {
            AgentStatus::Active => style("active").green(),
            AgentStatus::Degraded => style("degraded").yellow(),
            AgentStatus::Unavailable => style("unavailable").red(),
        };
        println!(
            "{:<24} {:<18} [{}] capabilities: {}",
            registration.agent_id,
            registration.agent_type,
            status,
            if registration.capabilities.is_empty() {
                "-".to_string()
            } else {
                registration.capabilities.join(", ")
            }
        );
    }
    Ok(())
}
