//! One-shot turn command.

use crate::commands::{print_event, DemoMesh};

/// Runs a single user turn against the demo mesh and prints its events.
pub async fn ask(mesh: &DemoMesh, text: &str) -> anyhow::Result<()> {
    let session = format!("cli-{}", std::process::id());
    let mut events = mesh.orchestrator.process_user_message(&session, text);
    while let Some(event) = events.recv().await {
        print_event(&event);
    }
    Ok(())
}
