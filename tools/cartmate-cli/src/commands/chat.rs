//! Interactive chat command.

use crate::commands::{print_event, DemoMesh};
use console::style;
use dialoguer::Input;

/// Interactive loop: each line is one turn; `/reset` clears the session
/// context, `/quit` exits.
pub async fn chat(mesh: &DemoMesh) -> anyhow::Result<()> {
    let session = format!("cli-chat-{}", std::process::id());
    print_event(&cartmate_orchestrator::FrontendEvent::connection_established(
        session.clone(),
        "cli-user",
    ));
    println!(
        "{} type a message, {} to clear context, {} to exit",
        style("cartmate chat").bold(),
        style("/reset").cyan(),
        style("/quit").cyan()
    );

    loop {
        let line: String = Input::new().with_prompt("you").interact_text()?;
        let trimmed = line.trim();

        match trimmed {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                if let Some(event) = mesh.orchestrator.reset_session(&session, false).await? {
                    print_event(&event);
                }
                continue;
            }
            _ => {}
        }

        let mut events = mesh.orchestrator.process_user_message(&session, trimmed);
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
        println!();
    }

    Ok(())
}
