//! CartMate Command Line Interface
//! Runs the agent mesh in-process for demos and inspection

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Use the configured chat-completion endpoint for intent analysis
    /// and synthesis (reads CARTMATE_LLM_URL / CARTMATE_LLM_KEY /
    /// CARTMATE_LLM_MODEL); keyword analysis otherwise
    #[arg(long, global = true)]
    llm: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one user turn and print the event stream
    Ask {
        /// The user message
        text: String,
    },

    /// Interactive chat session (/reset clears context, /quit exits)
    Chat,

    /// List the demo mesh's agent registry
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mesh = commands::DemoMesh::start(cli.llm).await?;

    let result = match cli.command {
        Commands::Ask { text } => commands::ask(&mesh, &text).await,
        Commands::Chat => commands::chat(&mesh).await,
        Commands::Agents => commands::list_agents(&mesh).await,
    };

    mesh.shutdown().await;
    result
}
