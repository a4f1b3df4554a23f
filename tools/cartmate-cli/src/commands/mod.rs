//! Command implementations for the CartMate CLI tool.
//!
//! All commands run against an in-process demo mesh: coordinator, bus,
//! orchestrator, and the two specialized agents wired to static back-ends.

mod ask;
mod chat;
mod status;

pub use ask::ask;
pub use chat::chat;
pub use status::list_agents;

use anyhow::Context;
use cartmate_agents::{
    PriceComparisonAgent, ProductDiscoveryAgent, StaticCatalog, StaticPriceSearch,
};
use cartmate_core::agent::{AgentConfig, AgentRuntime, Visibility};
use cartmate_core::bus::{BusConfig, MessageBus};
use cartmate_core::registry::Coordinator;
use cartmate_llm::{ChatClient, ChatCompletion, ChatConfig};
use cartmate_orchestrator::{
    FrontendEvent, IntentAnalyzer, LlmIntentAnalyzer, Orchestrator, OrchestratorConfig,
    RuleBasedIntentAnalyzer, StepType, PRICE_COMPARISON, PRODUCT_DISCOVERY,
};
use cartmate_session::MemorySessionStore;
use console::style;
use std::sync::Arc;

/// The in-process mesh the CLI commands run against.
pub struct DemoMesh {
    pub coordinator: Coordinator,
    pub bus: MessageBus,
    pub orchestrator: Orchestrator,
    agents: Vec<AgentRuntime>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl DemoMesh {
    /// Wires and starts coordinator, bus, both demo agents, and the
    /// orchestrator.
    pub async fn start(use_llm: bool) -> anyhow::Result<Self> {
        let coordinator = Coordinator::default();
        let sweeper = coordinator.spawn_sweeper();
        let bus = MessageBus::new(BusConfig::default());

        let discovery_runtime = AgentRuntime::new(
            AgentConfig::new("product-discovery-1", PRODUCT_DISCOVERY)
                .with_display_name("Product Discovery Agent")
                .with_capabilities(vec!["search_products".into(), "get_product_details".into()]),
            coordinator.clone(),
            bus.clone(),
            Arc::new(
                ProductDiscoveryAgent::new(Arc::new(StaticCatalog::with_demo_inventory()))
                    .with_visibility(Visibility::new(
                        bus.clone(),
                        "product-discovery-1",
                        "Product Discovery Agent",
                    )),
            ),
        );
        discovery_runtime
            .start()
            .await
            .context("starting product discovery agent")?;

        let price_runtime = AgentRuntime::new(
            AgentConfig::new("price-comparison-1", PRICE_COMPARISON)
                .with_display_name("Price Comparison Agent")
                .with_capabilities(vec!["compare_prices".into()]),
            coordinator.clone(),
            bus.clone(),
            Arc::new(
                PriceComparisonAgent::new(Arc::new(StaticPriceSearch)).with_visibility(
                    Visibility::new(bus.clone(), "price-comparison-1", "Price Comparison Agent"),
                ),
            ),
        );
        price_runtime
            .start()
            .await
            .context("starting price comparison agent")?;

        let chat: Option<Arc<dyn ChatCompletion>> = if use_llm {
            let client = ChatClient::new(ChatConfig::from_env())
                .context("building chat-completion client")?;
            Some(Arc::new(client))
        } else {
            None
        };
        let analyzer: Arc<dyn IntentAnalyzer> = match &chat {
            Some(chat) => Arc::new(LlmIntentAnalyzer::new(Arc::clone(chat))),
            None => Arc::new(RuleBasedIntentAnalyzer::new()),
        };

        let orchestrator = Orchestrator::new(
            OrchestratorConfig::default(),
            coordinator.clone(),
            bus.clone(),
            Arc::new(MemorySessionStore::new()),
            analyzer,
            chat,
        );
        orchestrator.start().await.context("starting orchestrator")?;

        Ok(Self {
            coordinator,
            bus,
            orchestrator,
            agents: vec![discovery_runtime, price_runtime],
            sweeper,
        })
    }

    pub async fn shutdown(&self) {
        self.orchestrator.stop().await;
        for agent in &self.agents {
            agent.stop().await;
        }
        self.sweeper.abort();
    }
}

/// Renders one frontend event to the terminal.
pub fn print_event(event: &FrontendEvent) {
    match event {
        FrontendEvent::ConnectionEstablished { session_id, .. } => {
            println!("{} session {session_id}", style("connected").green());
        }
        FrontendEvent::TypingIndicator { is_typing } => {
            if *is_typing {
                println!("{}", style("assistant is thinking...").dim());
            }
        }
        FrontendEvent::AgentCommunication { steps }
        | FrontendEvent::AgentCommunicationUpdate { steps } => {
            for step in steps {
                let marker = match step.step_type {
                    StepType::Calling => style("calling").cyan(),
                    StepType::Processing => style("working").cyan(),
                    StepType::Success => style("done").green(),
                    StepType::Error => style("error").red(),
                };
                println!("  [{marker}] {}: {}", step.agent_name, step.message);
            }
        }
        FrontendEvent::Text { content } => {
            println!("\n{}", style(&content.message).bold());
            if let Some(products) = &content.products {
                for product in products {
                    let name = product["name"].as_str().unwrap_or("unknown");
                    let price = product["price"].as_f64().unwrap_or(0.0);
                    match product["best_vendor"].as_str() {
                        Some(vendor) => {
                            println!("  - {name} at {price:.2} ({})", style(vendor).green())
                        }
                        None => println!("  - {name} at {price:.2}"),
                    }
                }
            }
        }
        FrontendEvent::ChatReset => {
            println!("{}", style("conversation cleared").yellow());
        }
    }
}
