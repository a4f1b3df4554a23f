//! CartMate specialized agents
//! Thin task handlers that put external shopping back-ends (catalog, price
//! search) behind the base-agent contract. Domain heuristics stay out of
//! scope; these agents exist to translate back-end results and failures
//! into the response contract.

pub mod catalog;
pub mod price_comparison;
pub mod product_discovery;

pub use catalog::{Product, ProductCatalog, StaticCatalog};
pub use price_comparison::{
    PriceComparisonAgent, PriceOffer, PriceSearch, StaticPriceSearch,
};
pub use product_discovery::ProductDiscoveryAgent;

#[cfg(test)]
mod tests {
    use super::*;
    use cartmate_core::agent::{AgentConfig, AgentRuntime};
    use cartmate_core::bus::{BusConfig, MessageBus};
    use cartmate_core::protocol::{Envelope, MessageContext, Payload, RequestKind};
    use cartmate_core::registry::Coordinator;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_product_discovery_end_to_end() {
        let bus = MessageBus::new(BusConfig {
            ack_timeout: Duration::from_millis(100),
            base_delay: Duration::from_millis(20),
            ..BusConfig::default()
        });
        let coordinator = Coordinator::default();

        let runtime = AgentRuntime::new(
            AgentConfig::new("pd-1", "product_discovery")
                .with_display_name("Product Discovery Agent")
                .with_capabilities(vec!["search_products".into()]),
            coordinator.clone(),
            bus.clone(),
            Arc::new(ProductDiscoveryAgent::new(Arc::new(
                StaticCatalog::with_demo_inventory(),
            ))),
        );
        runtime.start().await.unwrap();

        // Discoverable under its type.
        assert_eq!(coordinator.discover("product_discovery").await.len(), 1);

        let mut caller_inbox = bus.subscribe("orchestrator", "orchestrator").await;
        let request = Envelope::request(
            "orchestrator",
            "pd-1",
            RequestKind::SearchProducts,
            json!({"query": "red jacket", "limit": 3}),
            MessageContext::for_session("session-1"),
        )
        .unwrap();
        let request_id = request.id.clone();
        bus.publish_to_agent("pd-1", request).await.unwrap();

        let response = caller_inbox.recv().await.unwrap();
        bus.acknowledge(&response.id).await;
        match &response.payload {
            Payload::Response {
                request_id: rid,
                success,
                body,
                ..
            } => {
                assert_eq!(rid, &request_id);
                assert!(success);
                assert!(!body["products"].as_array().unwrap().is_empty());
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        runtime.stop().await;
    }
}
