//! Product discovery agent: catalog search behind the A2A contract.

use crate::catalog::ProductCatalog;
use async_trait::async_trait;
use cartmate_core::agent::{TaskHandler, Visibility};
use cartmate_core::error::{Error, Result};
use cartmate_core::protocol::{MessageContext, NotificationKind, RequestKind};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default number of products returned per search.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Task handler answering `SearchProducts` and `GetProductDetails`.
pub struct ProductDiscoveryAgent {
    catalog: Arc<dyn ProductCatalog>,
    visibility: Option<Visibility>,
    backend_timeout: Duration,
}

impl ProductDiscoveryAgent {
    pub fn new(catalog: Arc<dyn ProductCatalog>) -> Self {
        Self {
            catalog,
            visibility: None,
            backend_timeout: Duration::from_secs(8),
        }
    }

    /// Attaches the visibility channel for "agent is working" messages.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    async fn notify(&self, text: String, context: &MessageContext) {
        if let Some(visibility) = &self.visibility {
            visibility
                .notify(NotificationKind::AgentAction, text, context.clone())
                .await;
        }
    }

    async fn search(&self, params: &Value, context: &MessageContext) -> Result<Value> {
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| Error::validation("search_products requires a query"))?;
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_SEARCH_LIMIT);

        self.notify(format!("Searching the catalog for '{query}'"), context)
            .await;

        let products = tokio::time::timeout(self.backend_timeout, self.catalog.search(query, limit))
            .await
            .map_err(|_| Error::external("product catalog timed out"))??;

        debug!(query, count = products.len(), "catalog search complete");
        Ok(json!({
            "query": query,
            "products": products,
        }))
    }

    async fn details(&self, params: &Value, context: &MessageContext) -> Result<Value> {
        let product_id = params
            .get("product_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("get_product_details requires a product_id"))?;

        self.notify(format!("Looking up product {product_id}"), context)
            .await;

        let product = tokio::time::timeout(self.backend_timeout, self.catalog.get(product_id))
            .await
            .map_err(|_| Error::external("product catalog timed out"))??
            .ok_or_else(|| Error::handler(format!("no product with id {product_id}")))?;

        Ok(json!({ "product": product }))
    }
}

#[async_trait]
impl TaskHandler for ProductDiscoveryAgent {
    async fn handle(
        &self,
        action: RequestKind,
        params: Value,
        context: &MessageContext,
    ) -> Result<Value> {
        match action {
            RequestKind::SearchProducts => self.search(&params, context).await,
            RequestKind::GetProductDetails => self.details(&params, context).await,
            other => Err(Error::handler(format!(
                "product discovery does not handle {other:?}"
            ))),
        }
    }
}
