//! Price comparison agent: external price search behind the A2A contract.

use async_trait::async_trait;
use cartmate_core::agent::{TaskHandler, Visibility};
use cartmate_core::error::{Error, Result};
use cartmate_core::protocol::{MessageContext, NotificationKind, RequestKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One vendor's price for a product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceOffer {
    pub vendor: String,
    pub price: f64,
    pub in_stock: bool,
}

/// External price search service, invoked as a fallible remote call.
#[async_trait]
pub trait PriceSearch: Send + Sync {
    /// Finds competing offers for the named product.
    async fn offers_for(&self, product_name: &str) -> Result<Vec<PriceOffer>>;
}

/// Deterministic offer generator for tests and the CLI demo. Offers are
/// derived from a reference price when the request carries one.
pub struct StaticPriceSearch;

#[async_trait]
impl PriceSearch for StaticPriceSearch {
    async fn offers_for(&self, product_name: &str) -> Result<Vec<PriceOffer>> {
        // Stable pseudo-price seeded by the name so runs are reproducible.
        let seed = product_name
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let base = 40.0 + f64::from(seed % 160);
        Ok(vec![
            PriceOffer {
                vendor: "ShopSphere".into(),
                price: (base * 1.05 * 100.0).round() / 100.0,
                in_stock: true,
            },
            PriceOffer {
                vendor: "DealCo".into(),
                price: (base * 0.85 * 100.0).round() / 100.0,
                in_stock: true,
            },
            PriceOffer {
                vendor: "MegaMart".into(),
                price: (base * 0.95 * 100.0).round() / 100.0,
                in_stock: seed % 3 != 0,
            },
        ])
    }
}

/// Task handler answering `ComparePrices`.
pub struct PriceComparisonAgent {
    search: Arc<dyn PriceSearch>,
    visibility: Option<Visibility>,
    backend_timeout: Duration,
}

impl PriceComparisonAgent {
    pub fn new(search: Arc<dyn PriceSearch>) -> Self {
        Self {
            search,
            visibility: None,
            backend_timeout: Duration::from_secs(8),
        }
    }

    /// Attaches the visibility channel for "agent is working" messages.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    async fn compare(&self, params: &Value, context: &MessageContext) -> Result<Value> {
        let product = params
            .get("product")
            .ok_or_else(|| Error::validation("compare_prices requires a product"))?;
        let name = product_name(product)
            .ok_or_else(|| Error::validation("compare_prices product has no name"))?;

        if let Some(visibility) = &self.visibility {
            visibility
                .notify(
                    NotificationKind::AgentAction,
                    format!("Comparing prices for '{name}'"),
                    context.clone(),
                )
                .await;
        }

        let offers = tokio::time::timeout(self.backend_timeout, self.search.offers_for(&name))
            .await
            .map_err(|_| Error::external("price search timed out"))??;

        let best = offers
            .iter()
            .filter(|o| o.in_stock)
            .min_by(|a, b| a.price.total_cmp(&b.price))
            .cloned()
            .ok_or_else(|| Error::handler(format!("no offers found for '{name}'")))?;

        debug!(product = %name, offers = offers.len(), best_vendor = %best.vendor, "price comparison complete");

        // The product entry carries the winning price so downstream merges
        // overlay it onto the catalog listing.
        let mut entry = match product {
            Value::Object(fields) => Value::Object(fields.clone()),
            _ => json!({ "name": name }),
        };
        if let Value::Object(fields) = &mut entry {
            fields.insert("price".into(), json!(best.price));
            fields.insert("best_vendor".into(), json!(best.vendor));
        }

        Ok(json!({
            "products": [entry],
            "offers": offers,
            "summary": format!(
                "Best price for {name} is {:.2} at {}.",
                best.price, best.vendor
            ),
        }))
    }
}

fn product_name(product: &Value) -> Option<String> {
    match product {
        Value::String(name) if !name.trim().is_empty() => Some(name.clone()),
        Value::Object(fields) => fields
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl TaskHandler for PriceComparisonAgent {
    async fn handle(
        &self,
        action: RequestKind,
        params: Value,
        context: &MessageContext,
    ) -> Result<Value> {
        match action {
            RequestKind::ComparePrices => self.compare(&params, context).await,
            other => Err(Error::handler(format!(
                "price comparison does not handle {other:?}"
            ))),
        }
    }
}
