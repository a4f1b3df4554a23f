//! Product catalog back-end interface.
//!
//! The real catalog is an external service; agents reach it through the
//! [`ProductCatalog`] trait so tests and demos can swap in a static
//! in-memory catalog.

use async_trait::async_trait;
use cartmate_core::error::Result;
use serde::{Deserialize, Serialize};

/// A catalog entry as exposed to the rest of the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub categories: Vec<String>,
}

/// External product catalog, invoked as a fallible remote call.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Full-text search over the catalog.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>>;

    /// Single-product lookup by id.
    async fn get(&self, product_id: &str) -> Result<Option<Product>>;
}

/// Deterministic in-memory catalog for tests and the CLI demo.
pub struct StaticCatalog {
    products: Vec<Product>,
}

impl StaticCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// A small demo inventory.
    pub fn with_demo_inventory() -> Self {
        let entry = |id: &str, name: &str, description: &str, price: f64, categories: &[&str]| {
            Product {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                price,
                categories: categories.iter().map(|c| c.to_string()).collect(),
            }
        };
        Self::new(vec![
            entry("OLJCESPC7Z", "Red Jacket", "Water-resistant shell jacket in deep red", 89.0, &["clothing", "outerwear"]),
            entry("66VCHSJNUP", "Crimson Windbreaker", "Lightweight red windbreaker for spring runs", 74.0, &["clothing", "outerwear"]),
            entry("1YMWWN1N4O", "Leather Boots", "Classic ankle boots in brown leather", 120.0, &["shoes"]),
            entry("L9ECAV7KIM", "Canvas Sneakers", "Low-top sneakers in off-white canvas", 55.0, &["shoes"]),
            entry("2ZYFJ3GM2N", "Aviator Sunglasses", "Polarized aviators with gold frame", 39.5, &["accessories"]),
            entry("0PUK6V6EV0", "Field Watch", "38mm field watch with canvas strap", 199.0, &["accessories", "watches"]),
        ])
    }
}

#[async_trait]
impl ProductCatalog for StaticCatalog {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>> {
        let needle = query.to_lowercase();
        let terms: Vec<&str> = needle.split_whitespace().collect();
        let matches = self
            .products
            .iter()
            .filter(|p| {
                let haystack = format!(
                    "{} {} {}",
                    p.name.to_lowercase(),
                    p.description.to_lowercase(),
                    p.categories.join(" ").to_lowercase()
                );
                terms.iter().any(|term| haystack.contains(term))
            })
            .take(limit.max(1))
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn get(&self, product_id: &str) -> Result<Option<Product>> {
        Ok(self.products.iter().find(|p| p.id == product_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_matches_name_and_description() {
        let catalog = StaticCatalog::with_demo_inventory();
        let results = catalog.search("red jacket", 10).await.unwrap();
        assert!(results.len() >= 2);
        assert!(results.iter().any(|p| p.name == "Red Jacket"));

        let results = catalog.search("polarized", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Aviator Sunglasses");
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let catalog = StaticCatalog::with_demo_inventory();
        let results = catalog.search("red", 1).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let catalog = StaticCatalog::with_demo_inventory();
        let product = catalog.get("0PUK6V6EV0").await.unwrap().unwrap();
        assert_eq!(product.name, "Field Watch");
        assert!(catalog.get("missing").await.unwrap().is_none());
    }
}
