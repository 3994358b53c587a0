//! Product catalog reads.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::ProductId;
use domain::Money;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;

use crate::error::Result;

/// Price and name of an active product at the time of the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
}

/// Read access to the product catalog owned by another service.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns snapshots of the requested products that exist and are
    /// active. Missing or inactive products are simply absent.
    async fn active_products(&self, ids: &[ProductId]) -> Result<Vec<ProductSnapshot>>;
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    snapshot: ProductSnapshot,
    active: bool,
}

/// In-memory catalog for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductCatalog {
    products: Arc<RwLock<HashMap<ProductId, CatalogEntry>>>,
}

impl InMemoryProductCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an active product.
    pub async fn add_product(
        &self,
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
    ) {
        let product_id = id.into();
        self.products.write().await.insert(
            product_id.clone(),
            CatalogEntry {
                snapshot: ProductSnapshot {
                    product_id,
                    name: name.into(),
                    price,
                },
                active: true,
            },
        );
    }

    /// Marks a product inactive.
    pub async fn deactivate(&self, id: &ProductId) {
        if let Some(entry) = self.products.write().await.get_mut(id) {
            entry.active = false;
        }
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn active_products(&self, ids: &[ProductId]) -> Result<Vec<ProductSnapshot>> {
        let products = self.products.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| products.get(id))
            .filter(|entry| entry.active)
            .map(|entry| entry.snapshot.clone())
            .collect())
    }
}

/// Catalog backed by the `products` table.
#[derive(Clone)]
pub struct PostgresProductCatalog {
    pool: PgPool,
}

impl PostgresProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductCatalog for PostgresProductCatalog {
    async fn active_products(&self, ids: &[ProductId]) -> Result<Vec<ProductSnapshot>> {
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_string()).collect();
        let rows = sqlx::query("SELECT id, name, price FROM products WHERE id = ANY($1) AND active")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ProductSnapshot {
                    product_id: ProductId::new(row.try_get::<String, _>("id")?),
                    name: row.try_get("name")?,
                    price: Money::new(row.try_get::<Decimal, _>("price")?),
                })
            })
            .collect()
    }
}
