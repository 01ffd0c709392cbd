//! Catalog store collaborator
//!
//! Each fetched page is handed to a [`CatalogStore`] as soon as it arrives.
//! [`MemoryCatalogStore`] keeps items in memory, keyed by scope and SKU.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::sync::client::CatalogItem;

/// Destination for synchronized catalog pages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Persist one page of items for `scope`
    ///
    /// Writes must be idempotent per SKU; a re-run of the same sync stores
    /// the same pages again.
    async fn store_page(&self, scope: &str, items: &[CatalogItem]) -> Result<(), StoreError>;
}

/// In-memory catalog store
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    scopes: RwLock<HashMap<String, BTreeMap<String, CatalogItem>>>,
}

impl MemoryCatalogStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct items stored for a scope
    pub async fn count(&self, scope: &str) -> usize {
        self.scopes
            .read()
            .await
            .get(scope)
            .map(|items| items.len())
            .unwrap_or(0)
    }

    /// Items stored for a scope, ordered by SKU
    pub async fn items(&self, scope: &str) -> Vec<CatalogItem> {
        self.scopes
            .read()
            .await
            .get(scope)
            .map(|items| items.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn store_page(&self, scope: &str, items: &[CatalogItem]) -> Result<(), StoreError> {
        let mut scopes = self.scopes.write().await;
        let stored = scopes.entry(scope.to_string()).or_default();
        for item in items {
            stored.insert(item.sku.clone(), item.clone());
        }
        debug!(scope, page_items = items.len(), total = stored.len(), "Stored catalog page");
        Ok(())
    }
}
