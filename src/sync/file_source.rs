//! JSON-file backed marketplace client
//!
//! Serves a catalog stored as a JSON array of items. Cursors are item offsets,
//! which makes the client useful for dry runs of the fetch loop and for tests.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use crate::error::{AppError, FetchError};
use crate::sync::client::{CachedCatalog, CatalogItem, MarketplaceClient, Page, PageRequest};

/// Marketplace client reading from a local catalog file
#[derive(Debug, Clone)]
pub struct FileCatalogClient {
    scope: String,
    items: Vec<CatalogItem>,
}

impl FileCatalogClient {
    /// Build a client over in-memory items
    pub fn from_items(scope: impl Into<String>, items: Vec<CatalogItem>) -> Self {
        Self {
            scope: scope.into(),
            items,
        }
    }

    /// Load a catalog file
    pub async fn load(scope: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await?;
        let items: Vec<CatalogItem> = serde_json::from_str(&contents).map_err(|e| {
            AppError::CatalogFile(format!("Failed to parse {:?}: {}", path, e))
        })?;

        let scope = scope.into();
        debug!(scope = %scope, path = ?path, items = items.len(), "Loaded catalog file");
        Ok(Self::from_items(scope, items))
    }

    /// Number of items in the catalog
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl MarketplaceClient for FileCatalogClient {
    fn scope(&self) -> &str {
        &self.scope
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError> {
        let offset = match request.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| FetchError::InvalidData(format!("Invalid cursor: {}", cursor)))?,
        };
        let start = offset.min(self.items.len());
        let end = start.saturating_add(request.limit).min(self.items.len());

        let mut page = Page::new(self.items[start..end].to_vec()).with_total_hint(self.items.len());
        if end < self.items.len() {
            page = page.with_next_cursor(end.to_string());
        }
        Ok(page)
    }

    async fn fetch_all(&self, limit: usize) -> Result<CachedCatalog, FetchError> {
        Ok(CachedCatalog {
            items: self.items.iter().take(limit).cloned().collect(),
            from_cache: true,
        })
    }
}
