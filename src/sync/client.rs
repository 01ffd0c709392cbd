//! Marketplace client collaborator interface
//!
//! The fetch loop only needs two calls from a marketplace integration: fetch
//! one page given a cursor, and a single non-paginated bulk read served from
//! the local cache. Authentication, request signing and response parsing live
//! behind this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FetchError;

/// One catalog line item
///
/// Only the SKU is interpreted; every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Marketplace SKU or offer identifier
    pub sku: String,

    /// Remaining item fields
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl CatalogItem {
    /// Create an item with no extra attributes
    pub fn new(sku: impl Into<String>) -> Self {
        Self {
            sku: sku.into(),
            attributes: Map::new(),
        }
    }

    /// Attach an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Parameters of a single page request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of items to return
    pub limit: usize,
    /// Cursor returned by the previous page, `None` for the first page
    pub cursor: Option<String>,
    /// Bypass any local cache and hit the remote API
    pub force_refresh: bool,
}

/// One fetched page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Items in remote order
    pub items: Vec<CatalogItem>,
    /// Cursor for the following page; `None` marks the end of the catalog
    pub next_cursor: Option<String>,
    /// Whether the page was served from a local cache
    pub from_cache: bool,
    /// Catalog size reported by the remote API, if any
    pub total_hint: Option<usize>,
}

impl Page {
    /// Create a page with no next cursor
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    /// Set the cursor for the following page
    pub fn with_next_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.next_cursor = Some(cursor.into());
        self
    }

    /// Set the remote-reported catalog size
    pub fn with_total_hint(mut self, total: usize) -> Self {
        self.total_hint = Some(total);
        self
    }
}

/// Result of a non-paginated bulk read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCatalog {
    /// Items returned by the read
    pub items: Vec<CatalogItem>,
    /// Whether the data came from the local cache
    pub from_cache: bool,
}

/// Marketplace API client
///
/// Implementations own per-request timeouts and map their transport failures
/// onto [`FetchError`]; rate limiting must be reported as
/// [`FetchError::RateLimited`].
#[async_trait]
pub trait MarketplaceClient: Send + Sync {
    /// Synchronization scope this client serves (marketplace account)
    fn scope(&self) -> &str;

    /// Fetch one page of the catalog
    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError>;

    /// Read up to `limit` previously synchronized items in one request
    async fn fetch_all(&self, limit: usize) -> Result<CachedCatalog, FetchError>;
}
