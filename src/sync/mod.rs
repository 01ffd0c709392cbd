//! Catalog synchronization
//!
//! This module pulls complete marketplace catalogs into local storage and
//! exposes the progress of each run to pollers.
//!
//! # Components
//!
//! - [`client`]: marketplace client interface and catalog page types
//! - [`store`]: catalog store interface and an in-memory store
//! - [`tracker`]: pollable per-scope job state
//! - [`fetcher`]: cursor-paged fetch loop with loop and error guards
//! - [`service`]: background runs, stuck-job guard and queued bulk reads
//! - [`file_source`]: JSON-file backed client for dry runs
//!
//! # Example
//!
//! ```ignore
//! use catalog_sync::config::Config;
//! use catalog_sync::sync::{CatalogSyncService, FileCatalogClient, MemoryCatalogStore};
//!
//! let client = FileCatalogClient::load("shop-eu", "catalog.json").await?;
//! let service = CatalogSyncService::new(
//!     &Config::default(),
//!     vec![Arc::new(client)],
//!     Arc::new(MemoryCatalogStore::new()),
//! );
//!
//! service.start_sync("shop-eu", false).await?;
//! let job = service.get_sync_progress("shop-eu").await?;
//! ```

pub mod client;
pub mod fetcher;
pub mod file_source;
pub mod service;
pub mod store;
pub mod tracker;

pub use client::{CachedCatalog, CatalogItem, MarketplaceClient, Page, PageRequest};
pub use fetcher::{CatalogFetcher, FetchOptions, FetchOutcome, StopReason};
pub use file_source::FileCatalogClient;
pub use service::CatalogSyncService;
pub use store::{CatalogStore, MemoryCatalogStore};
pub use tracker::{SyncJob, SyncProgress, SyncProgressTracker, SyncStatus, SyncSummary};
