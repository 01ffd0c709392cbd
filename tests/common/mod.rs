//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use catalog_sync::config::{Config, QueueConfig};
use catalog_sync::error::FetchError;
use catalog_sync::sync::{CachedCatalog, CatalogItem, MarketplaceClient, Page, PageRequest};

/// Marketplace client that replays scripted page results
///
/// Once the script runs out it keeps returning the fallback, or full pages
/// with fresh cursors when no fallback is set.
pub struct ScriptedClient {
    scope: String,
    script: Mutex<VecDeque<Result<Page, FetchError>>>,
    fallback: Option<Result<Page, FetchError>>,
    requests: Mutex<Vec<PageRequest>>,
}

impl ScriptedClient {
    pub fn new(scope: &str, script: Vec<Result<Page, FetchError>>) -> Self {
        Self {
            scope: scope.to_string(),
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: Result<Page, FetchError>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl MarketplaceClient for ScriptedClient {
    fn scope(&self) -> &str {
        &self.scope
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some(step) = self.script.lock().unwrap().pop_front() {
            return step;
        }
        match &self.fallback {
            Some(result) => result.clone(),
            None => Ok(page(
                &format!("{}-p{}", self.scope, call),
                request.limit,
                Some(&format!("cursor-{}", call)),
            )),
        }
    }

    async fn fetch_all(&self, limit: usize) -> Result<CachedCatalog, FetchError> {
        Ok(CachedCatalog {
            items: items(&self.scope, limit.min(10)),
            from_cache: true,
        })
    }
}

/// `count` items with SKUs `{prefix}-{n}`
pub fn items(prefix: &str, count: usize) -> Vec<CatalogItem> {
    (0..count)
        .map(|i| CatalogItem::new(format!("{}-{}", prefix, i)))
        .collect()
}

/// A page of `count` items with an optional next cursor
pub fn page(prefix: &str, count: usize, next: Option<&str>) -> Page {
    let page = Page::new(items(prefix, count));
    match next {
        Some(cursor) => page.with_next_cursor(cursor),
        None => page,
    }
}

/// Default configuration with a queue that does not pause between batches
pub fn test_config() -> Config {
    Config {
        queue: QueueConfig {
            batch_delay_ms: 0,
            ..QueueConfig::default()
        },
        ..Config::default()
    }
}
