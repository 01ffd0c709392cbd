//! Cursor-paged catalog fetch loop
//!
//! [`CatalogFetcher::fetch_remote`] walks the remote catalog one page at a
//! time, storing and reporting each page as it arrives. The run never fails as
//! a whole: every exit yields the items gathered so far plus a
//! [`StopReason`].
//!
//! [`CatalogFetcher::read_cached`] is the separate single-request bulk read of
//! previously synchronized data.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::{FetchError, TrackerError};
use crate::sync::client::{CachedCatalog, CatalogItem, MarketplaceClient, PageRequest};
use crate::sync::store::CatalogStore;
use crate::sync::tracker::{SyncProgress, SyncProgressTracker};

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Ask the client to bypass its local cache
    pub force_refresh: bool,
    /// Stops the run at the next suspension point
    pub cancel: CancellationToken,
    /// Tracker run this fetch reports for; `None` writes to whatever job the
    /// scope holds
    pub run: Option<u64>,
}

impl FetchOptions {
    /// Options with a fresh cancellation token
    pub fn new(force_refresh: bool) -> Self {
        Self {
            force_refresh,
            cancel: CancellationToken::new(),
            run: None,
        }
    }

    /// Use the given cancellation token
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report progress on behalf of tracker run `run`
    pub fn with_run(mut self, run: u64) -> Self {
        self.run = Some(run);
        self
    }
}

/// Why a fetch run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page returned fewer items than requested
    LastPage,
    /// A page carried no next cursor
    EndOfCatalog,
    /// The remote returned the cursor it was just given
    LoopDetected,
    /// `max_iterations` pages were fetched and more remain
    IterationCapReached,
    /// `max_consecutive_errors` page requests failed back to back
    TooManyErrors,
    /// The catalog store refused a page
    StoreRejected,
    /// The run was cancelled or its job was finished externally
    Cancelled,
}

impl StopReason {
    /// The whole catalog was fetched
    pub fn is_complete(&self) -> bool {
        matches!(self, StopReason::LastPage | StopReason::EndOfCatalog)
    }

    /// The run ended without a usable result
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::TooManyErrors | StopReason::StoreRejected | StopReason::Cancelled
        )
    }

    /// Short reason label
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::LastPage => "last page",
            StopReason::EndOfCatalog => "no next page",
            StopReason::LoopDetected => "loop detected",
            StopReason::IterationCapReached => "iteration cap reached",
            StopReason::TooManyErrors => "too many errors",
            StopReason::StoreRejected => "store rejected page",
            StopReason::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one fetch run
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Items gathered (and stored) before the run stopped
    pub items: Vec<CatalogItem>,
    /// Exit reason
    pub stop_reason: StopReason,
    /// Successful page fetches
    pub pages_fetched: u32,
    /// Failed page requests since the last success
    pub consecutive_errors: u32,
    /// Failed page requests over the whole run, rate limits excluded
    pub total_errors: u32,
    /// Message of the most recent failure
    pub last_error: Option<String>,
    /// Catalog size reported by the remote
    pub total_hint: Option<usize>,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl FetchOutcome {
    /// Human-readable account of the run for the end user
    pub fn describe(&self) -> String {
        let count = self.items.len();
        let mut message = match self.stop_reason {
            StopReason::LastPage | StopReason::EndOfCatalog => format!(
                "Fetched {} items in {} pages ({})",
                count, self.pages_fetched, self.stop_reason
            ),
            StopReason::LoopDetected => format!(
                "Stopped after {} pages with {} items: no progress detected ({})",
                self.pages_fetched, count, self.stop_reason
            ),
            StopReason::IterationCapReached => format!(
                "Stopped after {} pages with {} items: {}, catalog may be incomplete",
                self.pages_fetched, count, self.stop_reason
            ),
            StopReason::TooManyErrors => format!(
                "Sync aborted after {} consecutive errors with {} items synced",
                self.consecutive_errors, count
            ),
            StopReason::StoreRejected => format!(
                "Sync aborted: {} after {} items",
                self.stop_reason, count
            ),
            StopReason::Cancelled => format!("Sync cancelled after {} items", count),
        };
        if !self.stop_reason.is_complete() {
            if let Some(error) = &self.last_error {
                message.push_str(": ");
                message.push_str(error);
            }
        }
        message
    }
}

/// Fetches a full catalog from one marketplace client
pub struct CatalogFetcher {
    client: Arc<dyn MarketplaceClient>,
    config: FetchConfig,
    tracker: Option<Arc<SyncProgressTracker>>,
    store: Option<Arc<dyn CatalogStore>>,
}

impl CatalogFetcher {
    /// Create a fetcher without progress reporting or storage
    pub fn new(client: Arc<dyn MarketplaceClient>, config: FetchConfig) -> Self {
        Self {
            client,
            config,
            tracker: None,
            store: None,
        }
    }

    /// Report progress to `tracker` under the client's scope
    pub fn with_tracker(mut self, tracker: Arc<SyncProgressTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Hand every fetched page to `store`
    pub fn with_store(mut self, store: Arc<dyn CatalogStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Scope of the underlying client
    pub fn scope(&self) -> &str {
        self.client.scope()
    }

    /// Fetch the whole remote catalog page by page
    pub async fn fetch_remote(&self, options: &FetchOptions) -> FetchOutcome {
        let scope = self.client.scope().to_string();
        let cancel = &options.cancel;
        let started = Instant::now();

        let mut items: Vec<CatalogItem> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages: u32 = 0;
        let mut consecutive_errors: u32 = 0;
        let mut total_errors: u32 = 0;
        let mut last_error: Option<String> = None;
        let mut total_hint: Option<usize> = None;

        info!(
            scope = %scope,
            force_refresh = options.force_refresh,
            page_size = self.config.page_size,
            "Starting catalog fetch"
        );

        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let request = PageRequest {
                limit: self.config.page_size,
                cursor: cursor.clone(),
                force_refresh: options.force_refresh,
            };
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                result = self.client.fetch_page(request) => result,
            };

            match result {
                Ok(page) => {
                    let page_len = page.items.len();
                    if let Some(store) = &self.store {
                        if let Err(e) = store.store_page(&scope, &page.items).await {
                            warn!(scope = %scope, page = pages + 1, error = %e, "Store rejected catalog page");
                            last_error = Some(e.to_string());
                            break StopReason::StoreRejected;
                        }
                    }

                    items.extend(page.items);
                    pages += 1;
                    consecutive_errors = 0;
                    if page.total_hint.is_some() {
                        total_hint = page.total_hint;
                    }

                    let previous = std::mem::replace(&mut cursor, page.next_cursor);
                    debug!(
                        scope = %scope,
                        page = pages,
                        page_items = page_len,
                        accumulated = items.len(),
                        from_cache = page.from_cache,
                        "Fetched catalog page"
                    );

                    let progress = SyncProgress::new(
                        items.len(),
                        total_hint.unwrap_or(0),
                        format!("Fetched page {} ({} items)", pages, items.len()),
                    );
                    if !self.report(&scope, options.run, progress).await {
                        break StopReason::Cancelled;
                    }

                    if cursor.is_some() && cursor == previous {
                        warn!(scope = %scope, cursor = ?cursor, "Remote repeated the previous cursor");
                        break StopReason::LoopDetected;
                    }
                    if page_len < self.config.page_size {
                        break StopReason::LastPage;
                    }
                    if cursor.is_none() {
                        break StopReason::EndOfCatalog;
                    }
                    if pages >= self.config.max_iterations {
                        warn!(scope = %scope, pages, "Iteration cap reached with more pages remaining");
                        break StopReason::IterationCapReached;
                    }

                    if !pause(cancel, self.config.page_delay()).await {
                        break StopReason::Cancelled;
                    }
                }
                Err(e) if e.is_rate_limited() => {
                    warn!(scope = %scope, page = pages + 1, error = %e, "Rate limited, retrying same page");
                    last_error = Some(e.to_string());
                    let progress = SyncProgress::new(
                        items.len(),
                        total_hint.unwrap_or(0),
                        format!("Rate limited, retrying page {}", pages + 1),
                    );
                    if !self.report(&scope, options.run, progress).await {
                        break StopReason::Cancelled;
                    }
                    if !pause(cancel, self.config.rate_limit_wait()).await {
                        break StopReason::Cancelled;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    total_errors += 1;
                    warn!(
                        scope = %scope,
                        page = pages + 1,
                        consecutive_errors,
                        max = self.config.max_consecutive_errors,
                        error = %e,
                        "Page fetch failed"
                    );
                    last_error = Some(e.to_string());

                    if consecutive_errors >= self.config.max_consecutive_errors {
                        break StopReason::TooManyErrors;
                    }
                    let progress = SyncProgress::new(
                        items.len(),
                        total_hint.unwrap_or(0),
                        format!(
                            "Error on page {}, retrying ({}/{})",
                            pages + 1,
                            consecutive_errors,
                            self.config.max_consecutive_errors
                        ),
                    );
                    if !self.report(&scope, options.run, progress).await {
                        break StopReason::Cancelled;
                    }
                    if !pause(cancel, self.config.error_wait()).await {
                        break StopReason::Cancelled;
                    }
                }
            }
        };

        let outcome = FetchOutcome {
            items,
            stop_reason,
            pages_fetched: pages,
            consecutive_errors,
            total_errors,
            last_error,
            total_hint,
            duration: started.elapsed(),
        };
        info!(
            scope = %scope,
            reason = %outcome.stop_reason,
            items = outcome.items.len(),
            pages = outcome.pages_fetched,
            errors = outcome.total_errors,
            "Catalog fetch finished"
        );
        outcome
    }

    /// Read previously synchronized items in a single request
    ///
    /// `limit` defaults to the configured bulk limit.
    pub async fn read_cached(&self, limit: Option<usize>) -> Result<CachedCatalog, FetchError> {
        let limit = limit.unwrap_or(self.config.bulk_limit);
        let catalog = self.client.fetch_all(limit).await?;
        debug!(
            scope = %self.client.scope(),
            limit,
            items = catalog.items.len(),
            from_cache = catalog.from_cache,
            "Read cached catalog"
        );
        Ok(catalog)
    }

    /// Push progress to the tracker; false when the job was finished elsewhere
    async fn report(&self, scope: &str, run: Option<u64>, progress: SyncProgress) -> bool {
        let Some(tracker) = &self.tracker else {
            return true;
        };
        let reported = match run {
            Some(run) => tracker.update_run(scope, run, progress).await,
            None => tracker.update(scope, progress).await,
        };
        match reported {
            Ok(()) => true,
            Err(TrackerError::AlreadyFinished(_)) => {
                info!(scope, "Sync job finished externally, stopping fetch");
                false
            }
            Err(e) => {
                debug!(scope, error = %e, "Progress update ignored");
                true
            }
        }
    }
}

/// Sleep for `duration`; false when `cancel` fired first
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::sync::client::Page;
    use crate::sync::store::MockCatalogStore;
    use crate::sync::tracker::SyncStatus;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Client that replays a script, then serves an endless catalog
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<Page, FetchError>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<Page, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<PageRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketplaceClient for ScriptedClient {
        fn scope(&self) -> &str {
            "acct"
        }

        async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError> {
            let call = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(request.clone());
                requests.len()
            };
            match self.script.lock().unwrap().pop_front() {
                Some(step) => step,
                None => Ok(page(request.limit, &format!("endless-{}", call))),
            }
        }

        async fn fetch_all(&self, limit: usize) -> Result<CachedCatalog, FetchError> {
            Ok(CachedCatalog {
                items: items("cached", limit.min(3)),
                from_cache: true,
            })
        }
    }

    fn items(prefix: &str, count: usize) -> Vec<CatalogItem> {
        (0..count)
            .map(|i| CatalogItem::new(format!("{}-{}", prefix, i)))
            .collect()
    }

    fn page(count: usize, next: &str) -> Page {
        Page::new(items(next, count)).with_next_cursor(next)
    }

    fn config() -> FetchConfig {
        FetchConfig::default()
    }

    // Test 1: 100/100/40 pages stop at the short page
    #[tokio::test(start_paused = true)]
    async fn test_stops_on_last_page() {
        let client = ScriptedClient::new(vec![
            Ok(page(100, "c1")),
            Ok(page(100, "c2")),
            Ok(page(40, "c3")),
        ]);
        let fetcher = CatalogFetcher::new(client.clone(), config());

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::LastPage);
        assert_eq!(outcome.items.len(), 240);
        assert_eq!(outcome.pages_fetched, 3);
        assert!(outcome.stop_reason.is_complete());

        let cursors: Vec<Option<String>> =
            client.requests().into_iter().map(|r| r.cursor).collect();
        assert_eq!(
            cursors,
            vec![None, Some("c1".to_string()), Some("c2".to_string())]
        );
    }

    // Test 2: a missing next cursor ends the catalog even on a full page
    #[tokio::test(start_paused = true)]
    async fn test_stops_without_next_cursor() {
        let client = ScriptedClient::new(vec![
            Ok(page(100, "c1")),
            Ok(Page::new(items("tail", 100))),
        ]);
        let fetcher = CatalogFetcher::new(client, config());

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::EndOfCatalog);
        assert_eq!(outcome.items.len(), 200);
        assert_eq!(outcome.stop_reason.to_string(), "no next page");
    }

    // Test 3: a repeated cursor stops immediately with the items so far
    #[tokio::test(start_paused = true)]
    async fn test_loop_guard_stops_on_repeated_cursor() {
        let client = ScriptedClient::new(vec![
            Ok(page(100, "c1")),
            Ok(page(100, "c1")),
            Ok(page(100, "c2")),
        ]);
        let fetcher = CatalogFetcher::new(client.clone(), config());

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::LoopDetected);
        assert_eq!(outcome.items.len(), 200);
        assert_eq!(client.requests().len(), 2);
        assert!(!outcome.stop_reason.is_complete());
        assert!(!outcome.stop_reason.is_failure());
        assert!(outcome.describe().contains("no progress detected"));
    }

    // Test 4: the iteration cap stops after exactly max_iterations pages
    #[tokio::test(start_paused = true)]
    async fn test_iteration_cap() {
        let client = ScriptedClient::new(Vec::new());
        let fetcher = CatalogFetcher::new(
            client.clone(),
            FetchConfig {
                max_iterations: 5,
                ..config()
            },
        );

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::IterationCapReached);
        assert_eq!(outcome.pages_fetched, 5);
        assert_eq!(outcome.items.len(), 500);
        assert_eq!(client.requests().len(), 5);
    }

    // Test 5: consecutive failures abort the run with the last error
    #[tokio::test(start_paused = true)]
    async fn test_too_many_errors() {
        let client = ScriptedClient::new(vec![
            Ok(page(100, "c1")),
            Err(FetchError::NetworkTimeout),
            Err(FetchError::ServerError(502)),
            Err(FetchError::ConnectionRefused),
        ]);
        let fetcher = CatalogFetcher::new(client, config());
        let start = Instant::now();

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::TooManyErrors);
        assert_eq!(outcome.items.len(), 100);
        assert_eq!(outcome.consecutive_errors, 3);
        assert_eq!(outcome.last_error.as_deref(), Some("Connection refused"));
        // page delay + two error waits; no wait after the final failure
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2300), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(3300), "elapsed {:?}", elapsed);
        assert!(outcome.describe().ends_with("Connection refused"));
    }

    // Test 6: a success resets the consecutive-error budget
    #[tokio::test(start_paused = true)]
    async fn test_success_resets_error_budget() {
        let client = ScriptedClient::new(vec![
            Err(FetchError::NetworkTimeout),
            Err(FetchError::NetworkTimeout),
            Ok(page(100, "c1")),
            Err(FetchError::NetworkTimeout),
            Err(FetchError::NetworkTimeout),
            Ok(page(10, "c2")),
        ]);
        let fetcher = CatalogFetcher::new(client, config());

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::LastPage);
        assert_eq!(outcome.items.len(), 110);
        assert_eq!(outcome.consecutive_errors, 0);
        assert_eq!(outcome.total_errors, 4);
    }

    // Test 7: rate limits retry the same page without consuming the budget
    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_same_page() {
        let client = ScriptedClient::new(vec![
            Ok(page(100, "c1")),
            Err(FetchError::RateLimited(None)),
            Err(FetchError::RateLimited(Some(5))),
            Err(FetchError::ServerError(429)),
            Err(FetchError::RateLimited(None)),
            Ok(page(20, "c2")),
        ]);
        let fetcher = CatalogFetcher::new(client.clone(), config());
        let start = Instant::now();

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::LastPage);
        assert_eq!(outcome.items.len(), 120);
        assert_eq!(outcome.total_errors, 0);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300 + 4 * 2000), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(300 + 5 * 2000), "elapsed {:?}", elapsed);

        let requests = client.requests();
        assert_eq!(requests.len(), 6);
        assert!(requests[1..]
            .iter()
            .all(|r| r.cursor.as_deref() == Some("c1")));
    }

    // Test 8: force refresh and page size reach the client
    #[tokio::test(start_paused = true)]
    async fn test_request_parameters() {
        let client = ScriptedClient::new(vec![Ok(page(3, "c1"))]);
        let fetcher = CatalogFetcher::new(
            client.clone(),
            FetchConfig {
                page_size: 25,
                ..config()
            },
        );

        fetcher.fetch_remote(&FetchOptions::new(true)).await;

        let requests = client.requests();
        assert_eq!(requests[0].limit, 25);
        assert!(requests[0].force_refresh);
    }

    // Test 9: progress reaches the tracker and never runs ahead of the data
    #[tokio::test(start_paused = true)]
    async fn test_reports_progress() {
        let client = ScriptedClient::new(vec![
            Ok(page(100, "c1").with_total_hint(150)),
            Ok(page(50, "c2")),
        ]);
        let tracker = Arc::new(SyncProgressTracker::new());
        tracker.start("acct").await.unwrap();
        let fetcher = CatalogFetcher::new(client, config()).with_tracker(tracker.clone());

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.total_hint, Some(150));
        let job = tracker.get("acct").await;
        assert_eq!(job.status, SyncStatus::Processing);
        assert_eq!(job.progress.current, 150);
        assert_eq!(job.progress.total, 150);
        assert_eq!(job.progress.stage, "Fetched page 2 (150 items)");
    }

    // Test 10: cancellation during the inter-page wait stops the run
    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_run() {
        let client = ScriptedClient::new(Vec::new());
        let fetcher = Arc::new(CatalogFetcher::new(client.clone(), config()));
        let options = FetchOptions::default();
        let cancel = options.cancel.clone();

        let run = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.fetch_remote(&options).await })
        };
        tokio::time::sleep(Duration::from_millis(1000)).await;
        cancel.cancel();

        let outcome = run.await.unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert!(outcome.stop_reason.is_failure());
        assert!(!outcome.items.is_empty());
        assert!(client.requests().len() < 10);
    }

    // Test 11: a job failed by the poller stops the run
    #[tokio::test(start_paused = true)]
    async fn test_stops_when_job_failed_externally() {
        let client = ScriptedClient::new(vec![Ok(page(100, "c1"))]);
        let tracker = Arc::new(SyncProgressTracker::new());
        tracker.start("acct").await.unwrap();
        tracker.fail("acct", "abandoned").await.unwrap();
        let fetcher = CatalogFetcher::new(client, config()).with_tracker(tracker);

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.pages_fetched, 1);
    }

    // Test 12: a run whose job was replaced stops without touching the new job
    #[tokio::test(start_paused = true)]
    async fn test_stops_when_job_belongs_to_another_run() {
        let client = ScriptedClient::new(vec![Ok(page(100, "c1"))]);
        let tracker = Arc::new(SyncProgressTracker::new());
        let old = tracker.start("acct").await.unwrap();
        tracker.fail("acct", "abandoned").await.unwrap();
        tracker.start("acct").await.unwrap();
        let fetcher = CatalogFetcher::new(client, config()).with_tracker(tracker.clone());

        let outcome = fetcher
            .fetch_remote(&FetchOptions::default().with_run(old))
            .await;

        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        let job = tracker.get("acct").await;
        assert_eq!(job.status, SyncStatus::Processing);
        assert_eq!(job.progress.current, 0);
    }

    // Test 13: every page goes to the store; a rejection stops the run
    #[tokio::test(start_paused = true)]
    async fn test_store_rejection_stops_run() {
        let client = ScriptedClient::new(vec![
            Ok(page(100, "c1")),
            Ok(page(100, "c2")),
            Ok(page(100, "c3")),
        ]);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut store = MockCatalogStore::new();
        {
            let calls = calls.clone();
            store
                .expect_store_page()
                .withf(|scope, items| scope == "acct" && items.len() == 100)
                .times(2)
                .returning(move |_, _| {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(())
                    } else {
                        Err(StoreError::Unavailable("disk full".to_string()))
                    }
                });
        }
        let fetcher = CatalogFetcher::new(client, config()).with_store(Arc::new(store));

        let outcome = fetcher.fetch_remote(&FetchOptions::default()).await;

        assert_eq!(outcome.stop_reason, StopReason::StoreRejected);
        assert_eq!(outcome.items.len(), 100);
        assert_eq!(
            outcome.last_error.as_deref(),
            Some("Store unavailable: disk full")
        );
    }

    // Test 14: the bulk read is a single request
    #[tokio::test]
    async fn test_read_cached_is_single_request() {
        let client = ScriptedClient::new(Vec::new());
        let fetcher = CatalogFetcher::new(client.clone(), config());

        let cached = fetcher.read_cached(None).await.unwrap();

        assert!(cached.from_cache);
        assert_eq!(cached.items.len(), 3);
        assert!(client.requests().is_empty());
    }
}
