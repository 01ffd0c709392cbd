//! Catalog synchronization service
//!
//! Ties the fetch loop, the progress tracker and the catalog store together
//! per scope. Runs are started in the background and observed by polling
//! [`CatalogSyncService::get_sync_progress`], which also applies the stuck-job
//! guard.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, FetchConfig};
use crate::error::{FetchError, SyncError};
use crate::queue::RetryQueue;
use crate::sync::client::{CachedCatalog, MarketplaceClient};
use crate::sync::fetcher::{CatalogFetcher, FetchOptions, FetchOutcome};
use crate::sync::store::CatalogStore;
use crate::sync::tracker::{SyncJob, SyncProgressTracker, SyncSummary};

struct RunHandle {
    id: u64,
    cancel: CancellationToken,
}

type RunMap = Arc<Mutex<HashMap<String, RunHandle>>>;

fn lock_runs(runs: &Mutex<HashMap<String, RunHandle>>) -> MutexGuard<'_, HashMap<String, RunHandle>> {
    runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Catalog synchronization service
///
/// One marketplace client is registered per scope.
pub struct CatalogSyncService {
    fetch: FetchConfig,
    stall_timeout: Duration,
    clients: HashMap<String, Arc<dyn MarketplaceClient>>,
    store: Arc<dyn CatalogStore>,
    tracker: Arc<SyncProgressTracker>,
    queue: RetryQueue<CachedCatalog, FetchError>,
    runs: RunMap,
    shutdown: CancellationToken,
}

impl CatalogSyncService {
    /// Create a new service
    ///
    /// # Arguments
    ///
    /// * `config` - Application configuration (queue, fetch and tracker sections)
    /// * `clients` - Marketplace clients; each serves the scope it reports
    /// * `store` - Destination for fetched pages
    pub fn new(
        config: &Config,
        clients: Vec<Arc<dyn MarketplaceClient>>,
        store: Arc<dyn CatalogStore>,
    ) -> Self {
        let clients: HashMap<String, Arc<dyn MarketplaceClient>> = clients
            .into_iter()
            .map(|client| (client.scope().to_string(), client))
            .collect();
        info!(scopes = clients.len(), "Catalog sync service created");

        Self {
            fetch: config.fetch.clone(),
            stall_timeout: config.tracker.stall_timeout(),
            clients,
            store,
            tracker: Arc::new(SyncProgressTracker::new()),
            queue: RetryQueue::new(config.queue.clone()),
            runs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Shared progress tracker
    pub fn tracker(&self) -> Arc<SyncProgressTracker> {
        Arc::clone(&self.tracker)
    }

    /// Registered scopes, sorted
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.clients.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    fn client(&self, scope: &str) -> Result<Arc<dyn MarketplaceClient>, SyncError> {
        self.clients
            .get(scope)
            .cloned()
            .ok_or_else(|| SyncError::UnknownScope(scope.to_string()))
    }

    fn fetcher(&self, client: Arc<dyn MarketplaceClient>) -> CatalogFetcher {
        CatalogFetcher::new(client, self.fetch.clone())
            .with_tracker(Arc::clone(&self.tracker))
            .with_store(Arc::clone(&self.store))
    }

    /// Claim the tracker slot for `scope` and register a cancellable run
    async fn begin(
        &self,
        scope: &str,
        force_refresh: bool,
    ) -> Result<(CatalogFetcher, FetchOptions, u64), SyncError> {
        if self.shutdown.is_cancelled() {
            return Err(SyncError::ShuttingDown);
        }
        let client = self.client(scope)?;
        let id = self.tracker.start(scope).await?;
        let cancel = self.shutdown.child_token();
        lock_runs(&self.runs).insert(
            scope.to_string(),
            RunHandle {
                id,
                cancel: cancel.clone(),
            },
        );

        let options = FetchOptions::new(force_refresh)
            .with_cancel(cancel)
            .with_run(id);
        Ok((self.fetcher(client), options, id))
    }

    /// Start a background sync for `scope`
    ///
    /// Fails with [`SyncError::UnknownScope`] for unregistered scopes and with
    /// an `AlreadyRunning` tracker error while a run is processing.
    pub async fn start_sync(&self, scope: &str, force_refresh: bool) -> Result<(), SyncError> {
        let (fetcher, options, id) = self.begin(scope, force_refresh).await?;
        info!(scope, force_refresh, run_id = id, "Sync started");

        let tracker = Arc::clone(&self.tracker);
        let runs = Arc::clone(&self.runs);
        tokio::spawn(async move {
            Self::execute(fetcher, options, tracker, runs, id).await;
        });
        Ok(())
    }

    /// Run a sync for `scope` to completion on the current task
    pub async fn run_sync(&self, scope: &str, force_refresh: bool) -> Result<FetchOutcome, SyncError> {
        let (fetcher, options, id) = self.begin(scope, force_refresh).await?;
        info!(scope, force_refresh, run_id = id, "Sync running inline");

        Ok(Self::execute(
            fetcher,
            options,
            Arc::clone(&self.tracker),
            Arc::clone(&self.runs),
            id,
        )
        .await)
    }

    async fn execute(
        fetcher: CatalogFetcher,
        options: FetchOptions,
        tracker: Arc<SyncProgressTracker>,
        runs: RunMap,
        id: u64,
    ) -> FetchOutcome {
        let scope = fetcher.scope().to_string();
        let outcome = fetcher.fetch_remote(&options).await;

        {
            let mut runs = lock_runs(&runs);
            if runs.get(&scope).is_some_and(|run| run.id == id) {
                runs.remove(&scope);
            }
        }

        let finished = if outcome.stop_reason.is_failure() {
            tracker.fail_run(&scope, id, outcome.describe()).await
        } else {
            let synced = outcome.items.len();
            let summary = SyncSummary {
                synced_count: synced,
                total_count: outcome.total_hint.unwrap_or(synced).max(synced),
                duration_seconds: outcome.duration.as_secs_f64(),
                stop_reason: Some(outcome.stop_reason.to_string()),
            };
            tracker.complete_run(&scope, id, summary).await
        };
        if let Err(e) = finished {
            // The poller may have already failed a stalled job, and a new run
            // may own the scope by now.
            debug!(scope = %scope, error = %e, "Sync result not recorded");
        }
        outcome
    }

    /// Current job for `scope`
    ///
    /// Jobs that made no progress for longer than the stall timeout are
    /// failed and their runs cancelled before the snapshot is taken.
    pub async fn get_sync_progress(&self, scope: &str) -> Result<SyncJob, SyncError> {
        if !self.clients.contains_key(scope) {
            return Err(SyncError::UnknownScope(scope.to_string()));
        }
        self.reap_stalled().await;
        Ok(self.tracker.get(scope).await)
    }

    /// Fail stalled jobs and cancel their runs; returns the affected scopes
    pub async fn reap_stalled(&self) -> Vec<String> {
        let stalled = self.tracker.fail_stalled_runs(self.stall_timeout).await;
        if !stalled.is_empty() {
            let runs = lock_runs(&self.runs);
            for (scope, id) in &stalled {
                warn!(scope = %scope, run_id = id, "Abandoning stalled sync");
                if let Some(run) = runs.get(scope).filter(|run| run.id == *id) {
                    run.cancel.cancel();
                }
            }
        }
        stalled.into_iter().map(|(scope, _)| scope).collect()
    }

    /// Cancel the running sync for `scope`; false when none is running
    pub fn cancel_sync(&self, scope: &str) -> bool {
        match lock_runs(&self.runs).get(scope) {
            Some(run) => {
                info!(scope, run_id = run.id, "Cancelling sync");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Single bulk read of previously synchronized data for `scope`
    pub async fn read_cached(
        &self,
        scope: &str,
        limit: Option<usize>,
    ) -> Result<CachedCatalog, SyncError> {
        let client = self.client(scope)?;
        Ok(self.fetcher(client).read_cached(limit).await?)
    }

    /// Bulk read every scope through the retry queue
    ///
    /// Reads are throttled by the queue's concurrency and are not retried.
    pub async fn read_cached_all(
        &self,
        limit: Option<usize>,
    ) -> Vec<(String, Result<CachedCatalog, SyncError>)> {
        let scopes = self.scopes();
        let handles = scopes
            .iter()
            .map(|scope| {
                let fetcher = Arc::new(self.fetcher(Arc::clone(&self.clients[scope])));
                self.queue.enqueue_with_cancel(
                    move || {
                        let fetcher = Arc::clone(&fetcher);
                        async move { fetcher.read_cached(limit).await }
                    },
                    Some(0),
                    self.shutdown.child_token(),
                )
            })
            .collect::<Vec<_>>();

        let results = join_all(handles).await;
        scopes
            .into_iter()
            .zip(results)
            .map(|(scope, result)| (scope, result.map_err(SyncError::from)))
            .collect()
    }

    /// Cancel every run and the bulk-read queue
    pub fn shutdown(&self) {
        info!("Shutting down catalog sync service");
        self.shutdown.cancel();
        self.queue.shutdown();
    }
}
