//! Error types for catalog-sync
//!
//! This module defines the error taxonomy shared by the queue, the fetch loop
//! and the progress tracker. All error types use `thiserror`.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors reported by a marketplace client while fetching catalog data
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    /// Rate limited by the marketplace API
    #[error("Rate limited{}", retry_after_suffix(.0))]
    RateLimited(Option<u64>),

    /// Network timeout
    #[error("Network timeout")]
    NetworkTimeout,

    /// Connection refused
    #[error("Connection refused")]
    ConnectionRefused,

    /// Server error
    #[error("Server error: HTTP {0}")]
    ServerError(u16),

    /// Invalid data received
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Credentials rejected by the marketplace
    #[error("Unauthorized")]
    Unauthorized,

    /// Generic network error
    #[error("Network error: {0}")]
    Network(String),
}

fn retry_after_suffix(secs: &Option<u64>) -> String {
    match secs {
        Some(secs) => format!(", retry after {} seconds", secs),
        None => String::new(),
    }
}

impl FetchError {
    /// Returns true when the failure signals a rate-limit condition
    ///
    /// Rate-limited requests are retried after a fixed wait and do not consume
    /// the consecutive-error budget of a fetch run.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited(_))
            || matches!(self, FetchError::ServerError(429))
    }
}

/// Errors reported by the catalog store collaborator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// The store refused the write
    #[error("Store rejected write: {0}")]
    Rejected(String),

    /// The store is not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Terminal failures of a queued task
///
/// `E` is the failure type of the wrapped operation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueueError<E> {
    /// Every allowed attempt failed; carries the last observed failure
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Total attempts made, including the first one
        attempts: u32,
        /// Failure returned by the final attempt
        last_error: E,
    },

    /// The task was still pending when the queue was cleared
    #[error("Queue cleared")]
    Cleared,

    /// The task or the queue was cancelled before a terminal outcome
    #[error("Task cancelled")]
    Cancelled,

    /// An attempt panicked; the task is not retried
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The queue dropped the task without reporting an outcome
    #[error("Queue closed before the task completed")]
    Closed,
}

/// Progress tracker state violations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackerError {
    /// A job for this scope is already processing
    #[error("Sync already running for scope: {0}")]
    AlreadyRunning(String),

    /// The job already reached a terminal state
    #[error("Sync already finished for scope: {0}")]
    AlreadyFinished(String),

    /// No job was started for this scope
    #[error("No sync running for scope: {0}")]
    NotRunning(String),
}

/// Errors surfaced by the synchronization service to its callers
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// No marketplace client is registered for the scope
    #[error("Unknown sync scope: {0}")]
    UnknownScope(String),

    /// Progress tracker rejected the transition
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    /// Fetch failure on a single-request path
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Queued read failed
    #[error("Queued read failed: {0}")]
    Queue(#[from] QueueError<FetchError>),

    /// The service is shutting down
    #[error("Sync service is shutting down")]
    ShuttingDown,
}

/// Application-level error type
///
/// Aggregates the domain error types for the binary and embedding callers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sync error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// IO error while loading collaborator data
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog file could not be parsed
    #[error("Invalid catalog file: {0}")]
    CatalogFile(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
