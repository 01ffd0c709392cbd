//! Retry queue for throttled, retrying dispatch of async work
//!
//! Tasks are held in a FIFO list and attempted at most `concurrency` at a
//! time. A failed attempt is re-appended to the end of the list and retried
//! after an exponential backoff until the task's retry ceiling is reached.
//!
//! Two drain disciplines are available (see [`DrainMode`]):
//!
//! - `Batched` starts up to `concurrency` tasks, waits for every task of the
//!   batch to finish its attempt (including the backoff of a failed one) and
//!   pauses `batch_delay` before the next batch. A backing-off task therefore
//!   stalls its whole batch, which acts as extra throttling.
//! - `Continuous` keeps up to `concurrency` attempts in flight. A failed task
//!   goes back to the list with a not-before time and frees its slot.
//!
//! The drain loop runs on a tokio task spawned on demand, so `enqueue` must be
//! called from within a tokio runtime.

use futures::future::{join_all, BoxFuture, FutureExt};
use std::any::Any;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DrainMode, QueueConfig};
use crate::error::QueueError;
use crate::queue::backoff::BackoffPolicy;

type Operation<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;
type Responder<T, E> = oneshot::Sender<Result<T, QueueError<E>>>;

/// Cancellation sources a task observes: its own token and the queue's
#[derive(Clone)]
struct CancelGuard {
    task: CancellationToken,
    queue: CancellationToken,
}

impl CancelGuard {
    fn is_cancelled(&self) -> bool {
        self.task.is_cancelled() || self.queue.is_cancelled()
    }

    async fn cancelled(&self) {
        tokio::select! {
            _ = self.task.cancelled() => {}
            _ = self.queue.cancelled() => {}
        }
    }
}

/// One unit of queued work
struct Task<T, E> {
    id: u64,
    operation: Operation<T, E>,
    retries: u32,
    max_retries: u32,
    responder: Responder<T, E>,
    guard: CancelGuard,
    /// Earliest time the next attempt may start (continuous mode only)
    ready_at: Option<Instant>,
}

impl<T, E> Task<T, E> {
    fn resolve(self, result: Result<T, QueueError<E>>) {
        // The caller may have dropped its handle; nothing left to notify then.
        let _ = self.responder.send(result);
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.ready_at.map_or(true, |at| at <= now)
    }
}

struct State<T, E> {
    pending: VecDeque<Task<T, E>>,
    processing: bool,
}

struct Inner<T, E> {
    config: QueueConfig,
    backoff: BackoffPolicy,
    state: Mutex<State<T, E>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
    wake: Notify,
}

impl<T, E> Inner<T, E> {
    fn state(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_back(&self, task: Task<T, E>) {
        self.state().pending.push_back(task);
        self.wake.notify_one();
    }

    fn reject_pending(&self, reason: fn() -> QueueError<E>) -> usize {
        let drained: Vec<Task<T, E>> = self.state().pending.drain(..).collect();
        let count = drained.len();
        for task in drained {
            task.resolve(Err(reason()));
        }
        count
    }
}

/// Clears the `processing` flag if a drain loop exits without doing so
///
/// Pending tasks are rejected with [`QueueError::Closed`] in that case so no
/// caller waits on a drain that no longer runs.
struct DrainGuard<T, E> {
    inner: Arc<Inner<T, E>>,
    armed: bool,
}

impl<T, E> DrainGuard<T, E> {
    fn new(inner: &Arc<Inner<T, E>>) -> Self {
        Self {
            inner: Arc::clone(inner),
            armed: true,
        }
    }
}

impl<T, E> Drop for DrainGuard<T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let orphaned: Vec<Task<T, E>> = {
            let mut state = self.inner.state();
            state.processing = false;
            state.pending.drain(..).collect()
        };
        warn!(orphaned = orphaned.len(), "Drain loop stopped unexpectedly");
        for task in orphaned {
            task.resolve(Err(QueueError::Closed));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Future resolving to the final outcome of a queued task
pub struct TaskHandle<T, E> {
    id: u64,
    rx: oneshot::Receiver<Result<T, QueueError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    /// Identifier assigned to the task on enqueue
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, QueueError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(QueueError::Closed)))
    }
}

/// Bounded-concurrency task queue with automatic retry
///
/// Cloning yields another handle to the same queue.
pub struct RetryQueue<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for RetryQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> RetryQueue<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    /// Create a new queue with the given configuration
    pub fn new(config: QueueConfig) -> Self {
        let backoff = BackoffPolicy::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                backoff,
                state: Mutex::new(State {
                    pending: VecDeque::new(),
                    processing: false,
                }),
                next_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
                wake: Notify::new(),
            }),
        }
    }

    /// Create a queue with default configuration
    pub fn with_defaults() -> Self {
        Self::new(QueueConfig::default())
    }

    /// Get the queue configuration
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Enqueue an operation
    ///
    /// `max_retries` defaults to the configured ceiling. The returned handle
    /// resolves with the first successful value or with
    /// [`QueueError::Exhausted`] carrying the last failure.
    pub fn enqueue<F, Fut>(&self, work: F, max_retries: Option<u32>) -> TaskHandle<T, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.enqueue_with_cancel(work, max_retries, CancellationToken::new())
    }

    /// Enqueue an operation that stops at the next suspension point once
    /// `cancel` fires
    pub fn enqueue_with_cancel<F, Fut>(
        &self,
        work: F,
        max_retries: Option<u32>,
        cancel: CancellationToken,
    ) -> TaskHandle<T, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let task = Task {
            id,
            operation: Arc::new(move || work().boxed()),
            retries: 0,
            max_retries: max_retries.unwrap_or(self.inner.config.max_retries),
            responder: tx,
            guard: CancelGuard {
                task: cancel,
                queue: self.inner.shutdown.clone(),
            },
            ready_at: None,
        };

        if task.guard.is_cancelled() {
            task.resolve(Err(QueueError::Cancelled));
            return TaskHandle { id, rx };
        }

        let start_drain = {
            let mut state = self.inner.state();
            state.pending.push_back(task);
            !std::mem::replace(&mut state.processing, true)
        };
        debug!(task_id = id, "Task enqueued");

        if start_drain {
            tokio::spawn(Self::drain(Arc::clone(&self.inner)));
        } else {
            self.inner.wake.notify_one();
        }

        TaskHandle { id, rx }
    }

    /// Number of tasks waiting for their next attempt
    pub fn size(&self) -> usize {
        self.inner.state().pending.len()
    }

    /// Reject every pending task with [`QueueError::Cleared`]
    ///
    /// Attempts already in flight are not interrupted. Returns the number of
    /// rejected tasks.
    pub fn clear(&self) -> usize {
        let cleared = self.inner.reject_pending(|| QueueError::Cleared);
        if cleared > 0 {
            info!(cleared, "Retry queue cleared");
        }
        cleared
    }

    /// Cancel the queue
    ///
    /// Pending tasks and attempts at a suspension point resolve with
    /// [`QueueError::Cancelled`]; later enqueues are rejected immediately.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let rejected = self.inner.reject_pending(|| QueueError::Cancelled);
        info!(rejected, "Retry queue shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn drain(inner: Arc<Inner<T, E>>) {
        match inner.config.mode {
            DrainMode::Batched => Self::drain_batched(inner).await,
            DrainMode::Continuous => Self::drain_continuous(inner).await,
        }
    }

    async fn drain_batched(inner: Arc<Inner<T, E>>) {
        let concurrency = inner.config.concurrency.max(1);
        let mut guard = DrainGuard::new(&inner);

        loop {
            if inner.shutdown.is_cancelled() {
                inner.reject_pending(|| QueueError::Cancelled);
            }

            let batch: Vec<Task<T, E>> = {
                let mut state = inner.state();
                if state.pending.is_empty() {
                    state.processing = false;
                    guard.armed = false;
                    return;
                }
                let take = concurrency.min(state.pending.len());
                state.pending.drain(..take).collect()
            };

            debug!(batch_size = batch.len(), "Starting batch");
            join_all(
                batch
                    .into_iter()
                    .map(|task| Self::attempt(Arc::clone(&inner), task)),
            )
            .await;

            let has_more = !inner.state().pending.is_empty();
            if has_more && !inner.config.batch_delay().is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(inner.config.batch_delay()) => {}
                    _ = inner.shutdown.cancelled() => {}
                }
            }
        }
    }

    async fn drain_continuous(inner: Arc<Inner<T, E>>) {
        let concurrency = inner.config.concurrency.max(1);
        let mut guard = DrainGuard::new(&inner);
        let mut in_flight = FuturesUnordered::new();

        loop {
            if inner.shutdown.is_cancelled() {
                inner.reject_pending(|| QueueError::Cancelled);
            }

            let now = Instant::now();
            let next_ready = {
                let mut state = inner.state();
                while in_flight.len() < concurrency {
                    let Some(index) = state.pending.iter().position(|t| t.is_ready(now)) else {
                        break;
                    };
                    if let Some(task) = state.pending.remove(index) {
                        in_flight.push(Self::attempt(Arc::clone(&inner), task).boxed());
                    }
                }

                if in_flight.is_empty() && state.pending.is_empty() {
                    state.processing = false;
                    guard.armed = false;
                    return;
                }

                state
                    .pending
                    .iter()
                    .filter_map(|t| t.ready_at)
                    .filter(|at| *at > now)
                    .min()
            };

            let sleep_until = next_ready.unwrap_or_else(Instant::now);
            tokio::select! {
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
                _ = tokio::time::sleep_until(sleep_until), if next_ready.is_some() => {}
                _ = inner.wake.notified() => {}
                _ = inner.shutdown.cancelled(), if !inner.shutdown.is_cancelled() => {}
            }
        }
    }

    /// Run one attempt of `task` and route it to its next state
    async fn attempt(inner: Arc<Inner<T, E>>, mut task: Task<T, E>) {
        if task.guard.is_cancelled() {
            debug!(task_id = task.id, "Task cancelled before attempt");
            task.resolve(Err(QueueError::Cancelled));
            return;
        }

        let operation = Arc::clone(&task.operation);
        let guard = task.guard.clone();
        let outcome = tokio::select! {
            result = AssertUnwindSafe(async { operation().await }).catch_unwind() => Some(result),
            _ = guard.cancelled() => None,
        };

        let error = match outcome {
            None => {
                debug!(task_id = task.id, "Task cancelled during attempt");
                task.resolve(Err(QueueError::Cancelled));
                return;
            }
            Some(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                warn!(task_id = task.id, panic = %message, "Task panicked");
                task.resolve(Err(QueueError::Panicked(message)));
                return;
            }
            Some(Ok(Ok(value))) => {
                debug!(task_id = task.id, attempts = task.retries + 1, "Task succeeded");
                task.resolve(Ok(value));
                return;
            }
            Some(Ok(Err(error))) => error,
        };

        if task.retries >= task.max_retries {
            let attempts = task.retries + 1;
            warn!(
                task_id = task.id,
                attempts,
                max_retries = task.max_retries,
                error = %error,
                "Max retries exhausted"
            );
            task.resolve(Err(QueueError::Exhausted {
                attempts,
                last_error: error,
            }));
            return;
        }

        let backoff = inner.backoff.delay_for(task.retries);
        task.retries += 1;
        debug!(
            task_id = task.id,
            retry = task.retries,
            max_retries = task.max_retries,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Retrying after failure"
        );

        match inner.config.mode {
            DrainMode::Batched => {
                inner.push_back(task);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = guard.cancelled() => {}
                }
            }
            DrainMode::Continuous => {
                task.ready_at = Some(Instant::now() + backoff);
                inner.push_back(task);
            }
        }
    }
}
