//! Bounded-concurrency task queue with retry and exponential backoff
//!
//! # Components
//!
//! - [`retry_queue`]: the queue itself and the [`TaskHandle`] future callers await
//! - [`backoff`]: exponential backoff policy shared by queue retries

pub mod backoff;
pub mod retry_queue;

pub use backoff::BackoffPolicy;
pub use retry_queue::{RetryQueue, TaskHandle};
