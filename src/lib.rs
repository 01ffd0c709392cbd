//! catalog-sync - Reliable marketplace catalog synchronization
//!
//! This crate pulls large remote catalogs from rate-limited marketplace APIs
//! into local storage. It provides a bounded-concurrency retry queue, a
//! cursor-paged fetch loop with loop detection and error thresholds, and a
//! pollable progress tracker.

pub mod config;
pub mod error;
pub mod logging;
pub mod queue;
pub mod sync;
