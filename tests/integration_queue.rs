//! Retry queue integration tests
//!
//! Tests the queue as a standalone throttled dispatcher:
//! - Mixed success and exhaustion outcomes
//! - Configuration loaded from YAML
//! - Clearing a busy queue

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use catalog_sync::config::{Config, DrainMode};
use catalog_sync::error::{FetchError, QueueError};
use catalog_sync::queue::RetryQueue;
use tokio::time::Instant;

/// Test 1: every task settles exactly once with its own outcome
#[tokio::test(start_paused = true)]
async fn test_mixed_outcomes_settle_once() {
    let queue: RetryQueue<u32, FetchError> = RetryQueue::with_defaults();
    let attempts: Vec<Arc<AtomicU32>> = (0..8).map(|_| Arc::new(AtomicU32::new(0))).collect();

    let handles: Vec<_> = attempts
        .iter()
        .enumerate()
        .map(|(i, counter)| {
            let counter = Arc::clone(counter);
            queue.enqueue(
                move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        let attempt = counter.fetch_add(1, Ordering::SeqCst);
                        // Odd tasks never succeed; even tasks succeed on the second attempt.
                        if i % 2 == 1 || attempt == 0 {
                            Err(FetchError::NetworkTimeout)
                        } else {
                            Ok(i as u32)
                        }
                    }
                },
                Some(2),
            )
        })
        .collect();

    let results = futures::future::join_all(handles).await;

    for (i, result) in results.into_iter().enumerate() {
        if i % 2 == 1 {
            assert_eq!(
                result,
                Err(QueueError::Exhausted {
                    attempts: 3,
                    last_error: FetchError::NetworkTimeout,
                })
            );
            assert_eq!(attempts[i].load(Ordering::SeqCst), 3);
        } else {
            assert_eq!(result, Ok(i as u32));
            assert_eq!(attempts[i].load(Ordering::SeqCst), 2);
        }
    }
    assert_eq!(queue.size(), 0);
}

/// Test 2: continuous mode from YAML keeps unrelated tasks moving
#[tokio::test(start_paused = true)]
async fn test_continuous_mode_from_yaml() {
    let config = Config::from_yaml(
        r#"
queue:
  concurrency: 2
  batch_delay_ms: 0
  mode: continuous
"#,
    )
    .unwrap();
    assert_eq!(config.queue.mode, DrainMode::Continuous);

    let queue: RetryQueue<&'static str, FetchError> = RetryQueue::new(config.queue);
    let flaky = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let slow = {
        let flaky = Arc::clone(&flaky);
        queue.enqueue(
            move || {
                let flaky = Arc::clone(&flaky);
                async move {
                    if flaky.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(FetchError::RateLimited(None))
                    } else {
                        Ok("flaky")
                    }
                }
            },
            None,
        )
    };
    let quick: Vec<_> = (0..4)
        .map(|_| queue.enqueue(|| async { Ok("quick") }, None))
        .collect();

    for handle in quick {
        assert_eq!(handle.await, Ok("quick"));
    }
    assert!(start.elapsed() < Duration::from_millis(1000));

    assert_eq!(slow.await, Ok("flaky"));
    assert!(start.elapsed() >= Duration::from_millis(3000));
}

/// Test 3: clearing a busy queue rejects only what has not started
#[tokio::test(start_paused = true)]
async fn test_clear_busy_queue() {
    let queue: RetryQueue<u32, FetchError> = RetryQueue::with_defaults();

    let handles: Vec<_> = (0..12u32)
        .map(|i| {
            queue.enqueue(
                move || async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok(i)
                },
                None,
            )
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let cleared = queue.clear();
    assert_eq!(cleared, 7);
    assert_eq!(queue.size(), 0);

    let results = futures::future::join_all(handles).await;
    let completed = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(QueueError::Cleared)))
        .count();
    assert_eq!(completed, 5);
    assert_eq!(rejected, 7);
}
