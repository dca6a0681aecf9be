//! A single retry helper for `ModelProvider`/`MemoryProvider`
//! implementations' own outbound calls (SPEC_FULL.md ambient-resilience
//! scope — concrete backends are out of scope for the crate itself, so
//! this exists for whatever reference/demo providers the crate or its
//! consumers add, not for any core runtime path).
//!
//! Exponential backoff, bounded attempt count, a `tracing::warn!` on every
//! retry.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

/// Retry `operation` with exponential backoff, up to `max_attempts` total
/// tries, logging a warning before each retry. `operation_name` is purely
/// for the log line.
pub async fn retry<F, Fut, T, E>(operation_name: &str, max_attempts: usize, operation: F) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let label = operation_name.to_string();
    operation
        .retry(ExponentialBuilder::default().with_max_times(max_attempts.max(1)))
        .notify(move |err: &E, delay: Duration| {
            warn!(operation = %label, error = %err, retry_in = ?delay, "retrying after transient failure");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicUsize::new(0);
        let result: std::result::Result<u32, &str> = retry("test-op", 5, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err("not yet") } else { Ok(42) }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: std::result::Result<u32, &str> = retry("test-op", 3, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("always fails")
        })
        .await;
        assert_eq!(result, Err("always fails"));
        assert!(attempts.load(Ordering::SeqCst) <= 3);
    }
}
