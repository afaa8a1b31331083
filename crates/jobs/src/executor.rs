// crates/jobs/src/executor.rs
//! Rate-limited batch execution for external API calls.
//!
//! Strategies that must issue many small calls against a rate-limited
//! provider funnel them through [`RateLimitedExecutor::execute_all`]: bounded
//! concurrency keeps the coarse request rate in check (the transport layer is
//! assumed to rate-limit per call already), and each operation gets a local
//! retry loop with capped exponential backoff before its error surfaces.

use std::time::Duration;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::warn;

/// Tunables for one executor instance.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on operations in flight at once.
    pub max_concurrent: usize,
    /// Retries per operation after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt.
    pub retry_delay: Duration,
    /// Backoff ceiling.
    pub max_retry_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(10),
        }
    }
}

impl ExecutorConfig {
    /// Backoff for the given retry attempt (1-based), capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.retry_delay.saturating_mul(1u32 << attempt.min(16).saturating_sub(1));
        exp.min(self.max_retry_delay)
    }
}

/// Runs a batch of independent async operations with bounded concurrency
/// and per-operation retry.
#[derive(Debug, Clone, Default)]
pub struct RateLimitedExecutor {
    config: ExecutorConfig,
}

impl RateLimitedExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute every operation, preserving input order in the output.
    ///
    /// An operation that still fails after exhausting its retries propagates
    /// its error and fails the whole batch; callers wanting partial-failure
    /// tolerance catch inside the operation itself.
    // The three entry points below are desugared `async fn`s with explicit
    // `Send` bounds: callers embed these futures inside `Send` job bodies,
    // and rustc cannot prove the auto trait through the nested opaque types
    // ("implementation of `Send` is not general enough").
    pub fn execute_all<'s, T, E, F, Fut>(
        &'s self,
        ops: Vec<F>,
    ) -> impl std::future::Future<Output = Result<Vec<T>, E>> + Send + use<'s, T, E, F, Fut>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<T, E>> + Send,
        T: Send,
        E: std::fmt::Display + Send,
    {
        async move {
            // `buffered`, not `buffer_unordered`: output order must match input.
            // Each op is moved into its future: a by-reference closure here
            // puts a lifetime in the closure signature, which the `Send`
            // check of the surrounding opaque cannot prove ("implementation
            // of `FnOnce` is not general enough").
            stream::iter(
                ops.into_iter()
                    .map(|op| async move { self.run_with_retry(&op).await }),
            )
                .buffered(self.config.max_concurrent.max(1))
                .try_collect()
                .await
        }
    }

    /// Execute a single operation with the same retry policy. For call sites
    /// whose unit of work is one call at a time (e.g. one trading day).
    pub fn execute<'s, T, E, F, Fut>(
        &'s self,
        op: F,
    ) -> impl std::future::Future<Output = Result<T, E>> + Send + use<'s, T, E, F, Fut>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<T, E>> + Send,
        T: Send,
        E: std::fmt::Display + Send,
    {
        async move { self.run_with_retry(&op).await }
    }

    fn run_with_retry<'s, T, E, F, Fut>(
        &'s self,
        op: &'s F,
    ) -> impl std::future::Future<Output = Result<T, E>> + Send + use<'s, T, E, F, Fut>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: std::future::Future<Output = Result<T, E>> + Send,
        T: Send,
        E: std::fmt::Display + Send,
    {
        async move {
            let mut attempt = 0u32;
            loop {
                match op().await {
                    Ok(value) => return Ok(value),
                    Err(err) if attempt < self.config.max_retries => {
                        attempt += 1;
                        let backoff = self.config.backoff(attempt);
                        warn!(
                            attempt,
                            max_retries = self.config.max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "operation failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;
    use pretty_assertions::assert_eq;

    fn fast_executor() -> RateLimitedExecutor {
        RateLimitedExecutor::new(ExecutorConfig {
            max_concurrent: 2,
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
        })
    }

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        let executor = fast_executor();
        // Later ops finish sooner; output must still follow input order.
        let ops: Vec<_> = (0..5u64)
            .map(|i| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(10 - i)).await;
                    Ok::<u64, String>(i)
                }
            })
            .collect();

        let results = executor.execute_all(ops).await.unwrap();
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let executor = fast_executor();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let ops = vec![move || {
            let counter = Arc::clone(&counter);
            async move {
                // Fail twice, then succeed within the retry budget.
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("rate limited".to_string())
                } else {
                    Ok(99u64)
                }
            }
        }];

        let results = executor.execute_all(ops).await.unwrap();
        assert_eq!(results, vec![99]);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_batch() {
        let executor = fast_executor();
        // Boxed: two distinct closure/async-block types cannot share a Vec.
        type BoxedOp = Box<
            dyn Fn() -> std::pin::Pin<
                    Box<dyn std::future::Future<Output = Result<u64, String>> + Send>,
                > + Send
                + Sync,
        >;
        let ops: Vec<BoxedOp> = vec![
            Box::new(|| Box::pin(async { Ok::<u64, String>(1) })),
            Box::new(|| Box::pin(async { Err::<u64, String>("still down".into()) })),
        ];

        let err = executor.execute_all(ops).await.unwrap_err();
        assert_eq!(err, "still down");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let executor = RateLimitedExecutor::new(ExecutorConfig {
            max_concurrent: 2,
            ..ExecutorConfig::default()
        });
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let ops: Vec<_> = (0..8)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                move || {
                    let in_flight = Arc::clone(&in_flight);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<(), String>(())
                    }
                }
            })
            .collect();

        executor.execute_all(ops).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ExecutorConfig {
            retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_millis(350),
            ..ExecutorConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(350));
        assert_eq!(config.backoff(10), Duration::from_millis(350));
    }
}
