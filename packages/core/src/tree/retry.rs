//! Retry with exponential backoff for write conflicts
//!
//! Two writers on the same namespace serialize on the database write lock.
//! When one waits longer than the busy timeout it fails with
//! `TreeError::Conflict`; re-running the whole operation a moment later
//! usually succeeds. Partial transactions are never retried.

use crate::tree::error::{TreeError, TreeResult};
use std::future::Future;
use tokio::time::Duration;

/// How often and how patiently to retry a conflicting operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum retry attempts (0 = single attempt, no retries)
    pub max_retries: usize,
    /// First backoff delay; doubled after every attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based): base, 2×base, 4×base, ...
    pub fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are exhausted
///
/// # Retry Behavior
///
/// - **Retry on**: `TreeError::Conflict` only
/// - **Backoff**: Exponential (10ms, 20ms, 40ms, 80ms, ... with the default policy)
/// - **Other errors**: Fail immediately without retry
///
/// # Example
///
/// ```no_run
/// # use arbor_core::{Arbor, ArborConfig, OpContext};
/// # use arbor_core::tree::{with_retry, RetryPolicy};
/// # async fn example(arbor: Arbor) -> Result<(), Box<dyn std::error::Error>> {
/// let index = arbor.index("menus").await?;
/// let ctx = OpContext::background();
/// let outcome = with_retry(&RetryPolicy::default(), "insert_child", || {
///     index.insert_child(&ctx, None, None)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> TreeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TreeResult<T>>,
{
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        "{} succeeded after {} retry(ies)",
                        operation,
                        attempt
                    );
                }
                return Ok(value);
            }

            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                let backoff = policy.backoff(attempt);
                tracing::debug!(
                    "Conflict on attempt {}/{} for {}: {}. Retrying in {:?}...",
                    attempt + 1,
                    policy.max_retries + 1,
                    operation,
                    err,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }

            Err(err @ TreeError::Conflict { .. }) => {
                tracing::warn!(
                    "{} failed after {} attempts due to write conflicts",
                    operation,
                    attempt + 1
                );
                return Err(err);
            }

            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_retries_conflict_until_success() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(&fast_policy(3), "insert_child", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TreeError::conflict("insert_child", "database is locked"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let result: TreeResult<()> = with_retry(&fast_policy(2), "move_subtree", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TreeError::conflict("move_subtree", "database is locked")) }
        })
        .await;

        assert!(matches!(result, Err(TreeError::Conflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicUsize::new(0);
        let result: TreeResult<()> = with_retry(&fast_policy(5), "move_subtree", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TreeError::cyclic_move("a", "b")) }
        })
        .await;

        assert!(matches!(result, Err(TreeError::CyclicMove { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
