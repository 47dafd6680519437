//! Operation context: deadlines and cancellation
//!
//! Every public engine operation takes an [`OpContext`]. When its deadline
//! passes or its cancel signal fires, the in-flight future is dropped and the
//! caller sees `DeadlineExceeded` / `Cancelled`. Mutations roll their
//! transaction back in that case, so no partial shift is ever committed.

use crate::tree::{TreeError, TreeResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation signal carried by one logical operation
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Sender side of an [`OpContext`] cancel signal
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every context derived from this handle
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl OpContext {
    /// No deadline, never cancelled
    pub fn background() -> Self {
        Self::default()
    }

    /// Context whose deadline is `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_at(Instant::now() + timeout)
    }

    /// Context with an absolute deadline
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().deadline_at(deadline)
    }

    /// Context plus the handle that cancels it
    pub fn cancellable() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let ctx = Self {
            deadline: None,
            cancel: Some(receiver),
        };
        (ctx, CancelHandle { sender })
    }

    /// Same cancel signal with a deadline added (the earlier one wins)
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Fail fast if the context is already done
    pub fn check(&self, operation: &str) -> TreeResult<()> {
        if self.is_cancelled() {
            return Err(TreeError::cancelled(operation));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(TreeError::deadline_exceeded(operation));
            }
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context finishes first
    ///
    /// When the deadline or cancel signal wins, `fut` is dropped without
    /// being polled again.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> TreeResult<T>
    where
        F: Future<Output = TreeResult<T>>,
    {
        self.check(operation)?;

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        let mut cancel = self.cancel.clone();
        let cancelled = async {
            match cancel.as_mut() {
                Some(rx) => {
                    // A dropped handle can never cancel
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(TreeError::cancelled(operation)),
            _ = deadline => Err(TreeError::deadline_exceeded(operation)),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = OpContext::background();
        let value = ctx.run("noop", async { Ok::<_, TreeError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_deadline_drops_slow_future() {
        let ctx = OpContext::with_timeout(Duration::from_millis(20));
        let result = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TreeError>(())
            })
            .await;
        assert!(matches!(result, Err(TreeError::DeadlineExceeded { .. })));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_future() {
        let (ctx, handle) = OpContext::cancellable();
        let task = tokio::spawn(async move {
            ctx.run("wait", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TreeError>(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        assert!(handle.is_cancelled());

        let result = task.await.unwrap();
        assert!(matches!(result, Err(TreeError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_before_polling() {
        let (ctx, handle) = OpContext::cancellable();
        handle.cancel();
        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = ctx
            .run("never", async {
                polled.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, TreeError>(())
            })
            .await;
        assert!(matches!(result, Err(TreeError::Cancelled { .. })));
        assert!(!polled.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (ctx, handle) = OpContext::cancellable();
        drop(handle);
        let value = ctx.run("ok", async { Ok::<_, TreeError>("done") }).await.unwrap();
        assert_eq!(value, "done");
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = OpContext::with_deadline(now + Duration::from_secs(1))
            .deadline_at(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));
    }
}
