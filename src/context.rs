//! Cycle context: the deadline and cancellation signal carried by a gather
//! cycle into every API call.
//!
//! A context is created by the caller with the cycle's overall budget. Calls
//! that need a tighter bound derive a child with [`CycleContext::with_timeout`];
//! the child never outlives its parent.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Deadline and cancellation shared by the calls of one gather cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CycleContext {
    /// Create a context that expires `budget` from now.
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + budget),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a context with no deadline.
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a child context bounded by `timeout` and by this context.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
        }
    }

    /// Cancel this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// The instant this context expires, if bounded.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the context is already done.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run `fut` until it completes, the context is cancelled or the
    /// deadline passes, whichever happens first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = expiry => Err(Error::DeadlineExceeded),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_within_budget() {
        let ctx = CycleContext::new(Duration::from_secs(5));
        let value = ctx.run(async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_hits_deadline() {
        let ctx = CycleContext::new(Duration::from_secs(1));
        let res: Result<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_never_outlives_parent() {
        let parent = CycleContext::new(Duration::from_secs(2));
        let child = parent.with_timeout(Duration::from_secs(30));
        assert_eq!(child.deadline(), parent.deadline());

        let shorter = parent.with_timeout(Duration::from_millis(100));
        assert!(shorter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let parent = CycleContext::unbounded();
        let child = parent.with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_cancelled());
        let res: Result<()> = child.run(std::future::pending()).await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_after_expiry() {
        let ctx = CycleContext::new(Duration::from_millis(10));
        assert!(ctx.check().is_ok());
        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(matches!(ctx.check(), Err(Error::DeadlineExceeded)));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
