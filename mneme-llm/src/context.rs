//! Cancellable, deadline-bound call context.
//!
//! Every completion, embedding and summarization call takes a
//! [`CallContext`]. Cancelling its token, or reaching its deadline, aborts
//! in-flight HTTP attempts and pending retry sleeps.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CancelReason, LlmError};

/// Cancellation token plus optional deadline for one logical call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context with no deadline and a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context driven by an existing cancellation token.
    #[must_use]
    pub fn with_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Derive a child context that expires no later than `deadline`.
    ///
    /// Cancelling the parent cancels the child, not the other way round.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child context that expires within `timeout` from now, or at
    /// the parent's deadline if that comes first.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The underlying cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if the context is already cancelled or past its deadline.
    ///
    /// # Errors
    /// Returns [`LlmError::Cancelled`].
    pub fn check(&self) -> Result<(), LlmError> {
        if self.cancel.is_cancelled() {
            return Err(LlmError::Cancelled(CancelReason::Cancelled));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(LlmError::Cancelled(CancelReason::DeadlineExceeded));
        }
        Ok(())
    }

    /// Drive `fut` to completion unless the context is cancelled or expires
    /// first.
    ///
    /// # Errors
    /// Returns [`LlmError::Cancelled`] if the context stops first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, LlmError>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(LlmError::Cancelled(CancelReason::Cancelled)),
            () = sleep_until(self.deadline) => {
                Err(LlmError::Cancelled(CancelReason::DeadlineExceeded))
            }
            out = fut => Ok(out),
        }
    }

    /// Sleep for `delay`, waking early on cancellation or deadline.
    ///
    /// # Errors
    /// Returns [`LlmError::Cancelled`] if the context stops first.
    pub async fn sleep(&self, delay: Duration) -> Result<(), LlmError> {
        self.run(tokio::time::sleep(delay)).await
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_context_fails_check() {
        let ctx = CallContext::new();
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(LlmError::Cancelled(CancelReason::Cancelled))));
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_never_extends_parent() {
        let parent = CallContext::new().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(90));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(10));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn parent_cancel_reaches_child() {
        let parent = CallContext::new();
        let child = parent.with_timeout(Duration::from_secs(5));
        parent.cancel();
        assert!(child.check().is_err());
    }

    #[tokio::test]
    async fn child_cancel_leaves_parent() {
        let parent = CallContext::new();
        let child = parent.with_timeout(Duration::from_secs(5));
        child.cancel();
        assert!(parent.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_stops_at_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let err = ctx.sleep(Duration::from_secs(60)).await.expect_err("deadline");
        assert!(matches!(err, LlmError::Cancelled(CancelReason::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn sleep_wakes_on_cancel() {
        let ctx = CallContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let err = ctx.sleep(Duration::from_secs(30)).await.expect_err("cancelled");
        assert!(err.is_cancellation());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
