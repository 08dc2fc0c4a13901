//! Per-call deadline and cancellation.
//!
//! Every state-changing operation runs its whole transaction inside
//! [`OpContext::run`]. The transaction is owned by the future being run, so
//! when the deadline passes or the token is cancelled the future is dropped
//! before `commit()` and sqlx rolls the transaction back. There is no state
//! in which half of an operation's writes survive a cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::common::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl OpContext {
    /// No deadline, never cancelled unless the token is triggered.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_in(timeout)
    }

    pub fn deadline_in(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Ties the context to a caller-owned token (e.g. request shutdown).
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fails fast if the context is already cancelled or expired.
    pub fn check(&self) -> CoreResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(CoreError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Runs `operation` until it completes, the deadline passes, or the
    /// token is cancelled, whichever comes first.
    pub async fn run<T, F>(&self, operation: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        self.check()?;

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, operation)
                    .await
                    .unwrap_or(Err(CoreError::DeadlineExceeded)),
                None => operation.await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CoreError::Cancelled),
            result = bounded => result,
        };

        if let Err(e @ (CoreError::Cancelled | CoreError::DeadlineExceeded)) = &result {
            warn!(error = %e, "operation abandoned before commit");
        }
        result
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}
