//! Cancellation and deadline context threaded through every driver call.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation scope for one unit of work.
///
/// Cloning shares the cancellation token, so cancelling any clone cancels
/// them all.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl QueryContext {
    /// A context with no deadline that is never cancelled unless asked to.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_in(timeout)
    }

    /// Set the deadline to `timeout` from now, keeping the earlier one if any.
    pub fn deadline_in(self, timeout: Duration) -> Self {
        self.deadline_at(Instant::now() + timeout)
    }

    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Derive a context cancelled together with this one but cancellable on its own.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fail fast if the context is already cancelled or past its deadline.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(Error::deadline_exceeded(operation))
            }
            _ => Ok(()),
        }
    }

    /// Drive a driver future under this context.
    ///
    /// Driver errors come back as [`Error::Driver`] unchanged; expiry and
    /// cancellation drop the future.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        self.check(operation)?;

        let guarded = async {
            match self.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result.map_err(Error::from),
                    Err(_) => Err(Error::deadline_exceeded(operation)),
                },
                None => fut.await.map_err(Error::from),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = guarded => result,
        }
    }
}
