//! Cancellation and deadline carried through a sync call tree.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation token plus an optional deadline.
///
/// Derived contexts get a child token, so cancelling a parent reaches every
/// call below it while cancelling a child leaves the parent alone. Deadlines
/// only ever shrink.
#[derive(Debug, Clone)]
pub struct SyncCtx {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl SyncCtx {
    /// A context driven by `cancel`, without a deadline.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A context that is never cancelled from outside.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// Child context that expires after `timeout`, or earlier if this one
    /// already expires sooner.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Child context that expires at `at`, or earlier if this one already
    /// expires sooner.
    pub fn with_deadline(&self, at: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(at),
            None => at,
        };
        Self {
            cancel: self.cancel.child_token(),
            deadline: Some(deadline),
        }
    }

    /// When this context expires.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether this context (or a parent) was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drive `fut` until it completes, the context is cancelled, or the
    /// deadline passes.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let deadline = self.deadline;
        let work = async move {
            match deadline {
                Some(at) => match tokio::time::timeout_at(at, fut).await {
                    Ok(res) => res,
                    Err(_) => Err(Error::Timeout("deadline exceeded".into())),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            res = work => res,
        }
    }
}

impl Default for SyncCtx {
    fn default() -> Self {
        Self::background()
    }
}
