//! Caller-supplied deadline and cancellation.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::GraphError;

/// Deadline and cancellation signal for one logical operation.
///
/// The engines check it before every HTTP attempt and race every backoff
/// sleep against it. An HTTP call already in flight is allowed to finish.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use graphkit::util::deadline::CallContext;
/// use tokio_util::sync::CancellationToken;
///
/// let cancel = CancellationToken::new();
/// let ctx = CallContext::new()
///     .with_timeout(Duration::from_secs(30))
///     .with_cancellation(cancel.clone());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }

    /// Fail if the operation was cancelled or its deadline has passed.
    pub fn check(&self) -> Result<(), GraphError> {
        if self.is_cancelled() {
            return Err(GraphError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(GraphError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleep for `duration` unless cancelled first. A sleep that would end
    /// past the deadline fails immediately instead.
    pub async fn sleep(&self, duration: Duration) -> Result<(), GraphError> {
        self.check()?;
        if self
            .deadline
            .is_some_and(|d| Instant::now() + duration > d)
        {
            return Err(GraphError::DeadlineExceeded);
        }
        match &self.cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => Err(GraphError::Cancelled),
                _ = tokio::time::sleep(duration) => Ok(()),
            },
            None => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}
