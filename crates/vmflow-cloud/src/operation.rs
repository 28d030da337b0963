//! Long-running operations and the context they are awaited in
//!
//! Mutating remote calls return immediately with a handle that has to be
//! polled until it reaches a terminal state. Polling happens inside an
//! [`OperationContext`], which carries the caller's overall deadline and an
//! optional cancellation signal. Neither a deadline nor a cancellation is
//! retried: both surface as [`CloudError::Cancelled`].

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Status reported by one poll of a long-running operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed(String),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

/// Handle to an asynchronous remote mutation
#[async_trait]
pub trait LongRunningOperation: Send {
    /// Ask the remote side for the current status, once
    async fn poll(&mut self) -> Result<OperationStatus>;
}

pub type PendingOperation = Box<dyn LongRunningOperation>;

/// An operation that has already finished, for collaborators whose calls
/// complete synchronously
#[derive(Debug, Clone)]
pub struct CompletedOperation(OperationStatus);

impl CompletedOperation {
    pub fn succeeded() -> PendingOperation {
        Box::new(Self(OperationStatus::Succeeded))
    }

    pub fn failed(message: impl Into<String>) -> PendingOperation {
        Box::new(Self(OperationStatus::Failed(message.into())))
    }
}

#[async_trait]
impl LongRunningOperation for CompletedOperation {
    async fn poll(&mut self) -> Result<OperationStatus> {
        Ok(self.0.clone())
    }
}

/// Poll cadence for long-running operations
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before the second poll
    pub initial_interval: Duration,

    /// Upper bound for the delay between polls
    pub max_interval: Duration,

    /// Backoff multiplier applied after every in-progress poll
    pub multiplier: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl PollConfig {
    /// Delay to wait after the given (zero-based) in-progress poll
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let millis = (self.initial_interval.as_millis() as f64 * factor)
            .min(self.max_interval.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Deadline and cancellation signal for one logical operation
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Sender half of a cancellable [`OperationContext`]
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl OperationContext {
    /// No deadline, no cancellation
    pub fn background() -> Self {
        Self::default()
    }

    /// A timeout too large to represent as an instant means no deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::with_deadline(deadline),
            None => Self::background(),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Attach a cancellation signal to this context
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        let signalled = self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false);
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        signalled || expired
    }

    /// Drive `fut` to completion unless the deadline passes or the context is
    /// cancelled first
    pub async fn run<F: Future>(&self, what: &str, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(CloudError::Cancelled(format!("{what}: operation was cancelled")));
        }

        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            let Some(rx) = cancel.as_mut() else {
                return std::future::pending::<()>().await;
            };
            loop {
                let flagged = *rx.borrow_and_update();
                if flagged {
                    return;
                }
                if rx.changed().await.is_err() {
                    // sender dropped without cancelling
                    return std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            out = fut => Ok(out),
            _ = expired => Err(CloudError::Cancelled(format!("{what}: deadline exceeded"))),
            _ = cancelled => Err(CloudError::Cancelled(format!("{what}: operation was cancelled"))),
        }
    }
}

/// Poll `op` until it reaches a terminal state
///
/// A remote `Failed` status becomes [`CloudError::Api`]; the caller tags it
/// with the operation name and resource identity.
pub async fn wait_for_completion(
    op: &mut dyn LongRunningOperation,
    ctx: &OperationContext,
    poll: &PollConfig,
    what: &str,
) -> Result<()> {
    let mut attempt = 0u32;
    loop {
        match ctx.run(what, op.poll()).await?? {
            OperationStatus::Succeeded => return Ok(()),
            OperationStatus::Failed(message) => return Err(CloudError::api(None, message)),
            OperationStatus::InProgress => {
                let delay = poll.delay_for_attempt(attempt);
                tracing::trace!(what, ?delay, "operation still in progress");
                ctx.run(what, tokio::time::sleep(delay)).await?;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        remaining: u32,
        polls: u32,
    }

    #[async_trait]
    impl LongRunningOperation for Countdown {
        async fn poll(&mut self) -> Result<OperationStatus> {
            self.polls += 1;
            if self.remaining == 0 {
                Ok(OperationStatus::Succeeded)
            } else {
                self.remaining -= 1;
                Ok(OperationStatus::InProgress)
            }
        }
    }

    fn fast_poll() -> PollConfig {
        PollConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(400),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_calculation() {
        let config = fast_poll();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400)); // capped
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_terminal() {
        let mut op = Countdown {
            remaining: 3,
            polls: 0,
        };
        wait_for_completion(&mut op, &OperationContext::background(), &fast_poll(), "test")
            .await
            .unwrap();
        assert_eq!(op.polls, 4);
    }

    #[tokio::test]
    async fn test_failed_status_is_an_error() {
        let mut op = CompletedOperation::failed("disk resize not allowed");
        let err = wait_for_completion(
            op.as_mut(),
            &OperationContext::background(),
            &fast_poll(),
            "update",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("disk resize not allowed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_polling() {
        let mut op = Countdown {
            remaining: u32::MAX,
            polls: 0,
        };
        let ctx = OperationContext::with_timeout(Duration::from_secs(2));
        let err = wait_for_completion(&mut op, &ctx, &fast_poll(), "power-off")
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("deadline exceeded"));
        assert!(op.polls > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_polling() {
        let (ctx, handle) = OperationContext::background().cancellable();
        let mut op = Countdown {
            remaining: u32::MAX,
            polls: 0,
        };

        let task = tokio::spawn(async move {
            wait_for_completion(&mut op, &ctx, &fast_poll(), "start").await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_context_short_circuits() {
        let (ctx, handle) = OperationContext::background().cancellable();
        handle.cancel();
        assert!(ctx.is_cancelled());
        let result = ctx.run("noop", async { 1 }).await;
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_has_no_deadline() {
        let ctx = OperationContext::with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.run("noop", async { 3 }).await.unwrap(), 3);

        let bounded = OperationContext::with_timeout(Duration::from_secs(60));
        assert!(bounded.deadline().is_some());
    }

    #[test]
    fn test_dropped_handle_does_not_cancel() {
        let (ctx, handle) = OperationContext::background().cancellable();
        drop(handle);
        let value = tokio_test::block_on(ctx.run("noop", async { 7 })).unwrap();
        assert_eq!(value, 7);
    }
}
