//! Deadline and cancellation scope for transfers.
//!
//! A `Context` carries an optional deadline and a shared cancellation flag.
//! Child contexts created with [`Context::with_timeout`] inherit the parent's
//! cancellation and can only shorten its deadline, never extend it.

use std::future::pending;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Reason a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    /// The deadline elapsed. Transfers treat this as a normal end of stream.
    DeadlineExceeded,
    /// The scope was cancelled from above.
    Cancelled,
}

impl From<Done> for std::io::Error {
    fn from(done: Done) -> Self {
        match done {
            Done::DeadlineExceeded => {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded")
            }
            Done::Cancelled => std::io::Error::new(std::io::ErrorKind::Interrupted, "cancelled"),
        }
    }
}

/// A deadline plus a cancellation signal, cheap to clone.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: watch::Receiver<bool>,
}

/// Triggers cancellation of every context derived from its root.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel the root context and all of its children.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        let (_tx, cancel) = watch::channel(false);
        Self {
            deadline: None,
            cancel,
        }
    }

    /// A root context together with the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, cancel) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel,
            },
            CancelHandle { tx },
        )
    }

    /// Derive a child whose deadline is `timeout` from now, capped by ours.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
            cancel: self.cancel.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Non-blocking check; cancellation wins over an elapsed deadline.
    pub fn state(&self) -> Option<Done> {
        if self.is_cancelled() {
            return Some(Done::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Done::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled. Never resolves for a context
    /// whose cancel handle was dropped without firing.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        let closed = cancel.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            pending::<()>().await;
        }
    }

    /// Resolves when the context finishes, reporting why.
    pub async fn done(&self) -> Done {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancelled() => Done::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Done::DeadlineExceeded,
            },
            None => {
                self.cancelled().await;
                Done::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_reported() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        assert_eq!(ctx.state(), None);
        assert_eq!(ctx.done().await, Done::DeadlineExceeded);
        assert_eq!(ctx.state(), Some(Done::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let (root, handle) = Context::with_cancel();
        let child = root.with_timeout(Duration::from_secs(60));
        handle.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.done().await, Done::Cancelled);
    }

    #[tokio::test]
    async fn test_child_cannot_extend_deadline() {
        let parent = Context::background().with_timeout(Duration::from_millis(20));
        let child = parent.with_timeout(Duration::from_secs(60));
        let done = tokio::time::timeout(Duration::from_secs(1), child.done()).await;
        assert_eq!(done, Ok(Done::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (ctx, handle) = Context::with_cancel();
        drop(handle);
        let ctx = ctx.with_timeout(Duration::from_millis(10));
        assert_eq!(ctx.done().await, Done::DeadlineExceeded);
    }

    #[test]
    fn test_done_as_io_error() {
        let err = std::io::Error::from(Done::DeadlineExceeded);
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);
        let err = std::io::Error::from(Done::Cancelled);
        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
    }
}
