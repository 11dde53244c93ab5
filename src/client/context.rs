//! Caller-side call context: deadline and cancellation.
//!
//! A [`CallContext`] scopes one or more calls. With a deadline or a
//! [`CancelToken`] attached, every call made under the context runs with a
//! cancellation watcher that closes the connection when the context fires,
//! failing the in-flight call promptly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant};

/// Shared cancellation handle. Cancelling any clone cancels them all; the
/// token stays cancelled for its lifetime.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline and cancellation scope for client calls.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl CallContext {
    /// A context that never cancels; calls run without a watcher.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that cancels `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// A context that cancels at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// A context cancelled explicitly through the returned token.
    pub fn with_cancel() -> (Self, CancelToken) {
        let token = CancelToken::new();
        let ctx = Self {
            deadline: None,
            cancel: Some(token.clone()),
        };
        (ctx, token)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining deadline budget in nanoseconds as transmitted on the wire;
    /// 0 when the context has no deadline.
    pub(crate) fn remaining_nanos(&self) -> i64 {
        match self.deadline {
            Some(at) => at.saturating_duration_since(Instant::now()).as_nanos() as i64,
            None => 0,
        }
    }

    pub(crate) fn is_cancellable(&self) -> bool {
        self.deadline.is_some() || self.cancel.is_some()
    }

    /// Resolves when the deadline elapses or the token is cancelled,
    /// whichever comes first. Never resolves for a background context.
    pub(crate) async fn cancelled(&self) {
        let expired = async {
            match self.deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = expired => {}
                    _ = token.cancelled() => {}
                }
            }
            None => expired.await,
        }
    }
}
