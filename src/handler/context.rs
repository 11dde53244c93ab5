//! Request context handed to call handlers.
//!
//! The context carries the call deadline transmitted by the client and owns
//! the response side of the exchange: [`ServerContext::write_response`]
//! emits the single Data frame for the call, and later calls are ignored.
//! Handlers that want to honour the deadline can await [`ServerContext::done`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Instant};

use crate::codec::Encoder;
use crate::error::{Result, WirelineError};

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Frame writer shared between a session and the contexts it creates. A
/// connection carries at most one outstanding call, so the lock is
/// uncontended in practice.
pub(crate) type SharedEncoder = Arc<Mutex<Encoder<BoxedWriter>>>;

/// Context for a single in-flight call on the server.
#[derive(Clone)]
pub struct ServerContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    deadline: Option<Duration>,
    encoder: SharedEncoder,
    finished: AtomicBool,
    closed: AtomicBool,
    done_tx: watch::Sender<bool>,
}

impl ServerContext {
    /// Build a context for a call carrying `deadline_nanos` of remaining
    /// budget; values of zero or less mean no deadline and start no timer.
    pub(crate) fn new(encoder: SharedEncoder, deadline_nanos: i64) -> Self {
        let deadline = if deadline_nanos > 0 {
            Some(Duration::from_nanos(deadline_nanos as u64))
        } else {
            None
        };
        let (done_tx, _) = watch::channel(false);
        let ctx = Self {
            inner: Arc::new(ContextInner {
                deadline,
                encoder,
                finished: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                done_tx,
            }),
        };
        if let Some(timeout) = deadline {
            let inner = ctx.inner.clone();
            tokio::spawn(async move {
                let mut done = inner.done_tx.subscribe();
                tokio::select! {
                    _ = time::sleep(timeout) => inner.close(),
                    _ = done.changed() => {}
                }
            });
        }
        ctx
    }

    /// The instant at which the call's budget elapses, if the caller sent one.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline.map(|d| Instant::now() + d)
    }

    /// Resolves when the deadline elapses. Without a deadline this never
    /// resolves.
    pub async fn done(&self) {
        if self.inner.deadline.is_none() {
            return std::future::pending().await;
        }
        let mut rx = self.inner.done_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// The deadline-exceeded sentinel while the call is live, `None` once the
    /// context has closed.
    pub fn err(&self) -> Option<WirelineError> {
        if self.inner.closed.load(Ordering::Acquire) {
            None
        } else {
            Some(WirelineError::DeadlineExceeded)
        }
    }

    /// Emit the call's Data frame containing the JSON of `v`.
    ///
    /// Only the first call writes; subsequent calls are silent no-ops.
    pub async fn write_response<T: Serialize + ?Sized>(&self, v: &T) -> Result<()> {
        if self
            .inner
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.encoder.lock().await.write_result(v).await?;
        }
        Ok(())
    }

    pub(crate) fn close(&self) {
        self.inner.close();
    }
}

impl ContextInner {
    fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.done_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Tag;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn context(deadline_nanos: i64) -> (ServerContext, DuplexStream) {
        let (writer, reader) = tokio::io::duplex(4096);
        let encoder: SharedEncoder =
            Arc::new(Mutex::new(Encoder::new(Box::new(writer) as BoxedWriter)));
        (ServerContext::new(encoder, deadline_nanos), reader)
    }

    #[tokio::test]
    async fn write_response_emits_a_single_data_frame() {
        let (ctx, mut reader) = context(0);
        ctx.write_response(&1i32).await.unwrap();
        ctx.write_response(&2i32).await.unwrap();
        drop(ctx);

        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, [Tag::Data as u8, 1, b'1']);
    }

    #[tokio::test]
    async fn done_never_fires_without_deadline() {
        let (ctx, _reader) = context(0);
        tokio::select! {
            _ = ctx.done() => panic!("done fired without a deadline"),
            _ = time::sleep(Duration::from_millis(50)) => {}
        }
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test]
    async fn done_fires_when_deadline_elapses() {
        let (ctx, _reader) = context(Duration::from_millis(10).as_nanos() as i64);
        assert!(ctx.deadline().is_some());
        assert!(matches!(ctx.err(), Some(WirelineError::DeadlineExceeded)));

        time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .expect("done should fire");
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (ctx, _reader) = context(0);
        assert!(ctx.err().is_some());
        ctx.close();
        ctx.close();
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn negative_deadline_means_no_deadline() {
        let (ctx, _reader) = context(-5);
        assert!(ctx.deadline().is_none());
    }
}
