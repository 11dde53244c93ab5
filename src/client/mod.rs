//! RPC client: connection pool and call pipeline.
//!
//! The pool bounds concurrently open connections with a semaphore, parks
//! released connections in a bounded idle queue, and retries transient dial
//! failures on a 1 ms cadence under a connect timeout. Each call checks out
//! a connection, performs the handshake if needed, writes one Call frame,
//! and reads one response frame; a cancellable [`CallContext`] additionally
//! runs a watcher that closes the connection when the context fires.
//!
//! # Example
//!
//! ```ignore
//! use wireline::{CallContext, Client, Options};
//!
//! let client = Client::new("127.0.0.1:7077", Options::default());
//! let ctx = CallContext::with_timeout(std::time::Duration::from_secs(1));
//! let greeting: String = client.call_with(&ctx, "fn", &Greeting("world".into())).await?;
//! ```

mod conn;
mod context;

pub use context::{CallContext, CancelToken};

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::{Result, WirelineError};
use crate::handler::{Args, BoxFuture};
use crate::protocol::{local_hostname, Stat, PROTOCOL_VERSION};
use conn::{ClientConnection, ConnState};

pub const DEFAULT_MAX_RETRY: u32 = 2;
pub const DEFAULT_MAX_OPEN_CONNS: usize = 50;
pub const DEFAULT_MAX_IDLE_CONNS: usize = 25;
pub const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_CONN_DEADLINE: Duration = Duration::from_secs(5);
pub const DEFAULT_CONN_MAX_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Dial timeout applied by the default TCP dialer.
const DIAL_TIMEOUT: Duration = Duration::from_millis(50);
/// Cadence of acquisition attempts inside `open_or_reuse`.
const RETRY_TICK: Duration = Duration::from_millis(1);

/// Factory producing a fresh transport to the peer.
pub type DialFn = Arc<dyn Fn() -> BoxFuture<'static, io::Result<TcpStream>> + Send + Sync>;

/// Client pool configuration.
pub struct Options {
    /// Custom dialer; defaults to TCP with a short dial timeout.
    pub dial: Option<DialFn>,
    /// Retry budget for transient dial failures.
    pub max_retry: u32,
    /// Upper bound on concurrently live connections.
    pub max_open_conns: usize,
    /// Upper bound on pooled idle connections.
    pub max_idle_conns: usize,
    /// Maximum wall time to obtain a connection, by dial or reuse.
    pub conn_timeout: Duration,
    /// Per-connection operation deadline. Reserved; not currently applied.
    pub conn_deadline: Duration,
    /// Age at which an idle connection is discarded instead of reused.
    pub conn_max_lifetime: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dial: None,
            max_retry: DEFAULT_MAX_RETRY,
            max_open_conns: DEFAULT_MAX_OPEN_CONNS,
            max_idle_conns: DEFAULT_MAX_IDLE_CONNS,
            conn_timeout: DEFAULT_CONN_TIMEOUT,
            conn_deadline: DEFAULT_CONN_DEADLINE,
            conn_max_lifetime: DEFAULT_CONN_MAX_LIFETIME,
        }
    }
}

struct Pool {
    dial: DialFn,
    version: u16,
    hostname: String,
    open_permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<ClientConnection>>,
    max_retry: u32,
    max_open_conns: usize,
    max_idle_conns: usize,
    conn_timeout: Duration,
    conn_max_lifetime: Duration,
}

/// RPC client over a pool of TCP connections. Cheap to clone; clones share
/// the pool.
#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
}

impl Client {
    /// Build a client for the given peer address.
    pub fn new(addr: impl Into<String>, options: Options) -> Self {
        let addr = addr.into();
        let dial = options.dial.unwrap_or_else(|| default_dialer(addr));
        Self {
            pool: Arc::new(Pool {
                dial,
                version: PROTOCOL_VERSION,
                hostname: local_hostname(),
                open_permits: Arc::new(Semaphore::new(options.max_open_conns)),
                idle: Mutex::new(VecDeque::with_capacity(options.max_idle_conns)),
                max_retry: options.max_retry,
                max_open_conns: options.max_open_conns,
                max_idle_conns: options.max_idle_conns,
                conn_timeout: options.conn_timeout,
                conn_max_lifetime: options.conn_max_lifetime,
            }),
        }
    }

    /// Current pool counters.
    pub async fn stat(&self) -> Stat {
        Stat {
            open_conns: self.pool.max_open_conns - self.pool.open_permits.available_permits(),
            idle_conns: self.pool.idle.lock().await.len(),
        }
    }

    /// Call `method` with a background context.
    pub async fn call<A, T>(&self, method: &str, args: &A) -> Result<T>
    where
        A: Args,
        T: DeserializeOwned,
    {
        self.call_with(&CallContext::background(), method, args).await
    }

    /// Call `method` under `ctx`, returning the decoded result.
    ///
    /// Arguments are validated before any connection is consumed. The
    /// connection is released on every exit path; a cancelled call forfeits
    /// it and the pool recovers by dialling anew.
    pub async fn call_with<A, T>(&self, ctx: &CallContext, method: &str, args: &A) -> Result<T>
    where
        A: Args,
        T: DeserializeOwned,
    {
        args.validate()?;
        let mut conn = self.connect().await?;
        let watcher = Watcher::spawn(ctx, conn.state());
        let result = conn.exchange(method, args, ctx.remaining_nanos()).await;
        if let Some(watcher) = watcher {
            watcher.finish().await;
        }
        self.release(conn).await;
        result
    }

    /// Obtain a handshaken connection, retrying once on handshake failure.
    async fn connect(&self) -> Result<ClientConnection> {
        let mut last_err = None;
        for _ in 0..2 {
            match self.open_or_reuse().await {
                Ok(mut conn) => match conn.handshake(self.pool.version, &self.pool.hostname).await {
                    Ok(()) => {
                        debug!(server = %conn.server_info().hostname, "connected");
                        return Ok(conn);
                    }
                    Err(err) => {
                        conn.close();
                        last_err = Some(err);
                    }
                },
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or(WirelineError::AcquireTimeout))
    }

    /// Acquire an open slot and a connection for it, preferring idle reuse
    /// over dialling. Runs on a 1 ms tick under the connect timeout.
    async fn open_or_reuse(&self) -> Result<ClientConnection> {
        let pool = &self.pool;
        let acquire = async {
            let mut attempts = 0;
            let mut tick = time::interval(RETRY_TICK);
            loop {
                tick.tick().await;
                let Ok(permit) = pool.open_permits.clone().try_acquire_owned() else {
                    continue;
                };
                if let Some(mut conn) = pool.idle.lock().await.pop_front() {
                    debug!("reuse connection");
                    conn.permit = Some(permit);
                    return Ok(conn);
                }
                match (pool.dial)().await {
                    Ok(stream) => {
                        debug!("open new connection");
                        return Ok(ClientConnection::new(
                            stream,
                            permit,
                            Instant::now() + pool.conn_max_lifetime,
                        ));
                    }
                    Err(err) if attempts >= pool.max_retry => return Err(WirelineError::Io(err)),
                    Err(_) => attempts += 1,
                }
            }
        };
        match time::timeout(pool.conn_timeout, acquire).await {
            Ok(conn) => conn,
            Err(_) => Err(WirelineError::AcquireTimeout),
        }
    }

    /// Return a connection to the idle queue, or discard it when it is
    /// closed, expired, or the queue is full. The open permit is released
    /// when the connection's checkout ends, in either branch.
    async fn release(&self, mut conn: ClientConnection) {
        debug!("release connection");
        let permit = conn.permit.take();
        if !conn.is_closed() && conn.lifetime > Instant::now() {
            let mut idle = self.pool.idle.lock().await;
            if idle.len() < self.pool.max_idle_conns {
                idle.push_back(conn);
                drop(idle);
                drop(permit);
                return;
            }
        }
        conn.close();
        drop(conn);
        drop(permit);
    }
}

/// Per-call cancellation watcher.
///
/// Races the context's cancel signal against the call's private finished
/// signal. The context firing first closes the connection, which aborts the
/// in-flight exchange; the finished signal firing first ends the watcher
/// without touching the transport. `finish` joins the task, so exactly one
/// of the two outcomes has happened by the time the call returns.
struct Watcher {
    finished: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Watcher {
    fn spawn(ctx: &CallContext, state: Arc<ConnState>) -> Option<Watcher> {
        if !ctx.is_cancellable() {
            return None;
        }
        let ctx = ctx.clone();
        let (finished, mut finished_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = ctx.cancelled() => state.close(),
                _ = &mut finished_rx => {}
            }
        });
        Some(Watcher { finished, handle })
    }

    async fn finish(self) {
        let _ = self.finished.send(());
        let _ = self.handle.await;
    }
}

fn default_dialer(addr: String) -> DialFn {
    Arc::new(move || -> BoxFuture<'static, io::Result<TcpStream>> {
        let addr = addr.clone();
        Box::pin(async move {
            match time::timeout(DIAL_TIMEOUT, TcpStream::connect(&addr)).await {
                Ok(stream) => stream,
                Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "dial timeout")),
            }
        })
    })
}
