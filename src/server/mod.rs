//! RPC server: handler registration and the accept loop.

mod session;

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::Result;
use crate::handler::{Args, HandlerRegistry, HandlerResult, HealthCheck, ServerContext};
use crate::protocol::{local_hostname, PROTOCOL_VERSION};
use session::Session;

/// RPC server dispatching framed calls to registered handlers.
///
/// Handlers are registered up front; [`Server::serve`] then consumes the
/// server and accepts connections for its lifetime, one session task per
/// connection.
pub struct Server {
    pub(crate) version: u16,
    pub(crate) hostname: String,
    pub(crate) registry: HandlerRegistry,
}

impl Server {
    pub fn new() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            hostname: local_hostname(),
            registry: HandlerRegistry::new(),
        }
    }

    /// Override the hostname announced in Hello frames.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Register a call handler under a unique method name.
    ///
    /// Object-style methods use the `Type.Method` naming convention.
    pub fn register<A, F, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        A: Args,
        F: Fn(ServerContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(name, handler)
    }

    /// Add a health probe run on every HealthCheck frame.
    pub fn register_health_check(&mut self, check: impl HealthCheck + 'static) {
        self.registry.register_health_check(check);
    }

    /// Accept connections from `listener` and serve them until the listener
    /// fails permanently. Each accepted connection runs as its own task.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let server = Arc::new(self);
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "serving");
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = server.clone();
                    tokio::spawn(async move {
                        Session::run(server, stream, peer).await;
                    });
                }
                Err(err) => warn!("accept failed: {err}"),
            }
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}
