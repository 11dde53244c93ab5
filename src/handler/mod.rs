//! Handler module - call arguments, dispatch, and the request context.
//!
//! Provides:
//! - [`Args`] - the contract for call argument types
//! - [`HandlerRegistry`] - maps method names to handlers
//! - [`ServerContext`] - lets handlers observe the deadline and respond
//!
//! # Example
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use wireline::{Args, Server, ServerContext};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Greeting(String);
//!
//! impl Args for Greeting {}
//!
//! let mut server = Server::new();
//! server.register("fn", |ctx: ServerContext, args: Greeting| async move {
//!     ctx.write_response(&format!("Hello, {}", args.0)).await
//! })?;
//! ```

mod context;
mod registry;

pub use context::ServerContext;
pub(crate) use context::{BoxedWriter, SharedEncoder};
pub use registry::{Handler, HandlerRegistry, TypedHandler};

use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Boxed future used by type-erased handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for handler functions.
pub type HandlerResult = crate::Result<()>;

/// Contract for call argument types.
///
/// Arguments travel as JSON; `validate` runs on the client before encoding
/// and on the server after decoding. The default accepts everything.
pub trait Args: Serialize + DeserializeOwned + Send + 'static {
    fn validate(&self) -> crate::Result<()> {
        Ok(())
    }
}

/// A health probe run by the server on a HealthCheck frame.
///
/// Checkers run in registration order; the first failure short-circuits and
/// is reported to the peer as an Exception.
pub trait HealthCheck: Send + Sync {
    fn health_check(&self) -> crate::Result<()>;
}

impl<F> HealthCheck for F
where
    F: Fn() -> crate::Result<()> + Send + Sync,
{
    fn health_check(&self) -> crate::Result<()> {
        self()
    }
}
