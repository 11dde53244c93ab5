//! # wireline
//!
//! Lightweight point-to-point RPC over pooled TCP connections.
//!
//! Calls exchange a fixed framed binary preamble (a packet tag and
//! length-prefixed fields) followed by JSON-encoded argument and result
//! payloads. New connections negotiate a protocol version via Hello frames;
//! calls carry a deadline hint; cancellation interrupts an in-flight call by
//! closing the underlying transport; server-side failures surface as
//! structured Exception frames without ending the session.
//!
//! ## Example
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use wireline::{Args, Client, Options, Server, ServerContext};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Greeting(String);
//!
//! impl Args for Greeting {}
//!
//! #[tokio::main]
//! async fn main() -> wireline::Result<()> {
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!
//!     let mut server = Server::new();
//!     server.register("fn", |ctx: ServerContext, args: Greeting| async move {
//!         ctx.write_response(&format!("Hello, {}", args.0)).await
//!     })?;
//!     tokio::spawn(server.serve(listener));
//!
//!     let client = Client::new(addr.to_string(), Options::default());
//!     let greeting: String = client.call("fn", &Greeting("world".into())).await?;
//!     assert_eq!(greeting, "Hello, world");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;

mod client;
mod server;

pub use client::{CallContext, CancelToken, Client, DialFn, Options};
pub use error::{Result, WirelineError};
pub use handler::{Args, HandlerRegistry, HealthCheck, ServerContext};
pub use protocol::{ClientInfo, ServerInfo, Stat, Tag, PROTOCOL_VERSION};
pub use server::Server;
