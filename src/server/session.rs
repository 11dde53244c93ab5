//! Per-connection session state machine.
//!
//! A session performs the Hello exchange, then loops reading packets until
//! EOF, a Cancel frame, or an unrecoverable error. Application-level
//! failures (unknown method, argument decode/validation, handler errors,
//! failed health checks) are written as Exception frames and the session
//! continues; protocol and transport failures terminate it, because stream
//! alignment cannot be recovered.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::Server;
use crate::codec::{Decoder, Encoder};
use crate::error::{Result, WirelineError};
use crate::handler::{BoxedWriter, ServerContext, SharedEncoder};
use crate::protocol::{ClientInfo, Tag};

pub(crate) struct Session<R> {
    server: Arc<Server>,
    decoder: Decoder<R>,
    encoder: SharedEncoder,
    client_info: ClientInfo,
}

impl Session<BufReader<tokio::net::tcp::OwnedReadHalf>> {
    /// Run a session over an accepted connection until it terminates. The
    /// stream is dropped, and thereby closed, on return.
    pub(crate) async fn run(server: Arc<Server>, stream: TcpStream, peer: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let session = Session {
            server,
            decoder: Decoder::new(BufReader::new(read_half)),
            encoder: Arc::new(Mutex::new(Encoder::new(Box::new(write_half) as BoxedWriter))),
            client_info: ClientInfo::default(),
        };
        match session.start().await {
            Ok(()) => debug!(%peer, "session closed"),
            Err(err) => debug!(%peer, "session ended: {err}"),
        }
    }
}

impl<R: AsyncRead + Unpin> Session<R> {
    async fn start(mut self) -> Result<()> {
        if let Err(err) = self.handshake().await {
            let _ = self.exception(&format!("handshake: {err}")).await;
            return Err(err);
        }
        loop {
            let tag = match self.decoder.read_u8().await {
                Ok(tag) => tag,
                Err(WirelineError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(())
                }
                Err(err) => return Err(err),
            };
            match Tag::from_u8(tag) {
                Some(Tag::Call) => {
                    if let Err(err) = self.call().await {
                        let _ = self.exception(&format!("call: {err}")).await;
                        return Err(err);
                    }
                }
                Some(Tag::Ping) => {
                    debug!("<- ping");
                    self.encoder.lock().await.write_tag(Tag::Pong).await?;
                    debug!("-> pong");
                }
                Some(Tag::HealthCheck) => {
                    debug!("<- health check");
                    self.health_check().await?;
                }
                Some(Tag::Cancel) => {
                    debug!("<- cancel");
                    return Ok(());
                }
                _ => {
                    return Err(WirelineError::Protocol(format!(
                        "unexpected packet '{tag}'"
                    )))
                }
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let tag = self.decoder.read_u8().await?;
        if Tag::from_u8(tag) != Some(Tag::Hello) {
            return Err(WirelineError::Protocol(format!("unexpected packet '{tag}'")));
        }
        self.client_info.version = self.decoder.read_u16().await?;
        self.client_info.hostname = self.decoder.read_string().await?;
        if self.client_info.version == 0 {
            return Err(WirelineError::Protocol("unsupported version 0".into()));
        }
        debug!(
            version = self.client_info.version,
            hostname = %self.client_info.hostname,
            "handshake <-"
        );
        let mut encoder = self.encoder.lock().await;
        encoder.write_tag(Tag::Hello).await?;
        encoder.write_u16(self.server.version).await?;
        encoder.write_string(&self.server.hostname).await?;
        debug!(
            version = self.server.version,
            hostname = %self.server.hostname,
            "handshake ->"
        );
        Ok(())
    }

    /// Call sub-procedure. The whole Call frame is consumed before lookup
    /// and decoding, so application failures leave the stream aligned and
    /// the next request on the connection is served normally.
    async fn call(&mut self) -> Result<()> {
        let method = self.decoder.read_string().await?;
        let payload = self.decoder.read_blob().await?;
        let deadline = self.decoder.read_i64().await?;
        debug!(%method, deadline, "<- call");

        let Some(handler) = self.server.registry.get(&method) else {
            return self
                .exception(&WirelineError::MethodNotFound(method).to_string())
                .await;
        };
        let args = match handler.decode_args(&payload) {
            Ok(args) => args,
            Err(err) => return self.exception(&err.to_string()).await,
        };

        let ctx = ServerContext::new(self.encoder.clone(), deadline);
        let result = handler.call(ctx.clone(), args).await;
        match result {
            Ok(()) => {
                let written = ctx.write_response(&serde_json::Value::Null).await;
                ctx.close();
                written
            }
            Err(err) => {
                ctx.close();
                self.exception(&err.to_string()).await
            }
        }
    }

    async fn health_check(&mut self) -> Result<()> {
        for check in self.server.registry.health_checks() {
            if let Err(err) = check.health_check() {
                debug!("-> health check: {err}");
                return self.exception(&err.to_string()).await;
            }
        }
        debug!("-> health check: ok");
        self.encoder.lock().await.write_tag(Tag::HealthCheck).await
    }

    async fn exception(&self, message: &str) -> Result<()> {
        debug!("-> exception: {message}");
        let mut encoder = self.encoder.lock().await;
        encoder.write_tag(Tag::Exception).await?;
        encoder.write_string(message).await
    }
}
