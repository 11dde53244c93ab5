//! A single pooled client connection.
//!
//! A connection pairs the split transport with an encoder/decoder, tracks
//! its lifetime deadline, and carries the open permit it was checked out
//! with. Closing is monotonic: once the closed flag is set the connection is
//! never reused, and the awaitable closed signal aborts whatever exchange is
//! in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::Instant;
use tracing::debug;

use crate::codec::{Decoder, Encoder};
use crate::error::{Result, WirelineError};
use crate::handler::Args;
use crate::protocol::{ServerInfo, Tag};

/// Shared close state, also held by the cancellation watcher.
pub(crate) struct ConnState {
    closed: AtomicBool,
    tx: watch::Sender<bool>,
}

impl ConnState {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            closed: AtomicBool::new(false),
            tx,
        }
    }

    /// Mark the connection closed. Idempotent; fires the closed signal once.
    pub(crate) fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("close connection");
            let _ = self.tx.send(true);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once the connection is marked closed.
    pub(crate) async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

pub(crate) struct ClientConnection {
    decoder: Decoder<BufReader<OwnedReadHalf>>,
    encoder: Encoder<OwnedWriteHalf>,
    state: Arc<ConnState>,
    server_info: ServerInfo,
    /// Instant past which the connection is discarded instead of reused.
    pub(crate) lifetime: Instant,
    /// Open permit held while the connection is checked out of the pool.
    pub(crate) permit: Option<OwnedSemaphorePermit>,
}

impl ClientConnection {
    pub(crate) fn new(stream: TcpStream, permit: OwnedSemaphorePermit, lifetime: Instant) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            decoder: Decoder::new(BufReader::new(read_half)),
            encoder: Encoder::new(write_half),
            state: Arc::new(ConnState::new()),
            server_info: ServerInfo::default(),
            lifetime,
            permit: Some(permit),
        }
    }

    pub(crate) fn state(&self) -> Arc<ConnState> {
        self.state.clone()
    }

    pub(crate) fn close(&self) {
        self.state.close();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub(crate) fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Exchange Hello frames with the server. A no-op once the server info
    /// is populated; a connection handshakes exactly once.
    pub(crate) async fn handshake(&mut self, version: u16, hostname: &str) -> Result<()> {
        if self.server_info.version != 0 {
            return Ok(());
        }
        self.encoder.write_tag(Tag::Hello).await?;
        self.encoder.write_u16(version).await?;
        self.encoder.write_string(hostname).await?;
        let tag = self.decoder.read_u8().await?;
        match Tag::from_u8(tag) {
            Some(Tag::Hello) => {
                self.server_info.version = self.decoder.read_u16().await?;
                self.server_info.hostname = self.decoder.read_string().await?;
                debug!(
                    version = self.server_info.version,
                    hostname = %self.server_info.hostname,
                    "handshake <-"
                );
                Ok(())
            }
            Some(Tag::Exception) => Err(self.read_exception().await?),
            _ => Err(WirelineError::Protocol("unexpected packet".into())),
        }
    }

    /// Write one Call frame and read its single response frame.
    ///
    /// The exchange races the connection's closed signal so that the
    /// cancellation watcher can abort a call stuck writing or waiting for
    /// the response.
    pub(crate) async fn exchange<A, T>(
        &mut self,
        method: &str,
        args: &A,
        deadline_nanos: i64,
    ) -> Result<T>
    where
        A: Args,
        T: DeserializeOwned,
    {
        let state = self.state.clone();
        let io = async {
            self.encoder.write_tag(Tag::Call).await?;
            self.encoder.write_string(method).await?;
            self.encoder.write_args(args).await?;
            self.encoder.write_i64(deadline_nanos).await?;
            let tag = self.decoder.read_u8().await?;
            match Tag::from_u8(tag) {
                Some(Tag::Data) => self.decoder.read_result().await,
                Some(Tag::Exception) => Err(self.read_exception().await?),
                _ => Err(WirelineError::Protocol(format!("unexpected packet: {tag}"))),
            }
        };
        tokio::select! {
            result = io => result,
            _ = state.closed() => Err(WirelineError::ConnectionClosed),
        }
    }

    async fn read_exception(&mut self) -> Result<WirelineError> {
        Ok(WirelineError::Remote(self.decoder.read_string().await?))
    }
}
