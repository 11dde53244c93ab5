//! Framing codec: byte-level reader and writer for the wire format.
//!
//! The encoder writes directly to the transport; the decoder is expected to
//! sit on a buffered reader. Reads fully populate the requested slice or
//! fail — a short read is an error, never a partial value. Any I/O failure
//! is fatal to the current session or call.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, WirelineError};
use crate::protocol::Tag;

/// Maximum encoded length of an unsigned LEB128 varint for a u64.
const MAX_VARINT_LEN: usize = 10;

/// Writes protocol frames field by field.
pub struct Encoder<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> Encoder<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    pub async fn write_u8(&mut self, v: u8) -> Result<()> {
        self.output.write_all(&[v]).await?;
        Ok(())
    }

    pub async fn write_tag(&mut self, tag: Tag) -> Result<()> {
        self.write_u8(tag as u8).await
    }

    pub async fn write_u16(&mut self, v: u16) -> Result<()> {
        self.output.write_all(&v.to_le_bytes()).await?;
        Ok(())
    }

    pub async fn write_u64(&mut self, v: u64) -> Result<()> {
        self.output.write_all(&v.to_le_bytes()).await?;
        Ok(())
    }

    pub async fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_u64(v as u64).await
    }

    /// Unsigned LEB128, 1-10 bytes.
    pub async fn write_uvarint(&mut self, mut v: u64) -> Result<()> {
        let mut buf = [0u8; MAX_VARINT_LEN];
        let mut n = 0;
        while v >= 0x80 {
            buf[n] = v as u8 | 0x80;
            v >>= 7;
            n += 1;
        }
        buf[n] = v as u8;
        self.output.write_all(&buf[..=n]).await?;
        Ok(())
    }

    /// Varint byte length, then the UTF-8 bytes.
    pub async fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_uvarint(s.len() as u64).await?;
        self.output.write_all(s.as_bytes()).await?;
        Ok(())
    }

    /// Varint byte length, then the raw bytes.
    pub async fn write_blob(&mut self, data: &[u8]) -> Result<()> {
        self.write_uvarint(data.len() as u64).await?;
        self.output.write_all(data).await?;
        Ok(())
    }

    /// JSON-encode `args` and write it as a length-prefixed blob.
    pub async fn write_args<A: Serialize>(&mut self, args: &A) -> Result<()> {
        let json = serde_json::to_vec(args)?;
        self.write_blob(&json).await
    }

    /// Data tag followed by the JSON of `v` as a length-prefixed blob.
    pub async fn write_result<T: Serialize + ?Sized>(&mut self, v: &T) -> Result<()> {
        let json = serde_json::to_vec(v)?;
        self.write_tag(Tag::Data).await?;
        self.write_blob(&json).await
    }
}

/// Reads protocol frames field by field.
pub struct Decoder<R> {
    input: R,
}

impl<R: AsyncRead + Unpin> Decoder<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.input.read_exact(&mut buf).await?;
        Ok(buf[0])
    }

    pub async fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.input.read_exact(&mut buf).await?;
        Ok(u16::from_le_bytes(buf))
    }

    pub async fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.input.read_exact(&mut buf).await?;
        Ok(u64::from_le_bytes(buf))
    }

    pub async fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64().await? as i64)
    }

    pub async fn read_uvarint(&mut self) -> Result<u64> {
        let mut x = 0u64;
        let mut shift = 0u32;
        for i in 0..MAX_VARINT_LEN {
            let b = self.read_u8().await?;
            if b < 0x80 {
                if i == MAX_VARINT_LEN - 1 && b > 1 {
                    return Err(WirelineError::Protocol("varint overflows u64".into()));
                }
                return Ok(x | u64::from(b) << shift);
            }
            x |= u64::from(b & 0x7f) << shift;
            shift += 7;
        }
        Err(WirelineError::Protocol("varint overflows u64".into()))
    }

    pub async fn read_string(&mut self) -> Result<String> {
        let data = self.read_blob().await?;
        String::from_utf8(data.into())
            .map_err(|err| WirelineError::Protocol(format!("invalid utf-8 string: {err}")))
    }

    pub async fn read_blob(&mut self) -> Result<Bytes> {
        let len = self.read_uvarint().await? as usize;
        let mut data = vec![0u8; len];
        self.input.read_exact(&mut data).await?;
        Ok(Bytes::from(data))
    }

    /// Read a length-prefixed JSON blob and decode it into `T`.
    pub async fn read_result<T: DeserializeOwned>(&mut self) -> Result<T> {
        let data = self.read_blob().await?;
        Ok(serde_json::from_slice(&data)?)
    }
}
