//! Protocol vocabulary: packet tags, version, and peer identity types.
//!
//! A frame on the wire is a 1-byte tag followed by tag-specific fields.
//! All multi-byte integers are little-endian:
//!
//! | Tag | Value | Payload |
//! |---|---|---|
//! | Hello | 1 | u16 version, string hostname |
//! | Ping | 2 | — |
//! | Pong | 3 | — |
//! | Call | 4 | string method, varlen args-JSON, i64 deadline-ns |
//! | Data | 5 | varlen result-JSON |
//! | Cancel | 6 | — |
//! | Exception | 7 | string message |
//! | HealthCheck | 8 | — |

/// Current protocol version. Handshake accepts any nonzero peer version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Packet tag, the first byte of every frame.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Hello = 1,
    Ping = 2,
    Pong = 3,
    Call = 4,
    Data = 5,
    Cancel = 6,
    Exception = 7,
    HealthCheck = 8,
}

impl Tag {
    /// Decode a tag byte. Unknown values are protocol errors at the call
    /// site; the enumeration is exhaustive.
    pub fn from_u8(v: u8) -> Option<Tag> {
        match v {
            1 => Some(Tag::Hello),
            2 => Some(Tag::Ping),
            3 => Some(Tag::Pong),
            4 => Some(Tag::Call),
            5 => Some(Tag::Data),
            6 => Some(Tag::Cancel),
            7 => Some(Tag::Exception),
            8 => Some(Tag::HealthCheck),
            _ => None,
        }
    }
}

/// Server identity exchanged during handshake. Immutable once populated;
/// `version != 0` marks a completed handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: u16,
    pub hostname: String,
}

/// Client identity exchanged during handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub version: u16,
    pub hostname: String,
}

/// Point-in-time view of the client pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Connections currently checked out of the pool.
    pub open_conns: usize,
    /// Connections parked in the idle queue.
    pub idle_conns: usize,
}

/// Hostname announced in Hello frames; empty when the lookup fails.
pub(crate) fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}
