use thiserror::Error;

/// Errors raised while decoding wire bytes. These never cross a connection
/// boundary by themselves — callers decide whether a bad frame resyncs the
/// stream or tears the connection down (spec §7).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("bad UID text: {0}")]
    BadUid(&'static str),
    #[error("bad sync word")]
    BadSync,
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("message length {0} exceeds configured maximum {1}")]
    Oversize(u32, u32),
    #[error("truncated frame")]
    Truncated,
    #[error("unknown message type {0}")]
    UnknownMessageType(u16),
    #[error("malformed directory entry: {0}")]
    BadDirectoryEntry(&'static str),
    #[error("malformed beacon datagram: {0}")]
    BadBeacon(&'static str),
    #[error("malformed lookup record: {0}")]
    BadLookupRecord(&'static str),
}
