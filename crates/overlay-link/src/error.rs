use overlay_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced from a `Link`'s framing codec or socket (spec §4.1, §7).
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("frame decode error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("message length {0} exceeds configured maximum {1}")]
    Oversize(u32, u32),
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}
