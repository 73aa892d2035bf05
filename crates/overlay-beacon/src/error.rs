#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("beacon socket I/O error")]
    Io(#[from] std::io::Error),
    #[error("malformed beacon datagram")]
    Protocol(#[from] overlay_protocol::ProtocolError),
    #[error("no non-loopback IPv4 adapter found")]
    NoAdapter,
}
