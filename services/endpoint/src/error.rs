#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("link error")]
    Link(#[from] overlay_link::LinkError),
    #[error("protocol error")]
    Protocol(#[from] overlay_protocol::ProtocolError),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("no Hub reachable")]
    NoHub,
    #[error("service error: {0}")]
    Service(String),
}
