use overlay_link::Link;
use tokio::net::{TcpListener, TcpStream};

/// A bound TCP listener standing in for a Hub or Endpoint during tests.
/// Accepts a single connection and hands back a `Link` wrapping it, so
/// tests can drive the real wire protocol end to end over loopback instead
/// of asserting against internal state.
pub struct MockListener {
    listener: TcpListener,
}

impl MockListener {
    /// Bind to an OS-assigned loopback port.
    pub async fn bind() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(MockListener { listener })
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.listener.local_addr().expect("bound listener has a local address").port()
    }

    /// Accept the next connection and wrap it as a `Link`.
    pub async fn accept(&self) -> std::io::Result<Link<TcpStream>> {
        let (stream, _peer) = self.listener.accept().await?;
        Ok(Link::new(stream))
    }
}

/// Connect to a `MockListener` (or any peer) on loopback and wrap the
/// resulting stream as a `Link`.
pub async fn connect(port: u16) -> std::io::Result<Link<TcpStream>> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await?;
    Ok(Link::new(stream))
}

/// Build a connected pair of `Link`s without touching a real socket, for
/// tests that only care about message exchange and not about bind/connect
/// timing.
#[must_use]
pub fn duplex_pair() -> (Link<tokio::io::DuplexStream>, Link<tokio::io::DuplexStream>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (Link::new(a), Link::new(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_protocol::{MessageType, Priority};

    #[tokio::test]
    async fn a_connected_pair_exchanges_a_frame_over_real_sockets() {
        let listener = MockListener::bind().await.unwrap();
        let port = listener.port();

        let server = tokio::spawn(async move { listener.accept().await.unwrap() });
        let mut client = connect(port).await.unwrap();
        let mut server = server.await.unwrap();

        client.send(overlay_link::Frame::new(MessageType::Heartbeat, Priority::High, vec![7]));
        client.pump().await.unwrap();

        let got = server.recv().await.unwrap().unwrap();
        assert_eq!(got.payload, vec![7]);
    }

    #[tokio::test]
    async fn duplex_pair_round_trips_without_a_socket() {
        let (mut a, mut b) = duplex_pair();
        a.send(overlay_link::Frame::new(MessageType::DirectoryRequest, Priority::Med, vec![1, 2, 3]));
        a.pump().await.unwrap();
        let got = b.recv().await.unwrap().unwrap();
        assert_eq!(got.payload, vec![1, 2, 3]);
    }
}
