//! The Hub uplink socket after connect-time TLS wrapping (spec §4.7
//! "a stream is opened (TLS if configured)"). `Link<S>` only needs
//! `AsyncRead + AsyncWrite`, so the dispatch loop is oblivious to which
//! variant it holds.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;

pub enum EndpointStream {
    Plain(TcpStream),
    Tls(Box<ClientTlsStream<TcpStream>>),
}

impl AsyncRead for EndpointStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            EndpointStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            EndpointStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for EndpointStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            EndpointStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            EndpointStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            EndpointStream::Plain(s) => Pin::new(s).poll_flush(cx),
            EndpointStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            EndpointStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            EndpointStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
