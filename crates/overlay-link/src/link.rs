use futures_util::{SinkExt, StreamExt};
use overlay_protocol::DEFAULT_MAX_MESSAGE_BYTES;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::error::LinkError;
use crate::frame::Frame;
use crate::queue::PriorityQueues;

/// Framing + priority-queue layer over one stream socket (spec §4.1).
///
/// `send` is the non-blocking enqueue; `pump` drains the queues onto the
/// wire, highest priority first; `recv` hands back the next fully-assembled
/// message, resynchronising internally on bad sync/checksum. One `Link`
/// owns exactly one connection's I/O; nothing here is shared across tasks.
pub struct Link<S> {
    framed: Framed<S, FrameCodec>,
    tx: PriorityQueues,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Link<S> {
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self::with_max_message_bytes(stream, DEFAULT_MAX_MESSAGE_BYTES)
    }

    #[must_use]
    pub fn with_max_message_bytes(stream: S, max_message_bytes: u32) -> Self {
        Link {
            framed: Framed::new(stream, FrameCodec::new(max_message_bytes)),
            tx: PriorityQueues::new(),
        }
    }

    /// Enqueue a frame on its priority lane. Never blocks.
    pub fn send(&mut self, frame: Frame) {
        self.tx.push(frame);
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.tx.is_empty()
    }

    /// Drain every queued frame onto the socket, highest priority first,
    /// draining one lane completely before moving to the next (spec §4.1).
    pub async fn pump(&mut self) -> Result<(), LinkError> {
        while let Some(frame) = self.tx.pop_highest() {
            self.framed.send(frame).await?;
        }
        Ok(())
    }

    /// Receive the next complete message, or `Ok(None)` on a clean close.
    /// A malformed frame is surfaced as `Err`; per spec §4.1 the caller
    /// decides whether that closes the session (oversize) or is tolerated
    /// because the codec already resynchronised internally (bad checksum is
    /// never returned here — only oversize and genuine I/O errors are).
    pub async fn recv(&mut self) -> Result<Option<Frame>, LinkError> {
        self.framed.next().await.transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_protocol::{MessageType, Priority};

    #[tokio::test]
    async fn send_then_pump_then_recv_round_trips() {
        let (client, server) = tokio::io::duplex(4096);
        let mut a = Link::new(client);
        let mut b = Link::new(server);

        a.send(Frame::new(MessageType::Heartbeat, Priority::High, vec![1]));
        a.pump().await.unwrap();

        let got = b.recv().await.unwrap().unwrap();
        assert_eq!(got.payload, vec![1]);
    }

    #[tokio::test]
    async fn high_priority_frame_is_written_before_queued_low_priority_ones() {
        let (client, server) = tokio::io::duplex(4096);
        let mut a = Link::new(client);
        let mut b = Link::new(server);

        a.send(Frame::new(MessageType::MulticastMessage, Priority::Low, vec![1]));
        a.send(Frame::new(MessageType::MulticastMessage, Priority::Low, vec![2]));
        a.send(Frame::new(MessageType::Heartbeat, Priority::High, vec![9]));
        a.pump().await.unwrap();

        assert_eq!(b.recv().await.unwrap().unwrap().payload, vec![9]);
        assert_eq!(b.recv().await.unwrap().unwrap().payload, vec![1]);
        assert_eq!(b.recv().await.unwrap().unwrap().payload, vec![2]);
    }

    #[tokio::test]
    async fn closed_peer_yields_clean_none() {
        let (client, server) = tokio::io::duplex(4096);
        drop(client);
        let mut b = Link::new(server);
        assert!(b.recv().await.unwrap().is_none());
    }
}
