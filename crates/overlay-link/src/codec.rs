use bytes::{Buf, BytesMut};
use overlay_protocol::{FrameHeader, ProtocolError, HEADER_LEN};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::LinkError;
use crate::frame::Frame;

/// Codec implementing spec §4.1's framing: fixed 12-byte header, checksum
/// validation, and resynchronisation on a bad sync word or checksum by
/// discarding bytes until the sync word is rediscovered. Used via
/// `tokio_util::codec::Framed` so a `Link` gets `Stream`/`Sink` for free.
pub struct FrameCodec {
    max_message_bytes: u32,
}

impl FrameCodec {
    #[must_use]
    pub fn new(max_message_bytes: u32) -> Self {
        FrameCodec { max_message_bytes }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, LinkError> {
        loop {
            // Scan for the two-byte sync word; discard any garbage before it
            // (spec §4.1 "resynchronises by discarding bytes until sync is
            // rediscovered"). This also fires on a genuinely truncated
            // trailing byte, which we simply wait on (return Ok(None)).
            let Some(sync_pos) = find_sync(src) else {
                // Keep the final byte in case it is the first half of a
                // split sync word that will complete on the next read.
                if src.len() > 1 {
                    src.advance(src.len() - 1);
                }
                return Ok(None);
            };
            if sync_pos > 0 {
                src.advance(sync_pos);
            }
            if src.len() < HEADER_LEN {
                return Ok(None);
            }
            let mut header_buf = [0u8; HEADER_LEN];
            header_buf.copy_from_slice(&src[..HEADER_LEN]);
            match FrameHeader::decode(&header_buf) {
                Ok(header) => {
                    if header.length as usize > self.max_message_bytes as usize {
                        // Oversize closes the session (spec §4.1, §7); drop
                        // the bytes we inspected so the caller's error is
                        // final rather than repeating forever.
                        src.advance(HEADER_LEN);
                        return Err(LinkError::Oversize(header.length, self.max_message_bytes));
                    }
                    let total = header.length as usize;
                    if total < HEADER_LEN {
                        return Err(LinkError::Protocol(ProtocolError::Truncated));
                    }
                    if src.len() < total {
                        src.reserve(total - src.len());
                        return Ok(None);
                    }
                    let mut full = src.split_to(total);
                    let payload = full.split_off(HEADER_LEN).to_vec();
                    return Ok(Some(Frame { header, payload }));
                }
                Err(ProtocolError::BadChecksum) => {
                    // The sync word matched by coincidence; skip past it and
                    // keep scanning rather than discarding the whole window.
                    src.advance(2);
                    continue;
                }
                Err(e) => return Err(LinkError::Protocol(e)),
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = LinkError;

    fn encode(&mut self, frame: Frame, dst: &mut bytes::BytesMut) -> Result<(), LinkError> {
        let mut header_buf = [0u8; HEADER_LEN];
        frame.header.encode(&mut header_buf);
        dst.extend_from_slice(&header_buf);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// Locate the next occurrence of the sync word in `buf`, if any.
fn find_sync(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    let sync = overlay_protocol::SYNC_WORD.to_be_bytes();
    buf.windows(2).position(|w| w == sync)
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_protocol::{MessageType, Priority};

    fn encode_one(frame: &Frame) -> BytesMut {
        let mut codec = FrameCodec::new(1 << 20);
        let mut dst = BytesMut::new();
        codec.encode(frame.clone(), &mut dst).unwrap();
        dst
    }

    #[test]
    fn round_trips_a_single_frame() {
        let frame = Frame::new(MessageType::Heartbeat, Priority::MedHigh, vec![1, 2, 3]);
        let mut buf = encode_one(&frame);
        let mut codec = FrameCodec::new(1 << 20);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn resyncs_past_garbage_prefix() {
        let frame = Frame::new(MessageType::Heartbeat, Priority::Low, vec![9]);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"garbage-bytes-before-sync");
        buf.extend_from_slice(&encode_one(&frame));
        let mut codec = FrameCodec::new(1 << 20);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn corrupted_frame_resyncs_onto_the_next_valid_one() {
        let good = Frame::new(MessageType::E2eMessage, Priority::High, vec![7, 7]);
        let mut corrupt = encode_one(&good);
        corrupt[5] ^= 0xff; // corrupt a length byte, breaking the checksum
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&corrupt);
        buf.extend_from_slice(&encode_one(&good));

        let mut codec = FrameCodec::new(1 << 20);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, good);
    }

    #[test]
    fn incomplete_frame_waits_for_more_bytes() {
        let frame = Frame::new(MessageType::Heartbeat, Priority::Med, vec![1, 2, 3, 4]);
        let encoded = encode_one(&frame);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..encoded.len() - 1]);
        let mut codec = FrameCodec::new(1 << 20);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&encoded[encoded.len() - 1..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let frame = Frame::new(MessageType::Heartbeat, Priority::Low, vec![0; 100]);
        let mut buf = encode_one(&frame);
        let mut codec = FrameCodec::new(50);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(LinkError::Oversize(_, 50))
        ));
    }
}
