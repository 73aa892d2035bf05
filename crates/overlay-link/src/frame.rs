use overlay_protocol::{FrameHeader, MessageType, Priority, HEADER_LEN};

/// One decoded message: its header plus the payload bytes that followed it
/// (everything after the 12-byte header, up to `header.length`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(cmd: MessageType, priority: Priority, payload: Vec<u8>) -> Self {
        let length = (HEADER_LEN + payload.len()) as u32;
        Frame {
            header: FrameHeader {
                cmd,
                length,
                priority,
            },
            payload,
        }
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.header.priority
    }
}
