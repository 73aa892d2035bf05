use crate::error::ProtocolError;
use crate::uid::Uid;

/// Payload carried by every `heartbeat` message (spec §4.6): identifies the
/// sender (stream sockets carry no identity of their own) and, every tenth
/// heartbeat, appends the sender's full directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub uid: Uid,
    /// `true` when the sender's component-type is `Hub`, used by the
    /// receiving Hub to validate an inbound tunnel connection.
    pub is_hub: bool,
    /// Empty when this heartbeat carries no directory update.
    pub directory: Vec<u8>,
}

const FIXED_LEN: usize = 8 + 1;

impl HeartbeatPayload {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_LEN + self.directory.len());
        out.extend_from_slice(self.uid.as_bytes());
        out.push(u8::from(self.is_hub));
        out.extend_from_slice(&self.directory);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < FIXED_LEN {
            return Err(ProtocolError::Truncated);
        }
        let mut uid_bytes = [0u8; 8];
        uid_bytes.copy_from_slice(&buf[0..8]);
        Ok(HeartbeatPayload {
            uid: Uid::from_bytes(uid_bytes),
            is_hub: buf[8] != 0,
            directory: buf[FIXED_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_a_directory() {
        let hb = HeartbeatPayload {
            uid: Uid::from_host_instance([1, 2, 3, 4, 5, 6], 2),
            is_hub: false,
            directory: Vec::new(),
        };
        assert_eq!(HeartbeatPayload::decode(&hb.encode()).unwrap(), hb);
    }

    #[test]
    fn round_trips_with_a_directory() {
        let hb = HeartbeatPayload {
            uid: Uid::from_host_instance([1, 2, 3, 4, 5, 6], 0),
            is_hub: true,
            directory: b"<c><u>x</u></c>\0".to_vec(),
        };
        assert_eq!(HeartbeatPayload::decode(&hb.encode()).unwrap(), hb);
    }

    #[test]
    fn rejects_truncated_payload() {
        assert_eq!(HeartbeatPayload::decode(&[1, 2, 3]), Err(ProtocolError::Truncated));
    }
}
