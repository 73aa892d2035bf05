use crate::error::ProtocolError;
use crate::uid::Uid;

/// Fixed-width header following the frame envelope for e2e / multicast /
/// multicast-ack / service-lookup / service-activate messages (spec §6).
pub const E2E_HEADER_LEN: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E2eHeader {
    pub source_uid: Uid,
    pub dest_uid: Uid,
    pub source_port: u16,
    pub dest_port: u16,
    pub sequence: u8,
    pub reserved: u8,
}

impl E2eHeader {
    pub fn encode(&self, out: &mut [u8; E2E_HEADER_LEN]) {
        out[0..8].copy_from_slice(self.source_uid.as_bytes());
        out[8..16].copy_from_slice(self.dest_uid.as_bytes());
        out[16..18].copy_from_slice(&self.source_port.to_be_bytes());
        out[18..20].copy_from_slice(&self.dest_port.to_be_bytes());
        out[20] = self.sequence;
        out[21] = self.reserved;
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < E2E_HEADER_LEN {
            return Err(ProtocolError::Truncated);
        }
        let mut source_uid = [0u8; 8];
        source_uid.copy_from_slice(&buf[0..8]);
        let mut dest_uid = [0u8; 8];
        dest_uid.copy_from_slice(&buf[8..16]);
        Ok(E2eHeader {
            source_uid: Uid::from_bytes(source_uid),
            dest_uid: Uid::from_bytes(dest_uid),
            source_port: u16::from_be_bytes([buf[16], buf[17]]),
            dest_port: u16::from_be_bytes([buf[18], buf[19]]),
            sequence: buf[20],
            reserved: buf[21],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let header = E2eHeader {
            source_uid: Uid::from_host_instance([1, 2, 3, 4, 5, 6], 2),
            dest_uid: Uid::from_host_instance([9, 8, 7, 6, 5, 4], 3),
            source_port: 5,
            dest_port: 9,
            sequence: 200,
            reserved: 0,
        };
        let mut buf = [0u8; E2E_HEADER_LEN];
        header.encode(&mut buf);
        let decoded = E2eHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }
}
