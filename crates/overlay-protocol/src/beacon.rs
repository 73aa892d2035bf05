use crate::error::ProtocolError;
use crate::uid::Uid;

/// Four-byte sync prefix distinguishing beacon datagrams from stray UDP
/// traffic on the beacon port (spec §6 "Hello beacon (UDP)").
pub const BEACON_SYNC: [u8; 4] = *b"SNCB";

const APP_NAME_LEN: usize = 64;
const COMPONENT_TYPE_LEN: usize = 32;

/// Fixed-width UDP presence datagram (spec §4.2, §6).
pub const BEACON_LEN: usize = 4 + 4 + 8 + APP_NAME_LEN + COMPONENT_TYPE_LEN + 1 + 1 + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloBeacon {
    pub address: [u8; 4],
    pub uid: Uid,
    pub app_name: String,
    pub component_type: String,
    /// Non-zero only when the sender is a Hub (spec §4.2).
    pub priority: u8,
    pub heartbeat_interval_ms: u16,
}

impl HelloBeacon {
    pub fn encode(&self) -> Result<[u8; BEACON_LEN], ProtocolError> {
        if self.app_name.len() > APP_NAME_LEN || self.component_type.len() > COMPONENT_TYPE_LEN {
            return Err(ProtocolError::BadBeacon("name field too long"));
        }
        let mut buf = [0u8; BEACON_LEN];
        let mut off = 0;
        buf[off..off + 4].copy_from_slice(&BEACON_SYNC);
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.address);
        off += 4;
        buf[off..off + 8].copy_from_slice(self.uid.as_bytes());
        off += 8;
        buf[off..off + self.app_name.len()].copy_from_slice(self.app_name.as_bytes());
        off += APP_NAME_LEN;
        buf[off..off + self.component_type.len()].copy_from_slice(self.component_type.as_bytes());
        off += COMPONENT_TYPE_LEN;
        buf[off] = self.priority;
        off += 1;
        buf[off] = 0; // reserved
        off += 1;
        buf[off..off + 2].copy_from_slice(&self.heartbeat_interval_ms.to_be_bytes());
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < BEACON_LEN {
            return Err(ProtocolError::Truncated);
        }
        if buf[0..4] != BEACON_SYNC {
            return Err(ProtocolError::BadSync);
        }
        let mut off = 4;
        let mut address = [0u8; 4];
        address.copy_from_slice(&buf[off..off + 4]);
        off += 4;
        let mut uid_bytes = [0u8; 8];
        uid_bytes.copy_from_slice(&buf[off..off + 8]);
        off += 8;
        let app_name = read_nul_padded(&buf[off..off + APP_NAME_LEN])?;
        off += APP_NAME_LEN;
        let component_type = read_nul_padded(&buf[off..off + COMPONENT_TYPE_LEN])?;
        off += COMPONENT_TYPE_LEN;
        let priority = buf[off];
        off += 2; // priority + reserved
        let heartbeat_interval_ms = u16::from_be_bytes([buf[off], buf[off + 1]]);
        Ok(HelloBeacon {
            address,
            uid: Uid::from_bytes(uid_bytes),
            app_name,
            component_type,
            priority,
            heartbeat_interval_ms,
        })
    }
}

fn read_nul_padded(field: &[u8]) -> Result<String, ProtocolError> {
    let nul = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..nul])
        .map(str::to_owned)
        .map_err(|_| ProtocolError::BadBeacon("name field not UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let beacon = HelloBeacon {
            address: [192, 168, 1, 20],
            uid: Uid::from_host_instance([1, 2, 3, 4, 5, 6], 0),
            app_name: "hub-1".to_owned(),
            component_type: "Hub".to_owned(),
            priority: 5,
            heartbeat_interval_ms: 5000,
        };
        let encoded = beacon.encode().unwrap();
        let decoded = HelloBeacon::decode(&encoded).unwrap();
        assert_eq!(decoded, beacon);
    }

    #[test]
    fn rejects_bad_sync() {
        let mut buf = [0u8; BEACON_LEN];
        buf[0..4].copy_from_slice(b"XXXX");
        assert_eq!(HelloBeacon::decode(&buf), Err(ProtocolError::BadSync));
    }

    #[test]
    fn rejects_oversize_name() {
        let beacon = HelloBeacon {
            address: [0, 0, 0, 0],
            uid: Uid::ZERO,
            app_name: "x".repeat(100),
            component_type: "t".to_owned(),
            priority: 0,
            heartbeat_interval_ms: 1,
        };
        assert!(beacon.encode().is_err());
    }
}
