use crate::constants::MAX_SERVICE_PATH_LEN;
use crate::error::ProtocolError;
use crate::uid::Uid;

/// A service's kind: fan-out-with-ack, or point-to-point (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceKind {
    None = 0,
    Multicast = 1,
    E2e = 2,
}

impl ServiceKind {
    pub fn from_u8(v: u8) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(ServiceKind::None),
            1 => Ok(ServiceKind::Multicast),
            2 => Ok(ServiceKind::E2e),
            _ => Err(ProtocolError::BadLookupRecord("unknown service kind")),
        }
    }
}

/// Outcome carried in a service-lookup-response record (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LookupResponse {
    Fail = 0,
    Succeed = 1,
    Remove = 2,
}

impl LookupResponse {
    pub fn from_u8(v: u8) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(LookupResponse::Fail),
            1 => Ok(LookupResponse::Succeed),
            2 => Ok(LookupResponse::Remove),
            _ => Err(ProtocolError::BadLookupRecord("unknown lookup response")),
        }
    }
}

/// Fixed-width record appended after the e2e header on lookup request/response
/// messages (spec §6). `service_path` is NUL-terminated within its 256-byte
/// field.
pub const LOOKUP_RECORD_LEN: usize = 256 + 1 + 1 + 8 + 2 + 4 + 2 + 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLookupRecord {
    pub service_path: String,
    pub kind: ServiceKind,
    pub response: LookupResponse,
    pub lookup_uid: Uid,
    pub component_index: u16,
    pub sequence_id: u32,
    pub local_port: u16,
    pub remote_port: u16,
}

impl ServiceLookupRecord {
    pub fn encode(&self, out: &mut [u8; LOOKUP_RECORD_LEN]) -> Result<(), ProtocolError> {
        let path_bytes = self.service_path.as_bytes();
        if path_bytes.len() > MAX_SERVICE_PATH_LEN {
            return Err(ProtocolError::BadLookupRecord("service path too long"));
        }
        out[..256].fill(0);
        out[..path_bytes.len()].copy_from_slice(path_bytes);
        out[256] = self.kind as u8;
        out[257] = self.response as u8;
        out[258..266].copy_from_slice(self.lookup_uid.as_bytes());
        out[266..268].copy_from_slice(&self.component_index.to_be_bytes());
        out[268..272].copy_from_slice(&self.sequence_id.to_be_bytes());
        out[272..274].copy_from_slice(&self.local_port.to_be_bytes());
        out[274..276].copy_from_slice(&self.remote_port.to_be_bytes());
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < LOOKUP_RECORD_LEN {
            return Err(ProtocolError::Truncated);
        }
        let nul = buf[..256].iter().position(|&b| b == 0).unwrap_or(256);
        let service_path = std::str::from_utf8(&buf[..nul])
            .map_err(|_| ProtocolError::BadLookupRecord("service path not UTF-8"))?
            .to_owned();
        let mut lookup_uid = [0u8; 8];
        lookup_uid.copy_from_slice(&buf[258..266]);
        Ok(ServiceLookupRecord {
            service_path,
            kind: ServiceKind::from_u8(buf[256])?,
            response: LookupResponse::from_u8(buf[257])?,
            lookup_uid: Uid::from_bytes(lookup_uid),
            component_index: u16::from_be_bytes([buf[266], buf[267]]),
            sequence_id: u32::from_be_bytes([buf[268], buf[269], buf[270], buf[271]]),
            local_port: u16::from_be_bytes([buf[272], buf[273]]),
            remote_port: u16::from_be_bytes([buf[274], buf[275]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let record = ServiceLookupRecord {
            service_path: "region/app/service".to_owned(),
            kind: ServiceKind::Multicast,
            response: LookupResponse::Succeed,
            lookup_uid: Uid::from_host_instance([1, 2, 3, 4, 5, 6], 3),
            component_index: 4,
            sequence_id: 99,
            local_port: 1,
            remote_port: 2,
        };
        let mut buf = [0u8; LOOKUP_RECORD_LEN];
        record.encode(&mut buf).unwrap();
        let decoded = ServiceLookupRecord::decode(&buf).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn rejects_oversize_path() {
        let record = ServiceLookupRecord {
            service_path: "x".repeat(300),
            kind: ServiceKind::E2e,
            response: LookupResponse::Fail,
            lookup_uid: Uid::ZERO,
            component_index: 0,
            sequence_id: 0,
            local_port: 0,
            remote_port: 0,
        };
        let mut buf = [0u8; LOOKUP_RECORD_LEN];
        assert!(record.encode(&mut buf).is_err());
    }
}
