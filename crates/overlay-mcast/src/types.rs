use std::time::Instant;

use overlay_protocol::Uid;

/// One subscriber of a multicast slot (spec §3 "Subscription slot").
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub uid: Uid,
    pub local_port: u16,
    pub send_seq: u8,
    pub last_ack_seq: u8,
    pub last_send_time: Instant,
}

impl Subscriber {
    pub(crate) fn new(uid: Uid, local_port: u16, now: Instant) -> Self {
        Subscriber {
            uid,
            local_port,
            send_seq: 0,
            last_ack_seq: 0,
            last_send_time: now,
        }
    }
}

/// One allocated multicast subscription slot (spec §3, §4.5).
#[derive(Debug, Clone)]
pub struct Slot {
    pub source_uid: Uid,
    pub prev_hop_uid: Uid,
    pub path: String,
    /// `true` when `source_uid` is a directly-connected endpoint of this
    /// Hub rather than a tunnel-reflected component (spec §4.5 "Background"
    /// refresh loop: "every valid slot not sourced locally").
    pub local_source: bool,
    pub subscribers: Vec<Subscriber>,
    pub last_lookup_refresh: Instant,
}

/// One outgoing multicast frame produced by `forward_multicast`, addressed
/// to a single subscriber (spec §4.5 "ForwardMulticast" step 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMulticast {
    pub dest_uid: Uid,
    pub dest_port: u16,
    pub source_uid: Uid,
    pub source_port: u16,
    pub sequence: u8,
    pub payload: Vec<u8>,
}

/// Result of `forward_multicast`: the per-subscriber frames to send, plus at
/// most one ack back to the previous hop (spec §4.5 step 4).
#[derive(Debug, Clone, Default)]
pub struct ForwardResult {
    pub frames: Vec<OutgoingMulticast>,
    pub ack_to: Option<Uid>,
}

/// A refresh action the Hub should take on behalf of a tunnel-reflected slot
/// (spec §4.5 "Background").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshAction {
    pub slot: u32,
    pub prev_hop_uid: Uid,
    pub path: String,
    /// `true` if the previous hop is a real endpoint (send service-activate)
    /// rather than another Hub (send a lookup request).
    pub prev_hop_is_endpoint: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum McastError {
    #[error("no free subscription slot")]
    Full,
    #[error("slot {0} is not in use")]
    InvalidSlot(u32),
    #[error("frame source UID does not match the slot's source UID")]
    SourceMismatch,
    #[error("multicast payload shorter than the minimum frame length")]
    TooShort,
    #[error("ack does not match any registered subscriber")]
    UnknownSubscriber,
}
