use overlay_protocol::{ServiceKind, Uid};

/// Index of a connection slot on the Hub side (spec §3 "Connection record").
/// Opaque to this crate beyond being a stable key.
pub type ConnIdx = u32;

/// One service port inside a connected component's directory entry, after
/// `DirMgr` has assigned a stable port number (spec §4.4 "ProcessDE").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub port: u16,
    pub name: Option<String>,
    pub kind: ServiceKind,
    /// Subscription slot index, present only for multicast services.
    pub slot: Option<u32>,
}

/// One component's directory entry as held inside `DirMgr` after processing
/// (spec §3 "Directory entry", §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub uid: Uid,
    pub app_name: String,
    pub component_type: String,
    pub services: Vec<ServiceRecord>,
    pub raw: Vec<u8>,
}

/// A cached successful lookup, supplied back on a refresh call so
/// `find_service` can fast-path instead of doing a full linear scan (spec
/// §4.4 "FindService").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLookup {
    pub connection: ConnIdx,
    pub port: u16,
    pub sequence_id: u32,
    pub uid: Uid,
    pub name: String,
}

/// A service-lookup request (spec §4.4, §6).
#[derive(Debug, Clone)]
pub struct LookupQuery {
    pub service_path: String,
    pub kind: ServiceKind,
    pub refresh: Option<CachedLookup>,
    /// `true` for a lookup-remove request (spec §4.4 "removes the requester
    /// from any matching slot without returning a resolution").
    pub remove: bool,
}

/// Outcome of `find_service` (spec §6 "Service-lookup record").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Success {
        uid: Uid,
        connection: ConnIdx,
        remote_port: u16,
        sequence_id: u32,
    },
    Fail,
    /// The request was a lookup-remove; no resolution is returned.
    Removed,
}

/// Result of `process_de` (spec §4.4 "if anything changed, emit a
/// directory-change event").
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessDeOutcome {
    pub changed: bool,
    /// `(original_local_port, allocated_slot)` pairs for every directly
    /// connected (non-tunnel) multicast service that was freshly built this
    /// round. The Hub uses these to tell the publishing endpoint which slot
    /// index to stamp as its own envelope source port going forward (spec
    /// §3 "Endpoint service record... activation state"), since the Hub's
    /// globally-allocated slot number is independent of the port the
    /// endpoint assigned itself.
    pub activations: Vec<(u16, u32)>,
}
