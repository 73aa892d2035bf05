use std::time::Instant;

use overlay_protocol::Uid;

/// The subscription-slot operations `DirMgr` needs from `MCastMgr`, kept as
/// a trait so this crate does not depend on `overlay-mcast` directly — the
/// two components share no lock (spec §5 "no component takes two locks at
/// once"); the Hub wires a concrete `MCastMgr` in behind this trait.
pub trait SlotAllocator {
    /// Allocate a subscription slot for a newly-advertised multicast
    /// service; returns the slot index used as the service's port.
    /// `local_source` is `true` when the owning component is a
    /// directly-connected endpoint rather than a tunnel-reflected one (spec
    /// §4.5 "Background" refresh loop).
    fn alloc_slot(
        &self,
        source_uid: Uid,
        prev_hop_uid: Uid,
        path: &str,
        local_source: bool,
        now: Instant,
    ) -> Option<u32>;

    /// Free a slot because its owning service disappeared from the
    /// directory (spec §4.4 "tear the old record down").
    fn free_slot(&self, slot: u32);

    /// Register (or refresh) `subscriber_uid`/`local_port` as a subscriber
    /// of `slot`, following a successful multicast lookup.
    fn add_subscriber(&self, slot: u32, subscriber_uid: Uid, local_port: u16, now: Instant);

    /// Remove every registration of `subscriber_uid` regardless of port
    /// (spec §4.5, used on link close and lookup-remove).
    fn remove_subscriber_everywhere(&self, subscriber_uid: Uid);
}
