use std::sync::Arc;
use std::time::Instant;

use overlay_directory::SlotAllocator;
use overlay_mcast::McastMgr;
use overlay_protocol::Uid;

/// Wires `DirMgr`'s `SlotAllocator` trait to a real `McastMgr` (spec §4.4,
/// §4.5 — kept as two crates with no dependency between them, joined here
/// where the Hub owns both).
pub struct McastSlotAdapter(pub Arc<McastMgr>);

impl SlotAllocator for McastSlotAdapter {
    fn alloc_slot(
        &self,
        source_uid: Uid,
        prev_hop_uid: Uid,
        path: &str,
        local_source: bool,
        now: Instant,
    ) -> Option<u32> {
        self.0
            .alloc_slot(source_uid, prev_hop_uid, path, local_source, now)
            .inspect_err(|e| tracing::warn!(error = %e, path, "multicast slot allocation failed"))
            .ok()
    }

    fn free_slot(&self, slot: u32) {
        self.0.free_slot(slot);
    }

    fn add_subscriber(&self, slot: u32, subscriber_uid: Uid, local_port: u16, now: Instant) {
        if let Err(e) = self.0.add_subscriber(slot, subscriber_uid, local_port, now) {
            tracing::warn!(error = %e, slot, "add_subscriber failed");
        }
    }

    fn remove_subscriber_everywhere(&self, subscriber_uid: Uid) {
        self.0.remove_subscriber(subscriber_uid, None);
    }
}
