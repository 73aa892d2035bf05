use std::time::{Duration, Instant};

use overlay_protocol::{Uid, DEFAULT_MCAST_SLOT_CAPACITY, MCAST_FORCE_UNSTICK_MS, MCAST_WINDOW};
use parking_lot::Mutex;

use crate::types::{ForwardResult, McastError, OutgoingMulticast, RefreshAction, Slot, Subscriber};

const MIN_MULTICAST_PAYLOAD: usize = 0;
/// Nobody has refreshed a tunnel-reflected slot's lookup in this long: stop
/// keeping the upstream stream alive (spec §4.5 "Background").
const REFRESH_ABANDON_MS: u64 = 30_000;

/// `MCastMgr`: the bounded array of multicast subscription slots, protected
/// by a single mutex (spec §4.5, §5). Forwarding takes the lock for the
/// duration of iterating one slot's subscribers, cloning the payload and
/// assigning per-subscriber sequence numbers while still holding it, exactly
/// as spec §5 requires.
pub struct McastMgr {
    slots: Mutex<Vec<Option<Slot>>>,
}

impl Default for McastMgr {
    fn default() -> Self {
        Self::new(DEFAULT_MCAST_SLOT_CAPACITY)
    }
}

impl McastMgr {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        McastMgr {
            slots: Mutex::new(slots),
        }
    }

    /// First-free scan allocation (spec §4.5 "AllocSlot").
    pub fn alloc_slot(
        &self,
        source_uid: Uid,
        prev_hop_uid: Uid,
        path: &str,
        local_source: bool,
        now: Instant,
    ) -> Result<u32, McastError> {
        let mut slots = self.slots.lock();
        let idx = slots.iter().position(Option::is_none).ok_or(McastError::Full)?;
        slots[idx] = Some(Slot {
            source_uid,
            prev_hop_uid,
            path: path.to_owned(),
            local_source,
            subscribers: Vec::new(),
            last_lookup_refresh: now,
        });
        Ok(idx as u32)
    }

    pub fn free_slot(&self, slot: u32) {
        if let Some(entry) = self.slots.lock().get_mut(slot as usize) {
            *entry = None;
        }
    }

    #[must_use]
    pub fn is_valid(&self, slot: u32) -> bool {
        self.slots
            .lock()
            .get(slot as usize)
            .is_some_and(Option::is_some)
    }

    /// Add or refresh a subscriber's registration (spec §4.4 "FindService"
    /// success path, §4.5).
    pub fn add_subscriber(
        &self,
        slot: u32,
        uid: Uid,
        local_port: u16,
        now: Instant,
    ) -> Result<(), McastError> {
        let mut slots = self.slots.lock();
        let entry = slots
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(McastError::InvalidSlot(slot))?;
        entry.last_lookup_refresh = now;
        if let Some(existing) = entry.subscribers.iter_mut().find(|s| s.uid == uid && s.local_port == local_port) {
            existing.last_send_time = now;
        } else {
            entry.subscribers.push(Subscriber::new(uid, local_port, now));
        }
        Ok(())
    }

    /// Remove a subscriber. `port = None` removes every registration of
    /// `uid` regardless of port (spec §4.5, used on link close).
    pub fn remove_subscriber(&self, uid: Uid, port: Option<u16>) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut().flatten() {
            slot.subscribers
                .retain(|s| !(s.uid == uid && port.is_none_or(|p| p == s.local_port)));
        }
    }

    /// Forward a multicast frame to every eligible subscriber of `slot`,
    /// applying the ack-window flow control (spec §4.5 "ForwardMulticast").
    pub fn forward_multicast(
        &self,
        slot: u32,
        source_uid: Uid,
        payload: &[u8],
        hub_uid: Uid,
        now: Instant,
    ) -> Result<ForwardResult, McastError> {
        if payload.len() < MIN_MULTICAST_PAYLOAD {
            return Err(McastError::TooShort);
        }
        let mut slots = self.slots.lock();
        let entry = slots
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(McastError::InvalidSlot(slot))?;
        if entry.source_uid != source_uid {
            return Err(McastError::SourceMismatch);
        }

        let force_unstick = Duration::from_millis(MCAST_FORCE_UNSTICK_MS);
        let mut frames = Vec::new();
        for sub in &mut entry.subscribers {
            let outstanding = sub.send_seq.wrapping_sub(sub.last_ack_seq);
            if outstanding >= MCAST_WINDOW {
                if now.saturating_duration_since(sub.last_send_time) >= force_unstick {
                    sub.last_ack_seq = sub.send_seq;
                } else {
                    continue;
                }
            }
            let seq = sub.send_seq;
            sub.send_seq = sub.send_seq.wrapping_add(1);
            sub.last_send_time = now;
            frames.push(OutgoingMulticast {
                dest_uid: sub.uid,
                dest_port: sub.local_port,
                source_uid: entry.source_uid,
                source_port: slot as u16,
                sequence: seq,
                payload: payload.to_vec(),
            });
        }

        // No self-acks: if the previous hop is the Hub's own UID, the Hub is
        // itself the upstream subscriber (background refresh proxy) and
        // there is nobody to notify (spec §4.5 step 4).
        let ack_to = (entry.prev_hop_uid != hub_uid).then_some(entry.prev_hop_uid);
        Ok(ForwardResult { frames, ack_to })
    }

    /// Apply an ack: locate the slot and the subscriber, set
    /// `last_ack_seq := frame.seq` (spec §4.5 "ProcessAck").
    pub fn process_ack(
        &self,
        slot: u32,
        subscriber_uid: Uid,
        subscriber_port: u16,
        seq: u8,
    ) -> Result<(), McastError> {
        let mut slots = self.slots.lock();
        let entry = slots
            .get_mut(slot as usize)
            .and_then(Option::as_mut)
            .ok_or(McastError::InvalidSlot(slot))?;
        let sub = entry
            .subscribers
            .iter_mut()
            .find(|s| s.uid == subscriber_uid && s.local_port == subscriber_port)
            .ok_or(McastError::UnknownSubscriber)?;
        sub.last_ack_seq = seq;
        Ok(())
    }

    /// Once-per-second refresh sweep (spec §4.5 "Background"): for every
    /// valid, non-locally-sourced slot with subscribers, either hand back a
    /// refresh action or silently stop (if nobody has refreshed it in too
    /// long).
    #[must_use]
    pub fn background_refresh(&self, now: Instant, prev_hop_is_endpoint: impl Fn(Uid) -> bool) -> Vec<RefreshAction> {
        let slots = self.slots.lock();
        let abandon = Duration::from_millis(REFRESH_ABANDON_MS);
        let mut out = Vec::new();
        for (idx, slot) in slots.iter().enumerate() {
            let Some(slot) = slot else { continue };
            if slot.local_source || slot.subscribers.is_empty() {
                continue;
            }
            if now.saturating_duration_since(slot.last_lookup_refresh) >= abandon {
                continue;
            }
            out.push(RefreshAction {
                slot: idx as u32,
                prev_hop_uid: slot.prev_hop_uid,
                path: slot.path.clone(),
                prev_hop_is_endpoint: prev_hop_is_endpoint(slot.prev_hop_uid),
            });
        }
        out
    }

    #[must_use]
    pub fn subscriber_count(&self, slot: u32) -> usize {
        self.slots
            .lock()
            .get(slot as usize)
            .and_then(Option::as_ref)
            .map_or(0, |s| s.subscribers.len())
    }
}
