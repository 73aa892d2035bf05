//! Per-port service table and remote-service lookup state machine (spec
//! §4.7 "Service API" and "Remote-service lookup state machine"). Owned by
//! the uplink actor behind a single mutex (spec §5: "a service-table mutex
//! protects the per-port records").

use std::time::Instant;

use overlay_protocol::{
    ComponentDe, LookupResponse, ServiceKind, ServiceSlot, Uid, MAX_CLOSING_RETRIES, MAX_SERVICE_PATH_LEN,
    MCAST_FORCE_UNSTICK_MS, MCAST_WINDOW,
};

use crate::config::ServiceLocality;
use crate::error::EndpointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    Look,
    Looking,
    Registered,
    Remove,
    Removing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub uid: Uid,
    pub port: u16,
    pub sequence_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOp {
    Request,
    Remove,
}

#[derive(Debug, Clone)]
pub struct LookupAction {
    pub port: u16,
    pub path: String,
    pub kind: ServiceKind,
    pub op: LookupOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Freed,
    Deferred,
}

/// What `record_send` decided to stamp on the outgoing envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStamp {
    pub source_port: u16,
    pub seq: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct ServiceRecord {
    path: String,
    kind: ServiceKind,
    locality: ServiceLocality,
    enabled: bool,
    state: LookupState,
    resolved: Option<ResolvedTarget>,
    last_action_at: Instant,
    closing_retries: u32,
    send_seq: u8,
    recv_seq: Option<u8>,
    outstanding: u8,
    last_send_at: Option<Instant>,
    /// Local multicast only: the Hub-assigned subscription slot index this
    /// service must stamp as its own envelope source port, and whether the
    /// Hub has announced it yet (spec §3 "Endpoint service record... for
    /// local multicast — last subscriber refresh time and activation
    /// state"). Port 0 is not a valid slot until announced, so sends are
    /// withheld until `active` is set.
    slot_port: Option<u16>,
    active: bool,
}

impl ServiceRecord {
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    #[must_use]
    pub fn locality(&self) -> ServiceLocality {
        self.locality
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn state(&self) -> LookupState {
        self.state
    }

    #[must_use]
    pub fn resolved(&self) -> Option<ResolvedTarget> {
        self.resolved
    }

    /// The port this service stamps as its own envelope source port: the
    /// Hub-announced slot index once activated for a local multicast
    /// service, otherwise the locally-assigned port itself.
    #[must_use]
    pub fn transmit_port(&self, own_port: u16) -> u16 {
        self.slot_port.unwrap_or(own_port)
    }

    #[must_use]
    pub fn active(&self) -> bool {
        self.active
    }
}

pub struct ServiceTable {
    slots: Vec<Option<ServiceRecord>>,
    link_up: bool,
}

impl Default for ServiceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceTable {
    #[must_use]
    pub fn new() -> Self {
        ServiceTable {
            slots: Vec::new(),
            link_up: false,
        }
    }

    pub fn set_link_up(&mut self, up: bool) {
        self.link_up = up;
    }

    /// Spec §4.7 failure semantics: a timed-out link tears down every
    /// service (locals become inactive, remotes return to Look) without
    /// losing service records.
    pub fn on_link_down(&mut self) {
        self.link_up = false;
        for slot in self.slots.iter_mut().flatten() {
            slot.outstanding = 0;
            slot.last_send_at = None;
            if slot.locality == ServiceLocality::Remote {
                slot.state = LookupState::Look;
                slot.resolved = None;
                slot.closing_retries = 0;
            } else if slot.kind == ServiceKind::Multicast {
                // The Hub will allocate a fresh slot once the DE is
                // re-advertised on reconnect; the old slot index is stale.
                slot.slot_port = None;
                slot.active = false;
            }
        }
    }

    pub fn add_service(
        &mut self,
        path: String,
        kind: ServiceKind,
        locality: ServiceLocality,
        enabled: bool,
        now: Instant,
    ) -> Result<u16, EndpointError> {
        if path.len() > MAX_SERVICE_PATH_LEN {
            return Err(EndpointError::Service("service path exceeds MAX_SERVICE_PATH_LEN".to_owned()));
        }
        let record = ServiceRecord {
            path,
            kind,
            locality,
            enabled,
            state: LookupState::Look,
            resolved: None,
            last_action_at: now,
            closing_retries: 0,
            send_seq: 0,
            recv_seq: None,
            outstanding: 0,
            last_send_at: None,
            slot_port: None,
            active: locality != ServiceLocality::Local || kind != ServiceKind::Multicast,
        };
        if let Some((idx, slot)) = self.slots.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            *slot = Some(record);
            return Ok(idx as u16);
        }
        let port = u16::try_from(self.slots.len()).map_err(|_| EndpointError::Service("service table full".to_owned()))?;
        self.slots.push(Some(record));
        Ok(port)
    }

    #[must_use]
    pub fn get(&self, port: u16) -> Option<&ServiceRecord> {
        self.slots.get(port as usize).and_then(|s| s.as_ref())
    }

    fn get_mut(&mut self, port: u16) -> Result<&mut ServiceRecord, EndpointError> {
        self.slots
            .get_mut(port as usize)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| EndpointError::Service(format!("port {port} not in use")))
    }

    pub fn enable(&mut self, port: u16, now: Instant) -> Result<(), EndpointError> {
        let record = self.get_mut(port)?;
        let was_disabled = !record.enabled;
        record.enabled = true;
        if was_disabled && record.locality == ServiceLocality::Remote && record.resolved.is_none() {
            record.state = LookupState::Look;
            record.last_action_at = now;
        }
        Ok(())
    }

    pub fn disable(&mut self, port: u16) -> Result<(), EndpointError> {
        self.get_mut(port)?.enabled = false;
        Ok(())
    }

    pub fn remove(&mut self, port: u16, now: Instant) -> Result<RemoveOutcome, EndpointError> {
        let record = self.get_mut(port)?;
        if record.locality == ServiceLocality::Local || record.state == LookupState::Look {
            self.slots[port as usize] = None;
            return Ok(RemoveOutcome::Freed);
        }
        record.state = LookupState::Remove;
        record.closing_retries = 0;
        record.last_action_at = now;
        Ok(RemoveOutcome::Deferred)
    }

    /// Spec §4.7 "ClearToSend": local multicast, Active, true iff within the
    /// send window or the last-send timeout has expired.
    pub fn clear_to_send(&mut self, port: u16, now: Instant) -> bool {
        let Some(record) = self.slots.get(port as usize).and_then(|s| s.as_ref()) else {
            return false;
        };
        if record.locality != ServiceLocality::Local
            || record.kind != ServiceKind::Multicast
            || !record.enabled
            || !self.link_up
            || !record.active
        {
            return false;
        }
        if record.outstanding < MCAST_WINDOW {
            return true;
        }
        match record.last_send_at {
            Some(last) => now.duration_since(last).as_millis() >= u128::from(MCAST_FORCE_UNSTICK_MS),
            None => true,
        }
    }

    /// Records a send on `port`. Returns the envelope source port to stamp
    /// (the Hub-announced slot for an active local multicast service,
    /// otherwise `port` itself) and the stamped sequence number for
    /// multicast services (E2E services carry no sequence).
    pub fn record_send(&mut self, port: u16, now: Instant) -> Result<SendStamp, EndpointError> {
        let record = self.get_mut(port)?;
        record.last_send_at = Some(now);
        let source_port = record.transmit_port(port);
        if record.kind == ServiceKind::Multicast && record.locality == ServiceLocality::Local {
            let seq = record.send_seq;
            record.send_seq = record.send_seq.wrapping_add(1);
            record.outstanding = record.outstanding.saturating_add(1);
            Ok(SendStamp { source_port, seq: Some(seq) })
        } else {
            Ok(SendStamp { source_port, seq: None })
        }
    }

    /// Apply a Hub-announced slot activation for a local multicast service
    /// (spec §3 "activation state"). No-op if `port` is not a local
    /// multicast service, so a stray or stale activation cannot corrupt an
    /// unrelated record.
    pub fn activate_local_multicast(&mut self, port: u16, slot: u16) {
        if let Some(record) = self.slots.get_mut(port as usize).and_then(|s| s.as_mut()) {
            if record.locality == ServiceLocality::Local && record.kind == ServiceKind::Multicast {
                record.slot_port = Some(slot);
                record.active = true;
            }
        }
    }

    pub fn record_ack(&mut self, port: u16) {
        if let Ok(record) = self.get_mut(port) {
            record.outstanding = record.outstanding.saturating_sub(1);
        }
    }

    /// True if `seq` has not been seen before on this remote multicast
    /// subscription. Duplicates are still delivered by the caller; this only
    /// drives the "seen before" log line (spec §4.7 failure semantics).
    pub fn note_multicast_recv(&mut self, port: u16, seq: u8) -> bool {
        let Ok(record) = self.get_mut(port) else {
            return true;
        };
        let is_new = record.recv_seq != Some(seq);
        record.recv_seq = Some(seq);
        is_new
    }

    /// Build this endpoint's own directory entry: one slot per service
    /// port, `NoService` holes for removed/unused ports so port numbers
    /// stay stable across re-advertisements (spec §3 "Directory entry").
    /// Both local and remote services are advertised — a remote service's
    /// presence tells peers nothing about routing, but matches the
    /// original format where every registered port occupies a slot.
    #[must_use]
    pub fn build_de(&self, uid: Uid, app_name: &str, component_type: &str) -> ComponentDe {
        let services = self
            .slots
            .iter()
            .map(|slot| match slot {
                None => ServiceSlot::NoService,
                Some(record) if record.kind == ServiceKind::Multicast => ServiceSlot::Multicast(record.path.clone()),
                Some(record) if record.kind == ServiceKind::E2e => ServiceSlot::E2e(record.path.clone()),
                Some(_) => ServiceSlot::NoService,
            })
            .collect();
        ComponentDe {
            uid,
            app_name: app_name.to_owned(),
            component_type: component_type.to_owned(),
            services,
            raw: Vec::new(),
        }
    }

    /// Drive every remote service's lookup state machine one tick forward,
    /// returning the lookup requests/removals that need to go out on the
    /// wire (spec §4.7 "Remote-service lookup state machine").
    pub fn tick(&mut self, now: Instant, lookup_interval_ms: u64, refresh_interval_ms: u64, refresh_timeout_ms: u64) -> Vec<LookupAction> {
        let mut actions = Vec::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let Some(record) = slot else { continue };
            if record.locality != ServiceLocality::Remote {
                continue;
            }
            let port = idx as u16;
            let elapsed_ms = now.duration_since(record.last_action_at).as_millis() as u64;
            match record.state {
                LookupState::Look => {
                    if !record.enabled {
                        continue;
                    }
                    record.resolved = None;
                    actions.push(LookupAction {
                        port,
                        path: record.path.clone(),
                        kind: record.kind,
                        op: LookupOp::Request,
                    });
                    record.state = LookupState::Looking;
                    record.last_action_at = now;
                }
                LookupState::Looking => {
                    if elapsed_ms >= lookup_interval_ms {
                        actions.push(LookupAction {
                            port,
                            path: record.path.clone(),
                            kind: record.kind,
                            op: LookupOp::Request,
                        });
                        record.last_action_at = now;
                    }
                }
                LookupState::Registered => {
                    if elapsed_ms >= refresh_timeout_ms {
                        record.state = LookupState::Look;
                        record.resolved = None;
                        record.last_action_at = now;
                    } else if elapsed_ms >= refresh_interval_ms {
                        actions.push(LookupAction {
                            port,
                            path: record.path.clone(),
                            kind: record.kind,
                            op: LookupOp::Request,
                        });
                    }
                }
                LookupState::Remove => {
                    actions.push(LookupAction {
                        port,
                        path: record.path.clone(),
                        kind: record.kind,
                        op: LookupOp::Remove,
                    });
                    record.state = LookupState::Removing;
                    record.closing_retries = 0;
                    record.last_action_at = now;
                }
                LookupState::Removing => {
                    if elapsed_ms >= refresh_timeout_ms {
                        if record.closing_retries >= MAX_CLOSING_RETRIES {
                            record.enabled = false;
                        } else {
                            record.closing_retries += 1;
                            actions.push(LookupAction {
                                port,
                                path: record.path.clone(),
                                kind: record.kind,
                                op: LookupOp::Remove,
                            });
                            record.last_action_at = now;
                        }
                    }
                }
            }
        }
        actions
    }

    /// Apply a service-lookup-response to the port it was addressed to
    /// (spec §6: the record's `local_port` field is the requester's port).
    pub fn handle_lookup_reply(&mut self, local_port: u16, response: LookupResponse, target: Option<ResolvedTarget>, now: Instant) {
        let Some(record) = self.slots.get_mut(local_port as usize).and_then(|s| s.as_mut()) else {
            return;
        };
        if record.locality != ServiceLocality::Remote {
            return;
        }
        match (record.state, response) {
            (LookupState::Looking, LookupResponse::Succeed) => {
                record.resolved = target;
                record.state = LookupState::Registered;
                record.last_action_at = now;
            }
            (LookupState::Looking, LookupResponse::Fail) => {}
            (LookupState::Registered, LookupResponse::Fail) => {
                record.state = LookupState::Look;
                record.resolved = None;
                record.last_action_at = now;
            }
            (LookupState::Registered, LookupResponse::Succeed) => {
                if record.resolved != target {
                    record.resolved = target;
                }
                record.last_action_at = now;
            }
            (LookupState::Removing, LookupResponse::Remove) => {
                self.slots[local_port as usize] = None;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_enable_local_multicast() {
        let mut table = ServiceTable::new();
        table.set_link_up(true);
        let now = Instant::now();
        let port = table
            .add_service("region/app/video".to_owned(), ServiceKind::Multicast, ServiceLocality::Local, true, now)
            .unwrap();
        assert!(!table.clear_to_send(port, now), "withheld until the Hub announces a slot");
        table.activate_local_multicast(port, 7);
        assert!(table.clear_to_send(port, now));
    }

    #[test]
    fn window_stalls_after_mcast_window_unacked_sends() {
        let mut table = ServiceTable::new();
        table.set_link_up(true);
        let now = Instant::now();
        let port = table
            .add_service("region/app/video".to_owned(), ServiceKind::Multicast, ServiceLocality::Local, true, now)
            .unwrap();
        table.activate_local_multicast(port, 7);
        for _ in 0..MCAST_WINDOW {
            assert!(table.clear_to_send(port, now));
            table.record_send(port, now).unwrap();
        }
        assert!(!table.clear_to_send(port, now));
        table.record_ack(port);
        assert!(table.clear_to_send(port, now));
    }

    #[test]
    fn remote_lookup_progresses_look_to_registered() {
        let mut table = ServiceTable::new();
        let now = Instant::now();
        let port = table
            .add_service("region/app/ctrl".to_owned(), ServiceKind::E2e, ServiceLocality::Remote, true, now)
            .unwrap();
        let actions = table.tick(now, 2_000, 5_000, 15_000);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].op, LookupOp::Request);
        assert_eq!(table.get(port).unwrap().state(), LookupState::Looking);

        let target = ResolvedTarget {
            uid: Uid::from_host_instance([1, 2, 3, 4, 5, 6], 2),
            port: 9,
            sequence_id: 1,
        };
        table.handle_lookup_reply(port, LookupResponse::Succeed, Some(target), now);
        assert_eq!(table.get(port).unwrap().state(), LookupState::Registered);
        assert_eq!(table.get(port).unwrap().resolved(), Some(target));
    }

    #[test]
    fn link_down_reverts_remote_services_to_look() {
        let mut table = ServiceTable::new();
        let now = Instant::now();
        let port = table
            .add_service("region/app/ctrl".to_owned(), ServiceKind::E2e, ServiceLocality::Remote, true, now)
            .unwrap();
        table.tick(now, 2_000, 5_000, 15_000);
        table.handle_lookup_reply(
            port,
            LookupResponse::Succeed,
            Some(ResolvedTarget {
                uid: Uid::from_host_instance([1, 2, 3, 4, 5, 6], 2),
                port: 9,
                sequence_id: 1,
            }),
            now,
        );
        table.on_link_down();
        assert_eq!(table.get(port).unwrap().state(), LookupState::Look);
        assert_eq!(table.get(port).unwrap().resolved(), None);
    }
}
