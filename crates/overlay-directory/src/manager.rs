use std::collections::HashMap;
use std::time::Instant;

use overlay_protocol::{parse_directory_entries, write_directory_entry, ComponentDe, ServiceKind, ServiceSlot, Uid};
use parking_lot::Mutex;

use crate::slots::SlotAllocator;
use crate::types::{
    CachedLookup, ComponentRecord, ConnIdx, LookupOutcome, LookupQuery, ProcessDeOutcome,
    ServiceRecord,
};

#[derive(Default)]
struct DirMgrState {
    /// Each connection may host more than one component (a tunnel connection
    /// aggregates every component behind the peer Hub) (spec §3, §4.8).
    connections: HashMap<ConnIdx, Vec<ComponentRecord>>,
    /// `true` for connections whose far side is itself another Hub (a
    /// tunnel), used by `build_directory`'s trunk filter (spec §4.4, §4.8)
    /// and to decide `local_source` when registering multicast slots.
    tunnel_connections: HashMap<ConnIdx, bool>,
}

/// `DirMgr`: per-connection directory storage, DE diffing, and service
/// lookup (spec §4.4). One mutex protects the whole connection→component map
/// (spec §5); callers release it before invoking any listener.
pub struct DirMgr {
    state: Mutex<DirMgrState>,
}

impl Default for DirMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl DirMgr {
    #[must_use]
    pub fn new() -> Self {
        DirMgr {
            state: Mutex::new(DirMgrState::default()),
        }
    }

    /// Register a connection's role so `build_directory`'s trunk filter can
    /// exclude tunnel-reflected components (spec §4.4 "BuildDirectory").
    pub fn set_connection_role(&self, conn: ConnIdx, is_tunnel: bool) {
        self.state.lock().tunnel_connections.insert(conn, is_tunnel);
    }

    /// Drop all state for a closed connection, freeing every multicast slot
    /// it held (spec §3 "Lifecycles").
    pub fn remove_connection(&self, conn: ConnIdx, allocator: &dyn SlotAllocator) {
        let removed = {
            let mut state = self.state.lock();
            state.tunnel_connections.remove(&conn);
            state.connections.remove(&conn)
        };
        if let Some(components) = removed {
            for component in components {
                free_component_slots(&component, allocator);
            }
        }
    }

    /// Process a DE arriving on `conn`: a concatenation of zero-terminated
    /// per-component documents (spec §4.4 "ProcessDE").
    pub fn process_de(
        &self,
        conn: ConnIdx,
        raw_de: &[u8],
        allocator: &dyn SlotAllocator,
        now: Instant,
    ) -> Result<ProcessDeOutcome, overlay_protocol::ProtocolError> {
        let parsed = parse_directory_entries(raw_de)?;
        let mut changed = false;
        let mut activations = Vec::new();

        let mut state = self.state.lock();
        let local_source = !*state.tunnel_connections.get(&conn).unwrap_or(&false);
        let existing = state.connections.entry(conn).or_default();
        let mut seen = vec![false; existing.len()];

        let mut rebuilt: Vec<ComponentRecord> = Vec::with_capacity(parsed.len());
        for de in parsed {
            if let Some(idx) = existing
                .iter()
                .position(|c| c.uid == de.uid && c.app_name == de.app_name && c.component_type == de.component_type)
            {
                seen[idx] = true;
                if existing[idx].raw == de.raw {
                    // Byte-identical: no diff (spec §3 invariant, §8
                    // "Directory idempotence"). Slots already allocated
                    // last round are still active; nothing to re-announce.
                    rebuilt.push(existing[idx].clone());
                    continue;
                }
                // Changed: tear down the old record's slots, build fresh.
                free_component_slots(&existing[idx], allocator);
                changed = true;
            } else {
                changed = true;
            }
            let (record, mut new_activations) = build_component_record(de, allocator, local_source, now);
            if local_source {
                activations.append(&mut new_activations);
            }
            rebuilt.push(record);
        }

        // Anything not marked seen vanished from this round's DE.
        for (idx, was_seen) in seen.iter().enumerate() {
            if !was_seen {
                free_component_slots(&existing[idx], allocator);
                changed = true;
            }
        }

        state.connections.insert(conn, rebuilt);
        Ok(ProcessDeOutcome { changed, activations })
    }

    /// Resolve a service-lookup request (spec §4.4 "FindService").
    pub fn find_service(
        &self,
        requester: (Uid, u16),
        query: &LookupQuery,
        allocator: &dyn SlotAllocator,
        now: Instant,
    ) -> LookupOutcome {
        if query.remove {
            allocator.remove_subscriber_everywhere(requester.0);
            return LookupOutcome::Removed;
        }

        // Refresh fast-path: the cached tuple still names a live service.
        if let Some(cached) = &query.refresh {
            let state = self.state.lock();
            if let Some(components) = state.connections.get(&cached.connection) {
                if let Some(hit) = find_matching_service(components, &query.service_path, query.kind) {
                    if hit.0.uid == cached.uid {
                        let conn = cached.connection;
                        drop(state);
                        return resolve(hit, conn, requester, allocator, now);
                    }
                }
            }
        }

        let state = self.state.lock();
        for (conn, components) in &state.connections {
            if let Some(hit) = find_matching_service(components, &query.service_path, query.kind) {
                let conn = *conn;
                drop(state);
                return resolve(hit, conn, requester, allocator, now);
            }
        }
        LookupOutcome::Fail
    }

    /// Build the directory message to send on a connection: every
    /// connection's local-form DE followed by the Hub's own, optionally
    /// trunk-filtered to exclude tunnel-reflected components so loops are
    /// impossible (spec §4.4 "BuildDirectory").
    pub fn build_directory(
        &self,
        trunk: bool,
        hub_de: &ComponentDe,
        exclude_conn: Option<ConnIdx>,
    ) -> Vec<u8> {
        let state = self.state.lock();
        let mut out = Vec::new();
        for (conn, components) in &state.connections {
            if Some(*conn) == exclude_conn {
                continue;
            }
            if trunk && *state.tunnel_connections.get(conn).unwrap_or(&false) {
                continue;
            }
            for component in components {
                out.extend(write_directory_entry(&to_local_de(component)));
            }
        }
        out.extend(write_directory_entry(hub_de));
        out
    }

    #[must_use]
    pub fn component_count(&self, conn: ConnIdx) -> usize {
        self.state
            .lock()
            .connections
            .get(&conn)
            .map_or(0, Vec::len)
    }

    /// Snapshot of the components currently held for `conn`, used by the Hub
    /// to (re)register each component's UID in `FastLookup` after a DE
    /// changes (spec §4.6 "e2e: `FastLookup` the destination UID").
    #[must_use]
    pub fn components(&self, conn: ConnIdx) -> Vec<ComponentRecord> {
        self.state
            .lock()
            .connections
            .get(&conn)
            .cloned()
            .unwrap_or_default()
    }
}

fn build_component_record(
    de: ComponentDe,
    allocator: &dyn SlotAllocator,
    local_source: bool,
    now: Instant,
) -> (ComponentRecord, Vec<(u16, u32)>) {
    let mut services = Vec::with_capacity(de.services.len());
    let mut activations = Vec::new();
    for (idx, slot) in de.services.iter().enumerate() {
        let port = idx as u16;
        match slot {
            ServiceSlot::NoService => services.push(ServiceRecord {
                port,
                name: None,
                kind: ServiceKind::None,
                slot: None,
            }),
            ServiceSlot::Multicast(name) => {
                let allocated = allocator.alloc_slot(de.uid, de.uid, name, local_source, now);
                if let Some(s) = allocated {
                    activations.push((port, s));
                }
                services.push(ServiceRecord {
                    // The multicast port IS the slot index (spec §4.4): the
                    // publisher stamps it as its own source port.
                    port: allocated.map_or(port, |s| s as u16),
                    name: Some(name.clone()),
                    kind: ServiceKind::Multicast,
                    slot: allocated,
                });
            }
            ServiceSlot::E2e(name) => services.push(ServiceRecord {
                port,
                name: Some(name.clone()),
                kind: ServiceKind::E2e,
                slot: None,
            }),
        }
    }
    (
        ComponentRecord {
            uid: de.uid,
            app_name: de.app_name,
            component_type: de.component_type,
            services,
            raw: de.raw,
        },
        activations,
    )
}

fn to_local_de(component: &ComponentRecord) -> ComponentDe {
    let services = component
        .services
        .iter()
        .map(|s| match (&s.kind, &s.name) {
            (ServiceKind::Multicast, Some(name)) => ServiceSlot::Multicast(name.clone()),
            (ServiceKind::E2e, Some(name)) => ServiceSlot::E2e(name.clone()),
            _ => ServiceSlot::NoService,
        })
        .collect();
    ComponentDe {
        uid: component.uid,
        app_name: component.app_name.clone(),
        component_type: component.component_type.clone(),
        services,
        raw: Vec::new(),
    }
}

fn free_component_slots(component: &ComponentRecord, allocator: &dyn SlotAllocator) {
    for service in &component.services {
        if let Some(slot) = service.slot {
            allocator.free_slot(slot);
        }
    }
}

fn find_matching_service<'a>(
    components: &'a [ComponentRecord],
    path: &str,
    kind: ServiceKind,
) -> Option<(&'a ComponentRecord, &'a ServiceRecord)> {
    let name = path.rsplit('/').next().unwrap_or(path);
    components.iter().find_map(|component| {
        component
            .services
            .iter()
            .find(|s| s.kind == kind && s.name.as_deref().is_some_and(|n| n == name || n == path))
            .map(|s| (component, s))
    })
}

fn resolve(
    hit: (&ComponentRecord, &ServiceRecord),
    conn: ConnIdx,
    requester: (Uid, u16),
    allocator: &dyn SlotAllocator,
    now: Instant,
) -> LookupOutcome {
    let (component, service) = hit;
    if service.kind == ServiceKind::Multicast {
        if let Some(slot) = service.slot {
            allocator.add_subscriber(slot, requester.0, requester.1, now);
        }
    }
    LookupOutcome::Success {
        uid: component.uid,
        connection: conn,
        remote_port: service.port,
        sequence_id: u32::from(service.port) ^ u32::from(component.uid.instance()),
    }
}
