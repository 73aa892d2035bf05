//! Once-per-second background maintenance (spec §4.6 "Liveness", §4.5
//! "Background"): reap timed-out connections and keep tunnel-reflected
//! multicast subscriptions alive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use overlay_link::Frame;
use overlay_protocol::{E2eHeader, MessageType, Priority, ServiceLookupRecord, Uid, E2E_HEADER_LEN};
use tracing::{debug, warn};

use crate::conn::ConnRole;
use crate::state::HubState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub async fn run_sweep(state: Arc<HubState>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    let timeout = Duration::from_millis(state.config.heartbeat_interval_ms) * state.config.heartbeat_timeout_intervals;
    loop {
        ticker.tick().await;
        let now = Instant::now();

        for conn in state.conns.expired(now, timeout) {
            debug!(conn, "connection heartbeat timed out");
            state.notify_close(conn);
        }

        let is_endpoint = |uid: Uid| {
            state
                .trie
                .lookup(uid)
                .is_some_and(|conn| state.conns.role(conn) == Some(ConnRole::Endpoint))
        };
        for action in state.mcast.background_refresh(now, is_endpoint) {
            let Some(conn) = state.trie.lookup(action.prev_hop_uid) else {
                continue;
            };
            send_refresh(&state, conn, &action, now);
        }
    }
}

fn send_refresh(state: &HubState, conn: crate::state::ConnIdx, action: &overlay_mcast::RefreshAction, _now: Instant) {
    let header = E2eHeader {
        source_uid: state.local_uid,
        dest_uid: action.prev_hop_uid,
        source_port: action.slot as u16,
        dest_port: 0,
        sequence: 0,
        reserved: 0,
    };
    let record = ServiceLookupRecord {
        service_path: action.path.clone(),
        kind: overlay_protocol::ServiceKind::Multicast,
        response: overlay_protocol::LookupResponse::Fail,
        lookup_uid: Uid::ZERO,
        component_index: 0,
        sequence_id: 0,
        local_port: action.slot as u16,
        remote_port: 0,
    };
    let mut out = Vec::with_capacity(E2E_HEADER_LEN + overlay_protocol::LOOKUP_RECORD_LEN);
    let mut hdr_buf = [0u8; E2E_HEADER_LEN];
    header.encode(&mut hdr_buf);
    out.extend_from_slice(&hdr_buf);
    let mut rec_buf = [0u8; overlay_protocol::LOOKUP_RECORD_LEN];
    if let Err(e) = record.encode(&mut rec_buf) {
        warn!(error = %e, "could not encode background refresh record");
        return;
    }
    out.extend_from_slice(&rec_buf);
    let msg_type = if action.prev_hop_is_endpoint {
        MessageType::ServiceActivate
    } else {
        MessageType::ServiceLookupRequest
    };
    state.conns.send_to(conn, Frame::new(msg_type, Priority::Med, out));
}
