//! Hub message demultiplexer (spec §4.6 "Process"). Each inbound message on
//! a `Normal` connection is routed here by its `MessageType`; this module
//! never touches a socket directly, only `ConnRegistry::send_to` and the
//! shared directory/multicast state.

use std::time::Instant;

use overlay_directory::LookupQuery;
use overlay_link::Frame;
use overlay_protocol::{E2eHeader, HeartbeatPayload, MessageType, Priority, ServiceLookupRecord, Uid, E2E_HEADER_LEN};
use tracing::{debug, trace, warn};

use crate::conn::{ConnRole, ConnState};
use crate::state::{ConnIdx, HubState};

/// Handle one fully-assembled frame received on `conn` (spec §4.6
/// "Process").
pub fn process_message(state: &HubState, conn: ConnIdx, frame: Frame, now: Instant) {
    match frame.header.cmd {
        MessageType::Heartbeat => handle_heartbeat(state, conn, &frame.payload, now),
        MessageType::MulticastMessage => handle_multicast_message(state, conn, &frame.payload, now),
        MessageType::MulticastAck => handle_multicast_ack(state, &frame.payload),
        MessageType::ServiceLookupRequest => handle_lookup_request(state, conn, &frame.payload, now),
        MessageType::ServiceLookupResponse => handle_lookup_response(state, &frame.payload),
        MessageType::E2eMessage => handle_e2e(state, &frame),
        MessageType::DirectoryRequest => handle_directory_request(state, conn),
        MessageType::DirectoryResponse | MessageType::ServiceActivate => {
            trace!(cmd = ?frame.header.cmd, "message type has no Hub-side handler, dropped");
        }
    }
}

fn handle_heartbeat(state: &HubState, conn: ConnIdx, payload: &[u8], now: Instant) {
    let hb = match HeartbeatPayload::decode(payload) {
        Ok(hb) => hb,
        Err(e) => {
            warn!(error = %e, conn, "malformed heartbeat");
            return;
        }
    };

    let role = state.conns.role(conn);
    if state.conns.state(conn) == Some(ConnState::WaitingForHeartbeat) {
        if role == Some(ConnRole::Tunnel) {
            if !hb.is_hub {
                warn!(conn, peer = %hb.uid, "tunnel connection's peer is not a Hub, closing");
                return;
            }
            if !state.config.valid_tunnel_sources.is_empty()
                && !state.config.valid_tunnel_sources.contains(&hb.uid)
            {
                warn!(conn, peer = %hb.uid, "tunnel source not in allow-list, closing");
                return;
            }
        }
        state.conns.mark_normal(conn, hb.uid, now);
        state.trie.add(hb.uid, conn);
        state.dir.set_connection_role(conn, role == Some(ConnRole::Tunnel));
        debug!(conn, peer = %hb.uid, ?role, "connection entered Normal state");
    } else {
        state.conns.touch_heartbeat(conn, now);
    }

    if !hb.directory.is_empty() {
        match state.dir.process_de(conn, &hb.directory, &state.slot_adapter, now) {
            Ok(outcome) => {
                if outcome.changed {
                    trace!(conn, "directory entry changed");
                }
                for (local_port, slot) in outcome.activations {
                    send_service_activate(state, conn, hb.uid, local_port, slot);
                }
            }
            Err(e) => warn!(error = %e, conn, "malformed directory entry in heartbeat"),
        }
    }
}

/// Tell a directly-connected publisher which Hub-allocated slot index to
/// stamp as its multicast envelope source port from now on (spec §3
/// "Endpoint service record... activation state"); the Hub's slot number is
/// independent of the port the endpoint picked for itself.
fn send_service_activate(state: &HubState, conn: ConnIdx, endpoint_uid: Uid, local_port: u16, slot: u32) {
    let header = E2eHeader {
        source_uid: state.local_uid,
        dest_uid: endpoint_uid,
        source_port: slot as u16,
        dest_port: local_port,
        sequence: 0,
        reserved: 0,
    };
    let mut buf = [0u8; E2E_HEADER_LEN];
    header.encode(&mut buf);
    state
        .conns
        .send_to(conn, Frame::new(MessageType::ServiceActivate, Priority::MedHigh, buf.to_vec()));
}

fn handle_multicast_message(state: &HubState, conn: ConnIdx, payload: &[u8], now: Instant) {
    let e2e = match E2eHeader::decode(payload) {
        Ok(e2e) => e2e,
        Err(e) => {
            warn!(error = %e, conn, "malformed multicast message header");
            return;
        }
    };
    let body = &payload[E2E_HEADER_LEN..];
    let slot = u32::from(e2e.source_port);

    let result = match state.mcast.forward_multicast(slot, e2e.source_uid, body, state.local_uid, now) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, slot, "forward_multicast failed");
            return;
        }
    };

    for out in result.frames {
        let Some(dest_conn) = state.trie.lookup(out.dest_uid) else {
            continue;
        };
        let mut header = e2e;
        header.dest_uid = out.dest_uid;
        header.dest_port = out.dest_port;
        header.source_port = out.source_port;
        header.sequence = out.sequence;
        let mut bytes = Vec::with_capacity(E2E_HEADER_LEN + out.payload.len());
        let mut hdr_buf = [0u8; E2E_HEADER_LEN];
        header.encode(&mut hdr_buf);
        bytes.extend_from_slice(&hdr_buf);
        bytes.extend_from_slice(&out.payload);
        state
            .conns
            .send_to(dest_conn, Frame::new(MessageType::MulticastMessage, Priority::Low, bytes));
    }

    if let Some(ack_to) = result.ack_to {
        if let Some(ack_conn) = state.trie.lookup(ack_to) {
            let ack_header = E2eHeader {
                source_uid: e2e.source_uid,
                dest_uid: ack_to,
                source_port: e2e.source_port,
                dest_port: slot as u16,
                sequence: e2e.sequence,
                reserved: 0,
            };
            let mut hdr_buf = [0u8; E2E_HEADER_LEN];
            ack_header.encode(&mut hdr_buf);
            state
                .conns
                .send_to(ack_conn, Frame::new(MessageType::MulticastAck, Priority::MedHigh, hdr_buf.to_vec()));
        }
    }
}

fn handle_multicast_ack(state: &HubState, payload: &[u8]) {
    let e2e = match E2eHeader::decode(payload) {
        Ok(e2e) => e2e,
        Err(e) => {
            warn!(error = %e, "malformed multicast ack header");
            return;
        }
    };
    let slot = u32::from(e2e.dest_port);
    if let Err(e) = state.mcast.process_ack(slot, e2e.source_uid, e2e.source_port, e2e.sequence) {
        warn!(error = %e, slot, "process_ack failed");
    }
}

fn handle_lookup_request(state: &HubState, conn: ConnIdx, payload: &[u8], now: Instant) {
    let e2e = match E2eHeader::decode(payload) {
        Ok(e2e) => e2e,
        Err(e) => {
            warn!(error = %e, conn, "malformed lookup request header");
            return;
        }
    };
    let record = match ServiceLookupRecord::decode(&payload[E2E_HEADER_LEN..]) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, conn, "malformed lookup request record");
            return;
        }
    };

    let query = LookupQuery {
        service_path: record.service_path.clone(),
        kind: record.kind,
        refresh: None,
        remove: record.response == overlay_protocol::LookupResponse::Remove,
    };
    let outcome = state
        .dir
        .find_service((e2e.source_uid, e2e.source_port), &query, &state.slot_adapter, now);

    let response_record = match outcome {
        overlay_directory::LookupOutcome::Success { uid, remote_port, sequence_id, .. } => ServiceLookupRecord {
            response: overlay_protocol::LookupResponse::Succeed,
            lookup_uid: uid,
            component_index: 0,
            sequence_id,
            remote_port,
            ..record
        },
        overlay_directory::LookupOutcome::Fail => ServiceLookupRecord {
            response: overlay_protocol::LookupResponse::Fail,
            lookup_uid: Uid::ZERO,
            component_index: 0,
            sequence_id: 0,
            remote_port: 0,
            ..record
        },
        overlay_directory::LookupOutcome::Removed => return,
    };

    let reply_header = E2eHeader {
        source_uid: response_record.lookup_uid,
        dest_uid: e2e.source_uid,
        source_port: response_record.remote_port,
        dest_port: e2e.source_port,
        sequence: 0,
        reserved: 0,
    };
    let mut out = Vec::with_capacity(E2E_HEADER_LEN + overlay_protocol::LOOKUP_RECORD_LEN);
    let mut hdr_buf = [0u8; E2E_HEADER_LEN];
    reply_header.encode(&mut hdr_buf);
    out.extend_from_slice(&hdr_buf);
    let mut rec_buf = [0u8; overlay_protocol::LOOKUP_RECORD_LEN];
    if let Err(e) = response_record.encode(&mut rec_buf) {
        warn!(error = %e, "could not encode lookup response record");
        return;
    }
    out.extend_from_slice(&rec_buf);
    state
        .conns
        .send_to(conn, Frame::new(MessageType::ServiceLookupResponse, Priority::MedHigh, out));
}

fn handle_lookup_response(_state: &HubState, payload: &[u8]) {
    // The Hub only ever issues lookups on behalf of a tunnel-reflected
    // multicast slot's background refresh (spec §4.5 "Background"); the
    // reply's only purpose is to keep the upstream slot alive; there is no
    // further state to update on the Hub side.
    if let Err(e) = ServiceLookupRecord::decode(payload.get(E2E_HEADER_LEN..).unwrap_or(&[])) {
        warn!(error = %e, "malformed lookup response record");
    }
}

fn handle_e2e(state: &HubState, frame: &Frame) {
    let e2e = match E2eHeader::decode(&frame.payload) {
        Ok(e2e) => e2e,
        Err(e) => {
            warn!(error = %e, "malformed e2e header");
            return;
        }
    };
    match state.trie.lookup(e2e.dest_uid) {
        Some(dest_conn) if state.conns.state(dest_conn) == Some(ConnState::Normal) => {
            state.conns.send_to(dest_conn, frame.clone());
        }
        _ => warn!(dest = %e2e.dest_uid, "unroutable e2e message dropped"),
    }
}

fn handle_directory_request(state: &HubState, conn: ConnIdx) {
    let trunk = state.conns.role(conn) == Some(ConnRole::Tunnel);
    let hub_de = state.own_de();
    let dir_bytes = state.dir.build_directory(trunk, &hub_de, Some(conn));
    state
        .conns
        .send_to(conn, Frame::new(MessageType::DirectoryResponse, Priority::MedHigh, dir_bytes));
}
