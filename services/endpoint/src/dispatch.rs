//! Inbound message handling for the Hub uplink (spec §4.7). Mirrors the
//! Hub's own `dispatch.rs` shape: one function per `MessageType`, each
//! reading the service table and emitting replies onto the link.

use std::sync::Arc;
use std::time::Instant;

use overlay_link::{Frame, Link};
use overlay_protocol::{
    E2eHeader, HeartbeatPayload, MessageType, Priority, ServiceLookupRecord, E2E_HEADER_LEN,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::config::ServiceLocality;
use crate::services::ResolvedTarget;
use crate::state::EndpointState;
use crate::IncomingMessage;

/// `true` on the first heartbeat received this session (spec §4.7: "on
/// receipt of a return heartbeat it enters normal state").
pub fn process_message<S: AsyncRead + AsyncWrite + Unpin>(
    state: &Arc<EndpointState>,
    link: &mut Link<S>,
    inbound_tx: &tokio::sync::mpsc::UnboundedSender<IncomingMessage>,
    frame: Frame,
    already_normal: bool,
) -> bool {
    match frame.header.cmd {
        MessageType::Heartbeat => {
            if let Ok(hb) = HeartbeatPayload::decode(&frame.payload) {
                debug!(peer = %hb.uid, is_hub = hb.is_hub, "heartbeat from hub");
            }
            true
        }
        MessageType::DirectoryResponse => {
            debug!(bytes = frame.payload.len(), "directory response received");
            already_normal
        }
        MessageType::ServiceLookupResponse => {
            handle_lookup_response(state, &frame.payload);
            already_normal
        }
        MessageType::MulticastMessage => {
            handle_incoming_payload(state, inbound_tx, &frame.payload, frame.header.priority);
            already_normal
        }
        MessageType::MulticastAck => {
            handle_multicast_ack(state, &frame.payload);
            already_normal
        }
        MessageType::E2eMessage => {
            handle_incoming_payload(state, inbound_tx, &frame.payload, frame.header.priority);
            already_normal
        }
        MessageType::ServiceActivate => {
            handle_service_activate(state, link, &frame.payload);
            already_normal
        }
        MessageType::ServiceLookupRequest | MessageType::DirectoryRequest => {
            warn!(cmd = ?frame.header.cmd, "unexpected message type received on an endpoint uplink");
            already_normal
        }
    }
}

fn handle_lookup_response(state: &Arc<EndpointState>, payload: &[u8]) {
    let Some(record_bytes) = payload.get(E2E_HEADER_LEN..) else { return };
    let Ok(record) = ServiceLookupRecord::decode(record_bytes) else {
        warn!("malformed service-lookup-response");
        return;
    };
    let target = (record.response == overlay_protocol::LookupResponse::Succeed).then_some(ResolvedTarget {
        uid: record.lookup_uid,
        port: record.remote_port,
        sequence_id: record.sequence_id,
    });
    state
        .services
        .lock()
        .handle_lookup_reply(record.local_port, record.response, target, Instant::now());
}

fn handle_incoming_payload(
    state: &Arc<EndpointState>,
    inbound_tx: &tokio::sync::mpsc::UnboundedSender<IncomingMessage>,
    payload: &[u8],
    _priority: Priority,
) {
    let Ok(header) = E2eHeader::decode(payload) else {
        warn!("malformed e2e header on inbound message");
        return;
    };
    let body = payload[E2E_HEADER_LEN..].to_vec();
    let is_duplicate = {
        let mut services = state.services.lock();
        !services.note_multicast_recv(header.dest_port, header.sequence)
    };
    if is_duplicate {
        debug!(port = header.dest_port, seq = header.sequence, "duplicate multicast sequence delivered anyway");
    }
    let _ = inbound_tx.send(IncomingMessage {
        port: header.dest_port,
        source_uid: header.source_uid,
        payload: body,
    });
}

fn handle_multicast_ack(state: &Arc<EndpointState>, payload: &[u8]) {
    let Ok(header) = E2eHeader::decode(payload) else {
        warn!("malformed e2e header on multicast ack");
        return;
    };
    state.services.lock().record_ack(header.dest_port);
}

/// A service-activate message plays one of two roles depending on which of
/// our own services `dest_port` names (spec §4.5 "Background", §4.7):
///
/// - **Local multicast publisher**: the Hub is announcing the subscription
///   slot index it allocated for this service (spec §3 "activation
///   state"); record it so future `SendMessage` calls stamp the right
///   envelope source port.
/// - **Remote multicast subscriber**: a keep-alive for a tunnel-reflected
///   subscription whose previous hop is this endpoint; answer it the same
///   way a normal ack would, to keep the Hub's slot state warm without
///   inventing a new wire message.
fn handle_service_activate<S: AsyncRead + AsyncWrite + Unpin>(state: &Arc<EndpointState>, link: &mut Link<S>, payload: &[u8]) {
    let Ok(header) = E2eHeader::decode(payload) else {
        warn!("malformed e2e header on service activate");
        return;
    };
    let locality = state.services.lock().get(header.dest_port).map(|r| r.locality());
    match locality {
        Some(ServiceLocality::Local) => {
            state.services.lock().activate_local_multicast(header.dest_port, header.source_port);
        }
        Some(ServiceLocality::Remote) => {
            let reply = E2eHeader {
                source_uid: state.local_uid,
                dest_uid: header.source_uid,
                source_port: header.dest_port,
                dest_port: header.source_port,
                sequence: 0,
                reserved: 0,
            };
            let mut buf = [0u8; E2E_HEADER_LEN];
            reply.encode(&mut buf);
            link.send(Frame::new(MessageType::MulticastAck, Priority::MedHigh, buf.to_vec()));
        }
        None => {}
    }
}
