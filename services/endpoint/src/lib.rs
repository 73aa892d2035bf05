//! Endpoint client library: the discovery→connect→heartbeat→normal state
//! machine, local service publication, remote service lookup, and
//! sequenced send/receive (spec §4.7). `main.rs` is a thin CLI demo around
//! [`Endpoint`].

mod discovery;
pub mod dispatch;
pub mod services;
pub mod state;
mod stream;
mod tls;

pub mod config;
pub mod error;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use overlay_link::{Frame, Link};
use overlay_protocol::{
    E2eHeader, HeartbeatPayload, MessageType, Priority, ServiceKind, ServiceLookupRecord, Uid, E2E_HEADER_LEN,
    LOOKUP_RECORD_LEN,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use config::{ClientService, EndpointConfig, ServiceLocality};
pub use error::EndpointError;
pub use services::{LookupOp, LookupState, RemoveOutcome, ResolvedTarget};
pub use state::EndpointState;

use crate::discovery::Discovery;
use crate::services::LookupAction;
use crate::stream::EndpointStream;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const COMPONENT_TYPE: &str = "Endpoint";

/// One payload delivered to the client from a local service port, after
/// duplicate-sequence bookkeeping but still delivered exactly once per
/// frame (spec §4.7 failure semantics: "a duplicate is delivered anyway").
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub port: u16,
    pub source_uid: Uid,
    pub payload: Vec<u8>,
}

/// Client handle: service registration plus the inbound message stream.
/// The uplink itself runs as a detached background task for the life of
/// the handle (spec §5 "a cooperatively-scheduled worker on its own
/// thread" — here, its own tokio task).
pub struct Endpoint {
    state: Arc<EndpointState>,
    inbound: mpsc::UnboundedReceiver<IncomingMessage>,
}

impl Endpoint {
    /// Start the background uplink task and return a handle (spec §4.7
    /// "Background tasks").
    #[must_use]
    pub fn spawn(config: EndpointConfig) -> Self {
        let local_uid = resolve_local_uid(&config);
        let state = EndpointState::new(config, local_uid);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_uplink(state.clone(), inbound_tx));
        Endpoint {
            state,
            inbound: inbound_rx,
        }
    }

    #[must_use]
    pub fn local_uid(&self) -> Uid {
        self.state.local_uid
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Wait for the next message delivered to any local service port.
    /// Returns `None` once the uplink task has been dropped.
    pub async fn recv(&mut self) -> Option<IncomingMessage> {
        self.inbound.recv().await
    }

    pub fn add_service(
        &self,
        path: impl Into<String>,
        kind: ServiceKind,
        locality: ServiceLocality,
        enabled: bool,
    ) -> Result<u16, EndpointError> {
        self.state
            .services
            .lock()
            .add_service(path.into(), kind, locality, enabled, Instant::now())
    }

    pub fn enable(&self, port: u16) -> Result<(), EndpointError> {
        self.state.services.lock().enable(port, Instant::now())
    }

    pub fn disable(&self, port: u16) -> Result<(), EndpointError> {
        self.state.services.lock().disable(port)
    }

    pub fn remove(&self, port: u16) -> Result<RemoveOutcome, EndpointError> {
        self.state.services.lock().remove(port, Instant::now())
    }

    #[must_use]
    pub fn clear_to_send(&self, port: u16) -> bool {
        self.state.services.lock().clear_to_send(port, Instant::now())
    }

    /// Emit a payload on `port` (spec §4.7 "SendMessage"). Stamps the
    /// multicast sequence number and the Hub-assigned slot port where
    /// applicable; for a remote service the destination is its currently
    /// resolved `(uid, port)`.
    pub fn send_message(&self, port: u16, payload: &[u8], priority: Priority) -> Result<(), EndpointError> {
        let now = Instant::now();
        let (dest_uid, dest_port) = {
            let services = self.state.services.lock();
            let record = services
                .get(port)
                .ok_or_else(|| EndpointError::Service(format!("port {port} not in use")))?;
            match record.locality() {
                ServiceLocality::Local => (Uid::ZERO, 0),
                ServiceLocality::Remote => {
                    let target = record.resolved().ok_or(EndpointError::NoHub)?;
                    (target.uid, target.port)
                }
            }
        };
        let stamp = self.state.services.lock().record_send(port, now)?;
        let header = E2eHeader {
            source_uid: self.state.local_uid,
            dest_uid,
            source_port: stamp.source_port,
            dest_port,
            sequence: stamp.seq.unwrap_or(0),
            reserved: 0,
        };
        let mut bytes = Vec::with_capacity(E2E_HEADER_LEN + payload.len());
        let mut hdr_buf = [0u8; E2E_HEADER_LEN];
        header.encode(&mut hdr_buf);
        bytes.extend_from_slice(&hdr_buf);
        bytes.extend_from_slice(payload);
        let cmd = if stamp.seq.is_some() {
            MessageType::MulticastMessage
        } else {
            MessageType::E2eMessage
        };
        self.state.send(Frame::new(cmd, priority, bytes))
    }

    /// Acknowledge the last multicast frame received on a remote multicast
    /// service (spec §4.7 "SendMulticastAck").
    pub fn send_multicast_ack(&self, port: u16, received_seq: u8) -> Result<(), EndpointError> {
        let target = {
            let services = self.state.services.lock();
            let record = services
                .get(port)
                .ok_or_else(|| EndpointError::Service(format!("port {port} not in use")))?;
            if record.locality() != ServiceLocality::Remote || record.kind() != ServiceKind::Multicast {
                return Err(EndpointError::Service("not a remote multicast service".to_owned()));
            }
            record.resolved().ok_or(EndpointError::NoHub)?
        };
        let header = E2eHeader {
            source_uid: self.state.local_uid,
            dest_uid: target.uid,
            source_port: port,
            dest_port: target.port,
            sequence: received_seq.wrapping_add(1),
            reserved: 0,
        };
        let mut buf = [0u8; E2E_HEADER_LEN];
        header.encode(&mut buf);
        self.state.send(Frame::new(MessageType::MulticastAck, Priority::MedHigh, buf.to_vec()))
    }
}

#[must_use]
fn resolve_local_uid(config: &EndpointConfig) -> Uid {
    match config.uid {
        Some(uid) => uid,
        None => {
            let host = state::derive_ephemeral_host_id();
            let instance = state::derive_dynamic_instance(&host);
            let uid = Uid::from_host_instance(host, instance);
            warn!(%uid, "parameters.uid not set, using an ephemeral host id and instance");
            uid
        }
    }
}

/// The outer discovery/connect/retry loop. Runs for the lifetime of the
/// `Endpoint` handle (spec §4.7: "disconnected → beacon-wait → connecting →
/// connected → normal").
async fn run_uplink(state: Arc<EndpointState>, inbound_tx: mpsc::UnboundedSender<IncomingMessage>) {
    let mut discovery = match Discovery::start(&state.config, state.local_uid).await {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "endpoint discovery failed to start; uplink cannot run");
            return;
        }
    };

    loop {
        discovery.drain();
        let Some((addr, hub_app_name)) = pick_target(&state.config, &discovery) else {
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            continue;
        };

        info!(%addr, "connecting to hub");
        match dial(&state, addr).await {
            Ok(stream) => run_session(&state, stream, &mut discovery, &inbound_tx, &hub_app_name).await,
            Err(e) => warn!(error = %e, %addr, "hub dial failed"),
        }
        state.detach_session();
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

/// Resolve the next Hub to dial: the configured static address if set,
/// otherwise the best currently-discovered Hub by priority (spec §4.7
/// "disconnected" and §4.2).
fn pick_target(config: &EndpointConfig, discovery: &Discovery) -> Option<(SocketAddr, String)> {
    if let Some(static_hub) = &config.static_hub {
        return static_hub.parse::<SocketAddr>().ok().map(|addr| (addr, String::new()));
    }
    let hub = discovery.pick_best(&config.hub_priority)?;
    Some((SocketAddr::new(IpAddr::from(hub.address), config.hub_port), hub.app_name))
}

async fn dial(state: &EndpointState, addr: SocketAddr) -> std::io::Result<EndpointStream> {
    let tcp = TcpStream::connect(addr).await?;
    match &state.config.tls {
        Some(tls_cfg) => {
            let connector = tls::build_connector(tls_cfg).map_err(std::io::Error::other)?;
            let server_name = tls::server_name_for_ip(addr.ip());
            let tls_stream = connector.connect(server_name, tcp).await?;
            Ok(EndpointStream::Tls(Box::new(tls_stream)))
        }
        None => Ok(EndpointStream::Plain(tcp)),
    }
}

/// Drive one Hub connection until it closes or times out (spec §4.7
/// "connecting → connected → normal", "Background tasks").
async fn run_session<S>(
    state: &Arc<EndpointState>,
    stream: S,
    discovery: &mut Discovery,
    inbound_tx: &mpsc::UnboundedSender<IncomingMessage>,
    current_hub_app_name: &str,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut link = Link::with_max_message_bytes(stream, state.config.max_message_bytes);
    let (tx, mut outbox) = mpsc::unbounded_channel::<Frame>();
    state.attach_session(tx);

    let mut heartbeat_count: u32 = 0;
    let mut is_normal = false;
    send_heartbeat(state, &mut link, &mut heartbeat_count);
    if let Err(e) = link.pump().await {
        warn!(error = %e, "initial heartbeat send failed");
        return;
    }

    let interval = Duration::from_millis(state.config.heartbeat_interval_ms);
    let mut heartbeat_ticker = tokio::time::interval(interval);
    heartbeat_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat_ticker.tick().await; // first tick fires immediately; we already sent one above

    let mut background_ticker = tokio::time::interval(Duration::from_secs(1));
    background_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            maybe_frame = outbox.recv() => {
                match maybe_frame {
                    Some(frame) => {
                        link.send(frame);
                        if let Err(e) = link.pump().await {
                            warn!(error = %e, "send failed");
                            break;
                        }
                    }
                    None => break,
                }
            }
            received = link.recv() => {
                match received {
                    Ok(Some(frame)) => {
                        let was_normal = is_normal;
                        is_normal = dispatch::process_message(state, &mut link, inbound_tx, frame, is_normal);
                        if is_normal && !was_normal {
                            state.services.lock().set_link_up(true);
                            debug!("uplink entered Normal state");
                        }
                        if let Err(e) = link.pump().await {
                            warn!(error = %e, "reply send failed");
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("hub closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "link error, closing uplink");
                        break;
                    }
                }
            }
            _ = heartbeat_ticker.tick() => {
                send_heartbeat(state, &mut link, &mut heartbeat_count);
                if let Err(e) = link.pump().await {
                    warn!(error = %e, "heartbeat send failed");
                    break;
                }
            }
            _ = background_ticker.tick() => {
                let now = Instant::now();
                discovery.drain();
                if state.config.reversion_enabled {
                    if let Some(better) = discovery.higher_priority_available(&state.config.hub_priority, current_hub_app_name) {
                        info!(hub = %better.app_name, "higher-priority hub available, reverting");
                        break;
                    }
                }
                let actions = state.services.lock().tick(
                    now,
                    overlay_protocol::LOOKUP_INTERVAL_MS,
                    overlay_protocol::REFRESH_INTERVAL_MS,
                    overlay_protocol::REFRESH_TIMEOUT_MS,
                );
                for action in actions {
                    send_lookup_action(&mut link, state.local_uid, &action);
                }
                if let Err(e) = link.pump().await {
                    warn!(error = %e, "background send failed");
                    break;
                }
            }
        }
    }
}

fn send_heartbeat<S: AsyncRead + AsyncWrite + Unpin>(state: &EndpointState, link: &mut Link<S>, count: &mut u32) {
    *count += 1;
    let directory = if *count % overlay_protocol::HEARTBEAT_DIRECTORY_EVERY == 1 {
        let de = state.services.lock().build_de(state.local_uid, &state.config.app_name, COMPONENT_TYPE);
        overlay_protocol::write_directory_entry(&de)
    } else {
        Vec::new()
    };
    let hb = HeartbeatPayload {
        uid: state.local_uid,
        is_hub: false,
        directory,
    };
    link.send(Frame::new(MessageType::Heartbeat, Priority::MedHigh, hb.encode()));
}

fn send_lookup_action<S: AsyncRead + AsyncWrite + Unpin>(link: &mut Link<S>, local_uid: Uid, action: &LookupAction) {
    let header = E2eHeader {
        source_uid: local_uid,
        dest_uid: Uid::ZERO,
        source_port: action.port,
        dest_port: 0,
        sequence: 0,
        reserved: 0,
    };
    let response = if action.op == LookupOp::Remove {
        overlay_protocol::LookupResponse::Remove
    } else {
        overlay_protocol::LookupResponse::Fail
    };
    let record = ServiceLookupRecord {
        service_path: action.path.clone(),
        kind: action.kind,
        response,
        lookup_uid: Uid::ZERO,
        component_index: 0,
        sequence_id: 0,
        local_port: action.port,
        remote_port: 0,
    };
    let mut out = Vec::with_capacity(E2E_HEADER_LEN + LOOKUP_RECORD_LEN);
    let mut hdr_buf = [0u8; E2E_HEADER_LEN];
    header.encode(&mut hdr_buf);
    out.extend_from_slice(&hdr_buf);
    let mut rec_buf = [0u8; LOOKUP_RECORD_LEN];
    if record.encode(&mut rec_buf).is_err() {
        warn!(path = %action.path, "lookup record encode failed, service path too long");
        return;
    }
    out.extend_from_slice(&rec_buf);
    link.send(Frame::new(MessageType::ServiceLookupRequest, Priority::Med, out));
}
