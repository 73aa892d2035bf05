//! Hub-to-Hub tunnel management (spec §4.8): dynamic tunnels opened toward
//! Hubs discovered via beacon, and static tunnels dialed from configuration.
//! Both retry on a fixed backoff; neither ever gives up permanently.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use overlay_beacon::{DiscoveredHub, StatusChange};
use overlay_protocol::Uid;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::StaticTunnel;
use crate::conn::ConnRole;
use crate::conn_task::run_connection;
use crate::state::HubState;
use crate::stream::HubStream;
use crate::tls;

const RECONNECT_BACKOFF: Duration = Duration::from_millis(overlay_protocol::TUNNEL_RECONNECT_BACKOFF_MS);

/// Consume beacon status changes and keep exactly one outbound dynamic
/// tunnel per discovered Hub with a lower UID than ours (spec §4.8 "the
/// higher-UID Hub opens a tunnel to the lower-UID one"). Static tunnels are
/// spawned once up front and run independently of beacon discovery.
pub async fn run_tunnel_manager(state: Arc<HubState>, mut events: mpsc::Receiver<StatusChange>) {
    for static_tunnel in state.config.static_tunnels.clone() {
        tokio::spawn(run_static_tunnel(state.clone(), static_tunnel));
    }

    let mut dynamic: HashMap<Uid, JoinHandle<()>> = HashMap::new();
    while let Some(change) = events.recv().await {
        match change {
            StatusChange::Up(hub) if hub.uid != state.local_uid && state.local_uid > hub.uid => {
                dynamic.entry(hub.uid).or_insert_with(|| {
                    info!(peer = %hub.uid, "discovered lower-UID Hub, opening dynamic tunnel");
                    tokio::spawn(run_dynamic_tunnel(state.clone(), hub))
                });
            }
            StatusChange::Down(uid) => {
                if let Some(handle) = dynamic.remove(&uid) {
                    handle.abort();
                }
            }
            _ => {}
        }
    }
}

async fn run_dynamic_tunnel(state: Arc<HubState>, hub: DiscoveredHub) {
    let addr = SocketAddr::new(IpAddr::from(hub.address), state.config.tunnel_port);
    loop {
        match dial(&state, addr, state.config.tls.as_ref()).await {
            Ok(stream) => run_connection(state.clone(), stream, ConnRole::Tunnel, None).await,
            Err(e) => warn!(error = %e, %addr, "dynamic tunnel dial failed"),
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn run_static_tunnel(state: Arc<HubState>, cfg: StaticTunnel) {
    loop {
        let mut addrs = vec![cfg.primary.clone()];
        if let Some(backup) = &cfg.backup {
            addrs.push(backup.clone());
        }
        let mut connected = false;
        for addr_str in &addrs {
            let Ok(addr) = addr_str.parse::<SocketAddr>() else {
                warn!(addr = addr_str, "static tunnel address is not a valid socket address");
                continue;
            };
            let tls_cfg = cfg.tls.then(|| state.config.tls.clone()).flatten();
            match dial(&state, addr, tls_cfg.as_ref()).await {
                Ok(stream) => {
                    connected = true;
                    run_connection(state.clone(), stream, ConnRole::Tunnel, Some(cfg.name.clone())).await;
                    break;
                }
                Err(e) => warn!(error = %e, %addr, name = %cfg.name, "static tunnel dial failed"),
            }
        }
        if !connected {
            debug!(name = %cfg.name, "no static tunnel address reachable this round");
        }
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn dial(state: &HubState, addr: SocketAddr, tls_cfg: Option<&crate::config::TlsConfig>) -> std::io::Result<HubStream> {
    let tcp = TcpStream::connect(addr).await?;
    match tls_cfg {
        Some(tls_cfg) => {
            let connector = tls::build_connector(tls_cfg).map_err(std::io::Error::other)?;
            let server_name = tls::server_name_for_ip(addr.ip());
            let tls_stream = connector.connect(server_name, tcp).await?;
            Ok(HubStream::ClientTls(Box::new(tls_stream)))
        }
        None => Ok(HubStream::Plain(tcp)),
    }
}
