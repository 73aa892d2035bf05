//! Hub server library: connection table, directory/subscription wiring, and
//! tunnel management (spec §4.6, §4.8). `main.rs` is a thin CLI wrapper
//! around [`run_hub`].

pub mod config;
pub mod conn;
pub mod conn_task;
mod dispatch;
mod listener;
pub mod slot_adapter;
mod stream;
mod sweep;
mod tls;
mod tunnel;

pub mod error;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use overlay_protocol::{HelloBeacon, Uid};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use config::HubConfig;
pub use error::HubError;
pub use state::HubState;

/// Resolve the Hub's own UID, falling back to an ephemeral host id with a
/// loud warning when `config.uid` is unset (spec §6).
#[must_use]
pub fn resolve_local_uid(config: &HubConfig) -> Uid {
    match config.uid {
        Some(uid) => uid,
        None => {
            let host = state::derive_ephemeral_host_id();
            let uid = Uid::from_host_instance(host, overlay_protocol::HUB_INSTANCE);
            warn!(%uid, "parameters.uid not set, using an ephemeral host id");
            uid
        }
    }
}

/// Run the Hub until one of its background tasks fails. Spawns the
/// endpoint listener, the tunnel listener, the presence beacon, the tunnel
/// manager, and the liveness/refresh sweep, then waits on whichever exits
/// first.
pub async fn run_hub(config: HubConfig) -> Result<(), HubError> {
    let local_uid = resolve_local_uid(&config);
    info!(%local_uid, app_name = %config.app_name, "starting hub");

    let state = HubState::new(config, local_uid);

    let (beacon_tx, beacon_rx) = mpsc::channel(64);
    let hello = HelloBeacon {
        address: local_ipv4_octets(),
        uid: local_uid,
        app_name: state.config.app_name.clone(),
        component_type: "Hub".to_owned(),
        priority: state.config.priority.max(1),
        heartbeat_interval_ms: state.config.heartbeat_interval_ms as u16,
    };
    let beacon_port = state.config.beacon_port;
    let beacon_interval = Duration::from_millis(overlay_protocol::BEACON_INTERVAL_MS);
    let _beacon = overlay_beacon::BeaconService::spawn(beacon_port, beacon_port, beacon_interval, hello, beacon_tx)
        .await
        .map_err(|e| HubError::Tls(format!("beacon startup failed: {e}")))?;

    let endpoint_listener = tokio::spawn(listener::run_endpoint_listener(state.clone()));
    let tunnel_listener = tokio::spawn(listener::run_tunnel_listener(state.clone()));
    let tunnel_manager = tokio::spawn(tunnel::run_tunnel_manager(state.clone(), beacon_rx));
    let liveness_sweep = tokio::spawn(sweep::run_sweep(state.clone()));

    tokio::select! {
        res = endpoint_listener => log_exit("endpoint listener", res),
        res = tunnel_listener => log_exit("tunnel listener", res),
        _ = tunnel_manager => warn!("tunnel manager exited"),
        _ = liveness_sweep => warn!("liveness sweep exited"),
    }
    Ok(())
}

/// First non-loopback IPv4 adapter address, stamped into this Hub's own
/// beacon so a dynamic-tunnel peer knows where to dial it back (spec §4.2,
/// §4.8). Falls back to loopback if no such adapter exists.
fn local_ipv4_octets() -> [u8; 4] {
    get_if_addrs::get_if_addrs()
        .ok()
        .into_iter()
        .flatten()
        .filter(|iface| !iface.is_loopback())
        .find_map(|iface| match iface.addr {
            get_if_addrs::IfAddr::V4(v4) => Some(v4.ip.octets()),
            _ => None,
        })
        .unwrap_or([127, 0, 0, 1])
}

fn log_exit(name: &str, res: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match res {
        Ok(Ok(())) => warn!(name, "task exited cleanly"),
        Ok(Err(e)) => warn!(name, error = %e, "task exited with an error"),
        Err(e) => warn!(name, error = %e, "task panicked"),
    }
}
