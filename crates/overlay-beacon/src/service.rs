use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use get_if_addrs::{get_if_addrs, IfAddr};
use overlay_protocol::{HelloBeacon, BEACON_LEN};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::error::BeaconError;
use crate::table::{DiscoveryTable, StatusChange};

/// The local subnet this service broadcasts on and admits beacons from
/// (spec §4.2 "subnet test against the selected adapter").
struct Subnet {
    address: Ipv4Addr,
    netmask: Ipv4Addr,
    broadcast: Ipv4Addr,
}

impl Subnet {
    fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(self.address) & mask == u32::from(addr) & mask
    }
}

/// Pick the first non-loopback IPv4 adapter (spec §4.2 does not specify a
/// tie-break among multiple adapters; the original binds the first one
/// `getifaddrs` returns, which this follows).
fn select_subnet() -> Result<Subnet, BeaconError> {
    for iface in get_if_addrs()? {
        if iface.is_loopback() {
            continue;
        }
        if let IfAddr::V4(v4) = iface.addr {
            let broadcast = v4.broadcast.unwrap_or_else(|| {
                let mask = u32::from(v4.netmask);
                Ipv4Addr::from(u32::from(v4.ip) | !mask)
            });
            return Ok(Subnet {
                address: v4.ip,
                netmask: v4.netmask,
                broadcast,
            });
        }
    }
    Err(BeaconError::NoAdapter)
}

/// Running presence-beacon service: broadcasts `hello` on the selected
/// subnet every `interval` and feeds accepted beacons into a
/// `DiscoveryTable`, forwarding every status change to `events` (spec §4.2).
pub struct BeaconService {
    shutdown_tx: watch::Sender<bool>,
}

impl BeaconService {
    /// Bind the beacon UDP socket on `listen_port` and start the
    /// broadcast/receive loop. `hello` is cloned into each outgoing
    /// datagram; callers refresh its `heartbeat_interval_ms` externally if
    /// it ever changes.
    pub async fn spawn(
        listen_port: u16,
        hub_broadcast_port: u16,
        interval: Duration,
        hello: HelloBeacon,
        events: mpsc::Sender<StatusChange>,
    ) -> Result<Self, BeaconError> {
        let subnet = select_subnet()?;
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, listen_port)).await?;
        socket.set_broadcast(true)?;
        debug!(port = listen_port, broadcast = %subnet.broadcast, "beacon socket bound");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(run(
            socket,
            subnet,
            hub_broadcast_port,
            interval,
            hello,
            events,
            shutdown_rx,
        ));
        Ok(BeaconService { shutdown_tx })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run(
    socket: UdpSocket,
    subnet: Subnet,
    hub_broadcast_port: u16,
    interval: Duration,
    hello: HelloBeacon,
    events: mpsc::Sender<StatusChange>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut table = DiscoveryTable::new();
    let timeout = interval * overlay_protocol::BEACON_TIMEOUT_INTERVALS;
    let mut ticker = tokio::time::interval(interval);
    let mut buf = [0u8; BEACON_LEN + 16];
    let dest = SocketAddr::V4(SocketAddrV4::new(subnet.broadcast, hub_broadcast_port));

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() { break; }
            }
            _ = ticker.tick() => {
                if let Ok(datagram) = hello.encode() {
                    if let Err(e) = socket.send_to(&datagram, dest).await {
                        warn!(error = %e, "beacon broadcast failed");
                    }
                }
                let now = tokio::time::Instant::now().into_std();
                for change in table.sweep(now, timeout) {
                    if events.send(change).await.is_err() {
                        return;
                    }
                }
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((n, SocketAddr::V4(from))) => {
                        if !subnet.contains(*from.ip()) {
                            trace!(from = %from, "beacon from foreign subnet dropped");
                            continue;
                        }
                        match HelloBeacon::decode(&buf[..n]) {
                            Ok(beacon) => {
                                let now = tokio::time::Instant::now().into_std();
                                let change = table.observe(beacon, now);
                                if events.send(change).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => trace!(error = %e, "malformed beacon datagram"),
                        }
                    }
                    Ok((_, SocketAddr::V6(_))) => {}
                    Err(e) => warn!(error = %e, "beacon receive error"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_contains_matches_same_network_only() {
        let subnet = Subnet {
            address: Ipv4Addr::new(192, 168, 1, 20),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            broadcast: Ipv4Addr::new(192, 168, 1, 255),
        };
        assert!(subnet.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!subnet.contains(Ipv4Addr::new(192, 168, 2, 5)));
    }
}
