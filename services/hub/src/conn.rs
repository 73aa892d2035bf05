use std::collections::HashMap;
use std::time::{Duration, Instant};

use overlay_directory::ConnIdx;
use overlay_link::Frame;
use overlay_protocol::Uid;
use tokio::sync::mpsc;

/// A connection's role, fixed at accept/dial time (spec §4.6, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnRole {
    Endpoint,
    Tunnel,
}

/// Liveness state of a connection slot (spec §4.6 "On accept ... marks the
/// slot WaitingForHeartbeat").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    WaitingForHeartbeat,
    Normal,
}

/// Rolling two-second byte/packet rate counter (spec §4.6 "Local-service
/// rate accounting").
#[derive(Debug, Clone)]
pub struct RateCounter {
    window_start: Instant,
    window_bytes_in: u64,
    window_bytes_out: u64,
    window_packets_in: u64,
    window_packets_out: u64,
    pub bytes_in_total: u64,
    pub bytes_out_total: u64,
    pub packets_in_total: u64,
    pub packets_out_total: u64,
    last_rate_bytes_in: f64,
    last_rate_bytes_out: f64,
}

const RATE_WINDOW: Duration = Duration::from_secs(2);

impl RateCounter {
    fn new(now: Instant) -> Self {
        RateCounter {
            window_start: now,
            window_bytes_in: 0,
            window_bytes_out: 0,
            window_packets_in: 0,
            window_packets_out: 0,
            bytes_in_total: 0,
            bytes_out_total: 0,
            packets_in_total: 0,
            packets_out_total: 0,
            last_rate_bytes_in: 0.0,
            last_rate_bytes_out: 0.0,
        }
    }

    pub fn record_in(&mut self, bytes: usize, now: Instant) {
        self.roll(now);
        self.window_bytes_in += bytes as u64;
        self.window_packets_in += 1;
        self.bytes_in_total += bytes as u64;
        self.packets_in_total += 1;
    }

    pub fn record_out(&mut self, bytes: usize, now: Instant) {
        self.roll(now);
        self.window_bytes_out += bytes as u64;
        self.window_packets_out += 1;
        self.bytes_out_total += bytes as u64;
        self.packets_out_total += 1;
    }

    fn roll(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= RATE_WINDOW {
            let secs = elapsed.as_secs_f64().max(1e-6);
            self.last_rate_bytes_in = self.window_bytes_in as f64 / secs;
            self.last_rate_bytes_out = self.window_bytes_out as f64 / secs;
            self.window_start = now;
            self.window_bytes_in = 0;
            self.window_bytes_out = 0;
            self.window_packets_in = 0;
            self.window_packets_out = 0;
        }
    }

    #[must_use]
    pub fn bytes_in_per_sec(&self) -> f64 {
        self.last_rate_bytes_in
    }

    #[must_use]
    pub fn bytes_out_per_sec(&self) -> f64 {
        self.last_rate_bytes_out
    }
}

/// Everything the Hub tracks about one connection (spec §3 "Connection
/// record").
pub struct ConnRecord {
    pub role: ConnRole,
    pub state: ConnState,
    pub last_heartbeat_recv: Instant,
    pub remote_uid: Option<Uid>,
    /// Outbound queue to the connection's own I/O task; `None` once the
    /// connection has been torn down but its entry not yet reaped.
    pub tx: mpsc::UnboundedSender<Frame>,
    pub rate: RateCounter,
    /// Set for outbound tunnels so a dropped connection can be retried
    /// against the same configured address (spec §4.8).
    pub tunnel_name: Option<String>,
}

impl ConnRecord {
    fn new(role: ConnRole, tx: mpsc::UnboundedSender<Frame>, now: Instant) -> Self {
        ConnRecord {
            role,
            state: ConnState::WaitingForHeartbeat,
            last_heartbeat_recv: now,
            remote_uid: None,
            tx,
            rate: RateCounter::new(now),
            tunnel_name: None,
        }
    }
}

/// The Hub's connection table: one mutex over the whole map, matching
/// `DirMgr`/`MCastMgr`'s "single mutex over the whole structure" discipline
/// (spec §5).
#[derive(Default)]
pub struct ConnRegistry {
    inner: parking_lot::Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: ConnIdx,
    conns: HashMap<ConnIdx, ConnRecord>,
}

impl ConnRegistry {
    #[must_use]
    pub fn new() -> Self {
        ConnRegistry::default()
    }

    pub fn insert(&self, role: ConnRole, tx: mpsc::UnboundedSender<Frame>, now: Instant) -> ConnIdx {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.conns.insert(id, ConnRecord::new(role, tx, now));
        id
    }

    pub fn remove(&self, conn: ConnIdx) -> Option<ConnRecord> {
        self.inner.lock().conns.remove(&conn)
    }

    /// Non-blocking send to one connection's outbound queue; `false` if the
    /// connection no longer exists or its task has shut down.
    #[must_use]
    pub fn send_to(&self, conn: ConnIdx, frame: Frame) -> bool {
        let inner = self.inner.lock();
        inner.conns.get(&conn).is_some_and(|c| c.tx.send(frame).is_ok())
    }

    pub fn mark_normal(&self, conn: ConnIdx, remote_uid: Uid, now: Instant) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.conns.get_mut(&conn) {
            c.state = ConnState::Normal;
            c.remote_uid = Some(remote_uid);
            c.last_heartbeat_recv = now;
        }
    }

    pub fn touch_heartbeat(&self, conn: ConnIdx, now: Instant) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.conns.get_mut(&conn) {
            c.last_heartbeat_recv = now;
        }
    }

    /// Record the configured static-tunnel name a dialed connection belongs
    /// to, so a dropped connection can be retried against the same address
    /// (spec §4.8).
    pub fn set_tunnel_name(&self, conn: ConnIdx, name: String) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.conns.get_mut(&conn) {
            c.tunnel_name = Some(name);
        }
    }

    #[must_use]
    pub fn role(&self, conn: ConnIdx) -> Option<ConnRole> {
        self.inner.lock().conns.get(&conn).map(|c| c.role)
    }

    #[must_use]
    pub fn state(&self, conn: ConnIdx) -> Option<ConnState> {
        self.inner.lock().conns.get(&conn).map(|c| c.state)
    }

    pub fn record_in(&self, conn: ConnIdx, bytes: usize, now: Instant) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.conns.get_mut(&conn) {
            c.rate.record_in(bytes, now);
        }
    }

    pub fn record_out(&self, conn: ConnIdx, bytes: usize, now: Instant) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.conns.get_mut(&conn) {
            c.rate.record_out(bytes, now);
        }
    }

    /// Connections whose last heartbeat is older than `timeout` (spec §4.6
    /// "Liveness").
    #[must_use]
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<ConnIdx> {
        self.inner
            .lock()
            .conns
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_heartbeat_recv) >= timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    /// All endpoint-role connections currently in `Normal` state (heartbeat
    /// fan-out target list).
    #[must_use]
    pub fn normal_endpoints(&self) -> Vec<ConnIdx> {
        self.inner
            .lock()
            .conns
            .iter()
            .filter(|(_, c)| c.role == ConnRole::Endpoint && c.state == ConnState::Normal)
            .map(|(id, _)| *id)
            .collect()
    }

    #[must_use]
    pub fn normal_tunnels(&self) -> Vec<ConnIdx> {
        self.inner
            .lock()
            .conns
            .iter()
            .filter(|(_, c)| c.role == ConnRole::Tunnel && c.state == ConnState::Normal)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_connection_starts_waiting_for_heartbeat() {
        let reg = ConnRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let id = reg.insert(ConnRole::Endpoint, tx, now);
        assert_eq!(reg.state(id), Some(ConnState::WaitingForHeartbeat));
    }

    #[test]
    fn mark_normal_records_remote_uid_and_state() {
        let reg = ConnRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let id = reg.insert(ConnRole::Endpoint, tx, now);
        let uid = Uid::from_host_instance([1, 2, 3, 4, 5, 6], 2);
        reg.mark_normal(id, uid, now);
        assert_eq!(reg.state(id), Some(ConnState::Normal));
    }

    #[test]
    fn expired_reports_stale_connections_only() {
        let reg = ConnRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let id = reg.insert(ConnRole::Endpoint, tx, now);
        let later = now + Duration::from_secs(20);
        assert_eq!(reg.expired(later, Duration::from_secs(15)), vec![id]);
        assert!(reg.expired(now + Duration::from_secs(1), Duration::from_secs(15)).is_empty());
    }

    #[test]
    fn rate_counter_rolls_over_after_the_window() {
        let now = Instant::now();
        let mut rate = RateCounter::new(now);
        rate.record_in(1000, now);
        rate.record_in(1000, now + Duration::from_millis(500));
        assert_eq!(rate.bytes_in_per_sec(), 0.0, "window has not elapsed yet");
        rate.record_in(0, now + Duration::from_secs(3));
        assert!(rate.bytes_in_per_sec() > 0.0);
    }
}
