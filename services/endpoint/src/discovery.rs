//! Hub discovery and priority-ordered selection (spec §4.2, §4.7). Wraps
//! `overlay_beacon::BeaconService`, folding its `StatusChange` stream into a
//! small cache this endpoint can query for "who's the best Hub right now".

use std::collections::HashMap;
use std::time::Duration;

use overlay_beacon::{BeaconService, DiscoveredHub, StatusChange};
use overlay_protocol::{HelloBeacon, Uid};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::EndpointError;

pub struct Discovery {
    known: HashMap<Uid, DiscoveredHub>,
    events: mpsc::Receiver<StatusChange>,
    _service: BeaconService,
}

impl Discovery {
    pub async fn start(config: &EndpointConfig, local_uid: Uid) -> Result<Self, EndpointError> {
        let (tx, rx) = mpsc::channel(64);
        let hello = HelloBeacon {
            address: [0, 0, 0, 0],
            uid: local_uid,
            app_name: config.app_name.clone(),
            component_type: "Endpoint".to_owned(),
            priority: 0,
            heartbeat_interval_ms: u16::try_from(config.heartbeat_interval_ms).unwrap_or(u16::MAX),
        };
        let interval = Duration::from_millis(overlay_protocol::BEACON_INTERVAL_MS);
        let service = BeaconService::spawn(config.beacon_port, config.beacon_port, interval, hello, tx)
            .await
            .map_err(|e| EndpointError::Tls(format!("beacon startup failed: {e}")))?;
        Ok(Discovery {
            known: HashMap::new(),
            events: rx,
            _service: service,
        })
    }

    /// Fold every pending status change into the local cache without
    /// blocking; call this once per background tick.
    pub fn drain(&mut self) {
        while let Ok(change) = self.events.try_recv() {
            match change {
                StatusChange::Up(hub) => {
                    debug!(uid = %hub.uid, app = %hub.app_name, "hub discovered");
                    self.known.insert(hub.uid, hub);
                }
                StatusChange::Down(uid) => {
                    self.known.remove(&uid);
                }
                StatusChange::Solicitation(_) => {}
            }
        }
    }

    /// Best Hub by the configured priority list (first name in the list
    /// that is currently visible), or the lowest-UID visible Hub if no
    /// priority list is configured.
    #[must_use]
    pub fn pick_best(&self, hub_priority: &[String]) -> Option<DiscoveredHub> {
        if hub_priority.is_empty() {
            return self.known.values().min_by_key(|h| h.uid).cloned();
        }
        hub_priority.iter().find_map(|name| self.known.values().find(|h| &h.app_name == name).cloned())
    }

    /// A visible Hub ranked strictly better than `current_app_name` in
    /// `hub_priority`, used to drive reversion (spec §4.7 "Background
    /// tasks"). Returns `None` if no priority list is configured.
    #[must_use]
    pub fn higher_priority_available(&self, hub_priority: &[String], current_app_name: &str) -> Option<DiscoveredHub> {
        if hub_priority.is_empty() {
            return None;
        }
        let current_rank = hub_priority.iter().position(|n| n == current_app_name);
        for (rank, name) in hub_priority.iter().enumerate() {
            if let Some(current) = current_rank {
                if rank >= current {
                    break;
                }
            }
            if let Some(hub) = self.known.values().find(|h| &h.app_name == name) {
                return Some(hub.clone());
            }
        }
        None
    }
}
