//! Shared endpoint state: the service table and the current uplink's
//! outbound channel, both protected by their own lock so a higher-layer
//! caller never blocks on network I/O (spec §5 "a service-table mutex
//! protects the per-port records").

use parking_lot::Mutex;
use overlay_link::Frame;
use overlay_protocol::Uid;
use tokio::sync::mpsc;

use crate::config::EndpointConfig;
use crate::services::ServiceTable;

pub struct EndpointState {
    pub config: EndpointConfig,
    pub local_uid: Uid,
    pub services: Mutex<ServiceTable>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl EndpointState {
    #[must_use]
    pub fn new(config: EndpointConfig, local_uid: Uid) -> std::sync::Arc<Self> {
        std::sync::Arc::new(EndpointState {
            config,
            local_uid,
            services: Mutex::new(ServiceTable::new()),
            outbound: Mutex::new(None),
        })
    }

    pub(crate) fn attach_session(&self, tx: mpsc::UnboundedSender<Frame>) {
        *self.outbound.lock() = Some(tx);
    }

    pub(crate) fn detach_session(&self) {
        *self.outbound.lock() = None;
        self.services.lock().on_link_down();
    }

    /// Enqueue a frame on the current uplink session, if one is connected.
    pub fn send(&self, frame: Frame) -> Result<(), crate::error::EndpointError> {
        let guard = self.outbound.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| crate::error::EndpointError::NoHub),
            None => Err(crate::error::EndpointError::NoHub),
        }
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.outbound.lock().is_some()
    }
}

/// Derive a stable-enough six-byte host id when `parameters.uid` does not
/// pin one explicitly. Real deployments are expected to set it (spec §6);
/// this fallback only keeps a bare `endpoint.toml` usable for local testing.
#[must_use]
pub fn derive_ephemeral_host_id() -> [u8; 6] {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::process::id().hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    let digest = hasher.finish().to_be_bytes();
    let mut host = [0u8; 6];
    host.copy_from_slice(&digest[..6]);
    host
}

/// Pick a dynamic instance `>= 2` for this host (instance 0 is reserved for
/// Hubs, instance 1 is reserved; spec §3 "UID"). Derived from the same
/// process/thread entropy as the host id itself, so two endpoints sharing a
/// host still end up with distinct instances with overwhelming probability.
#[must_use]
pub fn derive_dynamic_instance(host: &[u8; 6]) -> u16 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    host.hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);
    let digest = hasher.finish();
    2 + u16::try_from(digest % u64::from(u16::MAX - 2)).unwrap_or(0)
}
