//! Shared Hub state (spec §3 "Hub state", §5 "Concurrency model"). Every
//! field is its own independently-locked component; nothing here ever holds
//! two of those locks at once.

use std::collections::HashMap;
use std::sync::Arc;

use overlay_directory::DirMgr;
use overlay_mcast::McastMgr;
use overlay_protocol::Uid;
use overlay_trie::FastLookup;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::HubConfig;
use crate::conn::ConnRegistry;
use crate::slot_adapter::McastSlotAdapter;

pub type ConnIdx = overlay_directory::ConnIdx;

/// Everything a connection task, the dispatcher, the tunnel manager, and the
/// liveness sweep all reach through `Arc<HubState>` (spec §5).
pub struct HubState {
    pub config: HubConfig,
    pub local_uid: Uid,
    pub conns: ConnRegistry,
    pub dir: DirMgr,
    pub mcast: Arc<McastMgr>,
    pub slot_adapter: McastSlotAdapter,
    /// Maps a component's UID to the connection currently carrying it, for
    /// e2e routing (spec §4.6 "e2e: FastLookup the destination UID").
    pub trie: FastLookup<ConnIdx>,
    /// One `Notify` per live connection so the liveness sweep can wake a
    /// blocked connection task without tearing the registry down itself
    /// (spec §4.6 "Liveness").
    pub close_signals: Mutex<HashMap<ConnIdx, Arc<Notify>>>,
}

impl HubState {
    #[must_use]
    pub fn new(config: HubConfig, local_uid: Uid) -> Arc<Self> {
        let mcast = Arc::new(McastMgr::new(overlay_protocol::DEFAULT_MCAST_SLOT_CAPACITY));
        let slot_adapter = McastSlotAdapter(mcast.clone());
        Arc::new(HubState {
            config,
            local_uid,
            conns: ConnRegistry::new(),
            dir: DirMgr::new(),
            mcast,
            slot_adapter,
            trie: FastLookup::new(),
            close_signals: Mutex::new(HashMap::new()),
        })
    }

    pub fn register_close_signal(&self, conn: ConnIdx, notify: Arc<Notify>) {
        self.close_signals.lock().insert(conn, notify);
    }

    pub fn notify_close(&self, conn: ConnIdx) {
        if let Some(notify) = self.close_signals.lock().remove(&conn) {
            notify.notify_one();
        }
    }

    /// Hub's own directory entry, appended to every `BuildDirectory` result
    /// (spec §4.4 "BuildDirectory").
    #[must_use]
    pub fn own_de(&self) -> overlay_protocol::ComponentDe {
        overlay_protocol::ComponentDe {
            uid: self.local_uid,
            app_name: self.config.app_name.clone(),
            component_type: "Hub".to_owned(),
            services: Vec::new(),
            raw: Vec::new(),
        }
    }

    /// Tear down everything a closed connection held: its component
    /// directory entries (and the multicast slots they owned), its subscriber
    /// registrations, and its FastLookup entry (spec §3 "Lifecycles").
    pub fn cleanup_connection(&self, conn: ConnIdx) {
        if let Some(record) = self.conns.remove(conn) {
            if let Some(uid) = record.remote_uid {
                self.trie.delete(uid);
                self.mcast.remove_subscriber(uid, None);
            }
        }
        self.dir.remove_connection(conn, &self.slot_adapter);
        self.close_signals.lock().remove(&conn);
    }
}

/// Derive a stable-enough six-byte host id when `config.uid` does not pin
/// one explicitly. Real deployments are expected to set `parameters.uid`
/// (spec §6); this fallback only keeps a bare `hub.toml` usable for local
/// testing.
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
