//! Default tunables (spec §4, §8, §9). All are overridable per-process via
//! the `[parameters]` config section; these are the defaults a fresh config
//! falls back to.

/// Two-byte sync prefix identifying the frame protocol on stream sockets.
pub const SYNC_WORD: u16 = 0x53_4e; // "SN"

/// Default endpoint-facing stream port.
pub const DEFAULT_ENDPOINT_PORT: u16 = 7932;
/// Default Hub-to-Hub tunnel stream port.
pub const DEFAULT_TUNNEL_PORT: u16 = 7934;
/// Base UDP port for presence beacons; instance `i` listens on `base + i`.
pub const DEFAULT_BEACON_BASE_PORT: u16 = 8040;

/// Heartbeat cadence.
pub const HEARTBEAT_INTERVAL_MS: u64 = 5_000;
/// Number of missed intervals before a connection is considered dead.
pub const HEARTBEAT_TIMEOUT_INTERVALS: u32 = 3;
/// Every Nth heartbeat carries the sender's full directory.
pub const HEARTBEAT_DIRECTORY_EVERY: u32 = 10;

/// Multicast flow-control window (spec §3, §4.5, §8).
pub const MCAST_WINDOW: u8 = 8;
/// Force-unstick timeout once the window is full and nothing has been acked.
pub const MCAST_FORCE_UNSTICK_MS: u64 = 5_000;

/// Presence beacon broadcast cadence.
pub const BEACON_INTERVAL_MS: u64 = 2_000;
/// Discovery-table entry timeout, expressed in beacon intervals.
pub const BEACON_TIMEOUT_INTERVALS: u32 = 4;

/// Remote-service lookup state machine timers (spec §4.7).
pub const LOOKUP_INTERVAL_MS: u64 = 2_000;
pub const REFRESH_INTERVAL_MS: u64 = 5_000;
pub const REFRESH_TIMEOUT_MS: u64 = 15_000;
pub const MAX_CLOSING_RETRIES: u32 = 3;

/// Tunnel reconnect backoff (spec §4.8).
pub const TUNNEL_RECONNECT_BACKOFF_MS: u64 = 5_000;

/// Resolves Design Notes §9's 400000-vs-300000 ambiguity: one configurable
/// cap per record kind, default below, enforced by `Link`'s oversize check.
pub const DEFAULT_MAX_MESSAGE_BYTES: u32 = 300_000;

/// Maximum slash-separated path length in a directory entry service name.
pub const MAX_SERVICE_PATH_LEN: usize = 255;

/// Bound on the subscription slot table (spec §4.5: "on the order of 10^5").
/// A multicast service's Hub-assigned port *is* its slot index (the
/// publisher stamps it into the e2e header's 2-byte source port field when
/// sending), so the practical ceiling is `u16::MAX`, not the original's
/// literal 100,000 — see DESIGN.md for this ambiguity's resolution.
pub const DEFAULT_MCAST_SLOT_CAPACITY: usize = 65_000;
