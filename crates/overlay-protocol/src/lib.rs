//! Wire types for the overlay routing substrate.
//!
//! This crate has no I/O of its own — it only defines the byte layouts and
//! parse/encode routines that `overlay-link`, `overlay-directory`,
//! `overlay-mcast`, `overlay-beacon`, and the `hub`/`endpoint` services build
//! on. Keeping it I/O-free means the checksum round-trip and directory
//! grammar properties can be tested without a socket.

mod beacon;
mod constants;
mod directory;
mod e2e;
mod error;
mod header;
mod heartbeat;
mod lookup;
mod uid;

pub use beacon::{HelloBeacon, BEACON_LEN, BEACON_SYNC};
pub use constants::*;
pub use directory::{parse_directory_entries, write_directory_entry, ComponentDe, ServiceSlot};
pub use e2e::{E2eHeader, E2E_HEADER_LEN};
pub use error::ProtocolError;
pub use header::{FrameHeader, MessageType, Priority, HEADER_LEN};
pub use heartbeat::HeartbeatPayload;
pub use lookup::{LookupResponse, ServiceKind, ServiceLookupRecord, LOOKUP_RECORD_LEN};
pub use uid::{Uid, HUB_INSTANCE};
