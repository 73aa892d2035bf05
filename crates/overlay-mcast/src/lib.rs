//! `MCastMgr`: the multicast subscription slot table, packet fan-out and
//! ack-window flow control (spec §4.5).

mod manager;
mod types;

pub use manager::McastMgr;
pub use types::{ForwardResult, McastError, OutgoingMulticast, RefreshAction, Slot, Subscriber};
