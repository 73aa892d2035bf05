//! `DirMgr`: per-connection directory entry storage, DE diffing, and
//! service lookup (spec §4.4).

mod manager;
mod slots;
mod types;

pub use manager::DirMgr;
pub use slots::SlotAllocator;
pub use types::{
    CachedLookup, ComponentRecord, ConnIdx, LookupOutcome, LookupQuery, ProcessDeOutcome,
    ServiceRecord,
};
