//! `FastLookup`: the single source of truth mapping a connected endpoint's
//! UID to an opaque connection handle (spec §4.3).
//!
//! The original component is a four-level, 16-bit-per-level sparse trie
//! trading memory for O(1) lookups. Design Notes §9 allows substituting any
//! representation that preserves the single-mutex read/write contract; at
//! the UID populations this system targets (thousands, not millions) a
//! hash map meets the same O(1) bound without the trie's allocation tax, so
//! that is what backs this implementation. The public contract — lookup,
//! add (which silently replaces any previous entry for the UID), and
//! delete — is unchanged from spec §4.3.

use std::collections::HashMap;

use overlay_protocol::Uid;
use parking_lot::Mutex;

/// Thread-safe UID -> connection-handle map. All three operations take the
/// same single lock, matching §5's "one mutex over the whole trie."
pub struct FastLookup<T> {
    inner: Mutex<HashMap<Uid, T>>,
}

impl<T: Clone> Default for FastLookup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FastLookup<T> {
    #[must_use]
    pub fn new() -> Self {
        FastLookup {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Insert `value` for `uid`. If `uid` already has an entry it is
    /// replaced first, so the map never holds two entries for one UID
    /// (spec §4.3 "Add semantics").
    pub fn add(&self, uid: Uid, value: T) {
        self.inner.lock().insert(uid, value);
    }

    #[must_use]
    pub fn lookup(&self, uid: Uid) -> Option<T> {
        self.inner.lock().get(&uid).cloned()
    }

    pub fn delete(&self, uid: Uid) {
        self.inner.lock().remove(&uid);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
