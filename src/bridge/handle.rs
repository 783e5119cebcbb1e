//! Per-side registry of callable references addressed by integer IDs.
//!
//! The owning side allocates IDs from a counter; the receiving side adopts
//! entries under the peer's ID so both sides name a handle the same way.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::BridgeError;

/// Integer ID naming a handle on both sides.
pub type HandleId = u64;

pub struct HandleTable<H> {
    entries: Mutex<HashMap<HandleId, H>>,
    next_id: AtomicU64,
}

impl<H> Default for HandleTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> HandleTable<H> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a new entry under a fresh ID.
    ///
    /// IDs are never reused within the lifetime of the table.
    pub fn allocate(&self, entry: H) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, entry);
        id
    }

    /// Register an entry under an ID chosen by the peer.
    pub fn adopt(&self, id: HandleId, entry: H) -> Result<(), BridgeError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(BridgeError::DuplicateHandle(id));
        }
        entries.insert(id, entry);
        Ok(())
    }

    /// Remove an entry, handing it back to the caller.
    pub fn release(&self, id: HandleId) -> Result<H, BridgeError> {
        self.entries
            .lock()
            .remove(&id)
            .ok_or(BridgeError::NoSuchHandle(id))
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// IDs of every live entry, ascending.
    pub fn ids(&self) -> Vec<HandleId> {
        let mut ids: Vec<_> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every entry.
    pub fn drain(&self) -> Vec<(HandleId, H)> {
        self.entries.lock().drain().collect()
    }
}

impl<H: Clone> HandleTable<H> {
    /// Look up an entry. The lock is not held while the caller uses it.
    pub fn get(&self, id: HandleId) -> Result<H, BridgeError> {
        self.entries
            .lock()
            .get(&id)
            .cloned()
            .ok_or(BridgeError::NoSuchHandle(id))
    }
}
