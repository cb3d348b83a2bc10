//! Name-to-node lookup cache.
//!
//! The volume has no directory block, so an uncached lookup scans node
//! headers. The cache keeps the hottest names resident along with their
//! decoded headers, so a hit answers without device I/O. Every hit bumps
//! a counter, eviction takes the coldest slot, and sync halves every
//! counter so stale entries eventually lose to fresh traffic.


use crate::layout::NodeRecord;

/// One cached node: its number and the last header written or read.
#[derive(Debug, Clone)]
struct Slot {
    node: u32,
    record: NodeRecord,
    hits: u32,
}

/// Fixed-capacity lookup cache over decoded node headers.
#[derive(Debug)]
pub struct PathIndex {
    slots: Vec<Slot>,
    capacity: usize,
}

impl PathIndex {
    /// A cache holding at most `capacity` entries. Capacity zero
    /// disables caching entirely.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Looks up `name`, counting the hit and returning the cached node
    /// and header. `mode_mask` of zero matches any entry; otherwise the
    /// entry's mode must share a bit with the mask.
    pub fn find(&mut self, name: &str, mode_mask: u32) -> Option<(u32, NodeRecord)> {
        let slot = self.slots.iter_mut().find(|slot| {
            slot.record.name == name && (mode_mask == 0 || slot.record.mode & mode_mask != 0)
        })?;
        slot.hits = slot.hits.saturating_add(1);
        Some((slot.node, slot.record.clone()))
    }

    /// Cached header for `node`, if present. Does not count as a hit.
    #[must_use]
    pub fn get(&self, node: u32) -> Option<&NodeRecord> {
        self.slots
            .iter()
            .find(|slot| slot.node == node)
            .map(|slot| &slot.record)
    }

    /// Inserts or refreshes the cached header for `node`, evicting the
    /// entry with the fewest hits when full. A rename resets the hit
    /// counter; same-name refreshes keep it.
    pub fn insert(&mut self, node: u32, record: &NodeRecord) {
        if self.capacity == 0 {
            return;
        }
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.node == node) {
            if slot.record.name != record.name {
                slot.hits = 0;
            }
            slot.record = record.clone();
            return;
        }
        if self.slots.len() == self.capacity {
            let coldest = self
                .slots
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.hits)
                .map(|(i, _)| i);
            if let Some(i) = coldest {
                self.slots.swap_remove(i);
            }
        }
        self.slots.push(Slot {
            node,
            record: record.clone(),
            hits: 0,
        });
    }

    /// Drops the binding for `node`, if cached.
    pub fn remove(&mut self, node: u32) {
        self.slots.retain(|slot| slot.node != node);
    }

    /// Drops every binding.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Halves every hit counter. Called on sync so long-idle entries do
    /// not pin their slots forever.
    pub fn decay(&mut self) {
        for slot in &mut self.slots {
            slot.hits /= 2;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
