//! Weak-reference record pool
//!
//! Each registered wrapper gets a slot holding a self-sufficient copy of
//! everything needed to free its native resource. The reclaimer only ever
//! reads the slot, never the wrapper, so a wrapper can be gone by the time its
//! record is drained.
//!
//! # Layout
//!
//! ```text
//! slots: [ s0 | s1 | s2 | s3 ]      grow-only, sized to the high-water mark
//! free:  [ 1 ]                      stack of reusable slot indices
//! head:  2 -> 0 -> 3 -> None        doubly linked active list
//! ```
//!
//! Insert and remove are O(1). A removed slot is not cleared; its contents
//! are overwritten the next time the index is handed out.

use tether_core::{FinalizerId, NativeHandle, ResourceKind};

/// Copy of the identity of a native resource, stored independently of the
/// wrapper that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceRecord {
    /// Handle to free
    pub handle: NativeHandle,
    /// Finalizer paired with `handle`
    pub finalizer: FinalizerId,
    /// Kind, selecting the deferred queue
    pub kind: ResourceKind,
    /// Root resources are always freed immediately
    pub is_root: bool,
}

/// Index of a record inside a [`RecordPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(usize);

impl SlotIndex {
    /// Raw slot position
    pub fn get(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Slot {
    record: ReferenceRecord,
    prev: Option<usize>,
    next: Option<usize>,
    occupied: bool,
}

/// Grow-only slot array with a free-index stack and an intrusive active list
#[derive(Debug, Default)]
pub struct RecordPool {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    live: usize,
}

impl RecordPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty pool with room for `capacity` records before growing
    pub fn with_capacity(capacity: usize) -> Self {
        RecordPool {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            head: None,
            live: 0,
        }
    }

    /// Store a record and link it into the active list
    pub fn insert(&mut self, record: ReferenceRecord) -> SlotIndex {
        let slot = Slot {
            record,
            prev: None,
            next: self.head,
            occupied: true,
        };

        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = slot;
                index
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            self.slots[old_head].prev = Some(index);
        }
        self.head = Some(index);
        self.live += 1;
        SlotIndex(index)
    }

    /// Unlink a record and make its slot reusable.
    ///
    /// Returns `None` if the slot holds no active record.
    pub fn remove(&mut self, slot: SlotIndex) -> Option<ReferenceRecord> {
        let index = slot.0;
        let (prev, next, record) = match self.slots.get(index) {
            Some(s) if s.occupied => (s.prev, s.next, s.record),
            _ => return None,
        };

        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.slots[n].prev = prev;
        }

        self.slots[index].occupied = false;
        self.free.push(index);
        self.live -= 1;
        Some(record)
    }

    /// Record stored in an active slot
    pub fn get(&self, slot: SlotIndex) -> Option<&ReferenceRecord> {
        self.slots
            .get(slot.0)
            .filter(|s| s.occupied)
            .map(|s| &s.record)
    }

    /// Number of active records
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if no record is active
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated (the high-water mark of live records)
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Active records, most recently inserted first
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            pool: self,
            cursor: self.head,
        }
    }
}

/// Iterator over the active list of a [`RecordPool`]
pub struct Iter<'a> {
    pool: &'a RecordPool,
    cursor: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (SlotIndex, &'a ReferenceRecord);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let pool = self.pool;
        let slot = &pool.slots[index];
        self.cursor = slot.next;
        Some((SlotIndex(index), &slot.record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(raw: i64) -> ReferenceRecord {
        ReferenceRecord {
            handle: NativeHandle::new(raw),
            finalizer: FinalizerId::new(1),
            kind: ResourceKind::Row,
            is_root: false,
        }
    }

    fn handles(pool: &RecordPool) -> Vec<i64> {
        pool.iter().map(|(_, r)| r.handle.raw()).collect()
    }

    #[test]
    fn test_insert_links_at_head() {
        let mut pool = RecordPool::new();
        pool.insert(record(1));
        pool.insert(record(2));
        pool.insert(record(3));

        assert_eq!(pool.len(), 3);
        assert_eq!(handles(&pool), vec![3, 2, 1]);
    }

    #[test]
    fn test_remove_middle_head_and_tail() {
        let mut pool = RecordPool::new();
        let a = pool.insert(record(1));
        let b = pool.insert(record(2));
        let c = pool.insert(record(3));

        assert_eq!(pool.remove(b).unwrap().handle.raw(), 2);
        assert_eq!(handles(&pool), vec![3, 1]);

        assert_eq!(pool.remove(c).unwrap().handle.raw(), 3);
        assert_eq!(handles(&pool), vec![1]);

        assert_eq!(pool.remove(a).unwrap().handle.raw(), 1);
        assert!(pool.is_empty());
        assert_eq!(handles(&pool), Vec::<i64>::new());
    }

    #[test]
    fn test_remove_twice_returns_none() {
        let mut pool = RecordPool::new();
        let a = pool.insert(record(1));
        assert!(pool.remove(a).is_some());
        assert!(pool.remove(a).is_none());
        assert!(pool.get(a).is_none());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_free_slot_is_reused() {
        let mut pool = RecordPool::new();
        let a = pool.insert(record(1));
        pool.insert(record(2));
        pool.remove(a);

        let c = pool.insert(record(3));
        assert_eq!(c, a);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.get(c).unwrap().handle.raw(), 3);
    }

    #[test]
    fn test_capacity_tracks_high_water_mark() {
        let mut pool = RecordPool::with_capacity(4);
        let mut live = Vec::new();
        for round in 0..100 {
            live.push(pool.insert(record(round)));
            if live.len() > 5 {
                let slot = live.remove(0);
                pool.remove(slot);
            }
        }
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.capacity(), 6);
    }
}
