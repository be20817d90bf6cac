//! Outstanding iterator tracking
//!
//! A session keeps a weak list of its live iterators so it can move them all
//! to a private snapshot before a write transaction begins, and invalidate
//! them when another writer changes the data underneath.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tether_core::Result;
use tracing::debug;

/// Iterator that reacts to session-level transitions
pub trait TrackedIterator {
    /// Switch to a private snapshot of the collection. No-op if already
    /// detached or invalid.
    fn detach(&self) -> Result<()>;

    /// Make further reads fail with a concurrent-modification error
    fn invalidate(&self);
}

/// Weak list of a session's outstanding iterators
#[derive(Default)]
pub struct IteratorTracker {
    iterators: RefCell<Vec<Weak<dyn TrackedIterator>>>,
}

impl IteratorTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an iterator
    pub fn track(&self, iterator: Weak<dyn TrackedIterator>) {
        let mut iterators = self.iterators.borrow_mut();
        iterators.retain(|w| w.strong_count() > 0);
        iterators.push(iterator);
    }

    /// Detach every live iterator.
    ///
    /// Every iterator is attempted; the first failure is returned. Detached
    /// iterators stay tracked so a later invalidation still reaches them.
    pub fn detach_all(&self) -> Result<usize> {
        let live = self.live();
        let mut first_error = None;
        for iterator in &live {
            if let Err(e) = iterator.detach() {
                first_error.get_or_insert(e);
            }
        }
        debug!(target: "tether::session", iterators = live.len(), "Detached iterators");
        match first_error {
            Some(e) => Err(e),
            None => Ok(live.len()),
        }
    }

    /// Invalidate every live iterator and stop tracking them
    pub fn invalidate_all(&self) -> usize {
        let live = self.live();
        self.iterators.borrow_mut().clear();
        for iterator in &live {
            iterator.invalidate();
        }
        debug!(target: "tether::session", iterators = live.len(), "Invalidated iterators");
        live.len()
    }

    /// Number of tracked iterators still alive
    pub fn len(&self) -> usize {
        self.iterators
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// True if no tracked iterator is alive
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upgrade live entries and drop dead ones; the borrow is released
    /// before any iterator is called back
    fn live(&self) -> Vec<Rc<dyn TrackedIterator>> {
        let mut iterators = self.iterators.borrow_mut();
        iterators.retain(|w| w.strong_count() > 0);
        iterators.iter().filter_map(Weak::upgrade).collect()
    }
}
