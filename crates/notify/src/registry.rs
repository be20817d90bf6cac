//! Observer registry
//!
//! Holds `(observer, listener)` pairs without keeping observers alive. The
//! entry list is copy-on-write: [`ObserverRegistry::for_each`] walks a
//! snapshot, so listeners may add, remove or clear while a pass is running.
//!
//! - A removed entry is flagged, and an in-progress pass skips it.
//! - `clear()` stops an in-progress pass; a later `add` re-enables it.
//! - Entries whose observer was dropped are pruned when a pass reaches them.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::debug;

struct Entry<O: ?Sized, L> {
    observer: Weak<O>,
    listener: L,
    removed: Cell<bool>,
}

impl<O: ?Sized, L: PartialEq> Entry<O, L> {
    fn observes(&self, observer: &Weak<O>) -> bool {
        same_observer(&self.observer, observer)
    }

    fn matches(&self, observer: &Weak<O>, listener: &L) -> bool {
        self.observes(observer) && self.listener == *listener
    }
}

fn same_observer<O: ?Sized>(a: &Weak<O>, b: &Weak<O>) -> bool {
    // Compare addresses only; vtable pointers of the same type may differ
    a.as_ptr() as *const () == b.as_ptr() as *const ()
}

/// Weak observer list for one observable.
///
/// Thread-confined: built on `Rc`, so neither `Send` nor `Sync`.
pub struct ObserverRegistry<O: ?Sized, L> {
    entries: RefCell<Rc<Vec<Rc<Entry<O, L>>>>>,
    cleared: Cell<bool>,
}

impl<O: ?Sized, L> Default for ObserverRegistry<O, L> {
    fn default() -> Self {
        ObserverRegistry {
            entries: RefCell::new(Rc::new(Vec::new())),
            cleared: Cell::new(false),
        }
    }
}

impl<O: ?Sized, L: PartialEq> ObserverRegistry<O, L> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `observer`.
    ///
    /// Adding an equal pair twice is a no-op. Returns true if the pair was
    /// added.
    pub fn add(&self, observer: &Rc<O>, listener: L) -> bool {
        let weak = Rc::downgrade(observer);
        self.cleared.set(false);
        if self.entries.borrow().iter().any(|e| e.matches(&weak, &listener)) {
            return false;
        }
        self.update(|entries| {
            entries.push(Rc::new(Entry {
                observer: weak,
                listener,
                removed: Cell::new(false),
            }))
        });
        true
    }

    /// Unregister one pair. Returns true if it was registered.
    pub fn remove(&self, observer: &Rc<O>, listener: &L) -> bool {
        let weak = Rc::downgrade(observer);
        self.remove_where(|e| e.matches(&weak, listener)) > 0
    }

    /// Unregister every listener of `observer`. Returns how many were removed.
    pub fn remove_observer(&self, observer: &Rc<O>) -> usize {
        let weak = Rc::downgrade(observer);
        self.remove_where(|e| e.observes(&weak))
    }

    /// Unregister everything and stop any pass in progress
    pub fn clear(&self) {
        self.cleared.set(true);
        let old = self.entries.replace(Rc::new(Vec::new()));
        for entry in old.iter() {
            entry.removed.set(true);
        }
    }

    /// Call `f` with every live observer and its listener, in registration
    /// order.
    ///
    /// The observer is upgraded for the duration of the call. Entries removed
    /// during the pass are skipped; `clear()` ends it.
    pub fn for_each(&self, mut f: impl FnMut(&Rc<O>, &L)) {
        let snapshot = Rc::clone(&self.entries.borrow());
        for entry in snapshot.iter() {
            if self.cleared.get() {
                break;
            }
            if entry.removed.get() {
                continue;
            }
            match entry.observer.upgrade() {
                Some(observer) => f(&observer, &entry.listener),
                None => self.prune(entry),
            }
        }
    }

    /// Number of registered pairs, including any whose observer is gone but
    /// not yet pruned
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn prune(&self, dead: &Rc<Entry<O, L>>) {
        dead.removed.set(true);
        self.update(|entries| entries.retain(|e| !Rc::ptr_eq(e, dead)));
        debug!(target: "tether::notify", remaining = self.len(), "Pruned dropped observer");
    }

    fn remove_where(&self, pred: impl Fn(&Entry<O, L>) -> bool) -> usize {
        let mut removed = 0;
        self.update(|entries| {
            entries.retain(|e| {
                if pred(e) {
                    e.removed.set(true);
                    removed += 1;
                    false
                } else {
                    true
                }
            })
        });
        removed
    }

    /// Copy-on-write: a pass holding the old list is not affected
    fn update(&self, f: impl FnOnce(&mut Vec<Rc<Entry<O, L>>>)) {
        let mut entries = self.entries.borrow_mut();
        let mut next: Vec<_> = entries.iter().cloned().collect();
        f(&mut next);
        *entries = Rc::new(next);
    }
}

impl<O: ?Sized, L> fmt::Debug for ObserverRegistry<O, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("entries", &self.entries.borrow().len())
            .field("cleared", &self.cleared.get())
            .finish()
    }
}
