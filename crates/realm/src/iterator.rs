//! Live iterators
//!
//! ## States
//!
//! ```text
//! Live ----(transaction begins)----> Detached
//! Live | Detached --(remote change)-> Invalid
//! ```
//!
//! A live iterator reads the collection as it is now. Once detached it reads a
//! private snapshot taken at the moment of detaching, so rows added by the
//! session's own transaction are not visited and positions do not shift. An
//! invalid iterator fails every read with `ConcurrentModification`.

use crate::results::Results;
use crate::row::Row;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use tether_core::{Error, Result};
use tether_notify::TrackedIterator;
use tracing::trace;

/// Iterator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Reading the live collection
    Live,
    /// Reading a private snapshot
    Detached,
    /// Reads fail
    Invalid,
}

struct IteratorInner {
    source: Results,
    detached: RefCell<Option<Results>>,
    state: Cell<IteratorState>,
    position: Cell<usize>,
}

impl IteratorInner {
    fn current(&self) -> Results {
        match &*self.detached.borrow() {
            Some(snapshot) => snapshot.clone(),
            None => self.source.clone(),
        }
    }

    fn check(&self) -> Result<()> {
        self.source.session().ensure_open()?;
        if self.state.get() == IteratorState::Invalid {
            return Err(Error::concurrent(
                "the collection was changed by another writer while iterating",
            ));
        }
        Ok(())
    }
}

impl TrackedIterator for IteratorInner {
    fn detach(&self) -> Result<()> {
        if self.state.get() != IteratorState::Live {
            return Ok(());
        }
        let snapshot = self.source.snapshot()?;
        *self.detached.borrow_mut() = Some(snapshot);
        self.state.set(IteratorState::Detached);
        trace!(target: "tether::session", position = self.position.get(), "Iterator detached");
        Ok(())
    }

    fn invalidate(&self) {
        self.state.set(IteratorState::Invalid);
        self.detached.borrow_mut().take();
    }
}

/// Iterator over the rows of a [`Results`].
///
/// Yields `Result<Row>`; an invalidated iterator yields an error on every
/// call, so stop at the first `Err`.
pub struct LiveIterator {
    inner: Rc<IteratorInner>,
}

impl LiveIterator {
    pub(crate) fn new(source: Results) -> Result<Self> {
        let session = source.session().clone();
        let tracked = !source.is_snapshot();
        let inner = Rc::new(IteratorInner {
            source,
            detached: RefCell::new(None),
            state: Cell::new(IteratorState::Live),
            position: Cell::new(0),
        });

        if tracked {
            if session.is_in_transaction() {
                inner.detach()?;
            }
            let weak: Weak<dyn TrackedIterator> = Rc::downgrade(&inner) as Weak<dyn TrackedIterator>;
            session.tracker().track(weak);
        }
        Ok(LiveIterator { inner })
    }

    /// Current state
    pub fn state(&self) -> IteratorState {
        self.inner.state.get()
    }

    /// Index of the next row to be returned
    pub fn position(&self) -> usize {
        self.inner.position.get()
    }

    /// True if another row is available.
    ///
    /// # Errors
    ///
    /// `ConcurrentModification` once invalidated; `StaleResource` once the
    /// session is closed.
    pub fn has_next(&self) -> Result<bool> {
        self.inner.check()?;
        Ok(self.inner.position.get() < self.inner.current().size()?)
    }

    /// Number of rows in the collection being iterated
    pub fn size(&self) -> Result<usize> {
        self.inner.check()?;
        self.inner.current().size()
    }
}

impl Iterator for LiveIterator {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        match self.has_next() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => return Some(Err(e)),
        }
        let index = self.inner.position.get();
        self.inner.position.set(index + 1);
        Some(self.inner.current().get(index))
    }
}

impl fmt::Debug for LiveIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveIterator")
            .field("state", &self.state())
            .field("position", &self.position())
            .finish()
    }
}
