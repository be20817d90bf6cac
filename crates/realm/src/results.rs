//! Query results and snapshots
//!
//! [`Results`] is a live view over a table: its size and contents follow the
//! data. A snapshot freezes the rows at the moment it is taken and never
//! changes afterwards.
//!
//! Observers subscribe with a weak reference. A results object created from a
//! query starts unloaded; the first notification after loading is delivered
//! even when it is empty, later empty notifications are dropped.

use crate::iterator::LiveIterator;
use crate::row::Row;
use crate::session::Session;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tether_core::{ChangeDescriptor, Error, NativeHandle, ResourceKind, Result};
use tether_notify::{ChangeDispatcher, ChangeListener};
use tether_reclaim::NativeResource;
use tracing::trace;

/// Listener type accepted by [`Results::subscribe`]
pub type ResultsListener = ChangeListener<dyn Any>;

struct ResultsInner {
    session: Session,
    resource: RefCell<NativeResource>,
    dispatcher: ChangeDispatcher<dyn Any>,
    snapshot: bool,
}

/// Collection of rows, live or frozen.
///
/// Cheap to clone; clones share the native collection and its listeners.
#[derive(Clone)]
pub struct Results {
    inner: Rc<ResultsInner>,
}

impl Results {
    pub(crate) fn new(session: Session, resource: NativeResource, snapshot: bool) -> Self {
        let engine = session.engine().clone();
        let dispatcher = if snapshot {
            ChangeDispatcher::loaded(engine)
        } else {
            ChangeDispatcher::unloaded(engine)
        };
        Results {
            inner: Rc::new(ResultsInner {
                session,
                resource: RefCell::new(resource),
                dispatcher,
                snapshot,
            }),
        }
    }

    /// Session this collection belongs to
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// True for frozen snapshots
    pub fn is_snapshot(&self) -> bool {
        self.inner.snapshot
    }

    /// True once the collection has loaded
    pub fn is_loaded(&self) -> bool {
        self.inner.dispatcher.is_loaded()
    }

    /// Load the collection now, notifying listeners if it was not loaded yet
    pub fn load(&self) -> Result<()> {
        self.handle()?;
        self.inner.dispatcher.load();
        Ok(())
    }

    /// Number of rows
    pub fn size(&self) -> Result<usize> {
        let handle = self.handle()?;
        Ok(self.inner.session.engine().results_size(handle)?)
    }

    /// True if the collection has no rows
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Row at `index`.
    ///
    /// # Errors
    ///
    /// `IndexOutOfBounds` if `index >= size()`.
    pub fn get(&self, index: usize) -> Result<Row> {
        let handle = self.handle()?;
        let engine = self.inner.session.engine();
        let size = engine.results_size(handle)?;
        if index >= size {
            return Err(Error::IndexOutOfBounds { index, size });
        }
        let allocation = engine.results_row(handle, index)?;
        let resource =
            self.inner
                .session
                .context()
                .register(allocation, ResourceKind::Row, false)?;
        Ok(Row::new(self.inner.session.clone(), resource))
    }

    /// Freeze the current rows
    pub fn snapshot(&self) -> Result<Results> {
        let handle = self.handle()?;
        let allocation = self.inner.session.engine().create_snapshot(handle)?;
        let resource = self
            .inner
            .session
            .context()
            .register(allocation, ResourceKind::Snapshot, false)?;
        Ok(Results::new(self.inner.session.clone(), resource, true))
    }

    /// Iterate the rows.
    ///
    /// Iterators over live results are tracked by the session: they are
    /// detached when a write transaction begins and invalidated on a remote
    /// change. Iterators over snapshots are not tracked.
    pub fn iter(&self) -> Result<LiveIterator> {
        self.handle()?;
        LiveIterator::new(self.clone())
    }

    /// Register `listener` for `observer`. Returns false if already
    /// registered.
    ///
    /// Only a weak reference to `observer` is kept; once it is dropped the
    /// listener is no longer called.
    pub fn subscribe<T: Any>(&self, observer: &Rc<T>, listener: ResultsListener) -> bool {
        let observer: Rc<dyn Any> = observer.clone();
        self.inner.dispatcher.subscribe(&observer, listener)
    }

    /// Unregister one listener of `observer`
    pub fn unsubscribe<T: Any>(&self, observer: &Rc<T>, listener: &ResultsListener) -> bool {
        let observer: Rc<dyn Any> = observer.clone();
        self.inner.dispatcher.unsubscribe(&observer, listener)
    }

    /// Unregister every listener of `observer`
    pub fn unsubscribe_observer<T: Any>(&self, observer: &Rc<T>) -> usize {
        let observer: Rc<dyn Any> = observer.clone();
        self.inner.dispatcher.unsubscribe_observer(&observer)
    }

    /// Unregister every listener
    pub fn unsubscribe_all(&self) {
        self.inner.dispatcher.unsubscribe_all()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.dispatcher.listener_count()
    }

    /// Deliver a change reported by the engine.
    ///
    /// `ChangeDescriptor::EMPTY` means "nothing changed". Notifications for a
    /// closed collection, or one whose session is closed, are dropped.
    ///
    /// This only reaches listeners. Commits made outside this session must
    /// also be signalled through [`Session::on_remote_change`] so that
    /// outstanding iterators are invalidated.
    pub fn notify_change(&self, descriptor: ChangeDescriptor) {
        if let Err(e) = self.handle() {
            trace!(
                target: "tether::notify",
                descriptor = ?descriptor,
                error = %e,
                "Dropped notification for stale results"
            );
            return;
        }
        self.inner.dispatcher.notify_change(descriptor)
    }

    /// Free the native collection now
    pub fn close(&self) -> Result<()> {
        self.inner.resource.borrow_mut().close()
    }

    /// Native handle of the collection
    pub fn handle(&self) -> Result<NativeHandle> {
        self.inner.session.ensure_open()?;
        self.inner.resource.borrow().handle()
    }
}

impl fmt::Debug for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("snapshot", &self.inner.snapshot)
            .field("resource", &*self.inner.resource.borrow())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}
