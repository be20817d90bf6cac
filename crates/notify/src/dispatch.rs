//! Change dispatch for observed collections
//!
//! ## Load protocol
//!
//! ```text
//! Unloaded --(empty descriptor)--> Loaded, deliver one empty Initial set
//! Unloaded --(any change)-------> Loaded, deliver it as Initial
//! Loaded   --(empty change)-----> suppressed
//! Loaded   --(any change)-------> deliver it as Update
//! ```
//!
//! The first notification after a collection loads tells listeners the data
//! is now available, even when nothing changed. Later empty changes carry no
//! information and are dropped.

use crate::changeset::{ChangeSet, ChangeSetState};
use crate::registry::ObserverRegistry;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tether_core::{ChangeDescriptor, NativeEngine};
use tracing::trace;

/// Callback invoked with the observer and the change.
///
/// Two listeners are equal only if they share the same closure allocation, so
/// keep a clone to unsubscribe later.
pub struct ChangeListener<O: ?Sized> {
    callback: Rc<dyn Fn(&O, &ChangeSet)>,
}

impl<O: ?Sized> ChangeListener<O> {
    /// Wrap a closure
    pub fn new(callback: impl Fn(&O, &ChangeSet) + 'static) -> Self {
        ChangeListener {
            callback: Rc::new(callback),
        }
    }

    /// Invoke the callback
    pub fn call(&self, observer: &O, changes: &ChangeSet) {
        (self.callback)(observer, changes)
    }
}

impl ChangeListener<dyn Any> {
    /// Listener for observers of a known concrete type.
    ///
    /// The callback is skipped if the observer is of another type.
    pub fn typed<T: Any>(callback: impl Fn(&T, &ChangeSet) + 'static) -> Self {
        ChangeListener::new(move |observer: &dyn Any, changes: &ChangeSet| {
            if let Some(observer) = observer.downcast_ref::<T>() {
                callback(observer, changes)
            }
        })
    }
}

impl<O: ?Sized> Clone for ChangeListener<O> {
    fn clone(&self) -> Self {
        ChangeListener {
            callback: Rc::clone(&self.callback),
        }
    }
}

impl<O: ?Sized> PartialEq for ChangeListener<O> {
    fn eq(&self, other: &Self) -> bool {
        Rc::as_ptr(&self.callback) as *const () == Rc::as_ptr(&other.callback) as *const ()
    }
}

impl<O: ?Sized> Eq for ChangeListener<O> {}

impl<O: ?Sized> fmt::Debug for ChangeListener<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeListener({:p})", Rc::as_ptr(&self.callback) as *const ())
    }
}

/// Per-collection listener list plus the load state machine
pub struct ChangeDispatcher<O: ?Sized> {
    engine: Arc<dyn NativeEngine>,
    registry: ObserverRegistry<O, ChangeListener<O>>,
    loaded: Cell<bool>,
    delivered: Cell<bool>,
}

impl<O: ?Sized> ChangeDispatcher<O> {
    /// Dispatcher for a collection that still has to load
    pub fn unloaded(engine: Arc<dyn NativeEngine>) -> Self {
        ChangeDispatcher {
            engine,
            registry: ObserverRegistry::new(),
            loaded: Cell::new(false),
            delivered: Cell::new(false),
        }
    }

    /// Dispatcher for a collection that is materialized on creation
    pub fn loaded(engine: Arc<dyn NativeEngine>) -> Self {
        let dispatcher = Self::unloaded(engine);
        dispatcher.loaded.set(true);
        dispatcher
    }

    /// True once the collection has loaded
    pub fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    /// Force the initial load if it has not happened yet.
    ///
    /// Listeners get the same notification as for an empty engine change.
    pub fn load(&self) {
        if !self.loaded.get() {
            self.notify_change(ChangeDescriptor::EMPTY);
        }
    }

    /// Register a listener. Returns false if the pair was already registered.
    pub fn subscribe(&self, observer: &Rc<O>, listener: ChangeListener<O>) -> bool {
        self.registry.add(observer, listener)
    }

    /// Unregister one listener
    pub fn unsubscribe(&self, observer: &Rc<O>, listener: &ChangeListener<O>) -> bool {
        self.registry.remove(observer, listener)
    }

    /// Unregister every listener of one observer
    pub fn unsubscribe_observer(&self, observer: &Rc<O>) -> usize {
        self.registry.remove_observer(observer)
    }

    /// Unregister every listener
    pub fn unsubscribe_all(&self) {
        self.registry.clear()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }

    /// Handle a change reported by the engine
    pub fn notify_change(&self, descriptor: ChangeDescriptor) {
        let state = if self.delivered.get() {
            ChangeSetState::Update
        } else {
            ChangeSetState::Initial
        };

        let changes = if descriptor.is_empty() {
            ChangeSet::empty(state)
        } else {
            ChangeSet::new(Arc::clone(&self.engine), descriptor, state)
        };

        if self.loaded.get() && changes.is_empty() {
            trace!(target: "tether::notify", descriptor = descriptor.raw(), "Suppressed empty change");
            return;
        }

        self.loaded.set(true);
        self.delivered.set(true);
        self.registry
            .for_each(|observer, listener| listener.call(observer, &changes));
    }
}

impl<O: ?Sized> fmt::Debug for ChangeDispatcher<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeDispatcher")
            .field("loaded", &self.loaded.get())
            .field("listeners", &self.registry.len())
            .finish()
    }
}
