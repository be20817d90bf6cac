//! Sessions
//!
//! A [`Session`] owns the root resource of one engine connection and the
//! reclamation context shared by everything derived from it. Sessions are
//! thread-confined; open one per thread.
//!
//! ## Lifecycle
//!
//! ```text
//! open -> [begin -> commit | cancel]* -> close
//! ```
//!
//! - `begin_transaction` detaches outstanding iterators first, so they keep
//!   reading the data as it was when the transaction started.
//! - `on_remote_change` invalidates outstanding iterators.
//! - `close` finalizes the root and tears the context down; every derived
//!   object fails with `StaleResource` afterwards.

use crate::table::Table;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use tether_core::{
    Error, NativeEngine, NativeHandle, ReclaimerConfig, ResourceKind, Result, TetherConfig,
};
use tether_notify::IteratorTracker;
use tether_reclaim::{NativeResource, Reclaimer, ReclamationContext};
use tracing::{debug, info};

/// How a session is opened
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Reclaimer draining this session's dropped wrappers. If unset, the
    /// process-wide instance is used when `config.reclaimer` has default
    /// settings, otherwise a dedicated reclaimer is started with them.
    pub reclaimer: Option<Arc<Reclaimer>>,
    /// Binding-layer settings
    pub config: TetherConfig,
}

impl SessionOptions {
    /// Options with the global reclaimer and default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a dedicated reclaimer
    pub fn with_reclaimer(mut self, reclaimer: Arc<Reclaimer>) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }

    /// Use the given settings
    pub fn with_config(mut self, config: TetherConfig) -> Self {
        self.config = config;
        self
    }

    /// Load settings from a `tether.toml` file
    pub fn with_config_file(self, path: &Path) -> Result<Self> {
        Ok(self.with_config(TetherConfig::from_file(path)?))
    }
}

struct SessionInner {
    context: ReclamationContext,
    root: RefCell<NativeResource>,
    tracker: IteratorTracker,
    in_transaction: Cell<bool>,
    closed: Cell<bool>,
}

/// Thread-confined connection to an engine.
///
/// Cheap to clone; clones share the same root. Tables, results and rows keep
/// their session alive.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

impl Session {
    /// Open a session with the global reclaimer and default settings
    pub fn open(engine: Arc<dyn NativeEngine>) -> Result<Session> {
        Self::open_with(engine, SessionOptions::default())
    }

    /// Open a session
    pub fn open_with(engine: Arc<dyn NativeEngine>, options: SessionOptions) -> Result<Session> {
        options.config.validate()?;
        let reclaimer = match options.reclaimer {
            Some(reclaimer) => reclaimer,
            None if options.config.reclaimer == ReclaimerConfig::default() => Reclaimer::global(),
            None => Reclaimer::start(&options.config.reclaimer),
        };
        let allocation = engine.open_root()?;
        let context = ReclamationContext::new(engine, reclaimer, &options.config.pool);
        let root = context.register(allocation, ResourceKind::Root, true)?;

        info!(target: "tether::session", context = %context.id(), root = %allocation.handle, "Session opened");

        Ok(Session {
            inner: Rc::new(SessionInner {
                context,
                root: RefCell::new(root),
                tracker: IteratorTracker::new(),
                in_transaction: Cell::new(false),
                closed: Cell::new(false),
            }),
        })
    }

    /// Reclamation context shared by this session's resources
    pub fn context(&self) -> &ReclamationContext {
        &self.inner.context
    }

    /// Engine behind this session
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        self.inner.context.engine()
    }

    /// Open a table by name
    pub fn table(&self, name: &str) -> Result<Table> {
        let root = self.root_handle()?;
        let allocation = self.engine().open_table(root, name)?;
        let resource = self
            .inner
            .context
            .register(allocation, ResourceKind::Table, false)?;
        Ok(Table::new(self.clone(), resource, name))
    }

    /// Start a write transaction.
    ///
    /// Outstanding iterators are detached first.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` if a transaction is already open.
    pub fn begin_transaction(&self) -> Result<()> {
        let root = self.root_handle()?;
        if self.inner.in_transaction.get() {
            return Err(Error::invalid("a write transaction is already in progress"));
        }
        let detached = self.inner.tracker.detach_all()?;
        self.engine().begin_transaction(root)?;
        self.inner.in_transaction.set(true);
        debug!(target: "tether::session", context = %self.inner.context.id(), detached, "Transaction started");
        Ok(())
    }

    /// Commit the open write transaction
    pub fn commit_transaction(&self) -> Result<()> {
        let root = self.transaction_root("commit")?;
        self.engine().commit_transaction(root)?;
        self.inner.in_transaction.set(false);
        debug!(target: "tether::session", context = %self.inner.context.id(), "Transaction committed");
        Ok(())
    }

    /// Roll back the open write transaction
    pub fn cancel_transaction(&self) -> Result<()> {
        let root = self.transaction_root("cancel")?;
        self.engine().cancel_transaction(root)?;
        self.inner.in_transaction.set(false);
        debug!(target: "tether::session", context = %self.inner.context.id(), "Transaction cancelled");
        Ok(())
    }

    /// True between `begin_transaction` and `commit`/`cancel`
    pub fn is_in_transaction(&self) -> bool {
        self.inner.in_transaction.get()
    }

    /// Another writer changed the data: invalidate outstanding iterators.
    ///
    /// Returns how many iterators were invalidated.
    pub fn on_remote_change(&self) -> usize {
        self.inner.tracker.invalidate_all()
    }

    /// Close the session now.
    ///
    /// An open transaction is cancelled, outstanding iterators are
    /// invalidated, and the root is finalized. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.replace(true) {
            return Ok(());
        }
        let invalidated = self.inner.tracker.invalidate_all();

        let mut cancel = Ok(());
        if self.inner.in_transaction.replace(false) {
            cancel = self
                .inner
                .root
                .borrow()
                .handle()
                .and_then(|root| self.engine().cancel_transaction(root).map_err(Error::from));
        }

        let closed = self.inner.root.borrow_mut().close();
        info!(target: "tether::session", context = %self.inner.context.id(), invalidated, "Session closed");
        cancel?;
        closed
    }

    /// True after [`Session::close`]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// True if both sessions share the same root
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn tracker(&self) -> &IteratorTracker {
        &self.inner.tracker
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.get() {
            return Err(Error::stale("the session has been closed"));
        }
        Ok(())
    }

    pub(crate) fn root_handle(&self) -> Result<NativeHandle> {
        self.ensure_open()?;
        self.inner.root.borrow().handle()
    }

    fn transaction_root(&self, action: &str) -> Result<NativeHandle> {
        let root = self.root_handle()?;
        if !self.inner.in_transaction.get() {
            return Err(Error::invalid(format!(
                "cannot {} without a write transaction",
                action
            )));
        }
        Ok(root)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.inner.context.id())
            .field("in_transaction", &self.inner.in_transaction.get())
            .field("closed", &self.inner.closed.get())
            .finish()
    }
}
