//! Reclamation contexts
//!
//! A [`ReclamationContext`] groups a root resource with everything derived
//! from it. The engine cannot destroy two resources sharing a root at the same
//! time, so every destructive call for the group goes through the context's
//! lock.
//!
//! ## Disposal policy
//!
//! ```text
//! record.is_root            -> finalize now, then tear the context down
//! context torn down         -> finalize now
//! otherwise                 -> push onto deferred[kind]
//! ```
//!
//! Deferred records are flushed FIFO at drain points: creating a resource of
//! the same kind, an explicit [`ReclamationContext::drain_deferred`], or
//! teardown. The reclaimer thread therefore never frees a derived resource
//! while its root is still in use.
//!
//! ## Failure
//!
//! A failing finalizer is not retried. The context records the first failure
//! and refuses new registrations and destructive calls from then on;
//! remaining records are still finalized on a best-effort basis so that
//! unrelated handles are not leaked.

use crate::pool::{RecordPool, ReferenceRecord, SlotIndex};
use crate::reclaimer::{ReclaimRequest, Reclaimer};
use crate::resource::NativeResource;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tether_core::{
    EngineError, EngineResult, Error, NativeAllocation, NativeEngine, PoolConfig, ResourceKind,
    Result,
};
use tracing::{debug, error, trace, warn};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a context, used in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    /// Raw identifier
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Outcome of handing a record to the disposal policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// The finalizer ran
    Finalized,
    /// The record waits in its kind's deferred queue
    Deferred,
    /// The slot held no record; nothing was done
    Skipped,
}

/// Snapshot of a context's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextStats {
    /// Records whose wrapper is still alive
    pub live_records: usize,
    /// Slots ever allocated by the record pool
    pub pool_capacity: usize,
    /// Records waiting in deferred queues
    pub deferred: usize,
    /// Finalizer calls that succeeded
    pub finalized: u64,
    /// True once the root has been finalized
    pub torn_down: bool,
    /// True once a destructive call has failed
    pub poisoned: bool,
}

struct ContextState {
    pool: RecordPool,
    deferred: FxHashMap<ResourceKind, VecDeque<ReferenceRecord>>,
    fatal: Option<EngineError>,
    finalized: u64,
}

pub(crate) struct ContextShared {
    id: ContextId,
    engine: Arc<dyn NativeEngine>,
    reclaimer: Arc<Reclaimer>,
    torn_down: AtomicBool,
    state: Mutex<ContextState>,
}

/// Mutual-exclusion and bookkeeping scope for a root and its derived resources.
///
/// Cheap to clone; all clones share the same state. `Send + Sync`: the owning
/// thread and the reclaimer both operate on it.
#[derive(Clone)]
pub struct ReclamationContext {
    shared: Arc<ContextShared>,
}

impl fmt::Debug for ReclamationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReclamationContext")
            .field("id", &self.shared.id)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl ReclamationContext {
    /// Create a context whose unreachable wrappers are drained by `reclaimer`
    pub fn new(
        engine: Arc<dyn NativeEngine>,
        reclaimer: Arc<Reclaimer>,
        pool: &PoolConfig,
    ) -> Self {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        debug!(target: "tether::reclaim", context = %id, "Context created");
        ReclamationContext {
            shared: Arc::new(ContextShared {
                id,
                engine,
                reclaimer,
                torn_down: AtomicBool::new(false),
                state: Mutex::new(ContextState {
                    pool: RecordPool::with_capacity(pool.initial_capacity),
                    deferred: FxHashMap::default(),
                    fatal: None,
                    finalized: 0,
                }),
            }),
        }
    }

    /// Identifier used in logs
    pub fn id(&self) -> ContextId {
        self.shared.id
    }

    /// Engine shared by every resource of this context
    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.shared.engine
    }

    /// Reclaimer that drains this context's unreachable wrappers
    pub fn reclaimer(&self) -> &Arc<Reclaimer> {
        &self.shared.reclaimer
    }

    /// True once the root resource has been finalized
    pub fn is_torn_down(&self) -> bool {
        self.shared.torn_down.load(Ordering::Acquire)
    }

    /// True if two handles refer to the same context
    pub fn ptr_eq(&self, other: &ReclamationContext) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Take ownership of a freshly created engine resource.
    ///
    /// This is a drain point: deferred records of the same kind are
    /// finalized first, oldest first.
    ///
    /// # Errors
    ///
    /// - `StaleResource` if the context was torn down and the resource is not
    ///   a root. The allocation is finalized before returning.
    /// - `FatalEngine` if the context is poisoned or the drain fails.
    pub fn register(
        &self,
        allocation: NativeAllocation,
        kind: ResourceKind,
        is_root: bool,
    ) -> Result<NativeResource> {
        let record = ReferenceRecord {
            handle: allocation.handle,
            finalizer: allocation.finalizer,
            kind,
            is_root,
        };

        let (slot, drain_error) = {
            let mut state = self.shared.state.lock();

            if let Some(fatal) = state.fatal.clone() {
                // Nobody else will ever own this allocation
                if let Err(e) = self.finalize_locked(&mut state, record) {
                    warn!(
                        target: "tether::reclaim",
                        context = %self.shared.id,
                        kind = %kind,
                        handle = %allocation.handle,
                        error = %e,
                        "Could not finalize allocation refused by poisoned context"
                    );
                }
                return Err(Error::fatal(fatal));
            }
            if !is_root && self.is_torn_down() {
                self.finalize_locked(&mut state, record)?;
                return Err(Error::stale(format!(
                    "cannot create a {} after its root was closed",
                    kind
                )));
            }

            let (drained, drain_error) = self.flush_locked(&mut state, kind);
            if drained > 0 {
                trace!(target: "tether::reclaim", context = %self.shared.id, kind = %kind, drained, "Drained deferred records");
            }
            (state.pool.insert(record), drain_error)
        };

        trace!(
            target: "tether::reclaim",
            context = %self.shared.id,
            kind = %kind,
            handle = %allocation.handle,
            is_root,
            "Registered resource"
        );
        let resource = NativeResource::new(self.clone(), slot, record);

        // Dropping `resource` on the error path hands it to the reclaimer
        match drain_error {
            Some(e) => Err(e),
            None => Ok(resource),
        }
    }

    /// Apply the disposal policy to a record.
    ///
    /// Roots and records of a torn-down context are finalized immediately;
    /// other records are deferred to the next drain point of their kind.
    ///
    /// `record` must no longer be in the pool: the reclaimer passes records
    /// it has just removed. Passing the record of a live [`NativeResource`]
    /// finalizes its handle twice once that wrapper is dropped or closed.
    pub fn execute_destructive(&self, record: ReferenceRecord) -> Result<Disposal> {
        let mut state = self.shared.state.lock();
        self.dispose_locked(&mut state, record)
    }

    /// Finalize every deferred record of `kind`, oldest first.
    ///
    /// Returns how many records were finalized. A failure does not stop the
    /// drain; the first failure is returned after the queue is empty.
    pub fn drain_deferred(&self, kind: ResourceKind) -> Result<usize> {
        let mut state = self.shared.state.lock();
        match self.flush_locked(&mut state, kind) {
            (_, Some(e)) => Err(e),
            (drained, None) => Ok(drained),
        }
    }

    /// Finalize every deferred record of every kind
    pub fn drain_all_deferred(&self) -> Result<usize> {
        let mut state = self.shared.state.lock();
        match self.flush_all_locked(&mut state) {
            (_, Some(e)) => Err(e),
            (drained, None) => Ok(drained),
        }
    }

    /// Mark the root as gone.
    ///
    /// Everything still deferred is finalized now, and later disposals are
    /// immediate. Idempotent.
    pub fn mark_torn_down(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.tear_down_locked(&mut state)
    }

    /// Run a destructive engine call under the context lock.
    ///
    /// An engine failure poisons the context.
    pub fn locked<R>(&self, op: impl FnOnce(&dyn NativeEngine) -> EngineResult<R>) -> Result<R> {
        let mut state = self.shared.state.lock();
        if let Some(fatal) = state.fatal.clone() {
            return Err(Error::fatal(fatal));
        }
        op(self.shared.engine.as_ref()).map_err(|e| self.poison_locked(&mut state, e))
    }

    /// Snapshot of the context's bookkeeping
    pub fn stats(&self) -> ContextStats {
        let state = self.shared.state.lock();
        ContextStats {
            live_records: state.pool.len(),
            pool_capacity: state.pool.capacity(),
            deferred: state.deferred.values().map(VecDeque::len).sum(),
            finalized: state.finalized,
            torn_down: self.is_torn_down(),
            poisoned: state.fatal.is_some(),
        }
    }

    /// Explicit close of one resource: finalize now, whatever its kind.
    pub(crate) fn close_resource(&self, slot: SlotIndex) -> Result<()> {
        let mut state = self.shared.state.lock();
        let Some(record) = state.pool.remove(slot) else {
            return Ok(());
        };
        let result = self.finalize_locked(&mut state, record);
        if record.is_root {
            let teardown = self.tear_down_locked(&mut state);
            result?;
            return teardown;
        }
        result
    }

    /// Reclaimer entry point: the wrapper owning `slot` is gone.
    pub(crate) fn reclaim(&self, slot: SlotIndex) -> Result<Disposal> {
        let mut state = self.shared.state.lock();
        match state.pool.remove(slot) {
            Some(record) => self.dispose_locked(&mut state, record),
            None => {
                warn!(target: "tether::reclaim", context = %self.shared.id, slot = slot.get(), "Reclaim request for an empty slot");
                Ok(Disposal::Skipped)
            }
        }
    }

    /// Hand a dropped wrapper's slot to the reclaimer
    pub(crate) fn enqueue_reclaim(&self, slot: SlotIndex) {
        self.shared.reclaimer.enqueue(ReclaimRequest {
            context: self.clone(),
            slot,
        });
    }

    fn dispose_locked(&self, state: &mut ContextState, record: ReferenceRecord) -> Result<Disposal> {
        if record.is_root {
            let result = self.finalize_locked(state, record);
            let teardown = self.tear_down_locked(state);
            result?;
            teardown?;
            return Ok(Disposal::Finalized);
        }

        if self.is_torn_down() {
            self.finalize_locked(state, record)?;
            return Ok(Disposal::Finalized);
        }

        trace!(
            target: "tether::reclaim",
            context = %self.shared.id,
            kind = %record.kind,
            handle = %record.handle,
            "Deferred disposal"
        );
        state
            .deferred
            .entry(record.kind)
            .or_default()
            .push_back(record);
        Ok(Disposal::Deferred)
    }

    fn tear_down_locked(&self, state: &mut ContextState) -> Result<()> {
        let first = !self.shared.torn_down.swap(true, Ordering::AcqRel);
        let (drained, error) = self.flush_all_locked(state);
        if first {
            debug!(
                target: "tether::reclaim",
                context = %self.shared.id,
                drained,
                live = state.pool.len(),
                "Context torn down"
            );
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn flush_all_locked(&self, state: &mut ContextState) -> (usize, Option<Error>) {
        let mut drained = 0;
        let mut first_error = None;
        for kind in ResourceKind::ALL {
            let (n, error) = self.flush_locked(state, kind);
            drained += n;
            if first_error.is_none() {
                first_error = error;
            }
        }
        (drained, first_error)
    }

    fn flush_locked(&self, state: &mut ContextState, kind: ResourceKind) -> (usize, Option<Error>) {
        let mut drained = 0;
        let mut first_error = None;
        loop {
            let next = state.deferred.get_mut(&kind).and_then(VecDeque::pop_front);
            let Some(record) = next else {
                break;
            };
            match self.finalize_locked(state, record) {
                Ok(()) => drained += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        (drained, first_error)
    }

    fn finalize_locked(&self, state: &mut ContextState, record: ReferenceRecord) -> Result<()> {
        match self
            .shared
            .engine
            .invoke_finalizer(record.finalizer, record.handle)
        {
            Ok(()) => {
                state.finalized += 1;
                trace!(
                    target: "tether::reclaim",
                    context = %self.shared.id,
                    kind = %record.kind,
                    handle = %record.handle,
                    "Finalized"
                );
                Ok(())
            }
            Err(e) => Err(self.poison_locked(state, e)),
        }
    }

    fn poison_locked(&self, state: &mut ContextState, e: EngineError) -> Error {
        error!(
            target: "tether::reclaim",
            context = %self.shared.id,
            error = %e,
            "Destructive engine call failed; context is poisoned"
        );
        if state.fatal.is_none() {
            state.fatal = Some(e.clone());
        }
        Error::fatal(e)
    }
}
