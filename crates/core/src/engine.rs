//! Boundary with the native storage engine
//!
//! The engine owns every byte of data. The binding layer only ever holds
//! [`NativeHandle`]s and hands them back through this trait. Apart from
//! [`NativeEngine::invoke_finalizer`] every method is a thin pass-through;
//! the binding layer attaches lifecycle and notification semantics around
//! them.
//!
//! Implementations must be callable from any thread. Destructive calls
//! (`invoke_finalizer`) are always made under the owning context's lock, so
//! an implementation never sees two concurrent destructive calls for
//! resources sharing a root.

use crate::error::EngineResult;
use crate::types::{
    ChangeDescriptor, ChangeKind, FinalizerId, NativeAllocation, NativeHandle, RowKey,
};

/// Operations the binding layer consumes from the native engine
pub trait NativeEngine: Send + Sync + 'static {
    /// Free `handle` using the routine identified by `finalizer`.
    ///
    /// Called exactly once per handle. A failure is fatal for the owning
    /// context.
    fn invoke_finalizer(&self, finalizer: FinalizerId, handle: NativeHandle) -> EngineResult<()>;

    /// Open the root (shared) handle of a new session
    fn open_root(&self) -> EngineResult<NativeAllocation>;

    /// Open a table by name under `root`, creating it if needed
    fn open_table(&self, root: NativeHandle, name: &str) -> EngineResult<NativeAllocation>;

    /// Append a row to `table`; the root must be in a write transaction
    fn add_row(&self, table: NativeHandle) -> EngineResult<RowKey>;

    /// Create a live result over all rows of `table`
    fn table_results(&self, table: NativeHandle) -> EngineResult<NativeAllocation>;

    /// Current size of a result or snapshot
    fn results_size(&self, results: NativeHandle) -> EngineResult<usize>;

    /// Row accessor at `index` of a result or snapshot
    fn results_row(&self, results: NativeHandle, index: usize) -> EngineResult<NativeAllocation>;

    /// Freeze the current contents of a result
    fn create_snapshot(&self, results: NativeHandle) -> EngineResult<NativeAllocation>;

    /// Key of the row behind a row accessor
    fn row_key(&self, row: NativeHandle) -> EngineResult<RowKey>;

    /// Begin a write transaction on `root`
    fn begin_transaction(&self, root: NativeHandle) -> EngineResult<()>;

    /// Commit the write transaction on `root`
    fn commit_transaction(&self, root: NativeHandle) -> EngineResult<()>;

    /// Roll back the write transaction on `root`
    fn cancel_transaction(&self, root: NativeHandle) -> EngineResult<()>;

    /// Read one index list out of a change descriptor, sorted ascending.
    ///
    /// Never called with [`ChangeDescriptor::EMPTY`].
    fn change_indices(&self, descriptor: ChangeDescriptor, kind: ChangeKind) -> Vec<usize>;
}
