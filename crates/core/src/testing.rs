//! Reference engine for tests
//!
//! [`InMemoryEngine`] implements [`NativeEngine`] over plain maps. It is not
//! a storage engine; it exists so the binding layer can be exercised without
//! native code, and it keeps enough bookkeeping to check the lifecycle
//! guarantees:
//!
//! - every finalizer call is logged in order
//! - finalizing an unknown handle (double free) is rejected and counted
//! - finalizer failures can be injected per handle
//! - change descriptors can be synthesised and their reads counted
//!
//! # Example
//!
//! ```ignore
//! use tether_core::testing::InMemoryEngine;
//!
//! let engine = InMemoryEngine::new();
//! let root = engine.open_root()?;
//! // ... drive the binding layer ...
//! assert_eq!(engine.live_handles(), 0);
//! assert_eq!(engine.rejected_finalizations(), 0);
//! ```

use crate::engine::NativeEngine;
use crate::error::{EngineError, EngineResult};
use crate::types::{
    ChangeDescriptor, ChangeKind, FinalizerId, NativeAllocation, NativeHandle, ResourceKind,
    RowKey,
};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

/// Finalizer identifiers handed out by the reference engine, one per kind
pub fn finalizer_for(kind: ResourceKind) -> FinalizerId {
    match kind {
        ResourceKind::Root => FinalizerId::new(1),
        ResourceKind::Table => FinalizerId::new(2),
        ResourceKind::Results => FinalizerId::new(3),
        ResourceKind::Snapshot => FinalizerId::new(4),
        ResourceKind::Row => FinalizerId::new(5),
    }
}

#[derive(Debug, Clone)]
enum Object {
    Root {
        /// Rows added by the open write transaction, if any
        txn: Option<Vec<(String, RowKey)>>,
    },
    Table {
        root: NativeHandle,
        name: String,
    },
    Results {
        table: String,
    },
    Snapshot {
        rows: Vec<RowKey>,
    },
    Row {
        key: RowKey,
    },
}

impl Object {
    fn kind(&self) -> ResourceKind {
        match self {
            Object::Root { .. } => ResourceKind::Root,
            Object::Table { .. } => ResourceKind::Table,
            Object::Results { .. } => ResourceKind::Results,
            Object::Snapshot { .. } => ResourceKind::Snapshot,
            Object::Row { .. } => ResourceKind::Row,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RecordedChange {
    deletions: Vec<usize>,
    insertions: Vec<usize>,
    modifications: Vec<usize>,
}

#[derive(Default)]
struct EngineState {
    next_handle: i64,
    next_row: u64,
    next_descriptor: i64,
    objects: FxHashMap<NativeHandle, Object>,
    tables: FxHashMap<String, Vec<RowKey>>,
    changes: FxHashMap<ChangeDescriptor, RecordedChange>,
    finalized: Vec<(NativeHandle, ResourceKind)>,
    failing: FxHashSet<NativeHandle>,
    rejected_finalizations: usize,
    allocations: usize,
    descriptor_reads: usize,
}

impl EngineState {
    fn allocate(&mut self, object: Object) -> NativeAllocation {
        self.next_handle += 1;
        // Spread handles out so they never look like small indices
        let handle = NativeHandle::new(0x1000 + self.next_handle * 0x10);
        let finalizer = finalizer_for(object.kind());
        self.objects.insert(handle, object);
        self.allocations += 1;
        NativeAllocation::new(handle, finalizer)
    }

    fn object(&self, handle: NativeHandle) -> EngineResult<&Object> {
        self.objects
            .get(&handle)
            .ok_or(EngineError::UnknownHandle(handle))
    }

    fn rows_of(&self, handle: NativeHandle) -> EngineResult<Vec<RowKey>> {
        match self.object(handle)? {
            Object::Results { table } => Ok(self.tables.get(table).cloned().unwrap_or_default()),
            Object::Snapshot { rows } => Ok(rows.clone()),
            other => Err(EngineError::Failed(format!(
                "{} handle {} is not a collection",
                other.kind(),
                handle
            ))),
        }
    }
}

/// In-memory reference implementation of [`NativeEngine`]
#[derive(Default)]
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
}

impl InMemoryEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handles allocated and not yet finalized
    pub fn live_handles(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Number of live handles of one kind
    pub fn live_handles_of(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .objects
            .values()
            .filter(|o| o.kind() == kind)
            .count()
    }

    /// Total handles ever allocated
    pub fn allocations(&self) -> usize {
        self.state.lock().allocations
    }

    /// Handles finalized so far, in call order
    pub fn finalized(&self) -> Vec<NativeHandle> {
        self.state.lock().finalized.iter().map(|(h, _)| *h).collect()
    }

    /// Handles of one kind finalized so far, in call order
    pub fn finalized_of(&self, kind: ResourceKind) -> Vec<NativeHandle> {
        self.state
            .lock()
            .finalized
            .iter()
            .filter(|(_, k)| *k == kind)
            .map(|(h, _)| *h)
            .collect()
    }

    /// Finalizer calls on handles that were not live (double frees)
    pub fn rejected_finalizations(&self) -> usize {
        self.state.lock().rejected_finalizations
    }

    /// True if `handle` is still allocated
    pub fn is_live(&self, handle: NativeHandle) -> bool {
        self.state.lock().objects.contains_key(&handle)
    }

    /// Make every finalizer call on `handle` fail
    pub fn fail_finalizer_for(&self, handle: NativeHandle) {
        self.state.lock().failing.insert(handle);
    }

    /// Rows currently committed to `table`
    pub fn table_rows(&self, table: &str) -> Vec<RowKey> {
        self.state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Append a row as if another process committed it
    pub fn insert_remote(&self, table: &str) -> RowKey {
        let mut state = self.state.lock();
        state.next_row += 1;
        let key = RowKey::new(state.next_row);
        state.tables.entry(table.to_string()).or_default().push(key);
        key
    }

    /// Synthesise a change descriptor with the given index lists
    pub fn record_change(
        &self,
        deletions: &[usize],
        insertions: &[usize],
        modifications: &[usize],
    ) -> ChangeDescriptor {
        let mut state = self.state.lock();
        state.next_descriptor += 1;
        let descriptor = ChangeDescriptor::new(state.next_descriptor);
        state.changes.insert(
            descriptor,
            RecordedChange {
                deletions: deletions.to_vec(),
                insertions: insertions.to_vec(),
                modifications: modifications.to_vec(),
            },
        );
        descriptor
    }

    /// How many index lists have been read from descriptors
    pub fn descriptor_reads(&self) -> usize {
        self.state.lock().descriptor_reads
    }
}

impl NativeEngine for InMemoryEngine {
    fn invoke_finalizer(&self, finalizer: FinalizerId, handle: NativeHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.failing.contains(&handle) {
            debug!(target: "tether::engine", handle = %handle, "Injected finalizer failure");
            return Err(EngineError::Failed(format!(
                "injected finalizer failure for {}",
                handle
            )));
        }
        let kind = match state.objects.get(&handle) {
            Some(object) => object.kind(),
            None => {
                state.rejected_finalizations += 1;
                return Err(EngineError::UnknownHandle(handle));
            }
        };
        if finalizer_for(kind) != finalizer {
            return Err(EngineError::FinalizerMismatch { handle, finalizer });
        }
        state.objects.remove(&handle);
        state.finalized.push((handle, kind));
        Ok(())
    }

    fn open_root(&self) -> EngineResult<NativeAllocation> {
        Ok(self.state.lock().allocate(Object::Root { txn: None }))
    }

    fn open_table(&self, root: NativeHandle, name: &str) -> EngineResult<NativeAllocation> {
        let mut state = self.state.lock();
        match state.object(root)? {
            Object::Root { .. } => {}
            other => {
                return Err(EngineError::Failed(format!(
                    "{} handle {} is not a root",
                    other.kind(),
                    root
                )))
            }
        }
        state.tables.entry(name.to_string()).or_default();
        Ok(state.allocate(Object::Table {
            root,
            name: name.to_string(),
        }))
    }

    fn add_row(&self, table: NativeHandle) -> EngineResult<RowKey> {
        let mut state = self.state.lock();
        let (root, name) = match state.object(table)? {
            Object::Table { root, name } => (*root, name.clone()),
            other => {
                return Err(EngineError::Failed(format!(
                    "{} handle {} is not a table",
                    other.kind(),
                    table
                )))
            }
        };
        state.next_row += 1;
        let key = RowKey::new(state.next_row);
        match state.objects.get_mut(&root) {
            Some(Object::Root { txn: Some(pending) }) => pending.push((name.clone(), key)),
            _ => {
                return Err(EngineError::Failed(
                    "cannot modify a table outside a write transaction".to_string(),
                ))
            }
        }
        state.tables.entry(name).or_default().push(key);
        Ok(key)
    }

    fn table_results(&self, table: NativeHandle) -> EngineResult<NativeAllocation> {
        let mut state = self.state.lock();
        let name = match state.object(table)? {
            Object::Table { name, .. } => name.clone(),
            other => {
                return Err(EngineError::Failed(format!(
                    "{} handle {} is not a table",
                    other.kind(),
                    table
                )))
            }
        };
        Ok(state.allocate(Object::Results { table: name }))
    }

    fn results_size(&self, results: NativeHandle) -> EngineResult<usize> {
        Ok(self.state.lock().rows_of(results)?.len())
    }

    fn results_row(&self, results: NativeHandle, index: usize) -> EngineResult<NativeAllocation> {
        let mut state = self.state.lock();
        let rows = state.rows_of(results)?;
        let key = *rows.get(index).ok_or_else(|| {
            EngineError::Failed(format!("row index {} out of range {}", index, rows.len()))
        })?;
        Ok(state.allocate(Object::Row { key }))
    }

    fn create_snapshot(&self, results: NativeHandle) -> EngineResult<NativeAllocation> {
        let mut state = self.state.lock();
        let rows = state.rows_of(results)?;
        Ok(state.allocate(Object::Snapshot { rows }))
    }

    fn row_key(&self, row: NativeHandle) -> EngineResult<RowKey> {
        match self.state.lock().object(row)? {
            Object::Row { key } => Ok(*key),
            other => Err(EngineError::Failed(format!(
                "{} handle {} is not a row",
                other.kind(),
                row
            ))),
        }
    }

    fn begin_transaction(&self, root: NativeHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        match state.objects.get_mut(&root) {
            Some(Object::Root { txn }) if txn.is_none() => {
                *txn = Some(Vec::new());
                Ok(())
            }
            Some(Object::Root { .. }) => {
                Err(EngineError::Failed("transaction already open".to_string()))
            }
            Some(other) => Err(EngineError::Failed(format!(
                "{} handle {} is not a root",
                other.kind(),
                root
            ))),
            None => Err(EngineError::UnknownHandle(root)),
        }
    }

    fn commit_transaction(&self, root: NativeHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        match state.objects.get_mut(&root) {
            Some(Object::Root { txn }) if txn.is_some() => {
                *txn = None;
                Ok(())
            }
            Some(_) => Err(EngineError::Failed("no open transaction".to_string())),
            None => Err(EngineError::UnknownHandle(root)),
        }
    }

    fn cancel_transaction(&self, root: NativeHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        let pending = match state.objects.get_mut(&root) {
            Some(Object::Root { txn }) if txn.is_some() => txn.take().unwrap_or_default(),
            Some(_) => return Err(EngineError::Failed("no open transaction".to_string())),
            None => return Err(EngineError::UnknownHandle(root)),
        };
        for (table, key) in pending {
            if let Some(rows) = state.tables.get_mut(&table) {
                rows.retain(|k| *k != key);
            }
        }
        Ok(())
    }

    fn change_indices(&self, descriptor: ChangeDescriptor, kind: ChangeKind) -> Vec<usize> {
        let mut state = self.state.lock();
        state.descriptor_reads += 1;
        let Some(change) = state.changes.get(&descriptor) else {
            return Vec::new();
        };
        let mut indices = match kind {
            ChangeKind::Deletion => change.deletions.clone(),
            ChangeKind::Insertion => change.insertions.clone(),
            ChangeKind::Modification => change.modifications.clone(),
        };
        indices.sort_unstable();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_finalize_rejected() {
        let engine = InMemoryEngine::new();
        let root = engine.open_root().unwrap();

        engine.invoke_finalizer(root.finalizer, root.handle).unwrap();
        let err = engine.invoke_finalizer(root.finalizer, root.handle).unwrap_err();

        assert_eq!(err, EngineError::UnknownHandle(root.handle));
        assert_eq!(engine.rejected_finalizations(), 1);
        assert_eq!(engine.finalized(), vec![root.handle]);
    }

    #[test]
    fn test_finalizer_mismatch() {
        let engine = InMemoryEngine::new();
        let root = engine.open_root().unwrap();
        let err = engine
            .invoke_finalizer(finalizer_for(ResourceKind::Row), root.handle)
            .unwrap_err();
        assert!(matches!(err, EngineError::FinalizerMismatch { .. }));
        assert!(engine.is_live(root.handle));
    }

    #[test]
    fn test_add_row_requires_transaction() {
        let engine = InMemoryEngine::new();
        let root = engine.open_root().unwrap();
        let table = engine.open_table(root.handle, "people").unwrap();

        assert!(engine.add_row(table.handle).is_err());

        engine.begin_transaction(root.handle).unwrap();
        engine.add_row(table.handle).unwrap();
        engine.commit_transaction(root.handle).unwrap();
        assert_eq!(engine.table_rows("people").len(), 1);
    }

    #[test]
    fn test_cancel_rolls_back_rows() {
        let engine = InMemoryEngine::new();
        let root = engine.open_root().unwrap();
        let table = engine.open_table(root.handle, "people").unwrap();

        engine.begin_transaction(root.handle).unwrap();
        engine.add_row(table.handle).unwrap();
        engine.cancel_transaction(root.handle).unwrap();

        assert!(engine.table_rows("people").is_empty());
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let engine = InMemoryEngine::new();
        let root = engine.open_root().unwrap();
        let table = engine.open_table(root.handle, "people").unwrap();
        let results = engine.table_results(table.handle).unwrap();
        engine.insert_remote("people");

        let snapshot = engine.create_snapshot(results.handle).unwrap();
        engine.insert_remote("people");

        assert_eq!(engine.results_size(results.handle).unwrap(), 2);
        assert_eq!(engine.results_size(snapshot.handle).unwrap(), 1);
    }

    #[test]
    fn test_change_indices_sorted_and_counted() {
        let engine = InMemoryEngine::new();
        let descriptor = engine.record_change(&[3, 1], &[], &[0]);

        assert_eq!(engine.change_indices(descriptor, ChangeKind::Deletion), vec![1, 3]);
        assert!(engine
            .change_indices(descriptor, ChangeKind::Insertion)
            .is_empty());
        assert_eq!(engine.descriptor_reads(), 2);
    }

    #[test]
    fn test_injected_failure_keeps_handle_live() {
        let engine = InMemoryEngine::new();
        let root = engine.open_root().unwrap();
        engine.fail_finalizer_for(root.handle);

        assert!(engine.invoke_finalizer(root.finalizer, root.handle).is_err());
        assert!(engine.is_live(root.handle));
    }
}
