//! Identity types shared across the binding layer
//!
//! Everything here is a plain value copied out of the native engine. None of
//! these types own engine memory; ownership lives in
//! `tether_reclaim::NativeResource`.

use std::fmt;

/// Opaque identity of an engine-owned resource.
///
/// A handle is consumed exactly once, by the finalizer the engine paired it
/// with. `0` is never a valid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(i64);

impl NativeHandle {
    /// Wrap a raw engine pointer value
    pub const fn new(raw: i64) -> Self {
        NativeHandle(raw)
    }

    /// Raw engine pointer value
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// True for the null handle the engine returns on allocation failure
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Identifier of the engine routine that frees a particular kind of handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FinalizerId(i64);

impl FinalizerId {
    /// Wrap a raw finalizer identifier
    pub const fn new(raw: i64) -> Self {
        FinalizerId(raw)
    }

    /// Raw finalizer identifier
    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for FinalizerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fin#{}", self.0)
    }
}

/// A freshly created engine resource: the handle plus the finalizer that
/// must eventually be invoked on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeAllocation {
    /// Handle of the new resource
    pub handle: NativeHandle,
    /// Finalizer to call with `handle` exactly once
    pub finalizer: FinalizerId,
}

impl NativeAllocation {
    /// Pair a handle with its finalizer
    pub const fn new(handle: NativeHandle, finalizer: FinalizerId) -> Self {
        NativeAllocation { handle, finalizer }
    }
}

/// Kind of native resource, used to select a deferred-disposal queue.
///
/// Creating a resource of a kind is a drain point for that kind's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// The top-level shared handle of a session
    Root,
    /// A table inside the root
    Table,
    /// A live (auto-updating) query result
    Results,
    /// A frozen copy of a result
    Snapshot,
    /// A single row accessor
    Row,
}

impl ResourceKind {
    /// All kinds, in drain order
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Root,
        ResourceKind::Table,
        ResourceKind::Results,
        ResourceKind::Snapshot,
        ResourceKind::Row,
    ];

    /// Lower-case name used in logs
    pub const fn name(self) -> &'static str {
        match self {
            ResourceKind::Root => "root",
            ResourceKind::Table => "table",
            ResourceKind::Results => "results",
            ResourceKind::Snapshot => "snapshot",
            ResourceKind::Row => "row",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque engine description of a structural change to a collection.
///
/// [`ChangeDescriptor::EMPTY`] (`0`) is the reserved "no change" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeDescriptor(i64);

impl ChangeDescriptor {
    /// The empty/null descriptor
    pub const EMPTY: ChangeDescriptor = ChangeDescriptor(0);

    /// Wrap a raw descriptor pointer
    pub const fn new(raw: i64) -> Self {
        ChangeDescriptor(raw)
    }

    /// Raw descriptor pointer
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// True for the empty sentinel
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Which index list of a change descriptor to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Positions removed, in pre-change coordinates
    Deletion,
    /// Positions added, in post-change coordinates
    Insertion,
    /// Positions whose contents changed, in post-change coordinates
    Modification,
}

/// Stable key of a row inside its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(u64);

impl RowKey {
    /// Wrap a raw row key
    pub const fn new(raw: u64) -> Self {
        RowKey(raw)
    }

    /// Raw row key
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row:{}", self.0)
    }
}
