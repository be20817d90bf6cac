//! Change sets delivered to collection listeners
//!
//! A [`ChangeSet`] wraps the engine's opaque [`ChangeDescriptor`]. Index lists
//! are read from the engine on first access and cached, so a listener that
//! never looks at insertions never pays for them.

use once_cell::unsync::OnceCell;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use tether_core::{ChangeDescriptor, ChangeKind, NativeEngine};

/// Run of consecutive indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// First index of the run
    pub start: usize,
    /// Number of indices in the run
    pub length: usize,
}

/// Coalesced ranges of a change list; most lists have only a few runs
pub type Ranges = SmallVec<[Range; 4]>;

/// Merge sorted indices into runs of consecutive values.
///
/// Duplicates are folded into the run they belong to.
pub fn coalesce_ranges(indices: &[usize]) -> Ranges {
    let mut ranges = Ranges::new();
    for &index in indices {
        match ranges.last_mut() {
            Some(last) if index < last.start + last.length => {}
            Some(last) if index == last.start + last.length => last.length += 1,
            _ => ranges.push(Range {
                start: index,
                length: 1,
            }),
        }
    }
    ranges
}

/// Position of a change set in a collection's notification stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetState {
    /// First notification after the collection loaded
    Initial,
    /// Any later notification
    Update,
}

/// Lazily decoded description of one change to a collection
pub struct ChangeSet {
    descriptor: ChangeDescriptor,
    state: ChangeSetState,
    engine: Option<Arc<dyn NativeEngine>>,
    deletions: OnceCell<Vec<usize>>,
    insertions: OnceCell<Vec<usize>>,
    modifications: OnceCell<Vec<usize>>,
}

impl ChangeSet {
    /// Wrap a descriptor produced by `engine`
    pub fn new(
        engine: Arc<dyn NativeEngine>,
        descriptor: ChangeDescriptor,
        state: ChangeSetState,
    ) -> Self {
        ChangeSet {
            descriptor,
            state,
            engine: Some(engine),
            deletions: OnceCell::new(),
            insertions: OnceCell::new(),
            modifications: OnceCell::new(),
        }
    }

    /// A change set carrying no changes
    pub fn empty(state: ChangeSetState) -> Self {
        ChangeSet {
            descriptor: ChangeDescriptor::EMPTY,
            state,
            engine: None,
            deletions: OnceCell::new(),
            insertions: OnceCell::new(),
            modifications: OnceCell::new(),
        }
    }

    /// Descriptor this change set was built from
    pub fn descriptor(&self) -> ChangeDescriptor {
        self.descriptor
    }

    /// Initial or update
    pub fn state(&self) -> ChangeSetState {
        self.state
    }

    /// Sorted indices of deleted elements, relative to the previous state
    pub fn deletions(&self) -> &[usize] {
        self.indices(ChangeKind::Deletion)
    }

    /// Sorted indices of inserted elements, relative to the new state
    pub fn insertions(&self) -> &[usize] {
        self.indices(ChangeKind::Insertion)
    }

    /// Sorted indices of modified elements, relative to the new state
    pub fn modifications(&self) -> &[usize] {
        self.indices(ChangeKind::Modification)
    }

    /// Deletions as runs of consecutive indices
    pub fn deletion_ranges(&self) -> Ranges {
        coalesce_ranges(self.deletions())
    }

    /// Insertions as runs of consecutive indices
    pub fn insertion_ranges(&self) -> Ranges {
        coalesce_ranges(self.insertions())
    }

    /// Modifications as runs of consecutive indices
    pub fn modification_ranges(&self) -> Ranges {
        coalesce_ranges(self.modifications())
    }

    /// True if no element was deleted, inserted or modified
    pub fn is_empty(&self) -> bool {
        self.descriptor.is_empty()
            || (self.deletions().is_empty()
                && self.insertions().is_empty()
                && self.modifications().is_empty())
    }

    fn indices(&self, kind: ChangeKind) -> &[usize] {
        let cell = match kind {
            ChangeKind::Deletion => &self.deletions,
            ChangeKind::Insertion => &self.insertions,
            ChangeKind::Modification => &self.modifications,
        };
        cell.get_or_init(|| match &self.engine {
            Some(engine) if !self.descriptor.is_empty() => {
                engine.change_indices(self.descriptor, kind)
            }
            _ => Vec::new(),
        })
    }
}

impl fmt::Debug for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("descriptor", &self.descriptor)
            .field("state", &self.state)
            .field("deletions", &self.deletions.get())
            .field("insertions", &self.insertions.get())
            .field("modifications", &self.modifications.get())
            .finish()
    }
}
