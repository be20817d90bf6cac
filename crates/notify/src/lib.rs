//! Change notification for Tether
//!
//! This crate delivers engine changes to application observers:
//! - ObserverRegistry: weak, copy-on-write `(observer, listener)` list
//! - ChangeSet: lazily decoded deletions, insertions and modifications
//! - ChangeDispatcher: per-collection listeners and the load state machine
//! - IteratorTracker: weak list of a session's outstanding iterators
//!
//! Everything here is thread-confined and built on `Rc`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod changeset;
pub mod dispatch;
pub mod registry;
pub mod tracker;

pub use changeset::{coalesce_ranges, ChangeSet, ChangeSetState, Range, Ranges};
pub use dispatch::{ChangeDispatcher, ChangeListener};
pub use registry::ObserverRegistry;
pub use tracker::{IteratorTracker, TrackedIterator};
