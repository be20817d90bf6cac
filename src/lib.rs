//! Tether - lifecycle and change notification for native storage engines
//!
//! Tether sits between an application and a native storage engine. It frees
//! every native handle exactly once, without ever freeing a derived object
//! off-thread while its root is in use, and delivers change notifications to
//! weakly held observers.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tether::{Session, ResultsListener, ChangeSet};
//!
//! let session = Session::open(engine)?;
//! let people = session.table("people")?;
//!
//! session.begin_transaction()?;
//! people.add_row()?;
//! session.commit_transaction()?;
//!
//! let results = people.all()?;
//! results.subscribe(&screen, ResultsListener::typed(|screen: &Screen, changes: &ChangeSet| {
//!     screen.refresh(changes.insertion_ranges());
//! }));
//! results.load()?;
//! ```
//!
//! # Architecture
//!
//! - `tether-core`: handles, the engine boundary trait, errors, configuration
//! - `tether-reclaim`: record pool, reclamation contexts, the reclaimer worker
//! - `tether-notify`: observer registries, change sets, iterator tracking
//! - `tether-realm`: sessions, tables, results, rows and live iterators

pub use tether_core::{
    testing, ChangeDescriptor, ChangeKind, EngineError, EngineResult, Error, FinalizerId,
    NativeAllocation, NativeEngine, NativeHandle, PoolConfig, ReclaimerConfig, ResourceKind,
    Result, RowKey, TetherConfig, CONFIG_FILE_NAME,
};
pub use tether_notify::{
    ChangeDispatcher, ChangeListener, ChangeSet, ChangeSetState, IteratorTracker,
    ObserverRegistry, Range, TrackedIterator,
};
pub use tether_realm::{
    IteratorState, LiveIterator, Results, ResultsListener, Row, Session, SessionOptions, Table,
};
pub use tether_reclaim::{
    ContextId, ContextStats, Disposal, NativeResource, Reclaimer, ReclaimerStats,
    ReclamationContext, RecordPool, ReferenceRecord, SlotIndex,
};
