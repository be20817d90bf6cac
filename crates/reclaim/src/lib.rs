//! Native resource lifecycle for Tether
//!
//! This crate frees engine resources exactly once, on a thread that is safe
//! for the engine:
//! - RecordPool: O(1) slot pool holding a self-sufficient record per wrapper
//! - ReclamationContext: per-root lock, deferred queues and teardown
//! - NativeResource: owning wrapper; `close()` frees now, drop frees later
//! - Reclaimer: background worker draining dropped wrappers
//!
//! Derived resources (tables, results, rows) are never freed by the reclaimer
//! while their root is open. They wait in a per-kind queue until the owning
//! thread creates another resource of that kind, or the root goes away.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod pool;
pub mod reclaimer;
pub mod resource;

pub use context::{ContextId, ContextStats, Disposal, ReclamationContext};
pub use pool::{RecordPool, ReferenceRecord, SlotIndex};
pub use reclaimer::{Reclaimer, ReclaimerStats};
pub use resource::NativeResource;
