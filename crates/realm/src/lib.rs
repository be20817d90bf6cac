//! Sessions and collections for Tether
//!
//! This crate is the surface applications use:
//! - Session: one engine connection, its transactions and its iterators
//! - Table: named table; `add_row` inside a write transaction
//! - Results: live or snapshot collection with change listeners
//! - Row: accessor for one row
//! - LiveIterator: iterator that detaches on write and fails on remote change
//!
//! All of these are thread-confined. Native resources behind them are freed
//! by `close()` or, after they are dropped, by the reclaimer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod iterator;
pub mod results;
pub mod row;
pub mod session;
pub mod table;

pub use iterator::{IteratorState, LiveIterator};
pub use results::{Results, ResultsListener};
pub use row::Row;
pub use session::{Session, SessionOptions};
pub use table::Table;
