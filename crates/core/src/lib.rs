//! Core types and traits for Tether
//!
//! This crate defines the foundational pieces shared by the binding layer:
//! - NativeHandle / FinalizerId / NativeAllocation: identity of engine resources
//! - ResourceKind: selects the deferred-disposal queue of a resource
//! - ChangeDescriptor / ChangeKind: opaque change descriptions from the engine
//! - NativeEngine: the boundary trait implemented by the storage engine
//! - Error: error type hierarchy
//! - TetherConfig: `tether.toml` configuration
//! - testing: an in-memory reference engine for tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod testing;
pub mod types;

pub use config::{PoolConfig, ReclaimerConfig, TetherConfig, CONFIG_FILE_NAME};
pub use engine::NativeEngine;
pub use error::{EngineError, EngineResult, Error, Result};
pub use types::{
    ChangeDescriptor, ChangeKind, FinalizerId, NativeAllocation, NativeHandle, ResourceKind,
    RowKey,
};
