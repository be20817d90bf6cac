//! Error types for Tether
//!
//! This module defines all error types used throughout the binding layer.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Two families exist: [`EngineError`] is what the native engine reports at the
//! boundary, [`Error`] is what callers of the binding layer see.

use crate::types::{FinalizerId, NativeHandle};
use std::io;
use thiserror::Error;

/// Result type alias for binding-layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for calls into the native engine
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure reported by the native engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The handle is unknown to the engine (already finalized or never issued)
    #[error("unknown native handle {0}")]
    UnknownHandle(NativeHandle),

    /// The finalizer does not match the resource behind the handle
    #[error("finalizer {finalizer} does not match handle {handle}")]
    FinalizerMismatch {
        /// Handle passed to the engine
        handle: NativeHandle,
        /// Finalizer that was requested
        finalizer: FinalizerId,
    },

    /// Any other engine-side failure
    #[error("{0}")]
    Failed(String),
}

/// Error types for the binding layer
#[derive(Debug, Error)]
pub enum Error {
    /// The wrapper's handle was closed, reclaimed, or its root was torn down
    #[error("Stale resource: {0}")]
    StaleResource(String),

    /// A live iterator was advanced after an outside change invalidated it
    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    /// A destructive native call failed; the owning context is unusable
    #[error("Fatal engine error: {0}")]
    FatalEngine(EngineError),

    /// A non-destructive engine pass-through failed
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Index outside the bounds of a collection
    #[error("Index out of bounds: {index} (size {size})")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Collection size at the time of the request
        size: usize,
    },

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error while reading or writing configuration
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl Error {
    /// Build a [`Error::StaleResource`]
    pub fn stale(message: impl Into<String>) -> Self {
        Error::StaleResource(message.into())
    }

    /// Build a [`Error::ConcurrentModification`]
    pub fn concurrent(message: impl Into<String>) -> Self {
        Error::ConcurrentModification(message.into())
    }

    /// Build a [`Error::InvalidOperation`]
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    /// Wrap an engine failure from a destructive call
    pub fn fatal(source: EngineError) -> Self {
        Error::FatalEngine(source)
    }

    /// True if this error poisons the owning context
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::FatalEngine(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
