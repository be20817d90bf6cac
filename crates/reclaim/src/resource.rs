//! Managed wrapper around one native handle

use crate::context::ReclamationContext;
use crate::pool::{ReferenceRecord, SlotIndex};
use std::fmt;
use tether_core::{Error, FinalizerId, NativeHandle, ResourceKind, Result};

/// Owning wrapper of an engine resource.
///
/// Created by [`ReclamationContext::register`]. The handle is freed exactly
/// once: either by [`NativeResource::close`], which finalizes immediately, or
/// after the wrapper is dropped, when the reclaimer drains its record.
pub struct NativeResource {
    context: ReclamationContext,
    slot: SlotIndex,
    record: ReferenceRecord,
    closed: bool,
}

impl NativeResource {
    pub(crate) fn new(context: ReclamationContext, slot: SlotIndex, record: ReferenceRecord) -> Self {
        NativeResource {
            context,
            slot,
            record,
            closed: false,
        }
    }

    /// Handle to pass to the engine.
    ///
    /// # Errors
    ///
    /// `StaleResource` if the resource was closed, or if it is derived from
    /// a root that has been torn down.
    pub fn handle(&self) -> Result<NativeHandle> {
        if self.closed {
            return Err(Error::stale(format!(
                "{} {} has already been closed",
                self.record.kind, self.record.handle
            )));
        }
        if !self.record.is_root && self.context.is_torn_down() {
            return Err(Error::stale(format!(
                "the root owning {} {} has been closed",
                self.record.kind, self.record.handle
            )));
        }
        Ok(self.record.handle)
    }

    /// Finalizer paired with the handle
    pub fn finalizer(&self) -> FinalizerId {
        self.record.finalizer
    }

    /// Kind of the resource
    pub fn kind(&self) -> ResourceKind {
        self.record.kind
    }

    /// True for the root of a context
    pub fn is_root(&self) -> bool {
        self.record.is_root
    }

    /// Context this resource belongs to
    pub fn context(&self) -> &ReclamationContext {
        &self.context
    }

    /// Pool slot of this resource's record
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// True after [`NativeResource::close`]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True if [`NativeResource::handle`] would succeed
    pub fn is_valid(&self) -> bool {
        self.handle().is_ok()
    }

    /// Free the native resource now, under the context lock.
    ///
    /// Closing a root tears its context down. Idempotent: closing twice is a
    /// no-op. A failure is fatal for the context; the handle is not retried.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.context.close_resource(self.slot)
    }
}

impl Drop for NativeResource {
    fn drop(&mut self) {
        if !self.closed {
            self.context.enqueue_reclaim(self.slot);
        }
    }
}

impl fmt::Debug for NativeResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeResource")
            .field("kind", &self.record.kind)
            .field("handle", &self.record.handle)
            .field("is_root", &self.record.is_root)
            .field("closed", &self.closed)
            .field("context", &self.context.id())
            .finish()
    }
}
