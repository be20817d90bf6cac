//! Rows

use crate::session::Session;
use std::fmt;
use tether_core::{NativeHandle, Result, RowKey};
use tether_reclaim::NativeResource;

/// Accessor for one row of a collection
pub struct Row {
    session: Session,
    resource: NativeResource,
}

impl Row {
    pub(crate) fn new(session: Session, resource: NativeResource) -> Self {
        Row { session, resource }
    }

    /// Native handle of the accessor
    pub fn handle(&self) -> Result<NativeHandle> {
        self.session.ensure_open()?;
        self.resource.handle()
    }

    /// Stable key of the row
    pub fn key(&self) -> Result<RowKey> {
        Ok(self.session.engine().row_key(self.handle()?)?)
    }

    /// Free the native accessor now
    pub fn close(&mut self) -> Result<()> {
        self.resource.close()
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Row").field("resource", &self.resource).finish()
    }
}
