//! Tables

use crate::results::Results;
use crate::session::Session;
use std::fmt;
use tether_core::{Error, NativeHandle, ResourceKind, Result, RowKey};
use tether_reclaim::NativeResource;

/// Named table of a session
pub struct Table {
    session: Session,
    resource: NativeResource,
    name: String,
}

impl Table {
    pub(crate) fn new(session: Session, resource: NativeResource, name: &str) -> Self {
        Table {
            session,
            resource,
            name: name.to_string(),
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session this table belongs to
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Native handle of the table
    pub fn handle(&self) -> Result<NativeHandle> {
        self.session.ensure_open()?;
        self.resource.handle()
    }

    /// Append an empty row.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` outside a write transaction.
    pub fn add_row(&self) -> Result<RowKey> {
        let handle = self.handle()?;
        if !self.session.is_in_transaction() {
            return Err(Error::invalid(format!(
                "cannot add a row to '{}' outside a write transaction",
                self.name
            )));
        }
        Ok(self.session.engine().add_row(handle)?)
    }

    /// Live results over every row of the table.
    ///
    /// The results start unloaded; see [`Results::load`].
    pub fn all(&self) -> Result<Results> {
        let allocation = self.session.engine().table_results(self.handle()?)?;
        let resource = self
            .session
            .context()
            .register(allocation, ResourceKind::Results, false)?;
        Ok(Results::new(self.session.clone(), resource, false))
    }

    /// Free the native table now
    pub fn close(&mut self) -> Result<()> {
        self.resource.close()
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("resource", &self.resource)
            .finish()
    }
}
