//! Routes notifications to report decoders by source attribute handle.
//!
//! Only handles the central actually subscribed to are bound; anything
//! else is ignored without error.

use heapless::Vec;

use super::{HidReport, ReportKind};
use crate::ble::ConnHandle;
use crate::error::Error;
use crate::gatt::Handle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Route {
    conn: ConnHandle,
    handle: Handle,
    kind: ReportKind,
}

/// Table of `(connection, value handle) → report kind` bindings.
pub struct ReportRouter<const N: usize> {
    routes: Vec<Route, N>,
}

impl<const N: usize> Default for ReportRouter<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ReportRouter<N> {
    pub const fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Binds `handle` on `conn` to `kind`, replacing an existing binding.
    pub fn bind(&mut self, conn: ConnHandle, handle: Handle, kind: ReportKind) -> Result<(), Error> {
        if let Some(route) = self
            .routes
            .iter_mut()
            .find(|r| r.conn == conn && r.handle == handle)
        {
            route.kind = kind;
            return Ok(());
        }
        self.routes
            .push(Route { conn, handle, kind })
            .map_err(|_| Error::ResourceExhausted)
    }

    /// Drops every binding of `conn`.
    pub fn unbind(&mut self, conn: ConnHandle) {
        self.routes.retain(|r| r.conn != conn);
    }

    pub fn kind_of(&self, conn: ConnHandle, handle: Handle) -> Option<ReportKind> {
        self.routes
            .iter()
            .find(|r| r.conn == conn && r.handle == handle)
            .map(|r| r.kind)
    }

    pub fn is_bound(&self, conn: ConnHandle) -> bool {
        self.routes.iter().any(|r| r.conn == conn)
    }

    /// Decodes a notification from `handle` on `conn`.
    ///
    /// `None` for unbound handles and for payloads too short to decode.
    pub fn translate(&self, conn: ConnHandle, handle: Handle, payload: &[u8]) -> Option<HidReport> {
        let kind = self.kind_of(conn, handle)?;
        let report = HidReport::decode(kind, payload);
        if report.is_none() {
            warn!("hid: undecodable {} bytes from handle {:#x}", payload.len(), handle);
        }
        report
    }
}
