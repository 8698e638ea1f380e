//! Blocking presentation of the driver.
//!
//! The codecs and the protocol engine are written once against the
//! cooperative runtime; this module re-exposes them behind a blocking
//! surface by pinning each connection to its own current-thread runtime.
//! One OS thread drives one connection; the per-connection serialization
//! semantics are identical to the async surface.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};

use crate::config::{ConnectParams, Description};
use crate::error::Result;
use crate::row::{Row, Value};
use crate::statement::ColumnInfo;

/// A blocking connection.
pub struct Connection {
    runtime: Arc<Runtime>,
    inner: crate::connection::Connection,
}

impl Connection {
    /// Connect and authenticate, blocking until ready.
    pub fn connect(description: Description, params: ConnectParams) -> Result<Self> {
        let runtime = Arc::new(
            Builder::new_current_thread()
                .enable_io()
                .enable_time()
                .build()?,
        );
        let inner = runtime.block_on(crate::connection::Connection::connect(
            description,
            params,
        ))?;
        Ok(Self { runtime, inner })
    }

    /// Connect with an EZConnect string.
    pub fn connect_simple(connect_string: &str, username: &str, password: &str) -> Result<Self> {
        let description: Description = connect_string.parse()?;
        Self::connect(description, ConnectParams::with_credentials(username, password))
    }

    /// The async connection behind this facade.
    pub fn as_async(&self) -> &crate::connection::Connection {
        &self.inner
    }

    /// Open a blocking cursor.
    pub fn cursor(&self) -> Cursor {
        Cursor {
            runtime: Arc::clone(&self.runtime),
            inner: self.inner.cursor(),
        }
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        self.runtime.block_on(self.inner.commit())
    }

    /// Roll the open transaction back.
    pub fn rollback(&self) -> Result<()> {
        self.runtime.block_on(self.inner.rollback())
    }

    /// Cheap liveness check.
    pub fn ping(&self) -> Result<()> {
        self.runtime.block_on(self.inner.ping())
    }

    /// Change the per-call timeout.
    pub fn set_call_timeout(&self, timeout: Option<Duration>) {
        self.runtime.block_on(self.inner.set_call_timeout(timeout));
    }

    /// Cancel the in-flight call from another thread. The blocked caller
    /// returns `CallCancelled`; the connection stays usable.
    pub fn break_external(&self) {
        self.inner.break_external();
    }

    /// Orderly close.
    pub fn close(&self) -> Result<()> {
        self.runtime.block_on(self.inner.close())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

/// A blocking cursor.
pub struct Cursor {
    runtime: Arc<Runtime>,
    inner: crate::cursor::Cursor,
}

impl Cursor {
    /// Execute a statement with positional binds.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.runtime.clone().block_on(self.inner.execute(sql, params))
    }

    /// Execute once per bind row.
    pub fn execute_many(
        &mut self,
        sql: &str,
        rows: Vec<Vec<Value>>,
        options: crate::cursor::ExecuteManyOptions,
    ) -> Result<u64> {
        self.runtime
            .clone()
            .block_on(self.inner.execute_many(sql, rows, options))
    }

    /// Fetch the next row.
    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        self.runtime.clone().block_on(self.inner.fetchone())
    }

    /// Fetch up to `count` rows.
    pub fn fetchmany(&mut self, count: usize) -> Result<Vec<Row>> {
        self.runtime.clone().block_on(self.inner.fetchmany(count))
    }

    /// Fetch every remaining row.
    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        self.runtime.clone().block_on(self.inner.fetchall())
    }

    /// Column metadata of the last query.
    pub fn description(&self) -> Option<&[ColumnInfo]> {
        self.inner.description()
    }

    /// Rows affected by the last execute.
    pub fn row_count(&self) -> u64 {
        self.inner.row_count()
    }

    /// The async cursor behind this facade.
    pub fn as_async(&mut self) -> &mut crate::cursor::Cursor {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failure_is_synchronous() {
        // TEST-NET address; the dial fails fast with a short timeout.
        let mut description: Description = "192.0.2.1:1521/X".parse().unwrap();
        description.tcp_connect_timeout = Duration::from_millis(50);
        let result = Connection::connect(
            description,
            ConnectParams::with_credentials("u", "p"),
        );
        assert!(result.is_err());
    }
}
