//! Session and transaction abstractions over a SQL destination.
//!
//! A [`Warehouse`] hands out [`WarehouseTx`] scopes: dropping a transaction
//! without calling [`WarehouseTx::commit`] rolls it back, so an invocation
//! that fails (or is aborted) part way leaves no trace beyond rows already
//! committed by earlier invocations.

use crate::dialect::Dialect;
use crate::error::Result;
use crate::value::{Row, SqlValue};

/// A connection-like handle that can run statements.
///
/// Statements use `$n` placeholders; implementations rewrite them for their
/// backend.
pub trait Session {
    /// SQL flavor of the underlying connection.
    fn dialect(&self) -> Dialect;

    /// Run a statement and return the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the statement fails.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run a query and collect every row.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the query fails or a column cannot be
    /// decoded into a [`SqlValue`].
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run several `;`-separated statements without parameters.
    ///
    /// # Errors
    ///
    /// Returns a backend error if any statement fails.
    fn batch_execute(&mut self, sql: &str) -> Result<()>;

    /// First row of a query, if any.
    ///
    /// # Errors
    ///
    /// Same as [`Session::query`].
    fn query_opt(&mut self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_iter().next())
    }
}

/// An open destination transaction.
pub trait WarehouseTx: Session {
    /// The transaction as a plain session.
    fn session(&mut self) -> &mut dyn Session;

    /// Commit everything done through this transaction.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the commit fails; the transaction is then
    /// rolled back.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A transactional destination.
pub trait Warehouse {
    fn dialect(&self) -> Dialect;

    /// Start a transaction. Dropping it uncommitted rolls back.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the transaction cannot be started.
    fn begin(&mut self) -> Result<Box<dyn WarehouseTx + '_>>;
}

/// Opens sessions on demand, one per pipeline invocation.
///
/// Readers hold a factory instead of a live connection so that the
/// connection's lifetime is scoped to the invocation that uses it.
pub trait SessionFactory: Send + Sync {
    /// Open a new session.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the connection cannot be established.
    fn connect(&self) -> Result<Box<dyn Session>>;

    /// Human-readable target, without credentials, for log lines.
    fn describe(&self) -> String;
}
