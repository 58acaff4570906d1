//! SQL execution interface.
//!
//! [`GenericClient`] is the only seam between the engine and a live database.
//! It is implemented by plain connections, pooled connections and transaction
//! handles alike, so every engine operation can run inside a transaction just
//! by passing the transaction handle instead of the connection.
//!
//! Statements arriving here are already dialect-native: placeholders have been
//! renumbered and the argument list matches the placeholder count exactly.

use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Outcome of a data-modifying statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Driver-reported generated key (MySQL `LAST_INSERT_ID()`, SQLite rowid).
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }
}

/// A statement prepared on one connection.
///
/// `handle` carries the driver's own statement object when the client has one;
/// clients without native preparation re-execute `sql`.
#[derive(Clone)]
pub struct PreparedStatement {
    sql: String,
    handle: Option<Arc<dyn Any + Send + Sync>>,
}

impl PreparedStatement {
    /// A statement with no driver-side handle.
    pub fn unprepared(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            handle: None,
        }
    }

    pub fn with_handle<H: Any + Send + Sync>(sql: impl Into<String>, handle: H) -> Self {
        Self {
            sql: sql.into(),
            handle: Some(Arc::new(handle)),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Downcast the driver handle.
    pub fn handle<H: Any>(&self) -> Option<&H> {
        self.handle.as_deref()?.downcast_ref::<H>()
    }
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("sql", &self.sql)
            .field("native", &self.handle.is_some())
            .finish()
    }
}

/// A trait that unifies database clients and transactions.
pub trait GenericClient: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Vec<Record>>> + Send;

    /// Execute a query and return the first row.
    ///
    /// 0 rows is [`OrmError::NotFound`]; extra rows are ignored.
    fn query_one(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Record>> + Send {
        async move {
            self.query(sql, params)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| OrmError::not_found("Expected one row, got none"))
        }
    }

    /// Execute a query and return the first row, if any.
    fn query_opt(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Option<Record>>> + Send {
        async move { Ok(self.query(sql, params).await?.into_iter().next()) }
    }

    /// Execute a statement and return the affected row count.
    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<ExecResult>> + Send;

    /// Execute a statement whose **last** placeholder is an OUT bind
    /// (`INSERT ... RETURNING pk INTO :n`) and return the bound value.
    ///
    /// `params` holds the IN arguments only. The default reports
    /// [`OrmError::Unsupported`] so callers can fall back to a plain insert.
    fn execute_returning_into(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Option<Value>>> + Send {
        let _ = (sql, params);
        async { Err(OrmError::Unsupported("OUT-bound RETURNING INTO".to_string())) }
    }

    /// Whether [`prepare_statement`](Self::prepare_statement) yields a native statement.
    fn supports_prepared_statements(&self) -> bool {
        false
    }

    /// Prepare a statement on this connection.
    ///
    /// Prepared statements are per-connection and must not be used across connections.
    fn prepare_statement(
        &self,
        sql: &str,
    ) -> impl Future<Output = OrmResult<PreparedStatement>> + Send {
        let stmt = PreparedStatement::unprepared(sql);
        async move { Ok(stmt) }
    }

    /// Execute a prepared statement and return the affected row count.
    fn execute_prepared(
        &self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<ExecResult>> + Send {
        self.execute(stmt.sql(), params)
    }

    /// Best-effort server-side cancellation of the statement in flight.
    ///
    /// Called when an operation's timeout expires. The default does nothing.
    fn cancel(&self) {}
}

impl<C: GenericClient> GenericClient for &C {
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Vec<Record>>> + Send {
        (*self).query(sql, params)
    }

    fn query_one(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Record>> + Send {
        (*self).query_one(sql, params)
    }

    fn query_opt(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Option<Record>>> + Send {
        (*self).query_opt(sql, params)
    }

    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<ExecResult>> + Send {
        (*self).execute(sql, params)
    }

    fn execute_returning_into(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<Option<Value>>> + Send {
        (*self).execute_returning_into(sql, params)
    }

    fn supports_prepared_statements(&self) -> bool {
        (*self).supports_prepared_statements()
    }

    fn prepare_statement(
        &self,
        sql: &str,
    ) -> impl Future<Output = OrmResult<PreparedStatement>> + Send {
        (*self).prepare_statement(sql)
    }

    fn execute_prepared(
        &self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> impl Future<Output = OrmResult<ExecResult>> + Send {
        (*self).execute_prepared(stmt, params)
    }

    fn cancel(&self) {
        (*self).cancel()
    }
}
