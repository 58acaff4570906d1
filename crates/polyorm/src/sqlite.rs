//! `rusqlite` adapter.
//!
//! SQLite calls are synchronous, so each statement runs on tokio's blocking
//! pool while the caller's future awaits it. That keeps timeouts effective:
//! [`GenericClient::cancel`] interrupts the statement in flight.
//!
//! A [`SqliteTransaction`] holds the client's gate for its whole lifetime;
//! statements issued through the plain client wait until it commits or rolls
//! back. Dropping an unfinished transaction rolls it back.

use crate::client::{ExecResult, GenericClient};
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::value::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, InterruptHandle, params_from_iter};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Timestamp(ts) => SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::Json(j) => SqlValue::Text(j.to_string()),
        Value::Uuid(u) => SqlValue::Text(u.hyphenated().to_string()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn query_rows(conn: &Connection, sql: &str, params: Vec<SqlValue>) -> OrmResult<Vec<Record>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (idx, name) in names.iter().enumerate() {
            record.set(name.as_str(), from_sqlite(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn execute_statement(conn: &Connection, sql: &str, params: Vec<SqlValue>) -> OrmResult<ExecResult> {
    let mut stmt = conn.prepare_cached(sql)?;
    let affected = stmt.execute(params_from_iter(params))?;
    Ok(ExecResult {
        rows_affected: affected as u64,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

/// Run `f` against the connection on the blocking pool.
async fn run_blocking<T, F>(conn: &Arc<Mutex<Connection>>, f: F) -> OrmResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> OrmResult<T> + Send + 'static,
{
    let conn = Arc::clone(conn);
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    })
    .await
    .map_err(|e| OrmError::driver(format!("sqlite worker failed: {e}")))?
}

async fn run_query(conn: &Arc<Mutex<Connection>>, sql: &str, params: &[Value]) -> OrmResult<Vec<Record>> {
    let sql = sql.to_string();
    let params: Vec<SqlValue> = params.iter().map(to_sqlite).collect();
    run_blocking(conn, move |c| query_rows(c, &sql, params)).await
}

async fn run_execute(conn: &Arc<Mutex<Connection>>, sql: &str, params: &[Value]) -> OrmResult<ExecResult> {
    let sql = sql.to_string();
    let params: Vec<SqlValue> = params.iter().map(to_sqlite).collect();
    run_blocking(conn, move |c| execute_statement(c, &sql, params)).await
}

/// A shared SQLite connection.
///
/// Cloning is cheap; clones share the connection and its transaction gate.
#[derive(Clone)]
pub struct SqliteClient {
    conn: Arc<Mutex<Connection>>,
    gate: Arc<AsyncMutex<()>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteClient {
    pub fn open(path: impl AsRef<Path>) -> OrmResult<Self> {
        let conn = Connection::open(path).map_err(|e| OrmError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> OrmResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| OrmError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        let interrupt = conn.get_interrupt_handle();
        Self {
            conn: Arc::new(Mutex::new(conn)),
            gate: Arc::new(AsyncMutex::new(())),
            interrupt: Arc::new(interrupt),
        }
    }

    /// Run a batch of `;`-separated statements without parameters (DDL, fixtures).
    pub async fn execute_batch(&self, sql: &str) -> OrmResult<()> {
        let _gate = self.gate.lock().await;
        let sql = sql.to_string();
        run_blocking(&self.conn, move |c| Ok(c.execute_batch(&sql)?)).await
    }

    /// Begin a transaction. Waits for any other open transaction on this client.
    pub async fn transaction(&self) -> OrmResult<SqliteTransaction> {
        let gate = Arc::clone(&self.gate).lock_owned().await;
        run_blocking(&self.conn, |c| Ok(c.execute_batch("BEGIN")?)).await?;
        Ok(SqliteTransaction {
            conn: Arc::clone(&self.conn),
            interrupt: Arc::clone(&self.interrupt),
            finished: false,
            _gate: gate,
        })
    }
}

impl fmt::Debug for SqliteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteClient").finish_non_exhaustive()
    }
}

impl GenericClient for SqliteClient {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Record>> {
        let _gate = self.gate.lock().await;
        run_query(&self.conn, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecResult> {
        let _gate = self.gate.lock().await;
        run_execute(&self.conn, sql, params).await
    }

    fn cancel(&self) {
        self.interrupt.interrupt();
    }
}

/// An open SQLite transaction.
///
/// Finish it with [`commit`](Self::commit) or [`rollback`](Self::rollback);
/// dropping it unfinished rolls back.
pub struct SqliteTransaction {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    finished: bool,
    _gate: OwnedMutexGuard<()>,
}

impl SqliteTransaction {
    pub async fn commit(mut self) -> OrmResult<()> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(mut self) -> OrmResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, sql: &'static str) -> OrmResult<()> {
        run_blocking(&self.conn, move |c| Ok(c.execute_batch(sql)?)).await?;
        self.finished = true;
        Ok(())
    }
}

impl fmt::Debug for SqliteTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteTransaction")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if conn.is_autocommit() {
            return;
        }
        if let Err(error) = conn.execute_batch("ROLLBACK") {
            tracing::warn!(target: "polyorm.sqlite", %error, "rollback on drop failed");
        }
    }
}

impl GenericClient for SqliteTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Record>> {
        run_query(&self.conn, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecResult> {
        run_execute(&self.conn, sql, params).await
    }

    fn cancel(&self) {
        self.interrupt.interrupt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    async fn client() -> SqliteClient {
        let client = SqliteClient::open_in_memory().unwrap();
        client
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, at TEXT, blob BLOB)")
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn execute_reports_rowid() {
        let client = client().await;
        let r = client
            .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("a")])
            .await
            .unwrap();
        assert_eq!(r.rows_affected, 1);
        assert_eq!(r.last_insert_id, Some(1));
    }

    #[tokio::test]
    async fn values_round_trip_through_sqlite_storage() {
        let client = client().await;
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        client
            .execute(
                "INSERT INTO t (id, name, at, blob) VALUES (?, ?, ?, ?)",
                &[Value::Int(7), Value::Null, Value::Timestamp(at), Value::Bytes(vec![1, 2])],
            )
            .await
            .unwrap();

        let row = client.query_one("SELECT * FROM t", &[]).await.unwrap();
        assert_eq!(row.get("id"), Some(&Value::Int(7)));
        assert_eq!(row.get("name"), Some(&Value::Null));
        assert_eq!(row.try_get::<chrono::DateTime<Utc>>("at").unwrap(), at);
        assert_eq!(row.get("blob"), Some(&Value::Bytes(vec![1, 2])));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let client = client().await;
        {
            let tx = client.transaction().await.unwrap();
            tx.execute("INSERT INTO t (name) VALUES ('x')", &[]).await.unwrap();
        }
        let rows = client.query("SELECT * FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let client = client().await;
        let tx = client.transaction().await.unwrap();
        tx.execute("INSERT INTO t (name) VALUES ('x')", &[]).await.unwrap();
        tx.commit().await.unwrap();
        let rows = client.query("SELECT name FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn driver_errors_surface_as_driver() {
        let client = client().await;
        let err = client.query("SELECT * FROM missing", &[]).await.unwrap_err();
        assert!(err.is_driver());
    }
}
