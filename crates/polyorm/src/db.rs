//! The connection-manager object.
//!
//! A [`Db`] owns everything that is scoped to one logical database: the
//! dialect and configuration, the per-table interceptor registries, the
//! schema cache, the interceptor chain and the statement monitor. It holds no
//! connection; every operation takes one, so the same call works against a
//! client, a pooled client or a transaction.
//!
//! ```ignore
//! let db = Db::new(DbConfig::new(Dialect::Postgres));
//! db.register_soft_delete("users", SoftDeleteConfig::timestamp("deleted_at"))?;
//!
//! let key = db.insert(&client, "users", Record::new().with("name", "ada")).await?.generated_key;
//! db.update(&client, "users", Record::new().with("name", "Ada"), "id = ?", &[Value::Int(1)]).await?;
//! let page = db.paginate(&client, "SELECT * FROM users ORDER BY id", &[], 2, 20).await?;
//! ```

use crate::batch::BatchResult;
use crate::client::{ExecResult, GenericClient};
use crate::config::DbConfig;
use crate::crud::{InsertResult, SaveResult};
use crate::dialect::Dialect;
use crate::error::OrmResult;
use crate::exec::Executor;
use crate::ident::{Ident, IntoIdent};
use crate::intercept::{
    InterceptContext, Interceptor, InterceptorChain, OptimisticLockConfig, Registries,
    SoftDeleteConfig, TimestampConfig, WhereClause,
};
use crate::monitor::{QueryMonitor, TracingMonitor};
use crate::paginate::Page;
use crate::record::Record;
use crate::schema::{SchemaIntrospector, TableSchema};
use crate::translate::translate;
use crate::value::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

struct Shared {
    config: DbConfig,
    registries: Registries,
    schema: SchemaIntrospector,
    chain: RwLock<InterceptorChain>,
    monitor: Arc<dyn QueryMonitor>,
}

/// Dialect-aware CRUD, pagination and batch engine.
///
/// Cloning is cheap and clones share registries and caches.
#[derive(Clone)]
pub struct Db {
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

/// Borrowed view of a [`Db`] for the duration of one operation.
pub(crate) struct Engine<'a> {
    pub(crate) exec: Executor<'a>,
    pub(crate) registries: &'a Registries,
    pub(crate) schema: &'a SchemaIntrospector,
    pub(crate) chain: InterceptorChain,
    pub(crate) native_upsert: bool,
    pub(crate) batch_size: usize,
    pub(crate) default_page_size: u64,
}

impl Engine<'_> {
    pub(crate) fn ctx<'t>(&'t self, table: &'t Ident) -> InterceptContext<'t> {
        InterceptContext {
            table,
            registries: self.registries,
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("config", &self.shared.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Db {
    /// A manager that logs statements through [`TracingMonitor`].
    pub fn new(config: DbConfig) -> Self {
        Self::with_monitor(config, TracingMonitor::new())
    }

    pub fn with_monitor(config: DbConfig, monitor: impl QueryMonitor + 'static) -> Self {
        Self::with_monitor_arc(config, Arc::new(monitor))
    }

    pub fn with_monitor_arc(config: DbConfig, monitor: Arc<dyn QueryMonitor>) -> Self {
        let schema = SchemaIntrospector::new(config.dialect);
        Self {
            timeout: config.query_timeout,
            shared: Arc::new(Shared {
                config,
                registries: Registries::new(),
                schema,
                chain: RwLock::new(InterceptorChain::default()),
                monitor,
            }),
        }
    }

    /// A handle whose operations time out after `timeout`.
    ///
    /// On expiry the in-flight statement is cancelled (best effort) and the
    /// operation fails with [`OrmError::Timeout`](crate::OrmError::Timeout).
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            timeout: Some(timeout),
        }
    }

    pub fn without_timeout(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            timeout: None,
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    pub fn dialect(&self) -> Dialect {
        self.shared.config.dialect
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn registries(&self) -> &Registries {
        &self.shared.registries
    }

    pub fn schema_cache(&self) -> &SchemaIntrospector {
        &self.shared.schema
    }

    pub fn monitor(&self) -> &Arc<dyn QueryMonitor> {
        &self.shared.monitor
    }

    fn engine(&self) -> Engine<'_> {
        let config = &self.shared.config;
        Engine {
            exec: Executor {
                connection_name: &config.connection_name,
                dialect: config.dialect,
                monitor: self.shared.monitor.as_ref(),
                monitoring_enabled: config.monitoring_enabled,
                timeout: self.timeout,
                slow_query_threshold: config.slow_query_threshold,
            },
            registries: &self.shared.registries,
            schema: &self.shared.schema,
            chain: self
                .shared
                .chain
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            native_upsert: config.native_upsert,
            batch_size: config.batch_size.max(1),
            default_page_size: config.default_page_size,
        }
    }

    // ==================== Registries ====================

    pub fn register_soft_delete(&self, table: &str, config: SoftDeleteConfig) -> OrmResult<()> {
        self.shared.registries.register_soft_delete(table, config)
    }

    pub fn register_timestamps(&self, table: &str, config: TimestampConfig) -> OrmResult<()> {
        self.shared.registries.register_timestamps(table, config)
    }

    pub fn register_optimistic_lock(
        &self,
        table: &str,
        config: OptimisticLockConfig,
    ) -> OrmResult<()> {
        self.shared.registries.register_optimistic_lock(table, config)
    }

    pub fn soft_delete_config(&self, table: &str) -> Option<SoftDeleteConfig> {
        self.shared.registries.soft_delete(table)
    }

    pub fn timestamp_config(&self, table: &str) -> Option<TimestampConfig> {
        self.shared.registries.timestamps(table)
    }

    pub fn optimistic_lock_config(&self, table: &str) -> Option<OptimisticLockConfig> {
        self.shared.registries.optimistic_lock(table)
    }

    /// Append an interceptor after the built-in ones.
    pub fn add_interceptor(&self, interceptor: impl Interceptor + 'static) {
        self.shared
            .chain
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(interceptor));
    }

    pub fn interceptor_names(&self) -> Vec<&'static str> {
        self.shared
            .chain
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
    }

    // ==================== Schema ====================

    /// Primary key and identity column of `table` (cached after the first lookup).
    pub async fn table_schema<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
    ) -> OrmResult<TableSchema> {
        let table = table.into_ident()?;
        let engine = self.engine();
        engine.schema.table_schema(&engine.exec, conn, &table).await
    }

    pub async fn primary_keys<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
    ) -> OrmResult<Vec<String>> {
        Ok(self.table_schema(conn, table).await?.primary_keys)
    }

    pub async fn identity_column<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
    ) -> OrmResult<Option<String>> {
        Ok(self.table_schema(conn, table).await?.identity_column)
    }

    // ==================== CRUD ====================

    /// Insert one row; timestamps and the initial version are filled in.
    pub async fn insert<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        record: Record,
    ) -> OrmResult<InsertResult> {
        let table = table.into_ident()?;
        self.engine().insert(conn, &table, record).await
    }

    /// Update rows matching `filter` (`?` placeholders bound from `args`).
    ///
    /// When the table has an optimistic lock and `record` carries the version
    /// column, the update is version-checked: zero affected rows yields
    /// [`OrmError::VersionConflict`](crate::OrmError::VersionConflict) if a
    /// row matches `filter`, [`OrmError::NotFound`](crate::OrmError::NotFound)
    /// otherwise.
    pub async fn update<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        record: Record,
        filter: &str,
        args: &[Value],
    ) -> OrmResult<u64> {
        let table = table.into_ident()?;
        let filter = WhereClause::new(filter, args.to_vec());
        self.engine().update(conn, &table, record, filter).await
    }

    /// Delete rows, or mark them deleted on soft-delete tables.
    pub async fn delete<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        filter: &str,
        args: &[Value],
    ) -> OrmResult<u64> {
        let table = table.into_ident()?;
        let filter = WhereClause::new(filter, args.to_vec());
        self.engine().delete(conn, &table, filter, false).await
    }

    /// Physically delete rows, ignoring any soft-delete configuration.
    pub async fn force_delete<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        filter: &str,
        args: &[Value],
    ) -> OrmResult<u64> {
        let table = table.into_ident()?;
        let filter = WhereClause::new(filter, args.to_vec());
        self.engine().delete(conn, &table, filter, true).await
    }

    /// Clear the soft-delete marker on matching rows.
    pub async fn restore<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        filter: &str,
        args: &[Value],
    ) -> OrmResult<u64> {
        let table = table.into_ident()?;
        let filter = WhereClause::new(filter, args.to_vec());
        self.engine().restore(conn, &table, filter).await
    }

    /// Insert, update or upsert by primary key.
    pub async fn save<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        record: Record,
    ) -> OrmResult<SaveResult> {
        let table = table.into_ident()?;
        self.engine().save(conn, &table, record).await
    }

    /// `SELECT *` matching `filter` (empty for all rows), excluding soft-deleted rows.
    pub async fn find<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        filter: &str,
        args: &[Value],
    ) -> OrmResult<Vec<Record>> {
        let table = table.into_ident()?;
        let filter = WhereClause::new(filter, args.to_vec());
        self.engine().find(conn, &table, filter, false).await
    }

    pub async fn find_one<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        filter: &str,
        args: &[Value],
    ) -> OrmResult<Option<Record>> {
        let table = table.into_ident()?;
        let filter = WhereClause::new(filter, args.to_vec());
        self.engine().find_one(conn, &table, filter).await
    }

    /// Like [`find`](Self::find), including soft-deleted rows.
    pub async fn find_with_deleted<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        filter: &str,
        args: &[Value],
    ) -> OrmResult<Vec<Record>> {
        let table = table.into_ident()?;
        let filter = WhereClause::new(filter, args.to_vec());
        self.engine().find(conn, &table, filter, true).await
    }

    /// Raw `COUNT(*)`; soft-deleted rows are counted.
    pub async fn count<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        filter: &str,
        args: &[Value],
    ) -> OrmResult<u64> {
        let table = table.into_ident()?;
        let filter = WhereClause::new(filter, args.to_vec());
        self.engine().count(conn, &table, filter).await
    }

    // ==================== Queries ====================

    /// One page of `sql`. `page` and `page_size` below 1 are clamped.
    pub async fn paginate<C: GenericClient>(
        &self,
        conn: &C,
        sql: &str,
        args: &[Value],
        page: u64,
        page_size: u64,
    ) -> OrmResult<Page> {
        self.engine()
            .paginate(conn, sql, args.to_vec(), page, page_size)
            .await
    }

    /// Run caller SQL written with `?` placeholders.
    pub async fn query<C: GenericClient>(
        &self,
        conn: &C,
        sql: &str,
        args: &[Value],
    ) -> OrmResult<Vec<Record>> {
        let engine = self.engine();
        let plan = translate(engine.exec.dialect, sql, args.to_vec())?;
        engine.exec.query(conn, "query", &plan).await
    }

    pub async fn query_opt<C: GenericClient>(
        &self,
        conn: &C,
        sql: &str,
        args: &[Value],
    ) -> OrmResult<Option<Record>> {
        let engine = self.engine();
        let plan = translate(engine.exec.dialect, sql, args.to_vec())?;
        engine.exec.query_opt(conn, "query", &plan).await
    }

    /// Like [`query_opt`](Self::query_opt), but no row is
    /// [`OrmError::NotFound`](crate::OrmError::NotFound).
    pub async fn query_one<C: GenericClient>(
        &self,
        conn: &C,
        sql: &str,
        args: &[Value],
    ) -> OrmResult<Record> {
        self.query_opt(conn, sql, args)
            .await?
            .ok_or_else(|| crate::OrmError::not_found("Expected one row, got none"))
    }

    pub async fn execute<C: GenericClient>(
        &self,
        conn: &C,
        sql: &str,
        args: &[Value],
    ) -> OrmResult<ExecResult> {
        let engine = self.engine();
        let plan = translate(engine.exec.dialect, sql, args.to_vec())?;
        engine.exec.execute(conn, "execute", &plan).await
    }

    // ==================== Batch ====================

    /// Insert many rows in chunks of `batch_size`. All rows must share one
    /// column set.
    pub async fn insert_batch<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        records: Vec<Record>,
    ) -> OrmResult<BatchResult> {
        let table = table.into_ident()?;
        self.engine().insert_batch(conn, &table, records).await
    }

    /// Update each record by its primary key.
    pub async fn update_batch<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        records: Vec<Record>,
    ) -> OrmResult<BatchResult> {
        let table = table.into_ident()?;
        self.engine().update_batch(conn, &table, records).await
    }

    /// Delete (or soft-delete) rows by single-column primary key.
    pub async fn delete_batch<C: GenericClient>(
        &self,
        conn: &C,
        table: impl IntoIdent,
        keys: Vec<Value>,
    ) -> OrmResult<BatchResult> {
        let table = table.into_ident()?;
        self.engine().delete_batch(conn, &table, keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::StatsMonitor;
    use crate::testing::RecordingClient;

    #[tokio::test]
    async fn statements_are_reported_to_the_monitor() {
        let stats = Arc::new(StatsMonitor::new());
        let db = Db::with_monitor_arc(
            DbConfig::new(Dialect::Sqlite).connection_name("inventory"),
            stats.clone(),
        );
        let client = RecordingClient::new();
        db.execute(&client, "DELETE FROM t WHERE id = ?", &[Value::Int(1)])
            .await
            .unwrap();
        db.query(&client, "SELECT * FROM t", &[]).await.unwrap();

        let s = stats.stats();
        assert_eq!(s.total_queries, 2);
        assert_eq!(s.delete_count, 1);
        assert_eq!(s.select_count, 1);
    }

    #[tokio::test]
    async fn monitoring_can_be_disabled() {
        let stats = Arc::new(StatsMonitor::new());
        let db = Db::with_monitor_arc(
            DbConfig::new(Dialect::Sqlite).disable_monitoring(),
            stats.clone(),
        );
        db.query(&RecordingClient::new(), "SELECT 1", &[]).await.unwrap();
        assert_eq!(stats.stats().total_queries, 0);
    }

    #[tokio::test]
    async fn invalid_table_fails_before_any_statement() {
        let db = Db::new(DbConfig::new(Dialect::Postgres));
        let client = RecordingClient::new();
        let err = db
            .insert(&client, "users; DROP TABLE x", Record::new().with("a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::OrmError::InvalidIdentifier(_)));
        assert!(client.statements().is_empty());
    }

    #[test]
    fn with_timeout_shares_state() {
        let db = Db::new(DbConfig::new(Dialect::MySql));
        let bounded = db.with_timeout(Duration::from_secs(5));
        bounded
            .register_soft_delete("t", SoftDeleteConfig::timestamp("deleted_at"))
            .unwrap();
        assert!(db.soft_delete_config("T").is_some());
        assert_eq!(bounded.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(db.timeout(), None);
        assert_eq!(bounded.without_timeout().timeout(), None);
    }

    #[test]
    fn custom_interceptors_are_appended() {
        struct Audit;
        impl Interceptor for Audit {
            fn name(&self) -> &'static str {
                "audit"
            }
        }
        let db = Db::new(DbConfig::new(Dialect::Sqlite));
        db.add_interceptor(Audit);
        assert_eq!(
            db.interceptor_names(),
            ["timestamp", "optimistic_lock", "soft_delete", "audit"]
        );
    }
}
