//! Row-lifecycle interceptors.
//!
//! Interceptors rewrite a write before it is turned into SQL:
//!
//! - [`TimestampInterceptor`] fills `created_at`/`updated_at`.
//! - [`OptimisticLockInterceptor`] initializes and checks a version column.
//! - [`SoftDeleteInterceptor`] turns DELETE into an UPDATE of a marker column
//!   and hides marked rows from finds.
//!
//! Each one only acts on tables registered for it in the owning
//! [`Db`](crate::Db)'s [`Registries`]. The default chain runs them in the order
//! above; custom interceptors are appended after the built-in ones.

use crate::error::{OrmError, OrmResult};
use crate::ident::{Ident, validate_ident};
use crate::record::ColumnValues;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// How a soft-deleted row is marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftDeleteKind {
    /// Marker holds the deletion time; live rows are NULL.
    Timestamp,
    /// Marker is `true`; live rows are NULL or `false`.
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftDeleteConfig {
    pub field: String,
    pub kind: SoftDeleteKind,
}

impl SoftDeleteConfig {
    pub fn timestamp(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: SoftDeleteKind::Timestamp,
        }
    }

    pub fn boolean(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: SoftDeleteKind::Boolean,
        }
    }

    /// Value written when a row is soft-deleted.
    pub fn deleted_marker(&self) -> Value {
        match self.kind {
            SoftDeleteKind::Timestamp => Value::now(),
            SoftDeleteKind::Boolean => Value::Bool(true),
        }
    }

    /// Value written when a row is restored.
    pub fn live_marker(&self) -> Value {
        match self.kind {
            SoftDeleteKind::Timestamp => Value::Null,
            SoftDeleteKind::Boolean => Value::Bool(false),
        }
    }

    /// Filter selecting live rows, as generic SQL plus arguments.
    pub fn live_filter(&self) -> (String, Vec<Value>) {
        match self.kind {
            SoftDeleteKind::Timestamp => (format!("{} IS NULL", self.field), Vec::new()),
            SoftDeleteKind::Boolean => (
                format!("({f} IS NULL OR {f} = ?)", f = self.field),
                vec![Value::Bool(false)],
            ),
        }
    }
}

/// Auto-maintained timestamp columns. Either may be disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampConfig {
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            created_at: Some("created_at".to_string()),
            updated_at: Some("updated_at".to_string()),
        }
    }
}

impl TimestampConfig {
    /// `created_at` + `updated_at`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_at(mut self, field: impl Into<String>) -> Self {
        self.created_at = Some(field.into());
        self
    }

    pub fn updated_at(mut self, field: impl Into<String>) -> Self {
        self.updated_at = Some(field.into());
        self
    }

    pub fn without_created_at(mut self) -> Self {
        self.created_at = None;
        self
    }

    pub fn without_updated_at(mut self) -> Self {
        self.updated_at = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticLockConfig {
    pub version_field: String,
}

impl Default for OptimisticLockConfig {
    fn default() -> Self {
        Self::new("version")
    }
}

impl OptimisticLockConfig {
    pub fn new(version_field: impl Into<String>) -> Self {
        Self {
            version_field: version_field.into(),
        }
    }
}

/// Per-table configuration, keyed by lowercase table name.
#[derive(Debug, Default)]
pub struct Registries {
    soft_delete: RwLock<HashMap<String, SoftDeleteConfig>>,
    timestamps: RwLock<HashMap<String, TimestampConfig>>,
    locks: RwLock<HashMap<String, OptimisticLockConfig>>,
}

fn key(table: &str) -> String {
    table.to_ascii_lowercase()
}

fn lookup<T: Clone>(map: &RwLock<HashMap<String, T>>, table: &str) -> Option<T> {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key(table))
        .cloned()
}

fn store<T>(map: &RwLock<HashMap<String, T>>, table: &str, value: T) {
    map.write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key(table), value);
}

fn forget<T>(map: &RwLock<HashMap<String, T>>, table: &str) -> Option<T> {
    map.write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&key(table))
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_soft_delete(&self, table: &str, config: SoftDeleteConfig) -> OrmResult<()> {
        validate_ident(table)?;
        validate_ident(&config.field)?;
        store(&self.soft_delete, table, config);
        Ok(())
    }

    pub fn register_timestamps(&self, table: &str, config: TimestampConfig) -> OrmResult<()> {
        validate_ident(table)?;
        for field in config.created_at.iter().chain(config.updated_at.iter()) {
            validate_ident(field)?;
        }
        store(&self.timestamps, table, config);
        Ok(())
    }

    pub fn register_optimistic_lock(
        &self,
        table: &str,
        config: OptimisticLockConfig,
    ) -> OrmResult<()> {
        validate_ident(table)?;
        validate_ident(&config.version_field)?;
        store(&self.locks, table, config);
        Ok(())
    }

    pub fn soft_delete(&self, table: &str) -> Option<SoftDeleteConfig> {
        lookup(&self.soft_delete, table)
    }

    pub fn timestamps(&self, table: &str) -> Option<TimestampConfig> {
        lookup(&self.timestamps, table)
    }

    pub fn optimistic_lock(&self, table: &str) -> Option<OptimisticLockConfig> {
        lookup(&self.locks, table)
    }

    pub fn unregister_soft_delete(&self, table: &str) -> Option<SoftDeleteConfig> {
        forget(&self.soft_delete, table)
    }

    pub fn unregister_timestamps(&self, table: &str) -> Option<TimestampConfig> {
        forget(&self.timestamps, table)
    }

    pub fn unregister_optimistic_lock(&self, table: &str) -> Option<OptimisticLockConfig> {
        forget(&self.locks, table)
    }
}

/// A WHERE fragment with `?` placeholders and its arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub args: Vec<Value>,
}

impl WhereClause {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into().trim().to_string(),
            args,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// AND a condition onto the clause, parenthesizing the existing one.
    pub fn and(&mut self, condition: &str, args: impl IntoIterator<Item = Value>) {
        self.sql = if self.sql.is_empty() {
            condition.to_string()
        } else {
            format!("({}) AND {condition}", self.sql)
        };
        self.args.extend(args);
    }

    /// `a = ? AND b = ?` over the given columns.
    pub fn equals(columns: &[String], values: Vec<Value>) -> Self {
        let sql = columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        Self::new(sql, values)
    }
}

/// Version check attached to an UPDATE by the optimistic lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionCheck {
    pub field: String,
    /// Version the caller read; the row must still carry it.
    pub expected: i64,
}

impl VersionCheck {
    /// Version written by a successful update.
    pub fn next(&self) -> OrmResult<i64> {
        self.expected.checked_add(1).ok_or_else(|| {
            OrmError::validation(format!(
                "version column '{}' cannot be incremented past {}",
                self.field, self.expected
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOp {
    /// Ordinary SET columns.
    pub values: ColumnValues,
    pub filter: WhereClause,
    pub version: Option<VersionCheck>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteAction {
    /// Physical `DELETE`.
    Delete,
    /// `UPDATE ... SET <values>` instead.
    Update(ColumnValues),
}

#[derive(Debug, Clone)]
pub struct DeleteOp {
    pub filter: WhereClause,
    pub action: DeleteAction,
}

#[derive(Debug, Clone)]
pub struct FindOp {
    pub filter: WhereClause,
    /// Include soft-deleted rows.
    pub with_deleted: bool,
}

/// What an interceptor may consult.
pub struct InterceptContext<'a> {
    pub table: &'a Ident,
    pub registries: &'a Registries,
}

/// A hook into INSERT / UPDATE / DELETE / find synthesis.
///
/// All methods default to no-ops.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn before_insert(&self, _ctx: &InterceptContext<'_>, _values: &mut ColumnValues) -> OrmResult<()> {
        Ok(())
    }

    fn before_update(&self, _ctx: &InterceptContext<'_>, _op: &mut UpdateOp) -> OrmResult<()> {
        Ok(())
    }

    fn before_delete(&self, _ctx: &InterceptContext<'_>, _op: &mut DeleteOp) -> OrmResult<()> {
        Ok(())
    }

    fn before_find(&self, _ctx: &InterceptContext<'_>, _op: &mut FindOp) -> OrmResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampInterceptor;

impl Interceptor for TimestampInterceptor {
    fn name(&self) -> &'static str {
        "timestamp"
    }

    fn before_insert(&self, ctx: &InterceptContext<'_>, values: &mut ColumnValues) -> OrmResult<()> {
        let Some(config) = ctx.registries.timestamps(ctx.table.as_str()) else {
            return Ok(());
        };
        let now = Value::now();
        for field in config.created_at.iter().chain(config.updated_at.iter()) {
            values.set_if_missing(field, now.clone());
        }
        Ok(())
    }

    fn before_update(&self, ctx: &InterceptContext<'_>, op: &mut UpdateOp) -> OrmResult<()> {
        if let Some(field) = ctx
            .registries
            .timestamps(ctx.table.as_str())
            .and_then(|c| c.updated_at)
        {
            op.values.set(&field, Value::now());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticLockInterceptor;

impl Interceptor for OptimisticLockInterceptor {
    fn name(&self) -> &'static str {
        "optimistic_lock"
    }

    fn before_insert(&self, ctx: &InterceptContext<'_>, values: &mut ColumnValues) -> OrmResult<()> {
        if let Some(config) = ctx.registries.optimistic_lock(ctx.table.as_str()) {
            values.set_if_missing(&config.version_field, Value::Int(1));
        }
        Ok(())
    }

    fn before_update(&self, ctx: &InterceptContext<'_>, op: &mut UpdateOp) -> OrmResult<()> {
        let Some(config) = ctx.registries.optimistic_lock(ctx.table.as_str()) else {
            return Ok(());
        };
        let Some(current) = op.values.remove(&config.version_field) else {
            return Ok(());
        };
        let expected = current.as_i64().ok_or_else(|| {
            OrmError::validation(format!(
                "version column '{}' must be an integer, got {}",
                config.version_field,
                current.type_name()
            ))
        })?;
        op.version = Some(VersionCheck {
            field: config.version_field,
            expected,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SoftDeleteInterceptor;

impl Interceptor for SoftDeleteInterceptor {
    fn name(&self) -> &'static str {
        "soft_delete"
    }

    fn before_delete(&self, ctx: &InterceptContext<'_>, op: &mut DeleteOp) -> OrmResult<()> {
        if let Some(config) = ctx.registries.soft_delete(ctx.table.as_str()) {
            let mut values = ColumnValues::new();
            values.set(&config.field, config.deleted_marker());
            op.action = DeleteAction::Update(values);
        }
        Ok(())
    }

    fn before_find(&self, ctx: &InterceptContext<'_>, op: &mut FindOp) -> OrmResult<()> {
        if op.with_deleted {
            return Ok(());
        }
        if let Some(config) = ctx.registries.soft_delete(ctx.table.as_str()) {
            let (sql, args) = config.live_filter();
            op.filter.and(&sql, args);
        }
        Ok(())
    }
}

/// Ordered interceptor list.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Default for InterceptorChain {
    /// Timestamp, then optimistic lock, then soft delete.
    fn default() -> Self {
        Self {
            interceptors: vec![
                Arc::new(TimestampInterceptor),
                Arc::new(OptimisticLockInterceptor),
                Arc::new(SoftDeleteInterceptor),
            ],
        }
    }
}

impl InterceptorChain {
    /// A chain with no interceptors.
    pub fn empty() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn before_insert(&self, ctx: &InterceptContext<'_>, values: &mut ColumnValues) -> OrmResult<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.before_insert(ctx, values))
    }

    pub fn before_update(&self, ctx: &InterceptContext<'_>, op: &mut UpdateOp) -> OrmResult<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.before_update(ctx, op))
    }

    pub fn before_delete(&self, ctx: &InterceptContext<'_>, op: &mut DeleteOp) -> OrmResult<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.before_delete(ctx, op))
    }

    pub fn before_find(&self, ctx: &InterceptContext<'_>, op: &mut FindOp) -> OrmResult<()> {
        self.interceptors
            .iter()
            .try_for_each(|i| i.before_find(ctx, op))
    }
}
