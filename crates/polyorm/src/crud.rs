//! INSERT / UPDATE / DELETE / upsert synthesis.
//!
//! The `plan_*` functions are pure: they build generic `?` SQL from a
//! [`ColumnValues`] set (columns in lexicographic order) and run it through
//! [`translate`], so their output is exactly what the driver receives. The
//! write paths on [`Engine`] compose them with the interceptor chain, the
//! schema cache and the executor.

use crate::client::GenericClient;
use crate::db::Engine;
use crate::dialect::{Dialect, GeneratedKeyStyle, UpsertStyle};
use crate::error::{OrmError, OrmResult};
use crate::ident::Ident;
use crate::intercept::{DeleteAction, DeleteOp, FindOp, UpdateOp, VersionCheck, WhereClause};
use crate::record::{ColumnValues, Record, StatementPlan};
use crate::schema::TableSchema;
use crate::translate::translate;
use crate::value::Value;

/// Outcome of an insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertResult {
    pub rows_affected: u64,
    /// Generated (or caller-supplied) primary key, when one could be determined.
    pub generated_key: Option<Value>,
}

/// Which path [`Db::save`](crate::Db::save) took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Inserted,
    Updated,
    Upserted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveResult {
    pub action: SaveAction,
    pub rows_affected: u64,
    pub generated_key: Option<Value>,
}

/// How the key of an inserted row is read back.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyRetrieval {
    /// Nothing to read; the caller-supplied key (if any) is reported.
    None,
    /// `ExecResult::last_insert_id`.
    LastInsertId,
    /// The statement returns one row holding the key (`RETURNING pk`).
    Returning(String),
    /// The statement's trailing `SELECT SCOPE_IDENTITY()` returns the key.
    ScopeIdentity,
    /// The last placeholder is an OUT bind. `plain` is the same insert
    /// without the `RETURNING ... INTO` suffix, used when the client cannot
    /// bind OUT parameters.
    ReturningInto { column: String, plain: StatementPlan },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub statement: StatementPlan,
    pub key: KeyRetrieval,
}

/// Columns an upsert treats specially.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertOptions<'a> {
    /// Incremented on conflict instead of overwritten.
    pub version_field: Option<&'a str>,
    /// Never overwritten on conflict.
    pub created_at_field: Option<&'a str>,
}

fn require_values(table: &Ident, values: &ColumnValues) -> OrmResult<()> {
    if values.is_empty() {
        return Err(OrmError::EmptyColumnSet {
            table: table.to_string(),
        });
    }
    Ok(())
}

fn require_filter(table: &Ident, filter: &WhereClause, statement: &str) -> OrmResult<()> {
    if filter.is_empty() {
        return Err(OrmError::validation(format!(
            "{statement} on '{table}' requires a WHERE clause"
        )));
    }
    Ok(())
}

fn column_list(values: &ColumnValues) -> String {
    values.columns().collect::<Vec<_>>().join(", ")
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn insert_sql(table: &Ident, values: &ColumnValues) -> String {
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        column_list(values),
        placeholders(values.len())
    )
}

fn where_suffix(filter: &WhereClause) -> String {
    if filter.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filter.sql)
    }
}

/// `INSERT INTO t (cols) VALUES (...)` plus the dialect's key retrieval.
///
/// - PostgreSQL appends `RETURNING pk` for a single-column key named `id`.
/// - SQL Server chains `; SELECT SCOPE_IDENTITY()` for a single identity key.
/// - Oracle appends `RETURNING pk INTO :n` for a single-column key.
/// - MySQL and SQLite rely on the driver's last insert id.
pub fn plan_insert(
    dialect: Dialect,
    table: &Ident,
    values: &ColumnValues,
    schema: &TableSchema,
) -> OrmResult<InsertPlan> {
    require_values(table, values)?;
    let sql = insert_sql(table, values);
    let args: Vec<Value> = values.values().cloned().collect();
    let pk = schema.single_primary_key();

    let (sql, key) = match (dialect.generated_key_style(), pk) {
        (GeneratedKeyStyle::Returning, Some(pk)) if pk.eq_ignore_ascii_case("id") => (
            format!("{sql} RETURNING {pk}"),
            KeyRetrieval::Returning(pk.to_string()),
        ),
        (GeneratedKeyStyle::ScopeIdentity, Some(pk)) if schema.is_identity(pk) => (
            format!("{sql}; SELECT SCOPE_IDENTITY()"),
            KeyRetrieval::ScopeIdentity,
        ),
        (GeneratedKeyStyle::ReturningInto, Some(pk)) => {
            let plain = translate(dialect, &sql, args)?;
            let out = dialect.placeholder(plain.args.len() + 1);
            let statement = StatementPlan::new(
                format!("{} RETURNING {pk} INTO {out}", plain.sql),
                plain.args.clone(),
            );
            return Ok(InsertPlan {
                statement,
                key: KeyRetrieval::ReturningInto {
                    column: pk.to_string(),
                    plain,
                },
            });
        }
        (GeneratedKeyStyle::LastInsertId, _) => (sql, KeyRetrieval::LastInsertId),
        _ => (sql, KeyRetrieval::None),
    };

    Ok(InsertPlan {
        statement: translate(dialect, &sql, args)?,
        key,
    })
}

/// `UPDATE t SET ... WHERE ...`.
///
/// With a [`VersionCheck`], `version = ?` (incremented) is appended to SET and
/// `version = ?` (expected) is ANDed onto the parenthesized WHERE. Arguments
/// are ordered SET values, new version, WHERE arguments, expected version.
pub fn plan_update(dialect: Dialect, table: &Ident, op: &UpdateOp) -> OrmResult<StatementPlan> {
    if op.values.is_empty() && op.version.is_none() {
        return Err(OrmError::EmptyColumnSet {
            table: table.to_string(),
        });
    }
    require_filter(table, &op.filter, "UPDATE")?;

    let mut sets: Vec<String> = op.values.columns().map(|c| format!("{c} = ?")).collect();
    let mut args: Vec<Value> = op.values.values().cloned().collect();
    let mut where_sql = op.filter.sql.clone();

    if let Some(check) = &op.version {
        sets.push(format!("{} = ?", check.field));
        args.push(Value::Int(check.next()?));
        where_sql = format!("({where_sql}) AND {} = ?", check.field);
    }
    args.extend(op.filter.args.iter().cloned());
    if let Some(VersionCheck { expected, .. }) = &op.version {
        args.push(Value::Int(*expected));
    }

    let sql = format!("UPDATE {table} SET {} WHERE {where_sql}", sets.join(", "));
    translate(dialect, &sql, args)
}

/// Physical `DELETE FROM t WHERE ...`.
pub fn plan_delete(dialect: Dialect, table: &Ident, filter: &WhereClause) -> OrmResult<StatementPlan> {
    require_filter(table, filter, "DELETE")?;
    let sql = format!("DELETE FROM {table} WHERE {}", filter.sql);
    translate(dialect, &sql, filter.args.clone())
}

/// Soft delete (or restore): `UPDATE t SET <marker> = ? WHERE ...`.
pub fn plan_soft_delete(
    dialect: Dialect,
    table: &Ident,
    values: &ColumnValues,
    filter: &WhereClause,
) -> OrmResult<StatementPlan> {
    plan_update(
        dialect,
        table,
        &UpdateOp {
            values: values.clone(),
            filter: filter.clone(),
            version: None,
        },
    )
}

/// `SELECT * FROM t [WHERE ...]`.
pub fn plan_select(dialect: Dialect, table: &Ident, filter: &WhereClause) -> OrmResult<StatementPlan> {
    let sql = format!("SELECT * FROM {table}{}", where_suffix(filter));
    translate(dialect, &sql, filter.args.clone())
}

/// `SELECT COUNT(*) FROM t [WHERE ...]`.
pub fn plan_count_rows(dialect: Dialect, table: &Ident, filter: &WhereClause) -> OrmResult<StatementPlan> {
    let sql = format!("SELECT COUNT(*) FROM {table}{}", where_suffix(filter));
    translate(dialect, &sql, filter.args.clone())
}

/// Single-statement insert-or-update keyed on the table's primary key.
///
/// Primary-key columns and the created-at column are never overwritten on
/// conflict; the version column is incremented. MERGE dialects leave the
/// identity column out of the insert list.
pub fn plan_upsert(
    dialect: Dialect,
    table: &Ident,
    values: &ColumnValues,
    schema: &TableSchema,
    options: &UpsertOptions<'_>,
) -> OrmResult<StatementPlan> {
    require_values(table, values)?;
    let Some(first_pk) = schema.primary_keys.first() else {
        return Err(OrmError::validation(format!(
            "upsert on '{table}' requires a primary key"
        )));
    };

    let is_field = |field: Option<&str>, c: &str| field.is_some_and(|f| f.eq_ignore_ascii_case(c));
    let updates: Vec<&str> = values
        .columns()
        .filter(|c| {
            !schema.is_primary_key(c)
                && !is_field(options.version_field, c)
                && !is_field(options.created_at_field, c)
        })
        .collect();
    let version = options.version_field.filter(|v| values.contains(v));
    let args: Vec<Value> = values.values().cloned().collect();

    let sql = match dialect.upsert_style() {
        UpsertStyle::OnDuplicateKey => {
            let mut sets: Vec<String> = updates.iter().map(|c| format!("{c} = VALUES({c})")).collect();
            if let Some(v) = version {
                sets.push(format!("{v} = {v} + 1"));
            }
            if sets.is_empty() {
                sets.push(format!("{first_pk} = {first_pk}"));
            }
            format!(
                "{} ON DUPLICATE KEY UPDATE {}",
                insert_sql(table, values),
                sets.join(", ")
            )
        }
        UpsertStyle::OnConflict => {
            // PostgreSQL needs the existing row qualified inside DO UPDATE.
            let existing = match dialect {
                Dialect::Postgres => format!("{}.", table.name()),
                _ => String::new(),
            };
            let mut sets: Vec<String> = updates.iter().map(|c| format!("{c} = EXCLUDED.{c}")).collect();
            if let Some(v) = version {
                sets.push(format!("{v} = {existing}{v} + 1"));
            }
            let action = if sets.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", sets.join(", "))
            };
            format!(
                "{} ON CONFLICT ({}) {action}",
                insert_sql(table, values),
                schema.primary_keys.join(", ")
            )
        }
        UpsertStyle::Merge => merge_sql(dialect, table, values, schema, &updates, version)?,
    };
    translate(dialect, &sql, args)
}

fn merge_sql(
    dialect: Dialect,
    table: &Ident,
    values: &ColumnValues,
    schema: &TableSchema,
    updates: &[&str],
    version: Option<&str>,
) -> OrmResult<String> {
    let alias = dialect.table_alias_keyword();
    let from_dual = if dialect == Dialect::Oracle { " FROM DUAL" } else { "" };
    let projection = values
        .columns()
        .map(|c| format!("? AS {c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let on = schema
        .primary_keys
        .iter()
        .map(|pk| format!("t.{pk} = s.{pk}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut sets: Vec<String> = updates.iter().map(|c| format!("t.{c} = s.{c}")).collect();
    if let Some(v) = version {
        sets.push(format!("t.{v} = t.{v} + 1"));
    }
    let inserts: Vec<&str> = values.columns().filter(|c| !schema.is_identity(c)).collect();
    if sets.is_empty() && inserts.is_empty() {
        return Err(OrmError::validation(format!(
            "nothing to merge into '{table}'"
        )));
    }

    let mut sql = format!(
        "MERGE INTO {table} {alias}t USING (SELECT {projection}{from_dual}) {alias}s ON ({on})"
    );
    if !sets.is_empty() {
        sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", sets.join(", ")));
    }
    if !inserts.is_empty() {
        let source = inserts.iter().map(|c| format!("s.{c}")).collect::<Vec<_>>();
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({})",
            inserts.join(", "),
            source.join(", ")
        ));
    }
    if dialect == Dialect::SqlServer {
        sql.push(';');
    }
    Ok(sql)
}

/// `pk1 = ? AND pk2 = ?` from the key values present in `values`.
pub(crate) fn key_filter(
    table: &Ident,
    schema: &TableSchema,
    values: &ColumnValues,
) -> OrmResult<WhereClause> {
    let keys = schema
        .primary_keys
        .iter()
        .map(|pk| {
            values
                .get(pk)
                .filter(|v| !v.is_null())
                .cloned()
                .ok_or_else(|| OrmError::validation(format!("'{table}': missing key column '{pk}'")))
        })
        .collect::<OrmResult<Vec<_>>>()?;
    Ok(WhereClause::equals(&schema.primary_keys, keys))
}

/// Integral keys come back as NUMERIC/DECIMAL from some catalogs.
fn normalize_key(value: Value) -> Value {
    match value {
        Value::Float(_) | Value::Text(_) => value.as_i64().map(Value::Int).unwrap_or(value),
        other => other,
    }
}

impl Engine<'_> {
    /// Validate a caller record and run the insert interceptors on it.
    pub(crate) fn insert_values(&self, table: &Ident, record: Record) -> OrmResult<ColumnValues> {
        let mut values = ColumnValues::from_record(record)?;
        require_values(table, &values)?;
        self.chain.before_insert(&self.ctx(table), &mut values)?;
        Ok(values)
    }

    pub(crate) async fn insert<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        record: Record,
    ) -> OrmResult<InsertResult> {
        let values = self.insert_values(table, record)?;
        let schema = self.schema.table_schema_lenient(&self.exec, conn, table).await;
        self.run_insert(conn, table, &values, &schema).await
    }

    async fn run_insert<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        values: &ColumnValues,
        schema: &TableSchema,
    ) -> OrmResult<InsertResult> {
        let plan = plan_insert(self.exec.dialect, table, values, schema)?;
        let supplied = schema
            .single_primary_key()
            .and_then(|pk| values.get(pk))
            .filter(|v| !v.is_null())
            .cloned();

        match plan.key {
            KeyRetrieval::Returning(_) | KeyRetrieval::ScopeIdentity => {
                let row = self.exec.query_opt(conn, "insert", &plan.statement).await?;
                let rows_affected = u64::from(row.is_some());
                let generated = row
                    .and_then(|r| r.get_index(0).cloned())
                    .filter(|v| !v.is_null())
                    .map(normalize_key);
                Ok(InsertResult {
                    rows_affected,
                    generated_key: generated.or(supplied),
                })
            }
            KeyRetrieval::ReturningInto { plain, .. } => {
                match self
                    .exec
                    .execute_returning_into(conn, "insert", &plan.statement)
                    .await
                {
                    Ok(key) => Ok(InsertResult {
                        rows_affected: 1,
                        generated_key: key.filter(|v| !v.is_null()).map(normalize_key).or(supplied),
                    }),
                    Err(OrmError::Unsupported(_)) => {
                        tracing::debug!(
                            target: "polyorm.crud",
                            table = %table,
                            "client cannot bind OUT parameters; inserting without RETURNING INTO"
                        );
                        let result = self.exec.execute(conn, "insert", &plain).await?;
                        Ok(InsertResult {
                            rows_affected: result.rows_affected,
                            generated_key: supplied,
                        })
                    }
                    Err(e) => Err(e),
                }
            }
            KeyRetrieval::LastInsertId => {
                let result = self.exec.execute(conn, "insert", &plan.statement).await?;
                let driver_key = result.last_insert_id.filter(|id| *id != 0).map(Value::Int);
                Ok(InsertResult {
                    rows_affected: result.rows_affected,
                    generated_key: supplied.or(driver_key),
                })
            }
            KeyRetrieval::None => {
                let result = self.exec.execute(conn, "insert", &plan.statement).await?;
                Ok(InsertResult {
                    rows_affected: result.rows_affected,
                    generated_key: supplied,
                })
            }
        }
    }

    pub(crate) async fn update<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        record: Record,
        filter: WhereClause,
    ) -> OrmResult<u64> {
        let values = ColumnValues::from_record(record)?;
        require_values(table, &values)?;
        let mut op = UpdateOp {
            values,
            filter,
            version: None,
        };
        self.chain.before_update(&self.ctx(table), &mut op)?;
        self.run_update(conn, table, op).await
    }

    /// Execute an intercepted update. Zero affected rows under a version
    /// check is classified by probing whether the row exists at all.
    pub(crate) async fn run_update<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        op: UpdateOp,
    ) -> OrmResult<u64> {
        let plan = plan_update(self.exec.dialect, table, &op)?;
        let affected = self.exec.execute(conn, "update", &plan).await?.rows_affected;
        match &op.version {
            Some(check) if affected == 0 => Err(self.classify_miss(conn, table, &op.filter, check).await),
            _ => Ok(affected),
        }
    }

    async fn classify_miss<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        filter: &WhereClause,
        check: &VersionCheck,
    ) -> OrmError {
        let probe = match plan_count_rows(self.exec.dialect, table, filter) {
            Ok(plan) => plan,
            Err(e) => return e,
        };
        match self.exec.query_count(conn, "version_probe", &probe).await {
            Ok(0) => OrmError::not_found(format!("no row in '{table}' matches the update filter")),
            Ok(_) => OrmError::version_conflict(table.to_string(), check.expected),
            Err(e) => e,
        }
    }

    /// Update the row identified by the key columns in `values`.
    pub(crate) async fn update_by_key<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        schema: &TableSchema,
        mut values: ColumnValues,
    ) -> OrmResult<u64> {
        let filter = key_filter(table, schema, &values)?;
        for pk in &schema.primary_keys {
            values.remove(pk);
        }
        let mut op = UpdateOp {
            values,
            filter,
            version: None,
        };
        self.chain.before_update(&self.ctx(table), &mut op)?;
        if op.values.is_empty() && op.version.is_none() {
            return Ok(0);
        }
        self.run_update(conn, table, op).await
    }

    /// Delete matching rows; soft-delete tables get an UPDATE unless `force`.
    pub(crate) async fn delete<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        filter: WhereClause,
        force: bool,
    ) -> OrmResult<u64> {
        let mut op = DeleteOp {
            filter,
            action: DeleteAction::Delete,
        };
        self.chain.before_delete(&self.ctx(table), &mut op)?;
        if force {
            op.action = DeleteAction::Delete;
        }

        let (tag, plan) = match &op.action {
            DeleteAction::Delete => ("delete", plan_delete(self.exec.dialect, table, &op.filter)?),
            DeleteAction::Update(values) => (
                "soft_delete",
                plan_soft_delete(self.exec.dialect, table, values, &op.filter)?,
            ),
        };
        Ok(self.exec.execute(conn, tag, &plan).await?.rows_affected)
    }

    /// Clear the soft-delete marker on matching rows.
    pub(crate) async fn restore<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        filter: WhereClause,
    ) -> OrmResult<u64> {
        let Some(config) = self.registries.soft_delete(table.as_str()) else {
            return Err(OrmError::validation(format!(
                "'{table}' has no soft-delete configuration"
            )));
        };
        let mut values = ColumnValues::new();
        values.set(&config.field, config.live_marker());
        let plan = plan_soft_delete(self.exec.dialect, table, &values, &filter)?;
        Ok(self.exec.execute(conn, "restore", &plan).await?.rows_affected)
    }

    pub(crate) async fn find<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        filter: WhereClause,
        with_deleted: bool,
    ) -> OrmResult<Vec<Record>> {
        let plan = self.plan_find(table, filter, with_deleted)?;
        self.exec.query(conn, "find", &plan).await
    }

    pub(crate) async fn find_one<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        filter: WhereClause,
    ) -> OrmResult<Option<Record>> {
        let plan = self.plan_find(table, filter, false)?;
        self.exec.query_opt(conn, "find", &plan).await
    }

    fn plan_find(&self, table: &Ident, filter: WhereClause, with_deleted: bool) -> OrmResult<StatementPlan> {
        let mut op = FindOp {
            filter,
            with_deleted,
        };
        self.chain.before_find(&self.ctx(table), &mut op)?;
        plan_select(self.exec.dialect, table, &op.filter)
    }

    pub(crate) async fn count<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        filter: WhereClause,
    ) -> OrmResult<u64> {
        let plan = plan_count_rows(self.exec.dialect, table, &filter)?;
        self.exec.query_count(conn, "count", &plan).await
    }

    /// Insert or update by primary key.
    ///
    /// 1. No known primary key, or a key column absent/NULL: insert.
    /// 2. Optimistic lock configured and the version present: version-checked
    ///    update by key (a native upsert would bypass the check).
    /// 3. Native upsert enabled: one upsert statement.
    /// 4. Otherwise a `COUNT(*)` probe picks update or insert.
    pub(crate) async fn save<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        record: Record,
    ) -> OrmResult<SaveResult> {
        let values = ColumnValues::from_record(record)?;
        require_values(table, &values)?;
        let schema = self.schema.table_schema_lenient(&self.exec, conn, table).await;

        let keyed = schema.has_primary_key()
            && schema
                .primary_keys
                .iter()
                .all(|pk| values.get(pk).is_some_and(|v| !v.is_null()));
        if !keyed {
            return self.save_insert(conn, table, values, &schema).await;
        }

        let lock = self.registries.optimistic_lock(table.as_str());
        if lock.as_ref().is_some_and(|l| values.contains(&l.version_field)) {
            return self.save_update(conn, table, values, &schema).await;
        }

        if self.native_upsert {
            return self.save_upsert(conn, table, values, &schema, lock.map(|l| l.version_field)).await;
        }

        let probe = plan_count_rows(self.exec.dialect, table, &key_filter(table, &schema, &values)?)?;
        if self.exec.query_count(conn, "save_probe", &probe).await? > 0 {
            self.save_update(conn, table, values, &schema).await
        } else {
            self.save_insert(conn, table, values, &schema).await
        }
    }

    async fn save_insert<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        mut values: ColumnValues,
        schema: &TableSchema,
    ) -> OrmResult<SaveResult> {
        self.chain.before_insert(&self.ctx(table), &mut values)?;
        let result = self.run_insert(conn, table, &values, schema).await?;
        Ok(SaveResult {
            action: SaveAction::Inserted,
            rows_affected: result.rows_affected,
            generated_key: result.generated_key,
        })
    }

    async fn save_update<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        values: ColumnValues,
        schema: &TableSchema,
    ) -> OrmResult<SaveResult> {
        let key = schema.single_primary_key().and_then(|pk| values.get(pk)).cloned();
        let rows_affected = self.update_by_key(conn, table, schema, values).await?;
        Ok(SaveResult {
            action: SaveAction::Updated,
            rows_affected,
            generated_key: key,
        })
    }

    async fn save_upsert<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        mut values: ColumnValues,
        schema: &TableSchema,
        version_field: Option<String>,
    ) -> OrmResult<SaveResult> {
        self.chain.before_insert(&self.ctx(table), &mut values)?;
        let created_at = self
            .registries
            .timestamps(table.as_str())
            .and_then(|t| t.created_at);
        let options = UpsertOptions {
            version_field: version_field.as_deref(),
            created_at_field: created_at.as_deref(),
        };
        let plan = plan_upsert(self.exec.dialect, table, &values, schema, &options)?;
        let result = self.exec.execute(conn, "upsert", &plan).await?;
        Ok(SaveResult {
            action: SaveAction::Upserted,
            rows_affected: result.rows_affected,
            generated_key: schema.single_primary_key().and_then(|pk| values.get(pk)).cloned(),
        })
    }
}
