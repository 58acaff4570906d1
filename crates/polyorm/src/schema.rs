//! Primary-key and identity-column discovery.
//!
//! Each dialect reads its own catalog:
//!
//! | Dialect | Primary key | Identity |
//! |---|---|---|
//! | MySQL | `INFORMATION_SCHEMA.KEY_COLUMN_USAGE` | `COLUMNS.EXTRA` auto_increment |
//! | SQL Server | `INFORMATION_SCHEMA` constraint joins | `COLUMNPROPERTY(..., 'IsIdentity')` |
//! | PostgreSQL | `pg_index` / `pg_attribute` | `attidentity` or `nextval(...)` default |
//! | SQLite | `PRAGMA table_info` (`pk` = ordinal) | single `INTEGER` primary key |
//! | Oracle | `USER_CONSTRAINTS` / `USER_CONS_COLUMNS`, `ALL_*` fallback | `USER_TAB_COLS.IDENTITY_COLUMN` |
//!
//! The Oracle `ALL_*` views are only consulted when the `USER_*` views know
//! nothing about an unqualified table, and an unqualified name that resolves
//! to more than one owner is rejected.
//!
//! Results are cached per table for the lifetime of the introspector and are
//! never refreshed; a schema change made while the process runs is not seen.
//! Failed lookups are not cached.

use crate::client::GenericClient;
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::exec::Executor;
use crate::ident::Ident;
use crate::record::Record;
use crate::translate::translate;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Key columns of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    /// Primary-key columns in key order.
    pub primary_keys: Vec<String>,
    /// Database-managed auto-increment column, if any.
    pub identity_column: Option<String>,
}

impl TableSchema {
    pub fn new(primary_keys: Vec<String>, identity_column: Option<String>) -> Self {
        Self {
            primary_keys,
            identity_column,
        }
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys.is_empty()
    }

    /// The key column when the key is a single column.
    pub fn single_primary_key(&self) -> Option<&str> {
        match self.primary_keys.as_slice() {
            [pk] => Some(pk),
            _ => None,
        }
    }

    /// Whether `column` is the identity column.
    pub fn is_identity(&self, column: &str) -> bool {
        self.identity_column
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(column))
    }

    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_keys
            .iter()
            .any(|pk| pk.eq_ignore_ascii_case(column))
    }
}

/// Catalog reader with a per-table cache.
#[derive(Debug)]
pub struct SchemaIntrospector {
    dialect: Dialect,
    cache: RwLock<HashMap<String, TableSchema>>,
}

impl SchemaIntrospector {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Cached schema for `table`, without touching the database.
    pub fn cached(&self, table: &Ident) -> Option<TableSchema> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key(table))
            .cloned()
    }

    /// Seed the cache, e.g. for tables whose catalog the connected user cannot read.
    ///
    /// An existing entry is kept.
    pub fn prime(&self, table: &Ident, schema: TableSchema) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(cache_key(table))
            .or_insert(schema);
    }

    pub fn cached_tables(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Look up the key columns of `table`, caching the result.
    ///
    /// A failing catalog query is reported as [`OrmError::SchemaLookupFailed`].
    /// A table without a primary key yields an empty [`TableSchema`].
    pub(crate) async fn table_schema<C: GenericClient>(
        &self,
        exec: &Executor<'_>,
        conn: &C,
        table: &Ident,
    ) -> OrmResult<TableSchema> {
        if let Some(schema) = self.cached(table) {
            return Ok(schema);
        }

        let schema = self
            .load(exec, conn, table)
            .await
            .map_err(|e| OrmError::SchemaLookupFailed {
                table: table.to_string(),
                message: e.to_string(),
            })?;

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.entry(cache_key(table)).or_insert(schema).clone())
    }

    /// Like [`table_schema`](Self::table_schema), but a failed lookup is
    /// logged and treated as "no primary key known".
    pub(crate) async fn table_schema_lenient<C: GenericClient>(
        &self,
        exec: &Executor<'_>,
        conn: &C,
        table: &Ident,
    ) -> TableSchema {
        match self.table_schema(exec, conn, table).await {
            Ok(schema) => schema,
            Err(error) => {
                tracing::warn!(
                    target: "polyorm.schema",
                    table = %table,
                    %error,
                    "schema lookup failed; treating table as having no primary key"
                );
                TableSchema::default()
            }
        }
    }

    async fn load<C: GenericClient>(
        &self,
        exec: &Executor<'_>,
        conn: &C,
        table: &Ident,
    ) -> OrmResult<TableSchema> {
        match self.dialect {
            Dialect::Sqlite => {
                let rows = run(exec, conn, self.dialect, sqlite_table_info(table)).await?;
                Ok(parse_sqlite_table_info(&rows))
            }
            Dialect::Oracle => {
                if table.schema().is_none() {
                    let pk_rows = run(exec, conn, self.dialect, oracle_primary_keys(table, false)).await?;
                    let id_rows = run(exec, conn, self.dialect, oracle_identity(table, false)).await?;
                    // Any hit in USER_* means the caller owns the table.
                    if !pk_rows.is_empty() || !id_rows.is_empty() {
                        return Ok(TableSchema::new(
                            first_column(&pk_rows),
                            first_column(&id_rows).into_iter().next(),
                        ));
                    }
                }
                // Tables owned by another schema only show up in ALL_* views.
                let pk_rows = run(exec, conn, self.dialect, oracle_primary_keys(table, true)).await?;
                let id_rows = run(exec, conn, self.dialect, oracle_identity(table, true)).await?;
                single_owner_schema(table, &pk_rows, &id_rows)
            }
            dialect => {
                let pk_rows = run(exec, conn, dialect, primary_key_query(dialect, table)).await?;
                let id_rows = run(exec, conn, dialect, identity_query(dialect, table)).await?;
                Ok(TableSchema::new(first_column(&pk_rows), first_column(&id_rows).into_iter().next()))
            }
        }
    }
}

fn cache_key(table: &Ident) -> String {
    table.as_str().to_ascii_lowercase()
}

async fn run<C: GenericClient>(
    exec: &Executor<'_>,
    conn: &C,
    dialect: Dialect,
    (sql, args): (String, Vec<Value>),
) -> OrmResult<Vec<Record>> {
    let plan = translate(dialect, &sql, args)?;
    exec.query(conn, "schema", &plan).await
}

/// `(OWNER, COLUMN_NAME)` pairs from an `ALL_*` catalog query.
fn owned_columns(rows: &[Record]) -> Vec<(String, String)> {
    rows.iter()
        .filter_map(|r| {
            let owner = r.get("OWNER")?.as_str()?.trim().to_string();
            let column = r.get("COLUMN_NAME")?.as_str()?.trim().to_string();
            Some((owner, column))
        })
        .collect()
}

/// Build the schema from `ALL_*` rows, which must all belong to one owner.
fn single_owner_schema(table: &Ident, pk_rows: &[Record], id_rows: &[Record]) -> OrmResult<TableSchema> {
    let keys = owned_columns(pk_rows);
    let identities = owned_columns(id_rows);

    let mut owners: Vec<&str> = Vec::new();
    for (owner, _) in keys.iter().chain(&identities) {
        if !owners.contains(&owner.as_str()) {
            owners.push(owner);
        }
    }
    let owner = match owners.as_slice() {
        [] => return Ok(TableSchema::default()),
        [owner] => *owner,
        _ => {
            return Err(OrmError::validation(format!(
                "table '{table}' is visible in several schemas ({}); qualify it with an owner",
                owners.join(", ")
            )));
        }
    };

    let of_owner = |cols: &[(String, String)]| -> Vec<String> {
        cols.iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, c)| c.clone())
            .collect()
    };
    Ok(TableSchema::new(
        of_owner(&keys),
        of_owner(&identities).into_iter().next(),
    ))
}

fn first_column(rows: &[Record]) -> Vec<String> {
    rows.iter()
        .filter_map(|r| match r.get_index(0)? {
            Value::Text(s) => Some(s.trim().to_string()),
            _ => None,
        })
        .collect()
}

/// Catalog query (generic `?` SQL + args) for the ordered primary-key columns.
///
/// SQLite and Oracle are answered by [`sqlite_table_info`] and the Oracle
/// user/all query pair instead.
pub fn primary_key_query(dialect: Dialect, table: &Ident) -> (String, Vec<Value>) {
    let name = Value::from(table.name());
    match dialect {
        Dialect::MySql => {
            let (schema_sql, mut args) = mysql_schema_filter(table);
            args.push(name);
            (
                format!(
                    "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
                     WHERE TABLE_SCHEMA = {schema_sql} AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
                     ORDER BY ORDINAL_POSITION"
                ),
                args,
            )
        }
        Dialect::SqlServer => {
            let mut sql = "SELECT kcu.COLUMN_NAME FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                 JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                 ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
                 AND tc.TABLE_NAME = kcu.TABLE_NAME \
                 WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_NAME = ?"
                .to_string();
            let mut args = vec![name];
            if let Some(schema) = table.schema() {
                sql.push_str(" AND tc.TABLE_SCHEMA = ?");
                args.push(Value::from(schema));
            }
            sql.push_str(" ORDER BY kcu.ORDINAL_POSITION");
            (sql, args)
        }
        Dialect::Postgres => (
            "SELECT a.attname AS column_name FROM pg_index i \
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
             WHERE i.indrelid = (?::text)::regclass AND i.indisprimary \
             ORDER BY array_position(i.indkey::int2[], a.attnum)"
                .to_string(),
            vec![Value::from(table.as_str())],
        ),
        Dialect::Sqlite => sqlite_table_info(table),
        Dialect::Oracle => oracle_primary_keys(table, table.schema().is_some()),
    }
}

/// Catalog query (generic `?` SQL + args) for the identity column.
pub fn identity_query(dialect: Dialect, table: &Ident) -> (String, Vec<Value>) {
    let name = Value::from(table.name());
    match dialect {
        Dialect::MySql => {
            let (schema_sql, mut args) = mysql_schema_filter(table);
            args.push(name);
            (
                format!(
                    "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS \
                     WHERE TABLE_SCHEMA = {schema_sql} AND TABLE_NAME = ? AND EXTRA LIKE '%auto_increment%'"
                ),
                args,
            )
        }
        Dialect::SqlServer => {
            let mut sql = "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = ?".to_string();
            let mut args = vec![name];
            if let Some(schema) = table.schema() {
                sql.push_str(" AND TABLE_SCHEMA = ?");
                args.push(Value::from(schema));
            }
            sql.push_str(
                " AND COLUMNPROPERTY(OBJECT_ID(QUOTENAME(TABLE_SCHEMA) + '.' + QUOTENAME(TABLE_NAME)), \
                 COLUMN_NAME, 'IsIdentity') = 1",
            );
            (sql, args)
        }
        Dialect::Postgres => (
            "SELECT a.attname AS column_name FROM pg_attribute a \
             LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
             WHERE a.attrelid = (?::text)::regclass AND a.attnum > 0 AND NOT a.attisdropped \
             AND (a.attidentity IN ('a', 'd') OR pg_get_expr(d.adbin, d.adrelid) LIKE 'nextval(%') \
             ORDER BY a.attnum"
                .to_string(),
            vec![Value::from(table.as_str())],
        ),
        Dialect::Sqlite => sqlite_table_info(table),
        Dialect::Oracle => oracle_identity(table, table.schema().is_some()),
    }
}

fn mysql_schema_filter(table: &Ident) -> (&'static str, Vec<Value>) {
    match table.schema() {
        Some(schema) => ("?", vec![Value::from(schema)]),
        None => ("DATABASE()", Vec::new()),
    }
}

/// `PRAGMA table_info` cannot bind its argument; the name is a validated [`Ident`].
fn sqlite_table_info(table: &Ident) -> (String, Vec<Value>) {
    let sql = match table.schema() {
        Some(schema) => format!("PRAGMA {schema}.table_info({})", table.name()),
        None => format!("PRAGMA table_info({})", table.name()),
    };
    (sql, Vec::new())
}

fn oracle_primary_keys(table: &Ident, all_views: bool) -> (String, Vec<Value>) {
    let mut args = vec![Value::from(table.name())];
    if !all_views {
        return (
            "SELECT cc.COLUMN_NAME FROM USER_CONSTRAINTS c \
             JOIN USER_CONS_COLUMNS cc ON c.CONSTRAINT_NAME = cc.CONSTRAINT_NAME \
             WHERE c.CONSTRAINT_TYPE = 'P' AND c.TABLE_NAME = UPPER(?) ORDER BY cc.POSITION"
                .to_string(),
            args,
        );
    }
    let mut sql = "SELECT c.OWNER, cc.COLUMN_NAME FROM ALL_CONSTRAINTS c \
         JOIN ALL_CONS_COLUMNS cc ON c.OWNER = cc.OWNER AND c.CONSTRAINT_NAME = cc.CONSTRAINT_NAME \
         WHERE c.CONSTRAINT_TYPE = 'P' AND c.TABLE_NAME = UPPER(?)"
        .to_string();
    if let Some(owner) = table.schema() {
        sql.push_str(" AND c.OWNER = UPPER(?)");
        args.push(Value::from(owner));
    }
    sql.push_str(" ORDER BY c.OWNER, cc.POSITION");
    (sql, args)
}

fn oracle_identity(table: &Ident, all_views: bool) -> (String, Vec<Value>) {
    let mut args = vec![Value::from(table.name())];
    if !all_views {
        return (
            "SELECT COLUMN_NAME FROM USER_TAB_COLS WHERE TABLE_NAME = UPPER(?) AND IDENTITY_COLUMN = 'YES'"
                .to_string(),
            args,
        );
    }
    let mut sql =
        "SELECT OWNER, COLUMN_NAME FROM ALL_TAB_COLS WHERE TABLE_NAME = UPPER(?) AND IDENTITY_COLUMN = 'YES'"
            .to_string();
    if let Some(owner) = table.schema() {
        sql.push_str(" AND OWNER = UPPER(?)");
        args.push(Value::from(owner));
    }
    (sql, args)
}

/// Interpret `PRAGMA table_info` rows.
///
/// `pk` holds the column's 1-based position in the key (0 = not a key column),
/// so composite keys come back in declaration order of the key, not of the table.
fn parse_sqlite_table_info(rows: &[Record]) -> TableSchema {
    let mut keyed: Vec<(i64, String, String)> = rows
        .iter()
        .filter_map(|r| {
            let pk = r.get("pk")?.as_i64()?;
            let name = r.get("name")?.as_str()?.to_string();
            let ty = r.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
            (pk > 0).then_some((pk, name, ty))
        })
        .collect();
    keyed.sort_by_key(|(pk, _, _)| *pk);

    // Only `INTEGER PRIMARY KEY` aliases the rowid and auto-assigns.
    let identity = match keyed.as_slice() {
        [(_, name, ty)] if ty.eq_ignore_ascii_case("INTEGER") => Some(name.clone()),
        _ => None,
    };
    TableSchema::new(keyed.into_iter().map(|(_, name, _)| name).collect(), identity)
}
