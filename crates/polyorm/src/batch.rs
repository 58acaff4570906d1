//! Chunked bulk writes.
//!
//! Rows are processed in chunks of `DbConfig::batch_size`. MySQL, PostgreSQL
//! and SQLite get one multi-row `INSERT` per chunk; SQL Server and Oracle get
//! one prepared single-row statement per chunk, executed once per row.
//!
//! A failure stops the batch and surfaces as [`OrmError::Batch`] carrying the
//! rows affected so far. Nothing is rolled back; wrap the call in a
//! transaction for all-or-nothing behavior.

use crate::client::GenericClient;
use crate::db::Engine;
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::ident::Ident;
use crate::intercept::WhereClause;
use crate::record::{ColumnValues, Record, StatementPlan};
use crate::translate::translate;
use crate::value::Value;

/// Outcome of a batch operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub total_affected: u64,
    /// Statements sent (multi-row statements count once).
    pub statements: usize,
}

impl BatchResult {
    fn add(&mut self, affected: u64) {
        self.total_affected += affected;
        self.statements += 1;
    }

    fn abort(&self, source: OrmError) -> OrmError {
        OrmError::Batch {
            affected: self.total_affected,
            source: Box::new(source),
        }
    }
}

fn row_args(columns: &[String], row: &ColumnValues) -> Vec<Value> {
    columns
        .iter()
        .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
        .collect()
}

/// `INSERT INTO t (cols) VALUES (...), (...), ...` for `rows`, in `columns` order.
///
/// Numbered placeholders continue across rows (`($1, $2), ($3, $4)`).
pub fn plan_multi_insert(
    dialect: Dialect,
    table: &Ident,
    columns: &[String],
    rows: &[ColumnValues],
) -> OrmResult<StatementPlan> {
    if columns.is_empty() {
        return Err(OrmError::EmptyColumnSet {
            table: table.to_string(),
        });
    }
    let tuple = format!("({})", vec!["?"; columns.len()].join(", "));
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES {}",
        columns.join(", "),
        vec![tuple; rows.len()].join(", ")
    );
    let args = rows.iter().flat_map(|row| row_args(columns, row)).collect();
    translate(dialect, &sql, args)
}

fn same_columns(row: &ColumnValues, columns: &[String]) -> bool {
    row.len() == columns.len() && columns.iter().all(|c| row.contains(c))
}

impl Engine<'_> {
    pub(crate) async fn insert_batch<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        records: Vec<Record>,
    ) -> OrmResult<BatchResult> {
        let rows = records
            .into_iter()
            .map(|r| self.insert_values(table, r))
            .collect::<OrmResult<Vec<_>>>()?;
        let Some(first) = rows.first() else {
            return Ok(BatchResult::default());
        };
        let columns: Vec<String> = first.columns().map(str::to_string).collect();
        if let Some(i) = rows.iter().position(|r| !same_columns(r, &columns)) {
            return Err(OrmError::validation(format!(
                "batch insert into '{table}': row {i} has a different column set than row 0"
            )));
        }

        let dialect = self.exec.dialect;
        let mut result = BatchResult::default();
        for chunk in rows.chunks(self.batch_size) {
            if dialect.supports_multi_row_insert() {
                let plan = plan_multi_insert(dialect, table, &columns, chunk)?;
                match self.exec.execute(conn, "insert_batch", &plan).await {
                    Ok(r) => result.add(r.rows_affected),
                    Err(e) => return Err(result.abort(e)),
                }
                continue;
            }

            let single = plan_multi_insert(dialect, table, &columns, &chunk[..1])?;
            let stmt = self
                .exec
                .prepare(conn, &single.sql)
                .await
                .map_err(|e| result.abort(e))?;
            for row in chunk {
                let args = row_args(&columns, row);
                match self.exec.execute_prepared(conn, "insert_batch", &stmt, &args).await {
                    Ok(r) => result.add(r.rows_affected),
                    Err(e) => return Err(result.abort(e)),
                }
            }
        }
        tracing::debug!(
            target: "polyorm.batch",
            table = %table,
            rows = rows.len(),
            statements = result.statements,
            affected = result.total_affected,
            "batch insert complete"
        );
        Ok(result)
    }

    /// Update each record by its primary key, version-checked when the table
    /// has an optimistic lock and the record carries the version.
    pub(crate) async fn update_batch<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        records: Vec<Record>,
    ) -> OrmResult<BatchResult> {
        if records.is_empty() {
            return Ok(BatchResult::default());
        }
        let schema = self.schema.table_schema(&self.exec, conn, table).await?;
        if !schema.has_primary_key() {
            return Err(OrmError::validation(format!(
                "batch update of '{table}' requires a primary key"
            )));
        }
        let rows = records
            .into_iter()
            .map(ColumnValues::from_record)
            .collect::<OrmResult<Vec<_>>>()?;

        let mut result = BatchResult::default();
        for row in rows {
            match self.update_by_key(conn, table, &schema, row).await {
                Ok(affected) => result.add(affected),
                Err(e) => return Err(result.abort(e)),
            }
        }
        Ok(result)
    }

    /// Delete rows by single-column primary key, one `IN (...)` per chunk.
    /// Soft-delete tables are marked instead.
    pub(crate) async fn delete_batch<C: GenericClient>(
        &self,
        conn: &C,
        table: &Ident,
        keys: Vec<Value>,
    ) -> OrmResult<BatchResult> {
        if keys.is_empty() {
            return Ok(BatchResult::default());
        }
        let schema = self.schema.table_schema(&self.exec, conn, table).await?;
        let Some(pk) = schema.single_primary_key() else {
            return Err(OrmError::validation(format!(
                "batch delete from '{table}' requires a single-column primary key"
            )));
        };

        let mut result = BatchResult::default();
        for chunk in keys.chunks(self.batch_size) {
            let filter = WhereClause::new(
                format!("{pk} IN ({})", vec!["?"; chunk.len()].join(", ")),
                chunk.to_vec(),
            );
            match self.delete(conn, table, filter, false).await {
                Ok(affected) => result.add(affected),
                Err(e) => return Err(result.abort(e)),
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;
    use crate::db::Db;
    use crate::intercept::SoftDeleteConfig;
    use crate::monitor::NoopMonitor;
    use crate::schema::TableSchema;
    use crate::testing::{RecordingClient, Response};

    fn db(dialect: Dialect) -> Db {
        let db = Db::with_monitor(DbConfig::new(dialect), NoopMonitor);
        db.schema_cache().prime(
            &Ident::parse("items").unwrap(),
            TableSchema::new(vec!["id".to_string()], None),
        );
        db
    }

    fn records(n: i64) -> Vec<Record> {
        (1..=n)
            .map(|i| Record::new().with("id", i).with("name", format!("item {i}")))
            .collect()
    }

    fn cv(id: i64, name: &str) -> ColumnValues {
        ColumnValues::from_record(Record::new().with("id", id).with("name", name)).unwrap()
    }

    #[test]
    fn multi_row_insert_renumbers_across_rows() {
        let table = Ident::parse("users").unwrap();
        let columns = vec!["id".to_string(), "name".to_string()];
        let rows = vec![cv(1, "a"), cv(2, "b")];

        let plan = plan_multi_insert(Dialect::Postgres, &table, &columns, &rows).unwrap();
        assert_eq!(plan.sql, "INSERT INTO users (id, name) VALUES ($1, $2), ($3, $4)");
        assert_eq!(
            plan.args,
            vec![Value::Int(1), Value::from("a"), Value::Int(2), Value::from("b")]
        );

        let plan = plan_multi_insert(Dialect::MySql, &table, &columns, &rows).unwrap();
        assert_eq!(plan.sql, "INSERT INTO users (id, name) VALUES (?, ?), (?, ?)");
    }

    #[test]
    fn abort_keeps_partial_count() {
        let mut result = BatchResult::default();
        result.add(100);
        result.add(100);
        match result.abort(OrmError::driver("disk full")) {
            OrmError::Batch { affected, source } => {
                assert_eq!(affected, 200);
                assert!(source.is_driver());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn chunks_multi_row_inserts() {
        let db = db(Dialect::Postgres);
        let client = RecordingClient::new();
        client.affected(100).affected(100).affected(50);

        let result = db.insert_batch(&client, "items", records(250)).await.unwrap();
        assert_eq!(result.total_affected, 250);
        assert_eq!(result.statements, 3);

        let statements = client.statements();
        let sizes: Vec<usize> = statements.iter().map(|s| s.args.len() / 2).collect();
        assert_eq!(sizes, [100, 100, 50]);
        assert!(statements[2].sql.ends_with("($99, $100)"));
    }

    #[tokio::test]
    async fn prepared_rows_for_sql_server() {
        let db = db(Dialect::SqlServer);
        let client = RecordingClient::new().with_prepared_statements();
        let result = db.insert_batch(&client, "items", records(3)).await.unwrap();
        assert_eq!(result.total_affected, 3);
        assert_eq!(result.statements, 3);

        let statements = client.statements();
        assert!(statements.iter().all(|s| s.prepared));
        assert!(statements
            .iter()
            .all(|s| s.sql == "INSERT INTO items (id, name) VALUES (@p1, @p2)"));
        assert_eq!(statements[2].args[0], Value::Int(3));
    }

    #[tokio::test]
    async fn failure_reports_partial_progress() {
        let db = db(Dialect::Sqlite);
        let client = RecordingClient::new();
        client
            .affected(100)
            .push(Response::Error(OrmError::driver("UNIQUE constraint failed")));

        let err = db.insert_batch(&client, "items", records(250)).await.unwrap_err();
        match err {
            OrmError::Batch { affected, .. } => assert_eq!(affected, 100),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client.statements().len(), 2);
    }

    #[tokio::test]
    async fn mismatched_columns_are_rejected() {
        let db = db(Dialect::MySql);
        let client = RecordingClient::new();
        let rows = vec![
            Record::new().with("id", 1).with("name", "a"),
            Record::new().with("id", 2),
        ];
        let err = db.insert_batch(&client, "items", rows).await.unwrap_err();
        assert!(matches!(err, OrmError::Validation(_)));
        assert!(client.statements().is_empty());
    }

    #[tokio::test]
    async fn delete_batch_uses_in_lists_and_soft_delete() {
        let db = Db::with_monitor(DbConfig::new(Dialect::Oracle).batch_size(2), NoopMonitor);
        db.schema_cache()
            .prime(&Ident::parse("items").unwrap(), TableSchema::new(vec!["ID".to_string()], None));
        db.register_soft_delete("items", SoftDeleteConfig::boolean("deleted"))
            .unwrap();
        let client = RecordingClient::new();

        let keys = vec![Value::Int(1), Value::Int(2), Value::Int(3)];
        let result = db.delete_batch(&client, "items", keys).await.unwrap();
        assert_eq!(result.statements, 2);
        assert_eq!(
            client.sqls(),
            [
                "UPDATE items SET deleted = :1 WHERE ID IN (:2, :3)",
                "UPDATE items SET deleted = :1 WHERE ID IN (:2)",
            ]
        );
    }

    #[tokio::test]
    async fn update_batch_updates_each_row_by_key() {
        let db = db(Dialect::MySql);
        let client = RecordingClient::new();
        let result = db.update_batch(&client, "items", records(2)).await.unwrap();
        assert_eq!(result.total_affected, 2);
        assert_eq!(client.sqls(), ["UPDATE items SET name = ? WHERE id = ?"; 2]);
        assert_eq!(client.statements()[1].args, vec![Value::from("item 2"), Value::Int(2)]);
    }
}
