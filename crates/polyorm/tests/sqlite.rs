//! End-to-end tests against an in-memory SQLite database.

use chrono::{DateTime, Utc};
use polyorm::{
    Db, DbConfig, Dialect, GenericClient, NoopMonitor, OptimisticLockConfig, OrmError, OrmResult,
    QueryMonitor, Record, SaveAction, SoftDeleteConfig, SqliteClient, StatsMonitor,
    TimestampConfig, Value,
};
use std::sync::Arc;

const SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        version INTEGER NOT NULL DEFAULT 1,
        created_at TEXT,
        updated_at TEXT,
        deleted_at TEXT
    );
    CREATE TABLE items (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        archived INTEGER
    );
";

async fn setup_with(config: DbConfig) -> OrmResult<(Db, SqliteClient)> {
    let client = SqliteClient::open_in_memory()?;
    client.execute_batch(SCHEMA).await?;
    Ok((Db::with_monitor(config, NoopMonitor), client))
}

async fn setup() -> OrmResult<(Db, SqliteClient)> {
    setup_with(DbConfig::new(Dialect::Sqlite)).await
}

fn user(id: i64, name: &str) -> Record {
    Record::new().with("id", id).with("name", name)
}

async fn name_of(db: &Db, client: &SqliteClient, id: i64) -> OrmResult<String> {
    db.query_one(client, "SELECT name FROM users WHERE id = ?", &[Value::Int(id)])
        .await?
        .try_get("name")
}

async fn version_of(db: &Db, client: &SqliteClient, id: i64) -> OrmResult<i64> {
    db.query_one(client, "SELECT version FROM users WHERE id = ?", &[Value::Int(id)])
        .await?
        .try_get("version")
}

#[tokio::test]
async fn insert_reports_rowid_and_stamps_timestamps() -> OrmResult<()> {
    let (db, client) = setup().await?;
    db.register_timestamps("users", TimestampConfig::default())?;

    let result = db
        .insert(&client, "users", Record::new().with("name", "alice"))
        .await?;
    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.generated_key, Some(Value::Int(1)));

    let row = db
        .find_one(&client, "users", "id = ?", &[Value::Int(1)])
        .await?
        .expect("row inserted");
    let created: DateTime<Utc> = row.try_get("created_at")?;
    let updated: DateTime<Utc> = row.try_get("updated_at")?;
    assert_eq!(created, updated);
    Ok(())
}

#[tokio::test]
async fn schema_lookup_reads_pragma() -> OrmResult<()> {
    let (db, client) = setup().await?;
    assert_eq!(db.primary_keys(&client, "users").await?, ["id"]);
    Ok(())
}

#[tokio::test]
async fn save_upserts_idempotently() -> OrmResult<()> {
    let (db, client) = setup().await?;

    let first = db.save(&client, "users", user(1, "a")).await?;
    assert_eq!(first.action, SaveAction::Upserted);
    db.save(&client, "users", user(1, "a")).await?;
    db.save(&client, "users", user(1, "b")).await?;

    assert_eq!(db.count(&client, "users", "", &[]).await?, 1);
    assert_eq!(name_of(&db, &client, 1).await?, "b");
    Ok(())
}

#[tokio::test]
async fn save_without_key_inserts() -> OrmResult<()> {
    let (db, client) = setup().await?;
    let saved = db
        .save(&client, "users", Record::new().with("name", "anon"))
        .await?;
    assert_eq!(saved.action, SaveAction::Inserted);
    assert_eq!(saved.generated_key, Some(Value::Int(1)));
    Ok(())
}

#[tokio::test]
async fn save_probes_when_native_upsert_is_off() -> OrmResult<()> {
    let (db, client) = setup_with(DbConfig::new(Dialect::Sqlite).native_upsert(false)).await?;

    let first = db.save(&client, "users", user(5, "a")).await?;
    assert_eq!(first.action, SaveAction::Inserted);
    let second = db.save(&client, "users", user(5, "b")).await?;
    assert_eq!(second.action, SaveAction::Updated);
    assert_eq!(name_of(&db, &client, 5).await?, "b");
    Ok(())
}

#[tokio::test]
async fn upsert_increments_version() -> OrmResult<()> {
    let (db, client) = setup().await?;
    db.register_optimistic_lock("users", OptimisticLockConfig::default())?;

    db.save(&client, "users", user(1, "a")).await?;
    db.save(&client, "users", user(1, "b")).await?;

    let row = db
        .query_one(&client, "SELECT version FROM users WHERE id = ?", &[Value::Int(1)])
        .await?;
    assert_eq!(row.try_get::<i64>("version")?, 2);
    Ok(())
}

#[tokio::test]
async fn optimistic_lock_detects_stale_writes() -> OrmResult<()> {
    let (db, client) = setup().await?;
    db.register_optimistic_lock("users", OptimisticLockConfig::default())?;
    db.insert(&client, "users", user(1, "a")).await?;

    let fresh = Record::new().with("name", "b").with("version", 1);
    assert_eq!(db.update(&client, "users", fresh, "id = ?", &[Value::Int(1)]).await?, 1);
    assert_eq!(version_of(&db, &client, 1).await?, 2);

    let stale = Record::new().with("name", "c").with("version", 1);
    let err = db
        .update(&client, "users", stale, "id = ?", &[Value::Int(1)])
        .await
        .unwrap_err();
    assert!(err.is_version_conflict(), "{err}");

    let missing = Record::new().with("name", "c").with("version", 1);
    let err = db
        .update(&client, "users", missing, "id = ?", &[Value::Int(99)])
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "{err}");

    assert_eq!(name_of(&db, &client, 1).await?, "b");
    assert_eq!(version_of(&db, &client, 1).await?, 2);
    Ok(())
}

#[tokio::test]
async fn save_with_version_updates_by_key() -> OrmResult<()> {
    let (db, client) = setup().await?;
    db.register_optimistic_lock("users", OptimisticLockConfig::default())?;
    db.insert(&client, "users", user(1, "a")).await?;

    let saved = db
        .save(&client, "users", user(1, "b").with("version", 1))
        .await?;
    assert_eq!(saved.action, SaveAction::Updated);

    let err = db
        .save(&client, "users", user(1, "c").with("version", 1))
        .await
        .unwrap_err();
    assert!(err.is_version_conflict());
    Ok(())
}

#[tokio::test]
async fn soft_delete_hides_rows_until_restored() -> OrmResult<()> {
    let (db, client) = setup().await?;
    db.register_soft_delete("users", SoftDeleteConfig::timestamp("deleted_at"))?;
    db.insert(&client, "users", user(1, "a")).await?;
    db.insert(&client, "users", user(2, "b")).await?;

    assert_eq!(db.delete(&client, "users", "id = ?", &[Value::Int(1)]).await?, 1);
    assert_eq!(db.find(&client, "users", "", &[]).await?.len(), 1);
    assert_eq!(db.find_with_deleted(&client, "users", "", &[]).await?.len(), 2);
    assert_eq!(db.count(&client, "users", "", &[]).await?, 2);

    assert_eq!(db.restore(&client, "users", "id = ?", &[Value::Int(1)]).await?, 1);
    assert_eq!(db.find(&client, "users", "", &[]).await?.len(), 2);

    assert_eq!(db.force_delete(&client, "users", "id = ?", &[Value::Int(1)]).await?, 1);
    assert_eq!(db.find_with_deleted(&client, "users", "", &[]).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn boolean_soft_delete_treats_null_as_live() -> OrmResult<()> {
    let (db, client) = setup().await?;
    db.register_soft_delete("items", SoftDeleteConfig::boolean("archived"))?;
    db.insert(&client, "items", Record::new().with("id", 1).with("name", "x"))
        .await?;
    db.insert(
        &client,
        "items",
        Record::new().with("id", 2).with("name", "y").with("archived", false),
    )
    .await?;
    assert_eq!(db.find(&client, "items", "", &[]).await?.len(), 2);

    db.delete(&client, "items", "id = ?", &[Value::Int(2)]).await?;
    let live = db.find(&client, "items", "", &[]).await?;
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].try_get::<i64>("id")?, 1);
    Ok(())
}

#[tokio::test]
async fn delete_requires_a_filter() -> OrmResult<()> {
    let (db, client) = setup().await?;
    let err = db.delete(&client, "users", "  ", &[]).await.unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn batch_insert_then_paginate() -> OrmResult<()> {
    let (db, client) = setup_with(DbConfig::new(Dialect::Sqlite).batch_size(40)).await?;
    let rows = (1..=95)
        .map(|i| Record::new().with("id", i).with("name", format!("item {i:02}")))
        .collect();

    let result = db.insert_batch(&client, "items", rows).await?;
    assert_eq!(result.total_affected, 95);
    assert_eq!(result.statements, 3);

    let sql = "SELECT id, name FROM items WHERE name LIKE ? ORDER BY id";
    let args = [Value::from("item %")];
    let last = db.paginate(&client, sql, &args, 10, 10).await?;
    assert_eq!(last.total, 95);
    assert_eq!(last.total_pages, 10);
    assert_eq!(last.rows.len(), 5);
    assert_eq!(last.rows[0].try_get::<i64>("id")?, 91);
    assert!(!last.has_next());

    let past_end = db.paginate(&client, sql, &args, 11, 10).await?;
    assert_eq!(past_end.total, 95);
    assert!(past_end.rows.is_empty());
    Ok(())
}

#[tokio::test]
async fn batch_failure_keeps_earlier_chunks() -> OrmResult<()> {
    let (db, client) = setup_with(DbConfig::new(Dialect::Sqlite).batch_size(2)).await?;
    db.insert(&client, "items", Record::new().with("id", 3).with("name", "taken"))
        .await?;
    let rows = (1..=4)
        .map(|i| Record::new().with("id", i).with("name", "n"))
        .collect();

    let err = db.insert_batch(&client, "items", rows).await.unwrap_err();
    match err {
        OrmError::Batch { affected, .. } => assert_eq!(affected, 2),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(db.count(&client, "items", "", &[]).await?, 3);
    Ok(())
}

#[tokio::test]
async fn update_and_delete_batches() -> OrmResult<()> {
    let (db, client) = setup().await?;
    let rows: Vec<Record> = (1..=3).map(|i| user(i, "old")).collect();
    db.insert_batch(&client, "users", rows).await?;

    let renamed = (1..=3).map(|i| user(i, "new")).collect();
    assert_eq!(db.update_batch(&client, "users", renamed).await?.total_affected, 3);
    assert_eq!(db.count(&client, "users", "name = ?", &["new".into()]).await?, 3);

    let keys = vec![Value::Int(1), Value::Int(2)];
    assert_eq!(db.delete_batch(&client, "users", keys).await?.total_affected, 2);
    assert_eq!(db.count(&client, "users", "", &[]).await?, 1);
    Ok(())
}

#[tokio::test]
async fn transaction_rolls_back_engine_writes() -> OrmResult<()> {
    let (db, client) = setup().await?;

    let outcome: OrmResult<()> = polyorm::transaction!(client, tx, {
        db.insert(&tx, "users", user(1, "a")).await?;
        db.insert(&tx, "users", user(1, "duplicate")).await?;
        Ok(())
    });
    assert!(outcome.unwrap_err().is_driver());
    assert_eq!(db.count(&client, "users", "", &[]).await?, 0);

    let committed: OrmResult<u64> = polyorm::transaction!(client, tx, {
        db.insert(&tx, "users", user(1, "a")).await?;
        db.count(&tx, "users", "", &[]).await
    });
    assert_eq!(committed?, 1);
    assert_eq!(db.count(&client, "users", "", &[]).await?, 1);
    Ok(())
}

#[tokio::test]
async fn stats_monitor_sees_every_statement() -> OrmResult<()> {
    let client = SqliteClient::open_in_memory()?;
    client.execute_batch(SCHEMA).await?;
    let stats = Arc::new(StatsMonitor::new());
    let monitor: Arc<dyn QueryMonitor> = stats.clone();
    let db = Db::with_monitor_arc(DbConfig::new(Dialect::Sqlite), monitor);

    db.insert(&client, "users", user(1, "a")).await?;
    db.find(&client, "users", "", &[]).await?;
    assert!(db.query(&client, "SELECT * FROM nowhere", &[]).await.is_err());

    // PRAGMA schema lookup, insert, find, failed query
    let snapshot = stats.stats();
    assert_eq!(snapshot.total_queries, 4);
    assert_eq!(snapshot.insert_count, 1);
    assert_eq!(snapshot.failed_queries, 1);
    Ok(())
}

#[tokio::test]
async fn raw_client_queries_still_work() -> OrmResult<()> {
    let (_db, client) = setup().await?;
    client
        .execute("INSERT INTO items (id, name) VALUES (?, ?)", &[Value::Int(1), "x".into()])
        .await?;
    let row = client.query_one("SELECT COUNT(*) AS n FROM items", &[]).await?;
    assert_eq!(row.try_get::<i64>("n")?, 1);
    Ok(())
}
