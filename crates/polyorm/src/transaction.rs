//! Transaction helper macro.
//!
//! Every `Db` operation takes its connection as an argument, so running
//! several of them atomically is a matter of passing the transaction handle
//! (`tokio_postgres::Transaction`, `deadpool_postgres::Transaction` or
//! [`SqliteTransaction`](crate::sqlite::SqliteTransaction)) instead of the
//! connection. [`transaction!`](crate::transaction!) handles commit/rollback.
//!
//! # Example
//!
//! ```ignore
//! use polyorm::{Db, OrmResult, Record};
//!
//! # async fn demo(db: &Db, client: &polyorm::sqlite::SqliteClient) -> OrmResult<()> {
//! polyorm::transaction!(client, tx, {
//!     db.insert(&tx, "orders", Record::new().with("id", 1)).await?;
//!     db.update(&tx, "stock", Record::new().with("qty", 9), "sku = ?", &["A1".into()]).await?;
//!     Ok(())
//! })?;
//! # Ok(()) }
//! ```

/// Runs the given block inside a database transaction.
///
/// - Begins a transaction via `$client.transaction().await`.
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)`.
///
/// The block must evaluate to `polyorm::OrmResult<T>`. A failed rollback is
/// reported alongside the original error.
#[macro_export]
macro_rules! transaction {
    ($client:expr, $tx:ident, $body:block) => {{
        #[allow(unused_mut)]
        let mut $tx = ($client)
            .transaction()
            .await
            .map_err($crate::OrmError::from)?;

        let __polyorm_tx_body_result: $crate::OrmResult<_> = async { $body }.await;
        match __polyorm_tx_body_result {
            Ok(value) => {
                $tx.commit().await.map_err($crate::OrmError::from)?;
                Ok(value)
            }
            Err(error) => match $tx.rollback().await {
                Ok(()) => Err(error),
                Err(rollback_err) => Err($crate::OrmError::driver(format!(
                    "{error} (rollback failed: {rollback_err})"
                ))),
            },
        }
    }};
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use crate::client::GenericClient;
    use crate::error::{OrmError, OrmResult};
    use crate::sqlite::SqliteClient;

    async fn client() -> SqliteClient {
        let client = SqliteClient::open_in_memory().unwrap();
        client
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        client
    }

    async fn count(client: &SqliteClient) -> usize {
        client.query("SELECT id FROM t", &[]).await.unwrap().len()
    }

    async fn run(client: &SqliteClient, fail: bool) -> OrmResult<i64> {
        crate::transaction!(client, tx, {
            tx.execute("INSERT INTO t (id) VALUES (1)", &[]).await?;
            if fail {
                return Err(OrmError::validation("abort"));
            }
            Ok(1)
        })
    }

    #[tokio::test]
    async fn commits_on_ok() {
        let client = client().await;
        assert_eq!(run(&client, false).await.unwrap(), 1);
        assert_eq!(count(&client).await, 1);
    }

    #[tokio::test]
    async fn rolls_back_on_err() {
        let client = client().await;
        let err = run(&client, true).await.unwrap_err();
        assert!(matches!(err, OrmError::Validation(_)));
        assert_eq!(count(&client).await, 0);
    }
}
