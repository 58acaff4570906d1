//! # polyorm
//!
//! A dialect-abstracting CRUD, upsert and pagination engine for MySQL,
//! PostgreSQL, SQLite, Oracle and SQL Server.
//!
//! ## Features
//!
//! - **One placeholder syntax**: write `?`, get `$n`, `@pn` or `:n` as the dialect needs
//! - **Column-value CRUD**: insert, update, delete, find and count over a [`Record`]
//! - **Native upsert**: `ON DUPLICATE KEY`, `ON CONFLICT` or `MERGE`, picked per dialect
//! - **Pagination**: `LIMIT/OFFSET`, `OFFSET/FETCH` or nested `ROWNUM`, with a total count
//! - **Row lifecycle policies**: auto timestamps, optimistic locking, soft delete
//! - **Transaction-friendly**: pass a transaction anywhere a `GenericClient` is expected
//! - **Safe defaults**: DELETE and UPDATE require WHERE
//! - **Query monitoring**: every statement is timed and reported to a [`QueryMonitor`]
//!
//! ## Example
//!
//! ```ignore
//! use polyorm::prelude::*;
//!
//! let db = Db::new(DbConfig::new(Dialect::Sqlite));
//! db.register_soft_delete("users", SoftDeleteConfig::timestamp("deleted_at"))?;
//! db.register_optimistic_lock("users", OptimisticLockConfig::default())?;
//!
//! let client = SqliteClient::open("app.db")?;
//! db.insert(&client, "users", Record::new().with("name", "alice")).await?;
//!
//! let page = db
//!     .paginate(&client, "SELECT * FROM users WHERE name LIKE ? ORDER BY id", &["a%".into()], 1, 20)
//!     .await?;
//! println!("{} of {}", page.rows.len(), page.total);
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod crud;
pub mod db;
pub mod dialect;
pub mod error;
pub mod ident;
pub mod intercept;
pub mod monitor;
pub mod paginate;
pub mod record;
pub mod schema;
pub mod transaction;
pub mod translate;
pub mod value;

mod exec;

#[cfg(test)]
mod testing;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub mod prelude;

pub use batch::BatchResult;
pub use client::{ExecResult, GenericClient, PreparedStatement};
pub use config::DbConfig;
pub use crud::{InsertResult, SaveAction, SaveResult};
pub use db::Db;
pub use dialect::Dialect;
pub use error::{OrmError, OrmResult};
pub use ident::{Ident, IntoIdent};
pub use intercept::{
    Interceptor, InterceptorChain, OptimisticLockConfig, SoftDeleteConfig, SoftDeleteKind,
    TimestampConfig, WhereClause,
};
pub use monitor::{
    CompositeMonitor, NoopMonitor, QueryContext, QueryMonitor, QueryResult, QueryStats, QueryType,
    StatsMonitor, TracingMonitor,
};
pub use paginate::Page;
pub use record::{ColumnValues, Record, StatementPlan};
pub use schema::{SchemaIntrospector, TableSchema};
pub use translate::translate;
pub use value::{FromValue, Value};

#[cfg(feature = "pool")]
pub use pool::{
    connect, create_pool, create_pool_with_config, create_pool_with_manager_config,
    create_pool_with_tls,
};

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteClient, SqliteTransaction};
