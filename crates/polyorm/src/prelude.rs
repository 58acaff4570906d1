//! Convenient imports for typical `polyorm` usage.
//!
//! ```ignore
//! use polyorm::prelude::*;
//! ```

pub use crate::{
    Db, DbConfig, Dialect, GenericClient, OptimisticLockConfig, OrmError, OrmResult, Page, Record,
    SaveAction, SoftDeleteConfig, TimestampConfig, Value,
};

#[cfg(feature = "pool")]
pub use crate::{create_pool, create_pool_with_config};

#[cfg(feature = "sqlite")]
pub use crate::{SqliteClient, SqliteTransaction};
