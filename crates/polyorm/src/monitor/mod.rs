//! Statement monitoring.
//!
//! Every statement the engine executes is reported to a [`QueryMonitor`] after
//! it completes, success or failure, with the connection name, the SQL that
//! was sent, the rendered arguments and the elapsed time.
//!
//! [`TracingMonitor`] is installed by default and writes to `tracing` on the
//! `polyorm.sql` target. Monitors can be combined with [`CompositeMonitor`].
//!
//! # Example
//!
//! ```rust,ignore
//! use polyorm::monitor::{CompositeMonitor, StatsMonitor, TracingMonitor};
//! use polyorm::{Db, DbConfig, Dialect};
//! use std::sync::Arc;
//!
//! let stats = Arc::new(StatsMonitor::new());
//! let monitor = CompositeMonitor::new()
//!     .add(TracingMonitor::new())
//!     .add_arc(stats.clone());
//! let db = Db::with_monitor(DbConfig::new(Dialect::Postgres), monitor);
//! // ...
//! println!("{} statements", stats.stats().total_queries);
//! ```

mod monitors;
mod types;


pub use monitors::{CompositeMonitor, NoopMonitor, QueryStats, StatsMonitor, TracingMonitor};
pub use types::{QueryContext, QueryMonitor, QueryResult, QueryType};

pub(crate) fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
