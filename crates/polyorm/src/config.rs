//! Engine configuration.

use crate::dialect::Dialect;
use crate::error::OrmResult;
use std::time::Duration;

/// Default number of rows per batch statement.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default page size when a caller passes a page size below 1.
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Configuration for a [`Db`](crate::Db).
///
/// ```ignore
/// let config = DbConfig::new(Dialect::Postgres)
///     .connection_name("orders")
///     .batch_size(500)
///     .query_timeout(Duration::from_secs(30))
///     .slow_query_threshold(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Name reported to monitors with every statement.
    pub connection_name: String,
    pub dialect: Dialect,
    /// Rows per batch statement (or per prepared-statement run).
    pub batch_size: usize,
    /// Page size used when a caller passes a page size below 1.
    pub default_page_size: u64,
    /// Per-statement timeout. `None` means no timeout (default).
    pub query_timeout: Option<Duration>,
    /// Statements slower than this trigger `QueryMonitor::on_slow_query`.
    pub slow_query_threshold: Option<Duration>,
    /// Whether monitors receive statement reports.
    pub monitoring_enabled: bool,
    /// Use the dialect's single-statement upsert in `save`. When disabled,
    /// `save` probes with `COUNT(*)` and branches to insert or update.
    pub native_upsert: bool,
}

impl DbConfig {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            connection_name: "default".to_string(),
            dialect,
            batch_size: DEFAULT_BATCH_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            query_timeout: None,
            slow_query_threshold: None,
            monitoring_enabled: true,
            native_upsert: true,
        }
    }

    /// Configuration for the dialect named by a connection URL scheme.
    pub fn from_url(url: &str) -> OrmResult<Self> {
        Ok(Self::new(Dialect::from_url(url)?))
    }

    pub fn connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    /// Values below 1 fall back to [`DEFAULT_BATCH_SIZE`].
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = if size == 0 { DEFAULT_BATCH_SIZE } else { size };
        self
    }

    /// Values below 1 fall back to [`DEFAULT_PAGE_SIZE`].
    pub fn default_page_size(mut self, size: u64) -> Self {
        self.default_page_size = if size == 0 { DEFAULT_PAGE_SIZE } else { size };
        self
    }

    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    pub fn enable_monitoring(mut self) -> Self {
        self.monitoring_enabled = true;
        self
    }

    pub fn disable_monitoring(mut self) -> Self {
        self.monitoring_enabled = false;
        self
    }

    pub fn native_upsert(mut self, enabled: bool) -> Self {
        self.native_upsert = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DbConfig::new(Dialect::Sqlite);
        assert_eq!(config.connection_name, "default");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.default_page_size, 10);
        assert!(config.query_timeout.is_none());
        assert!(config.monitoring_enabled);
        assert!(config.native_upsert);
    }

    #[test]
    fn zero_sizes_fall_back_to_defaults() {
        let config = DbConfig::new(Dialect::MySql).batch_size(0).default_page_size(0);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.default_page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn builds_from_url() {
        let config = DbConfig::from_url("sqlserver://db.local:1433")
            .unwrap()
            .connection_name("erp");
        assert_eq!(config.dialect, Dialect::SqlServer);
        assert_eq!(config.connection_name, "erp");
    }
}
