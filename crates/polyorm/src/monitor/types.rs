use crate::dialect::Dialect;
use crate::value::Value;
use std::fmt;
use std::time::Duration;

/// The type of SQL operation being performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    /// `MERGE` and other upsert forms that do not start with `INSERT`
    Merge,
    /// DDL, `PRAGMA`, custom SQL
    Other,
}

impl QueryType {
    /// Detect query type from the leading keyword.
    ///
    /// `WITH` is reported as `Select`; the engine never emits writable CTEs.
    pub fn from_sql(sql: &str) -> Self {
        let head = sql
            .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .unwrap_or_default();
        match head.to_ascii_uppercase().as_str() {
            "SELECT" | "WITH" => QueryType::Select,
            "INSERT" => QueryType::Insert,
            "UPDATE" => QueryType::Update,
            "DELETE" => QueryType::Delete,
            "MERGE" => QueryType::Merge,
            _ => QueryType::Other,
        }
    }
}

/// Context information about an executed statement.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Name of the owning [`Db`](crate::Db) (`DbConfig::connection_name`).
    pub connection_name: String,
    pub dialect: Option<Dialect>,
    /// The dialect-native SQL sent to the driver.
    pub exec_sql: String,
    /// Bound arguments rendered for display.
    pub args: Vec<String>,
    pub param_count: usize,
    pub query_type: QueryType,
    /// Engine operation that issued the statement (`insert`, `paginate.count`, ...).
    pub tag: Option<String>,
}

impl QueryContext {
    pub fn new(sql: &str, param_count: usize) -> Self {
        Self {
            connection_name: String::new(),
            dialect: None,
            exec_sql: sql.to_string(),
            args: Vec::new(),
            param_count,
            query_type: QueryType::from_sql(sql),
            tag: None,
        }
    }

    pub(crate) fn for_statement(
        connection_name: &str,
        dialect: Dialect,
        sql: &str,
        args: &[Value],
    ) -> Self {
        Self {
            connection_name: connection_name.to_string(),
            dialect: Some(dialect),
            args: args.iter().map(Value::to_string).collect(),
            ..Self::new(sql, args.len())
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }
}

/// Maximum length for error messages in `QueryResult::Error`.
const MAX_ERROR_LEN: usize = 512;

/// Outcome of a statement, for monitoring.
#[derive(Debug, Clone)]
pub enum QueryResult {
    /// Query returned rows.
    Rows(usize),
    /// Statement affected rows.
    Affected(u64),
    /// Statement failed (message truncated to 512 bytes).
    Error(String),
}

impl QueryResult {
    /// Create an error result, truncating the message.
    pub fn error(msg: String) -> Self {
        if msg.len() > MAX_ERROR_LEN {
            let truncated = super::truncate_sql_bytes(&msg, MAX_ERROR_LEN);
            Self::Error(format!("{truncated}..."))
        } else {
            Self::Error(msg)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryResult::Error(_))
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Rows(n) => write!(f, "{n} rows"),
            QueryResult::Affected(n) => write!(f, "{n} affected"),
            QueryResult::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Receives a report for every executed statement.
pub trait QueryMonitor: Send + Sync {
    /// Called before the statement is sent.
    fn on_query_start(&self, _ctx: &QueryContext) {}

    /// Called after the statement completes (success or failure).
    fn on_query_complete(&self, ctx: &QueryContext, duration: Duration, result: &QueryResult);

    /// Called when `duration` exceeds the configured slow-query threshold.
    fn on_slow_query(&self, _ctx: &QueryContext, _duration: Duration) {}
}
