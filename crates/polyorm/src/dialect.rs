//! SQL dialect profiles.
//!
//! A [`Dialect`] is chosen once per [`Db`](crate::Db) and decides placeholder
//! syntax, pagination syntax, upsert strategy and generated-key retrieval.

use crate::error::{OrmError, OrmResult};
use std::fmt;
use std::str::FromStr;

/// One of the five supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
    Oracle,
    SqlServer,
}

/// How bound parameters are written in statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    Question,
    /// `$1, $2, ...`
    Dollar,
    /// `@p1, @p2, ...`
    AtP,
    /// `:1, :2, ...`
    Colon,
}

/// How a bounded page of rows is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY` (requires ORDER BY)
    OffsetFetch,
    /// Nested `ROWNUM` filters
    RowNum,
}

/// Single-statement insert-or-update strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStyle {
    /// `ON DUPLICATE KEY UPDATE`
    OnDuplicateKey,
    /// `ON CONFLICT (...) DO UPDATE SET ...`
    OnConflict,
    /// `MERGE INTO ... USING (...)`
    Merge,
}

/// How the key of a freshly inserted row is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedKeyStyle {
    /// Driver-reported last insert id.
    LastInsertId,
    /// `INSERT ... RETURNING pk`
    Returning,
    /// `INSERT ...; SELECT SCOPE_IDENTITY()`
    ScopeIdentity,
    /// `INSERT ... RETURNING pk INTO :out`
    ReturningInto,
}

impl Dialect {
    /// All dialects, in declaration order.
    pub const ALL: [Dialect; 5] = [
        Dialect::MySql,
        Dialect::Postgres,
        Dialect::Sqlite,
        Dialect::Oracle,
        Dialect::SqlServer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "sqlserver",
        }
    }

    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            Dialect::MySql | Dialect::Sqlite => PlaceholderStyle::Question,
            Dialect::Postgres => PlaceholderStyle::Dollar,
            Dialect::SqlServer => PlaceholderStyle::AtP,
            Dialect::Oracle => PlaceholderStyle::Colon,
        }
    }

    pub fn pagination_style(self) -> PaginationStyle {
        match self {
            Dialect::MySql | Dialect::Postgres | Dialect::Sqlite => PaginationStyle::LimitOffset,
            Dialect::SqlServer => PaginationStyle::OffsetFetch,
            Dialect::Oracle => PaginationStyle::RowNum,
        }
    }

    pub fn upsert_style(self) -> UpsertStyle {
        match self {
            Dialect::MySql => UpsertStyle::OnDuplicateKey,
            Dialect::Postgres | Dialect::Sqlite => UpsertStyle::OnConflict,
            Dialect::Oracle | Dialect::SqlServer => UpsertStyle::Merge,
        }
    }

    pub fn generated_key_style(self) -> GeneratedKeyStyle {
        match self {
            Dialect::MySql | Dialect::Sqlite => GeneratedKeyStyle::LastInsertId,
            Dialect::Postgres => GeneratedKeyStyle::Returning,
            Dialect::SqlServer => GeneratedKeyStyle::ScopeIdentity,
            Dialect::Oracle => GeneratedKeyStyle::ReturningInto,
        }
    }

    /// Whether one `INSERT` may carry several `VALUES` rows in a batch.
    ///
    /// Oracle and SQL Server batches reuse a prepared single-row statement.
    pub fn supports_multi_row_insert(self) -> bool {
        matches!(self, Dialect::MySql | Dialect::Postgres | Dialect::Sqlite)
    }

    /// Render the `index`-th (1-based) placeholder.
    pub fn placeholder(self, index: usize) -> String {
        match self.placeholder_style() {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${index}"),
            PlaceholderStyle::AtP => format!("@p{index}"),
            PlaceholderStyle::Colon => format!(":{index}"),
        }
    }

    /// Keyword used to alias a derived table (`AS sub` vs `sub`).
    ///
    /// Oracle rejects `AS` before a table alias.
    pub(crate) fn table_alias_keyword(self) -> &'static str {
        match self {
            Dialect::Oracle => "",
            _ => "AS ",
        }
    }

    /// Detect the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> OrmResult<Self> {
        let Some((scheme, _)) = url.split_once(':') else {
            return Err(OrmError::validation(format!(
                "cannot detect dialect: '{url}' has no scheme"
            )));
        };
        scheme.parse()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "oracle" => Ok(Dialect::Oracle),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            other => Err(OrmError::validation(format!("unknown SQL dialect '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_per_dialect() {
        assert_eq!(Dialect::MySql.placeholder(3), "?");
        assert_eq!(Dialect::Sqlite.placeholder(3), "?");
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::SqlServer.placeholder(3), "@p3");
        assert_eq!(Dialect::Oracle.placeholder(3), ":3");
    }

    #[test]
    fn parses_names_and_urls() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert_eq!(
            Dialect::from_url("postgres://u:p@localhost/db").unwrap(),
            Dialect::Postgres
        );
        assert_eq!(Dialect::from_url("sqlite::memory:").unwrap(), Dialect::Sqlite);
        assert!("db2".parse::<Dialect>().is_err());
        assert!(Dialect::from_url("localhost").is_err());
    }

    #[test]
    fn strategy_table_is_total() {
        for d in Dialect::ALL {
            let _ = (d.placeholder_style(), d.pagination_style(), d.upsert_style());
            assert_eq!(d.name().parse::<Dialect>().unwrap(), d);
        }
    }
}
