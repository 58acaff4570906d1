//! Page queries.
//!
//! A paginated read runs two statements: a `COUNT(*)` derived from the base
//! query (its trailing `ORDER BY` stripped), then a bounded page query in the
//! dialect's own syntax. The page query is skipped when the requested page
//! starts past the last row.

use crate::client::GenericClient;
use crate::db::Engine;
use crate::dialect::{Dialect, PaginationStyle};
use crate::error::OrmResult;
use crate::record::{Record, StatementPlan};
use crate::translate::{mask_sql, translate};
use crate::value::Value;
use regex::Regex;
use std::sync::LazyLock;

static ORDER_BY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("valid regex"));
static COUNT_BLOCKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(DISTINCT|GROUP\s+BY|HAVING|UNION|INTERSECT|EXCEPT|MINUS|LIMIT|OFFSET|FETCH|TOP)\b",
    )
    .expect("valid regex")
});
static SELECT_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*SELECT\s+(.*?)\bFROM\b").expect("valid regex"));

/// Name of the row-number column the Oracle page query adds.
const ROWNUM_COLUMN: &str = "rn";

/// One page of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T = Record> {
    pub rows: Vec<T>,
    /// Rows matching the base query across all pages.
    pub total: u64,
    /// 1-based page number actually served.
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(rows: Vec<T>, total: u64, page: u64, page_size: u64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total.div_ceil(page_size)
        };
        Self {
            rows,
            total,
            page,
            page_size,
            total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Convert every row, keeping the paging metadata.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        let rows = self.rows.into_iter().map(f).collect::<Result<Vec<_>, E>>()?;
        Ok(Page {
            rows,
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        })
    }
}

/// Clamp a page request: page below 1 becomes 1, page size below 1 becomes
/// `default_size`.
pub fn normalize(page: u64, page_size: u64, default_size: u64) -> (u64, u64) {
    let size = if page_size == 0 { default_size.max(1) } else { page_size };
    (page.max(1), size)
}

/// Rows skipped before `page`.
pub fn offset(page: u64, page_size: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(page_size)
}

fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

fn top_level_order_by(sql: &str) -> Option<usize> {
    let masked = mask_sql(sql, true);
    ORDER_BY.find_iter(&masked).last().map(|m| m.start())
}

/// Remove a top-level trailing `ORDER BY` clause.
///
/// `ORDER BY` inside subqueries, literals or comments is kept.
pub fn strip_order_by(sql: &str) -> &str {
    let sql = trim_statement(sql);
    match top_level_order_by(sql) {
        Some(start) => sql[..start].trim_end(),
        None => sql,
    }
}

/// `SELECT COUNT(*)` for a base query.
///
/// A plain `SELECT <cols> FROM ...` has its select list replaced in place.
/// Queries with DISTINCT, grouping, set operators, row limits, or any
/// parenthesis or placeholder in the select list are wrapped instead:
/// `SELECT COUNT(*) FROM (<base>) AS sub`.
pub fn plan_count(dialect: Dialect, sql: &str, args: Vec<Value>) -> OrmResult<StatementPlan> {
    let base = strip_order_by(sql);
    let count_sql = simple_count(base).unwrap_or_else(|| {
        format!(
            "SELECT COUNT(*) FROM ({base}) {}sub",
            dialect.table_alias_keyword()
        )
    });
    translate(dialect, &count_sql, args)
}

fn simple_count(base: &str) -> Option<String> {
    let masked = mask_sql(base, true);
    if COUNT_BLOCKERS.is_match(&masked) {
        return None;
    }
    let caps = SELECT_FROM.captures(&masked)?;
    let list = caps.get(1)?.as_str();
    if list.contains('(') || list.contains('?') {
        return None;
    }
    let from = caps.get(0)?.end() - "FROM".len();
    Some(format!("SELECT COUNT(*) {}", &base[from..]))
}

/// The bounded query for one page.
///
/// - MySQL, PostgreSQL, SQLite: `LIMIT n OFFSET m`.
/// - SQL Server: `OFFSET m ROWS FETCH NEXT n ROWS ONLY`, adding
///   `ORDER BY (SELECT NULL)` when the query has no ORDER BY.
/// - Oracle: nested `ROWNUM` filters (ordered by column 1 when unordered).
///   The result carries an extra `rn` column.
pub fn plan_page(
    dialect: Dialect,
    sql: &str,
    page: u64,
    page_size: u64,
    args: Vec<Value>,
) -> OrmResult<StatementPlan> {
    let sql = trim_statement(sql);
    let skip = offset(page, page_size);
    let ordered = top_level_order_by(sql).is_some();

    let paged = match dialect.pagination_style() {
        PaginationStyle::LimitOffset => format!("{sql} LIMIT {page_size} OFFSET {skip}"),
        PaginationStyle::OffsetFetch => {
            let order = if ordered { "" } else { " ORDER BY (SELECT NULL)" };
            format!("{sql}{order} OFFSET {skip} ROWS FETCH NEXT {page_size} ROWS ONLY")
        }
        PaginationStyle::RowNum => {
            let order = if ordered { "" } else { " ORDER BY 1" };
            let end = skip.saturating_add(page_size);
            format!(
                "SELECT a.* FROM (SELECT a.*, ROWNUM {ROWNUM_COLUMN} FROM ({sql}{order}) a \
                 WHERE ROWNUM <= {end}) a WHERE {ROWNUM_COLUMN} > {skip}"
            )
        }
    };
    translate(dialect, &paged, args)
}

impl Engine<'_> {
    pub(crate) async fn paginate<C: GenericClient>(
        &self,
        conn: &C,
        sql: &str,
        args: Vec<Value>,
        page: u64,
        page_size: u64,
    ) -> OrmResult<Page> {
        let dialect = self.exec.dialect;
        let (page, page_size) = normalize(page, page_size, self.default_page_size);
        let count = plan_count(dialect, sql, args.clone())?;
        let bounded = plan_page(dialect, sql, page, page_size, args)?;

        let total = self.exec.query_count(conn, "paginate_count", &count).await?;
        if offset(page, page_size) >= total {
            return Ok(Page::new(Vec::new(), total, page, page_size));
        }

        let mut rows = self.exec.query(conn, "paginate", &bounded).await?;
        if dialect == Dialect::Oracle {
            for row in &mut rows {
                row.remove(ROWNUM_COLUMN);
            }
        }
        Ok(Page::new(rows, total, page, page_size))
    }
}
