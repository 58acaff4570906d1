//! Generic `?` SQL → dialect-native SQL.
//!
//! [`translate`] runs three steps, in order:
//!
//! 1. Trailing `LIMIT n` rewriting for dialects without `LIMIT`
//!    (Oracle: `ROWNUM` wrapper, SQL Server: `SELECT TOP n`).
//! 2. Placeholder renumbering (`$n`, `@pn`, `:n`); `?` inside string literals,
//!    quoted identifiers and comments is left alone.
//! 3. Argument sanitization: the placeholders actually present are counted
//!    independently, surplus arguments are dropped, missing ones are an error.

use crate::dialect::{Dialect, PlaceholderStyle};
use crate::error::{OrmError, OrmResult};
use crate::record::StatementPlan;
use crate::value::Value;
use regex::Regex;
use std::sync::LazyLock;

static TRAILING_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+LIMIT\s+(\d+)\s*;?\s*$").expect("valid regex"));
static LEADING_SELECT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\s*)SELECT(\s+DISTINCT)?\b").expect("valid regex")
});
static DOLLAR_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("valid regex"));
static AT_P_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)@p(\d+)\b").expect("valid regex"));
static COLON_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^:\w]):(\d+)\b").expect("valid regex"));

/// Translate generic SQL and its positional arguments into a [`StatementPlan`].
pub fn translate(dialect: Dialect, sql: &str, args: Vec<Value>) -> OrmResult<StatementPlan> {
    let limited = rewrite_limit(dialect, sql);
    let native = renumber_placeholders(dialect, &limited);
    let args = sanitize_args(dialect, &native, args)?;
    Ok(StatementPlan::new(native, args))
}

/// Rewrite a trailing top-level `LIMIT n` for Oracle and SQL Server.
///
/// Other dialects, and statements without a literal trailing limit, pass through.
pub fn rewrite_limit(dialect: Dialect, sql: &str) -> String {
    if !matches!(dialect, Dialect::Oracle | Dialect::SqlServer) {
        return sql.to_string();
    }

    let masked = mask_sql(sql, true);
    let Some(caps) = TRAILING_LIMIT.captures(&masked) else {
        return sql.to_string();
    };
    let (Some(whole), Some(n)) = (caps.get(0), caps.get(1)) else {
        return sql.to_string();
    };
    let body = &sql[..whole.start()];
    let n = &sql[n.start()..n.end()];

    match dialect {
        Dialect::Oracle => format!("SELECT * FROM ({body}) WHERE ROWNUM <= {n}"),
        _ => match LEADING_SELECT.captures(body) {
            Some(sel) => {
                let lead = sel.get(1).map_or("", |m| m.as_str());
                let distinct = if sel.get(2).is_some() { " DISTINCT" } else { "" };
                let end = sel.get(0).map_or(0, |m| m.end());
                format!("{lead}SELECT{distinct} TOP {n}{}", &body[end..])
            }
            None => {
                tracing::warn!(
                    target: "polyorm.translate",
                    "LIMIT on a non-SELECT statement cannot be rewritten for SQL Server"
                );
                sql.to_string()
            }
        },
    }
}

/// Replace each `?` outside literals/comments with the dialect's native placeholder.
pub fn renumber_placeholders(dialect: Dialect, sql: &str) -> String {
    if dialect.placeholder_style() == PlaceholderStyle::Question {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len() + 16);
    let mut index = 0usize;
    let mut scanner = Scanner::new(sql);
    while let Some((ch, state)) = scanner.next_char() {
        if ch == '?' && state == ScanState::Code {
            index += 1;
            out.push_str(&dialect.placeholder(index));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Count the placeholders a driver will see in dialect-native SQL.
///
/// `?` dialects count bare `?`; numbered dialects report the highest index
/// referenced, so a reused `$1` counts once.
pub fn count_placeholders(dialect: Dialect, sql: &str) -> usize {
    let masked = mask_sql(sql, false);
    let re = match dialect.placeholder_style() {
        PlaceholderStyle::Question => return masked.bytes().filter(|b| *b == b'?').count(),
        PlaceholderStyle::Dollar => &*DOLLAR_PARAM,
        PlaceholderStyle::AtP => &*AT_P_PARAM,
        PlaceholderStyle::Colon => &*COLON_PARAM,
    };
    re.captures_iter(&masked)
        .filter_map(|c| c.get(1)?.as_str().parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

fn sanitize_args(dialect: Dialect, native_sql: &str, mut args: Vec<Value>) -> OrmResult<Vec<Value>> {
    let expected = count_placeholders(dialect, native_sql);
    if args.len() > expected {
        tracing::warn!(
            target: "polyorm.translate",
            expected,
            supplied = args.len(),
            "dropping surplus arguments"
        );
        args.truncate(expected);
    } else if args.len() < expected {
        return Err(OrmError::PlaceholderCountMismatch {
            expected,
            actual: args.len(),
        });
    }
    Ok(args)
}

// ── SQL text scanning ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanState {
    Code,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
}

/// Character scanner that tracks literal/comment state.
///
/// Quote delimiters report the literal state. A doubled quote inside a literal
/// (`''`, `""`) is an escape, not a terminator.
pub(crate) struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    state: ScanState,
    /// State forced onto the next character (second half of `''`, `/*`, `*/`).
    carry: Option<ScanState>,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(sql: &'a str) -> Self {
        Self {
            chars: sql.char_indices().peekable(),
            state: ScanState::Code,
            carry: None,
        }
    }

    pub(crate) fn next_char(&mut self) -> Option<(char, ScanState)> {
        self.next_indexed().map(|(_, c, s)| (c, s))
    }

    pub(crate) fn next_indexed(&mut self) -> Option<(usize, char, ScanState)> {
        let (i, ch) = self.chars.next()?;
        if let Some(state) = self.carry.take() {
            return Some((i, ch, state));
        }
        let peek = self.chars.peek().map(|(_, c)| *c);
        let state = match self.state {
            ScanState::Code => match (ch, peek) {
                ('\'', _) => self.enter(ScanState::SingleQuoted),
                ('"', _) => self.enter(ScanState::DoubleQuoted),
                ('-', Some('-')) => self.enter(ScanState::LineComment),
                ('/', Some('*')) => {
                    self.carry = Some(ScanState::BlockComment);
                    self.enter(ScanState::BlockComment)
                }
                _ => ScanState::Code,
            },
            quoted @ (ScanState::SingleQuoted | ScanState::DoubleQuoted) => {
                let delim = if quoted == ScanState::SingleQuoted { '\'' } else { '"' };
                if ch == delim {
                    if peek == Some(delim) {
                        self.carry = Some(quoted);
                    } else {
                        self.state = ScanState::Code;
                    }
                }
                quoted
            }
            ScanState::LineComment => {
                if ch == '\n' {
                    self.state = ScanState::Code;
                }
                ScanState::LineComment
            }
            ScanState::BlockComment => {
                if ch == '*' && peek == Some('/') {
                    self.state = ScanState::Code;
                    self.carry = Some(ScanState::BlockComment);
                }
                ScanState::BlockComment
            }
        };
        Some((i, ch, state))
    }

    fn enter(&mut self, state: ScanState) -> ScanState {
        self.state = state;
        state
    }
}

/// Blank out literals and comments (and, with `nested`, everything inside
/// parentheses) while keeping byte offsets identical to the input.
///
/// Keyword searches on the mask therefore only hit top-level SQL.
pub(crate) fn mask_sql(sql: &str, nested: bool) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut depth = 0usize;
    let mut scanner = Scanner::new(sql);
    while let Some((ch, state)) = scanner.next_char() {
        let blank = match state {
            ScanState::Code => {
                let inside = depth > 0;
                match ch {
                    '(' => {
                        depth += 1;
                        inside
                    }
                    ')' => {
                        depth = depth.saturating_sub(1);
                        depth > 0
                    }
                    _ => inside,
                }
            }
            // Keep quote delimiters at top level so literals stay visible as such.
            ScanState::SingleQuoted | ScanState::DoubleQuoted => {
                depth > 0 || !(ch == '\'' || ch == '"')
            }
            ScanState::LineComment | ScanState::BlockComment => true,
        };
        if blank && (nested || state != ScanState::Code) {
            out.extend(std::iter::repeat_n(' ', ch.len_utf8()));
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(d: Dialect, sql: &str, args: Vec<Value>) -> StatementPlan {
        translate(d, sql, args).unwrap()
    }

    #[test]
    fn postgres_skips_question_marks_in_literals() {
        let p = plan(
            Dialect::Postgres,
            "SELECT * FROM t WHERE note = 'a?b' AND id = ?",
            vec![Value::Int(1)],
        );
        assert_eq!(p.sql, "SELECT * FROM t WHERE note = 'a?b' AND id = $1");
        assert_eq!(p.args, vec![Value::Int(1)]);
    }

    #[test]
    fn doubled_quote_escape_keeps_literal_state() {
        let sql = "SELECT * FROM t WHERE a = 'it''s ?' AND b = ? AND c = ?";
        let out = renumber_placeholders(Dialect::Postgres, sql);
        assert_eq!(out, "SELECT * FROM t WHERE a = 'it''s ?' AND b = $1 AND c = $2");
    }

    #[test]
    fn comments_and_quoted_identifiers_are_skipped() {
        let sql = "SELECT \"a?\" FROM t -- why?\nWHERE x = ? /* ? */ AND y = ?";
        let out = renumber_placeholders(Dialect::SqlServer, sql);
        assert_eq!(
            out,
            "SELECT \"a?\" FROM t -- why?\nWHERE x = @p1 /* ? */ AND y = @p2"
        );
    }

    #[test]
    fn native_placeholders_per_dialect() {
        let sql = "UPDATE t SET a = ?, b = ? WHERE id = ?";
        assert_eq!(renumber_placeholders(Dialect::MySql, sql), sql);
        assert_eq!(renumber_placeholders(Dialect::Sqlite, sql), sql);
        assert_eq!(
            renumber_placeholders(Dialect::Postgres, sql),
            "UPDATE t SET a = $1, b = $2 WHERE id = $3"
        );
        assert_eq!(
            renumber_placeholders(Dialect::SqlServer, sql),
            "UPDATE t SET a = @p1, b = @p2 WHERE id = @p3"
        );
        assert_eq!(
            renumber_placeholders(Dialect::Oracle, sql),
            "UPDATE t SET a = :1, b = :2 WHERE id = :3"
        );
    }

    #[test]
    fn surplus_arguments_are_truncated() {
        let p = plan(
            Dialect::Oracle,
            "SELECT * FROM t WHERE id = ?",
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        );
        assert_eq!(p.sql, "SELECT * FROM t WHERE id = :1");
        assert_eq!(p.args, vec![Value::Int(1)]);

        let p = plan(Dialect::MySql, "SELECT 1", vec![Value::Int(9)]);
        assert!(p.args.is_empty());
    }

    #[test]
    fn missing_arguments_are_an_error() {
        let err = translate(Dialect::Postgres, "SELECT * FROM t WHERE a = ? AND b = ?", vec![
            Value::Int(1),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            OrmError::PlaceholderCountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn counting_ignores_literals_and_casts() {
        assert_eq!(
            count_placeholders(Dialect::Postgres, "SELECT '$9', $1::text, $2, $1"),
            2
        );
        assert_eq!(
            count_placeholders(Dialect::Oracle, "SELECT '10:30' FROM dual WHERE a = :1 AND b = :2"),
            2
        );
        assert_eq!(count_placeholders(Dialect::SqlServer, "SELECT @p1, @P2, @param"), 2);
        assert_eq!(count_placeholders(Dialect::Sqlite, "SELECT '?', ?"), 1);
    }

    #[test]
    fn oracle_trailing_limit_wraps_rownum() {
        let p = plan(
            Dialect::Oracle,
            "SELECT id FROM t WHERE a = ? ORDER BY id LIMIT 5",
            vec![Value::Int(1)],
        );
        assert_eq!(
            p.sql,
            "SELECT * FROM (SELECT id FROM t WHERE a = :1 ORDER BY id) WHERE ROWNUM <= 5"
        );
    }

    #[test]
    fn sqlserver_limit_becomes_top() {
        assert_eq!(
            rewrite_limit(Dialect::SqlServer, "SELECT id FROM t ORDER BY id LIMIT 3"),
            "SELECT TOP 3 id FROM t ORDER BY id"
        );
        assert_eq!(
            rewrite_limit(Dialect::SqlServer, "select distinct name from t limit 10;"),
            "SELECT DISTINCT TOP 10 name from t"
        );
    }

    #[test]
    fn limit_inside_subquery_or_other_dialect_untouched() {
        let sql = "SELECT * FROM t WHERE id IN (SELECT id FROM u LIMIT 5)";
        assert_eq!(rewrite_limit(Dialect::Oracle, sql), sql);
        assert_eq!(rewrite_limit(Dialect::MySql, "SELECT 1 LIMIT 1"), "SELECT 1 LIMIT 1");
        let quoted = "SELECT * FROM t WHERE note = 'x LIMIT 5'";
        assert_eq!(rewrite_limit(Dialect::SqlServer, quoted), quoted);
    }

    #[test]
    fn mask_preserves_offsets() {
        let sql = "SELECT a, (SELECT b FROM c) FROM t WHERE n = 'é ORDER BY' ORDER BY a";
        let masked = mask_sql(sql, true);
        assert_eq!(masked.len(), sql.len());
        assert_eq!(masked.matches("ORDER BY").count(), 1);
        assert!(!masked.contains("SELECT b"));
    }
}
