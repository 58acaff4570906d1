//! Recording mock client for unit tests.

use crate::client::{ExecResult, GenericClient, PreparedStatement};
use crate::error::{OrmError, OrmResult};
use crate::record::Record;
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Scripted reply for the next statement.
pub(crate) enum Response {
    Rows(Vec<Record>),
    Exec(ExecResult),
    Key(Option<Value>),
    Error(OrmError),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Recorded {
    pub sql: String,
    pub args: Vec<Value>,
    pub prepared: bool,
}

/// Records every statement; replies from a script, then with defaults
/// (no rows, one affected row).
#[derive(Default)]
pub(crate) struct RecordingClient {
    log: Mutex<Vec<Recorded>>,
    script: Mutex<VecDeque<Response>>,
    returning_into: bool,
    native_prepare: bool,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `RETURNING ... INTO` OUT binds.
    pub fn with_returning_into(mut self) -> Self {
        self.returning_into = true;
        self
    }

    pub fn with_prepared_statements(mut self) -> Self {
        self.native_prepare = true;
        self
    }

    pub fn push(&self, response: Response) -> &Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn count_rows(&self, n: i64) -> &Self {
        self.push(Response::Rows(vec![Record::new().with("count", n)]))
    }

    pub fn affected(&self, n: u64) -> &Self {
        self.push(Response::Exec(ExecResult::affected(n)))
    }

    pub fn statements(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn sqls(&self) -> Vec<String> {
        self.statements().into_iter().map(|r| r.sql).collect()
    }

    pub fn last(&self) -> Recorded {
        self.statements().pop().expect("no statement recorded")
    }

    fn record(&self, sql: &str, args: &[Value], prepared: bool) -> Option<Response> {
        self.log.lock().unwrap().push(Recorded {
            sql: sql.to_string(),
            args: args.to_vec(),
            prepared,
        });
        self.script.lock().unwrap().pop_front()
    }
}

impl GenericClient for RecordingClient {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Record>> {
        match self.record(sql, params, false) {
            None => Ok(Vec::new()),
            Some(Response::Rows(rows)) => Ok(rows),
            Some(Response::Error(e)) => Err(e),
            Some(Response::Exec(_) | Response::Key(_)) => panic!("scripted non-row reply for query: {sql}"),
        }
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> OrmResult<ExecResult> {
        match self.record(sql, params, false) {
            None => Ok(ExecResult::affected(1)),
            Some(Response::Exec(r)) => Ok(r),
            Some(Response::Error(e)) => Err(e),
            Some(Response::Rows(_) | Response::Key(_)) => panic!("scripted non-exec reply for execute: {sql}"),
        }
    }

    async fn execute_returning_into(&self, sql: &str, params: &[Value]) -> OrmResult<Option<Value>> {
        if !self.returning_into {
            return Err(OrmError::Unsupported("OUT-bound RETURNING INTO".to_string()));
        }
        match self.record(sql, params, false) {
            None => Ok(None),
            Some(Response::Key(k)) => Ok(k),
            Some(Response::Error(e)) => Err(e),
            Some(_) => panic!("scripted non-key reply for returning-into: {sql}"),
        }
    }

    fn supports_prepared_statements(&self) -> bool {
        self.native_prepare
    }

    async fn prepare_statement(&self, sql: &str) -> OrmResult<PreparedStatement> {
        Ok(if self.native_prepare {
            PreparedStatement::with_handle(sql, ())
        } else {
            PreparedStatement::unprepared(sql)
        })
    }

    async fn execute_prepared(&self, stmt: &PreparedStatement, params: &[Value]) -> OrmResult<ExecResult> {
        match self.record(stmt.sql(), params, true) {
            None => Ok(ExecResult::affected(1)),
            Some(Response::Exec(r)) => Ok(r),
            Some(Response::Error(e)) => Err(e),
            Some(_) => panic!("scripted non-exec reply for prepared execute"),
        }
    }
}
