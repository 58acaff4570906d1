//! Statement execution: the only place a [`GenericClient`] is called.
//!
//! Each call is timed, bounded by the configured timeout (with best-effort
//! server-side cancellation on expiry), reported to the monitor, and driver
//! errors are annotated with the SQL text and elapsed time.

use crate::client::{ExecResult, GenericClient, PreparedStatement};
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::monitor::{QueryContext, QueryMonitor, QueryResult};
use crate::record::{Record, StatementPlan};
use crate::value::Value;
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Clone, Copy)]
pub(crate) struct Executor<'a> {
    pub(crate) connection_name: &'a str,
    pub(crate) dialect: Dialect,
    pub(crate) monitor: &'a dyn QueryMonitor,
    pub(crate) monitoring_enabled: bool,
    pub(crate) timeout: Option<Duration>,
    pub(crate) slow_query_threshold: Option<Duration>,
}

impl<'a> Executor<'a> {
    pub(crate) async fn query<C: GenericClient>(
        &self,
        conn: &C,
        tag: &str,
        plan: &StatementPlan,
    ) -> OrmResult<Vec<Record>> {
        self.run(
            conn,
            tag,
            &plan.sql,
            &plan.args,
            conn.query(&plan.sql, &plan.args),
            |rows| QueryResult::Rows(rows.len()),
        )
        .await
    }

    pub(crate) async fn query_opt<C: GenericClient>(
        &self,
        conn: &C,
        tag: &str,
        plan: &StatementPlan,
    ) -> OrmResult<Option<Record>> {
        self.run(
            conn,
            tag,
            &plan.sql,
            &plan.args,
            conn.query_opt(&plan.sql, &plan.args),
            |row| QueryResult::Rows(usize::from(row.is_some())),
        )
        .await
    }

    /// Run a `SELECT COUNT(*)`-shaped query and read the first column.
    pub(crate) async fn query_count<C: GenericClient>(
        &self,
        conn: &C,
        tag: &str,
        plan: &StatementPlan,
    ) -> OrmResult<u64> {
        let row = self.query_opt(conn, tag, plan).await?;
        let Some(value) = row.as_ref().and_then(|r| r.get_index(0)) else {
            return Ok(0);
        };
        value
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| OrmError::decode("count", format!("not a row count: {value}")))
    }

    pub(crate) async fn execute<C: GenericClient>(
        &self,
        conn: &C,
        tag: &str,
        plan: &StatementPlan,
    ) -> OrmResult<ExecResult> {
        self.run(
            conn,
            tag,
            &plan.sql,
            &plan.args,
            conn.execute(&plan.sql, &plan.args),
            |r| QueryResult::Affected(r.rows_affected),
        )
        .await
    }

    pub(crate) async fn execute_returning_into<C: GenericClient>(
        &self,
        conn: &C,
        tag: &str,
        plan: &StatementPlan,
    ) -> OrmResult<Option<Value>> {
        self.run(
            conn,
            tag,
            &plan.sql,
            &plan.args,
            conn.execute_returning_into(&plan.sql, &plan.args),
            |_| QueryResult::Affected(1),
        )
        .await
    }

    /// Prepare is not reported to monitors; the executions are.
    pub(crate) async fn prepare<C: GenericClient>(
        &self,
        conn: &C,
        sql: &str,
    ) -> OrmResult<PreparedStatement> {
        let start = Instant::now();
        self.with_timeout(conn, conn.prepare_statement(sql))
            .await
            .map_err(|e| e.annotate(sql, start.elapsed()))
    }

    pub(crate) async fn execute_prepared<C: GenericClient>(
        &self,
        conn: &C,
        tag: &str,
        stmt: &PreparedStatement,
        args: &[Value],
    ) -> OrmResult<ExecResult> {
        self.run(
            conn,
            tag,
            stmt.sql(),
            args,
            conn.execute_prepared(stmt, args),
            |r| QueryResult::Affected(r.rows_affected),
        )
        .await
    }

    async fn run<C, T, F>(
        &self,
        conn: &C,
        tag: &str,
        sql: &str,
        args: &[Value],
        future: F,
        summarize: impl FnOnce(&T) -> QueryResult,
    ) -> OrmResult<T>
    where
        C: GenericClient,
        F: Future<Output = OrmResult<T>> + Send,
    {
        let ctx = self
            .monitoring_enabled
            .then(|| {
                QueryContext::for_statement(self.connection_name, self.dialect, sql, args)
                    .with_tag(tag)
            });
        if let Some(ctx) = &ctx {
            self.monitor.on_query_start(ctx);
        }

        let start = Instant::now();
        let result = self.with_timeout(conn, future).await;
        let duration = start.elapsed();
        let result = result.map_err(|e| e.annotate(sql, duration));

        if let Some(ctx) = &ctx {
            let query_result = match &result {
                Ok(value) => summarize(value),
                Err(OrmError::Timeout(d)) => QueryResult::Error(format!("timeout after {d:?}")),
                Err(e) => QueryResult::error(e.to_string()),
            };
            self.monitor.on_query_complete(ctx, duration, &query_result);
            if self.slow_query_threshold.is_some_and(|t| duration > t) {
                self.monitor.on_slow_query(ctx, duration);
            }
        }
        result
    }

    async fn with_timeout<C, T, F>(&self, conn: &C, future: F) -> OrmResult<T>
    where
        C: GenericClient,
        F: Future<Output = OrmResult<T>> + Send,
    {
        match self.timeout {
            Some(timeout) => {
                tokio::pin!(future);
                tokio::select! {
                    result = &mut future => result,
                    _ = tokio::time::sleep(timeout) => {
                        conn.cancel();
                        Err(OrmError::Timeout(timeout))
                    }
                }
            }
            None => future.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{NoopMonitor, StatsMonitor};
    use crate::testing::{RecordingClient, Response};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn executor<'a>(monitor: &'a dyn QueryMonitor, timeout: Option<Duration>) -> Executor<'a> {
        Executor {
            connection_name: "test",
            dialect: Dialect::Postgres,
            monitor,
            monitoring_enabled: true,
            timeout,
            slow_query_threshold: Some(Duration::ZERO),
        }
    }

    #[tokio::test]
    async fn driver_errors_are_annotated_and_reported() {
        let stats = StatsMonitor::new();
        let client = RecordingClient::new();
        client.push(Response::Error(OrmError::driver("relation \"t\" does not exist")));

        let plan = StatementPlan::new("SELECT * FROM t WHERE id = $1", vec![Value::Int(1)]);
        let err = executor(&stats, None)
            .query(&client, "find", &plan)
            .await
            .unwrap_err();

        match err {
            OrmError::Driver { sql, elapsed, .. } => {
                assert_eq!(sql.as_deref(), Some("SELECT * FROM t WHERE id = $1"));
                assert!(elapsed.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        let s = stats.stats();
        assert_eq!(s.total_queries, 1);
        assert_eq!(s.failed_queries, 1);
        assert_eq!(s.slow_queries, 1);
    }

    #[tokio::test]
    async fn timeout_returns_error_and_attempts_cancellation() {
        struct HangingClient(Arc<AtomicBool>);
        impl GenericClient for HangingClient {
            async fn query(&self, _: &str, _: &[Value]) -> OrmResult<Vec<Record>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![])
            }
            async fn execute(&self, _: &str, _: &[Value]) -> OrmResult<ExecResult> {
                Ok(ExecResult::default())
            }
            fn cancel(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let client = HangingClient(cancelled.clone());
        let plan = StatementPlan::new("SELECT pg_sleep(60)", vec![]);
        let err = executor(&NoopMonitor, Some(Duration::from_millis(10)))
            .query(&client, "query", &plan)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn count_reads_first_column_leniently() {
        let client = RecordingClient::new();
        client.push(Response::Rows(vec![Record::new().with("COUNT(*)", "42")]));
        let plan = StatementPlan::new("SELECT COUNT(*) FROM t", vec![]);
        let n = executor(&NoopMonitor, None)
            .query_count(&client, "count", &plan)
            .await
            .unwrap();
        assert_eq!(n, 42);
    }
}
