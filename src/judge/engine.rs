use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::admit::admit;
use super::compare::{compare, CompareResult};
use super::result::{EngineError, ErrorKind, QueryResult, ResultSet};
use crate::config::Config;
use crate::db::connectors::SandboxSession;
use crate::db::dialect::Dialect;
use crate::db::registry::DialectRegistry;

/// Budget for the unconditional rollback, independent of the caller's
/// deadline so cancellation cannot skip it.
const ROLLBACK_BUDGET: Duration = Duration::from_secs(5);

/// The judge's execution seam. `QueryEngine` is the production
/// implementation; the service layer is written against this trait so it
/// can be exercised with a stub.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Run a query directly against a pooled connection, without a
    /// wrapping transaction. For callers that have no setup script.
    async fn execute(&self, dialect: Dialect, query: &str) -> QueryResult;

    /// Run the init script and the query inside a transaction that is
    /// always rolled back.
    async fn execute_with_setup(
        &self,
        dialect: Dialect,
        init_script: &str,
        query: &str,
    ) -> QueryResult;

    fn compare(
        &self,
        expected: &QueryResult,
        actual: &QueryResult,
        order_matters: bool,
    ) -> CompareResult {
        compare(expected, actual, order_matters)
    }
}

/// Executes untrusted queries against the sandbox pools under a wall-clock
/// budget, normalizing results and guaranteeing rollback.
pub struct QueryEngine {
    registry: DialectRegistry,
    timeout: Duration,
    max_rows: usize,
}

impl QueryEngine {
    pub fn new(config: Config) -> Self {
        let timeout = Duration::from_secs(config.query_timeout_seconds);
        let max_rows = config.query_max_rows;
        Self {
            registry: DialectRegistry::new(config),
            timeout,
            max_rows,
        }
    }

    async fn open_session(
        &self,
        dialect: Dialect,
    ) -> Result<Box<dyn SandboxSession>, EngineError> {
        let connector = self.registry.acquire(dialect).await?;
        connector.session().await.map_err(|err| {
            EngineError::connection(format!(
                "failed to connect to sandbox database: {:#}",
                err
            ))
        })
    }

    /// Issue the user query under the time budget, returning the outcome and
    /// the observed elapsed milliseconds.
    async fn timed_query(
        &self,
        session: &mut dyn SandboxSession,
        query: &str,
    ) -> (Result<ResultSet, EngineError>, i64) {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, session.query(query)).await;
        let elapsed_ms = started.elapsed().as_millis() as i64;

        let result = match outcome {
            Ok(Ok(set)) => Ok(set),
            Ok(Err(err)) => Err(classify_query_error(&err)),
            Err(_) => Err(EngineError::timeout("query execution timeout")),
        };
        (result, elapsed_ms)
    }

    async fn rollback(&self, session: &mut dyn SandboxSession) {
        match tokio::time::timeout(ROLLBACK_BUDGET, session.rollback()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("Sandbox rollback failed: {:#}", err),
            Err(_) => log::warn!("Sandbox rollback timed out"),
        }
    }
}

#[async_trait]
impl QueryRunner for QueryEngine {
    async fn execute(&self, dialect: Dialect, query: &str) -> QueryResult {
        if let Err(err) = admit(query) {
            return QueryResult::from_error(err, 0);
        }

        let mut session = match self.open_session(dialect).await {
            Ok(session) => session,
            Err(err) => return QueryResult::from_error(err, 0),
        };

        let (outcome, elapsed_ms) = self.timed_query(session.as_mut(), query).await;
        match outcome {
            Ok(set) => QueryResult::from_result_set(set, elapsed_ms, self.max_rows),
            Err(err) => QueryResult::from_error(err, elapsed_ms),
        }
    }

    async fn execute_with_setup(
        &self,
        dialect: Dialect,
        init_script: &str,
        query: &str,
    ) -> QueryResult {
        // The init script is trusted problem content; only the user query
        // goes through the admitter.
        if let Err(err) = admit(query) {
            return QueryResult::from_error(err, 0);
        }

        let mut session = match self.open_session(dialect).await {
            Ok(session) => session,
            Err(err) => return QueryResult::from_error(err, 0),
        };

        if let Err(err) = session.begin().await {
            return QueryResult::from_error(
                EngineError::connection(format!("{:#}", err)),
                0,
            );
        }

        for statement in split_statements(init_script) {
            if let Err(err) = session.exec(statement).await {
                let setup_err = EngineError::setup(format!(
                    "setup error: {:#} (stmt: {})",
                    err, statement
                ));
                self.rollback(session.as_mut()).await;
                return QueryResult::from_error(setup_err, 0);
            }
        }

        let (outcome, elapsed_ms) = self.timed_query(session.as_mut(), query).await;

        // Rollback runs on success and failure alike; the sandbox never
        // observes the script or the query.
        self.rollback(session.as_mut()).await;

        match outcome {
            Ok(set) => QueryResult::from_result_set(set, elapsed_ms, self.max_rows),
            Err(err) => QueryResult::from_error(err, elapsed_ms),
        }
    }
}

/// Split an init script into executable statements: `;`-separated, trimmed,
/// empties skipped.
fn split_statements(script: &str) -> impl Iterator<Item = &str> {
    script.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Classify a driver failure during the user query. Parse failures surface
/// as `Syntax`, everything else as `Runtime`.
fn classify_query_error(err: &anyhow::Error) -> EngineError {
    let message = format!("{:#}", err);
    let lower = message.to_lowercase();
    if lower.contains("syntax") || lower.contains("parse error") {
        EngineError::new(ErrorKind::Syntax, message)
    } else {
        EngineError::runtime(message)
    }
}
