use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::db::dialect::Dialect;
use crate::judge::engine::QueryRunner;
use crate::judge::result::QueryResult;
use crate::judge::scoring::{check_attempt_limit, derive_status, score, SubmissionStatus};
use crate::store::{MetaStore, NewSubmission, ProblemRow, SubmissionRow};

/// Errors surfaced to the judge's callers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    ProblemNotFound,
    ExamNotFound,
    SubmissionNotFound,
    UnsupportedDatabase(String),
    MaxAttemptsReached { attempts: i64, max_attempts: i64 },
    /// The reference solution itself failed; nothing is persisted.
    SolutionFailed(String),
    Internal(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::ProblemNotFound => write!(f, "problem not found"),
            ServiceError::ExamNotFound => write!(f, "exam not found"),
            ServiceError::SubmissionNotFound => write!(f, "submission not found"),
            ServiceError::UnsupportedDatabase(tag) => {
                write!(f, "database type not supported for this problem: {}", tag)
            }
            ServiceError::MaxAttemptsReached {
                attempts,
                max_attempts,
            } => write!(
                f,
                "maximum attempts reached ({} of {})",
                attempts, max_attempts
            ),
            ServiceError::SolutionFailed(message) => {
                write!(f, "solution query failed: {}", message)
            }
            ServiceError::Internal(message) => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Internal(format!("{:#}", err))
    }
}

/// A query submitted against a problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub code: String,
    pub database_type: String,
}

/// Result of a persisted submission, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub submission_id: i64,
    pub is_correct: bool,
    pub status: SubmissionStatus,
    pub score: i64,
    pub execution_ms: i64,
    pub message: String,
    pub expected_rows: usize,
    pub actual_rows: usize,
    /// JSON arrays of arrays of string, as persisted.
    pub expected_output: String,
    pub actual_output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub attempt_number: i64,
}

/// Run and Submit operations over problems and exams. The only place where
/// the engine's pure verdict meets stored state; running the judge itself
/// never changes scoring state.
pub struct SubmissionService {
    store: Arc<MetaStore>,
    runner: Arc<dyn QueryRunner>,
}

impl SubmissionService {
    pub fn new(store: Arc<MetaStore>, runner: Arc<dyn QueryRunner>) -> Self {
        Self { store, runner }
    }

    /// Execute a query against a problem's sandbox state and return the
    /// result verbatim. No scoring, no persistence.
    pub async fn run(
        &self,
        problem_id: i64,
        request: &QueryRequest,
    ) -> Result<QueryResult, ServiceError> {
        let problem = self.load_problem(problem_id).await?;
        let dialect = resolve_dialect(&problem, &request.database_type)?;

        Ok(self
            .runner
            .execute_with_setup(dialect, &problem.init_script, &request.code)
            .await)
    }

    /// Judge a query against the problem's reference solution, persist the
    /// submission, and return the verdict.
    pub async fn submit(
        &self,
        user_id: i64,
        problem_id: i64,
        request: &QueryRequest,
    ) -> Result<SubmitOutcome, ServiceError> {
        let problem = self.load_problem(problem_id).await?;
        self.judge_and_persist(user_id, &problem, request, None, 1)
            .await
    }

    /// As `submit`, gated on the exam's attempt budget. The gate runs before
    /// any engine invocation; a rejected attempt never executes.
    pub async fn submit_exam(
        &self,
        user_id: i64,
        exam_id: i64,
        problem_id: i64,
        request: &QueryRequest,
    ) -> Result<SubmitOutcome, ServiceError> {
        let exam = self
            .store
            .get_exam(exam_id)
            .await?
            .ok_or(ServiceError::ExamNotFound)?;

        let attempts = self
            .store
            .count_exam_attempts(exam_id, problem_id, user_id)
            .await?;
        check_attempt_limit(attempts, exam.max_attempts).map_err(|err| {
            ServiceError::MaxAttemptsReached {
                attempts: err.attempts,
                max_attempts: err.max_attempts,
            }
        })?;

        let problem = self.load_problem(problem_id).await?;
        self.judge_and_persist(
            user_id,
            &problem,
            request,
            Some((exam_id, problem_id)),
            attempts + 1,
        )
        .await
    }

    pub async fn get_submission(&self, id: i64) -> Result<SubmissionRow, ServiceError> {
        self.store
            .get_submission(id)
            .await?
            .ok_or(ServiceError::SubmissionNotFound)
    }

    pub async fn list_submissions(
        &self,
        user_id: i64,
        page: i64,
        page_size: i64,
    ) -> Result<Vec<SubmissionRow>, ServiceError> {
        let offset = (page.max(1) - 1) * page_size;
        Ok(self
            .store
            .list_submissions_by_user(user_id, page_size, offset)
            .await?)
    }

    async fn judge_and_persist(
        &self,
        user_id: i64,
        problem: &ProblemRow,
        request: &QueryRequest,
        exam: Option<(i64, i64)>,
        attempt_number: i64,
    ) -> Result<SubmitOutcome, ServiceError> {
        let dialect = resolve_dialect(problem, &request.database_type)?;

        let expected = self
            .runner
            .execute_with_setup(dialect, &problem.init_script, &problem.solution_query)
            .await;
        if !expected.succeeded() {
            return Err(ServiceError::SolutionFailed(expected.error));
        }

        let actual = self
            .runner
            .execute_with_setup(dialect, &problem.init_script, &request.code)
            .await;

        let verdict = self.runner.compare(&expected, &actual, problem.order_matters);
        let status = derive_status(&verdict, actual.error_kind);
        let awarded = score(status, problem.points);

        let expected_output = rows_json(&expected);
        let actual_output = rows_json(&actual);
        let submitted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let submission_id = self
            .store
            .insert_submission(NewSubmission {
                user_id,
                problem_id: problem.id,
                exam_id: exam.map(|(e, _)| e),
                exam_problem_id: exam.map(|(_, p)| p),
                code: request.code.clone(),
                database_type: request.database_type.clone(),
                status: status.as_str().to_string(),
                execution_ms: actual.execution_ms,
                expected_output: expected_output.clone(),
                actual_output: actual_output.clone(),
                error_message: if actual.error.is_empty() {
                    None
                } else {
                    Some(actual.error.clone())
                },
                is_correct: verdict.is_correct,
                attempt_number,
                submitted_at,
            })
            .await?;

        Ok(SubmitOutcome {
            submission_id,
            is_correct: verdict.is_correct,
            status,
            score: awarded,
            execution_ms: actual.execution_ms,
            message: verdict.message,
            expected_rows: verdict.expected_rows,
            actual_rows: verdict.actual_rows,
            expected_output,
            actual_output,
            error: actual.error,
            attempt_number,
        })
    }

    async fn load_problem(&self, problem_id: i64) -> Result<ProblemRow, ServiceError> {
        self.store
            .get_problem(problem_id)
            .await?
            .ok_or(ServiceError::ProblemNotFound)
    }
}

fn resolve_dialect(problem: &ProblemRow, database_type: &str) -> Result<Dialect, ServiceError> {
    let dialect: Dialect = database_type
        .parse()
        .map_err(|_| ServiceError::UnsupportedDatabase(database_type.to_string()))?;

    if !problem
        .supported_databases
        .iter()
        .any(|tag| tag == database_type)
    {
        return Err(ServiceError::UnsupportedDatabase(database_type.to_string()));
    }
    Ok(dialect)
}

fn rows_json(result: &QueryResult) -> String {
    serde_json::to_string(&result.rows).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::compare::compare;
    use crate::judge::result::{EngineError, ErrorKind, ResultSet};
    use crate::store::{NewExam, NewProblem};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays canned results in order; counts engine invocations.
    struct StubRunner {
        results: Mutex<VecDeque<QueryResult>>,
        calls: AtomicUsize,
    }

    impl StubRunner {
        fn new(results: Vec<QueryResult>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn next(&self) -> QueryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .expect("stub runner exhausted")
        }
    }

    #[async_trait]
    impl QueryRunner for StubRunner {
        async fn execute(&self, _dialect: Dialect, _query: &str) -> QueryResult {
            self.next()
        }

        async fn execute_with_setup(
            &self,
            _dialect: Dialect,
            _init_script: &str,
            _query: &str,
        ) -> QueryResult {
            self.next()
        }
    }

    fn rows_result(rows: &[&[&str]]) -> QueryResult {
        let set = ResultSet {
            columns: vec!["x".to_string()],
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        };
        QueryResult::from_result_set(set, 5, 1000)
    }

    async fn seed_problem(store: &MetaStore) -> i64 {
        store
            .create_problem(NewProblem {
                title: "All rows".to_string(),
                init_script: "CREATE TABLE t(x INT); INSERT INTO t VALUES (1),(2),(3);"
                    .to_string(),
                solution_query: "SELECT x FROM t ORDER BY x".to_string(),
                order_matters: false,
                points: 100,
                supported_databases: vec!["postgresql".to_string()],
            })
            .await
            .unwrap()
    }

    fn request(code: &str) -> QueryRequest {
        QueryRequest {
            code: code.to_string(),
            database_type: "postgresql".to_string(),
        }
    }

    #[tokio::test]
    async fn test_run_returns_result_verbatim() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let runner = StubRunner::new(vec![rows_result(&[&["1"], &["2"], &["3"]])]);
        let service = SubmissionService::new(store, runner.clone());

        let result = service
            .run(problem_id, &request("SELECT x FROM t"))
            .await
            .unwrap();
        assert_eq!(result.row_count, 3);
        assert!(result.succeeded());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_unknown_problem() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let runner = StubRunner::new(vec![]);
        let service = SubmissionService::new(store, runner);

        let err = service.run(42, &request("SELECT 1")).await.unwrap_err();
        assert_eq!(err, ServiceError::ProblemNotFound);
    }

    #[tokio::test]
    async fn test_run_unsupported_database() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let runner = StubRunner::new(vec![]);
        let service = SubmissionService::new(store, runner.clone());

        let mut req = request("SELECT 1");
        req.database_type = "mysql".to_string();
        let err = service.run(problem_id, &req).await.unwrap_err();
        assert_eq!(err, ServiceError::UnsupportedDatabase("mysql".to_string()));

        req.database_type = "oracle".to_string();
        let err = service.run(problem_id, &req).await.unwrap_err();
        assert_eq!(err, ServiceError::UnsupportedDatabase("oracle".to_string()));

        // The engine is never reached on either rejection.
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_accepted() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        // Reference, then user: same multiset in a different order.
        let runner = StubRunner::new(vec![
            rows_result(&[&["1"], &["2"], &["3"]]),
            rows_result(&[&["3"], &["2"], &["1"]]),
        ]);
        let service = SubmissionService::new(store.clone(), runner);

        let outcome = service
            .submit(7, problem_id, &request("SELECT x FROM t ORDER BY x DESC"))
            .await
            .unwrap();

        assert!(outcome.is_correct);
        assert_eq!(outcome.status, SubmissionStatus::Accepted);
        assert_eq!(outcome.score, 100);
        assert_eq!(outcome.message, "Correct!");

        let saved = store
            .get_submission(outcome.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, "accepted");
        assert!(saved.is_correct);
        assert_eq!(saved.user_id, 7);
        assert!(saved.error_message.is_none());
        assert_eq!(saved.actual_output, "[[\"3\"],[\"2\"],[\"1\"]]");
    }

    #[tokio::test]
    async fn test_submit_wrong_answer() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let runner = StubRunner::new(vec![
            rows_result(&[&["2"], &["3"]]),
            rows_result(&[&["1"], &["2"], &["3"]]),
        ]);
        let service = SubmissionService::new(store.clone(), runner);

        let outcome = service
            .submit(7, problem_id, &request("SELECT x FROM t"))
            .await
            .unwrap();

        assert!(!outcome.is_correct);
        assert_eq!(outcome.status, SubmissionStatus::WrongAnswer);
        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.expected_rows, 2);
        assert_eq!(outcome.actual_rows, 3);
        assert!(outcome.message.starts_with("Row count mismatch"));
    }

    #[tokio::test]
    async fn test_submit_user_error_is_persisted() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let runner = StubRunner::new(vec![
            rows_result(&[&["1"]]),
            QueryResult::from_error(EngineError::runtime("column \"y\" does not exist"), 4),
        ]);
        let service = SubmissionService::new(store.clone(), runner);

        let outcome = service
            .submit(7, problem_id, &request("SELECT y FROM t"))
            .await
            .unwrap();

        assert_eq!(outcome.status, SubmissionStatus::Error);
        assert!(!outcome.is_correct);
        assert!(outcome.error.contains("does not exist"));

        let saved = store
            .get_submission(outcome.submission_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.status, "error");
        assert_eq!(
            saved.error_message.as_deref(),
            Some("column \"y\" does not exist")
        );
    }

    #[tokio::test]
    async fn test_submit_timeout_status() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let runner = StubRunner::new(vec![
            rows_result(&[&["1"]]),
            QueryResult::from_error(EngineError::timeout("query execution timeout"), 2001),
        ]);
        let service = SubmissionService::new(store, runner);

        let outcome = service
            .submit(7, problem_id, &request("SELECT pg_sleep(10)"))
            .await
            .unwrap();
        assert_eq!(outcome.status, SubmissionStatus::Timeout);
        assert_eq!(outcome.execution_ms, 2001);
    }

    #[tokio::test]
    async fn test_submit_solution_failure_not_persisted() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let runner = StubRunner::new(vec![QueryResult::from_error(
            EngineError::setup("setup error: BOGUS (stmt: BOGUS)"),
            0,
        )]);
        let service = SubmissionService::new(store.clone(), runner);

        let err = service
            .submit(7, problem_id, &request("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::SolutionFailed(_)));
        assert!(store
            .list_submissions_by_user(7, 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_exam_attempt_gate() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let exam_id = store
            .create_exam(NewExam {
                title: "Final".to_string(),
                max_attempts: 1,
            })
            .await
            .unwrap();

        let runner = StubRunner::new(vec![
            rows_result(&[&["1"]]),
            rows_result(&[&["1"]]),
        ]);
        let service = SubmissionService::new(store.clone(), runner.clone());

        let outcome = service
            .submit_exam(7, exam_id, problem_id, &request("SELECT x FROM t"))
            .await
            .unwrap();
        assert_eq!(outcome.attempt_number, 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);

        // Budget spent: the gate fires before the engine runs again.
        let err = service
            .submit_exam(7, exam_id, problem_id, &request("SELECT x FROM t"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::MaxAttemptsReached {
                attempts: 1,
                max_attempts: 1
            }
        );
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);

        // Another user still has a budget.
        let saved = store.count_exam_attempts(exam_id, problem_id, 9).await.unwrap();
        assert_eq!(saved, 0);
    }

    #[tokio::test]
    async fn test_exam_not_found() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let service = SubmissionService::new(store, StubRunner::new(vec![]));

        let err = service
            .submit_exam(7, 99, problem_id, &request("SELECT 1"))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::ExamNotFound);
    }

    #[tokio::test]
    async fn test_get_and_list_submissions() {
        let store = Arc::new(MetaStore::open_in_memory().unwrap());
        let problem_id = seed_problem(&store).await;
        let runner = StubRunner::new(vec![
            rows_result(&[&["1"]]),
            rows_result(&[&["1"]]),
        ]);
        let service = SubmissionService::new(store, runner);

        let outcome = service
            .submit(7, problem_id, &request("SELECT x FROM t"))
            .await
            .unwrap();

        let loaded = service.get_submission(outcome.submission_id).await.unwrap();
        assert_eq!(loaded.problem_id, problem_id);

        let listed = service.list_submissions(7, 1, 10).await.unwrap();
        assert_eq!(listed.len(), 1);

        let err = service.get_submission(9999).await.unwrap_err();
        assert_eq!(err, ServiceError::SubmissionNotFound);
    }

    #[test]
    fn test_compare_is_wired_through_runner_default() {
        // The trait's default compare is the pure comparator.
        let expected = rows_result(&[&["1"], &["2"]]);
        let actual = rows_result(&[&["2"], &["1"]]);
        let direct = compare(&expected, &actual, false);
        assert!(direct.is_correct);
    }
}
