use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const SCHEMA_SQL: &str = include_str!("../store/schema.sql");

/// Embedded metadata store for problems, exams, and submissions.
pub struct MetaStore {
    conn: Arc<Mutex<Connection>>,
}

// ── Records ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemRow {
    pub id: i64,
    pub title: String,
    pub init_script: String,
    pub solution_query: String,
    pub order_matters: bool,
    pub points: i64,
    /// Dialect tags the problem supports, e.g. `["postgresql", "mysql"]`.
    pub supported_databases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewProblem {
    pub title: String,
    pub init_script: String,
    pub solution_query: String,
    pub order_matters: bool,
    pub points: i64,
    pub supported_databases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRow {
    pub id: i64,
    pub title: String,
    pub max_attempts: i64,
}

#[derive(Debug, Clone)]
pub struct NewExam {
    pub title: String,
    pub max_attempts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRow {
    pub id: i64,
    pub user_id: i64,
    pub problem_id: i64,
    pub exam_id: Option<i64>,
    pub exam_problem_id: Option<i64>,
    pub code: String,
    pub database_type: String,
    pub status: String,
    pub execution_ms: i64,
    /// JSON array of arrays of string.
    pub expected_output: String,
    pub actual_output: String,
    pub error_message: Option<String>,
    pub is_correct: bool,
    pub attempt_number: i64,
    pub submitted_at: String,
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub user_id: i64,
    pub problem_id: i64,
    pub exam_id: Option<i64>,
    pub exam_problem_id: Option<i64>,
    pub code: String,
    pub database_type: String,
    pub status: String,
    pub execution_ms: i64,
    pub expected_output: String,
    pub actual_output: String,
    pub error_message: Option<String>,
    pub is_correct: bool,
    pub attempt_number: i64,
    pub submitted_at: String,
}

// ── Implementation ──────────────────────────────────────────────────────

impl MetaStore {
    /// Open (or create) the store at the given data directory and apply the
    /// schema DDL.
    pub fn open(data_dir: PathBuf) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        let db_path = data_dir.join("sqljudge.db");
        let conn = Connection::open(&db_path).context("Failed to open metadata store")?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to set WAL mode")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply schema")?;

        log::info!("Metadata store initialized at {:?}", db_path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ── Problems ────────────────────────────────────────────────────────

    pub async fn create_problem(&self, problem: NewProblem) -> anyhow::Result<i64> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let supported = serde_json::to_string(&problem.supported_databases)?;
            c.execute(
                "INSERT INTO problems \
                 (title, init_script, solution_query, order_matters, points, supported_databases) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    problem.title,
                    problem.init_script,
                    problem.solution_query,
                    problem.order_matters as i32,
                    problem.points,
                    supported,
                ],
            )
            .context("Failed to insert problem")?;
            Ok(c.last_insert_rowid())
        })
        .await
        .context("spawn_blocking join error")?
    }

    pub async fn get_problem(&self, id: i64) -> anyhow::Result<Option<ProblemRow>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let result = c.query_row(
                "SELECT id, title, init_script, solution_query, order_matters, points, \
                 supported_databases FROM problems WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    let order_matters: i32 = row.get(4)?;
                    let supported_json: String = row.get(6)?;
                    Ok((
                        ProblemRow {
                            id: row.get(0)?,
                            title: row.get(1)?,
                            init_script: row.get(2)?,
                            solution_query: row.get(3)?,
                            order_matters: order_matters != 0,
                            points: row.get(5)?,
                            supported_databases: Vec::new(),
                        },
                        supported_json,
                    ))
                },
            );
            match result {
                Ok((mut problem, supported_json)) => {
                    problem.supported_databases = serde_json::from_str(&supported_json)
                        .context("Malformed supported_databases JSON")?;
                    Ok(Some(problem))
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(anyhow!("Failed to get problem: {}", e)),
            }
        })
        .await
        .context("spawn_blocking join error")?
    }

    // ── Exams ───────────────────────────────────────────────────────────

    pub async fn create_exam(&self, exam: NewExam) -> anyhow::Result<i64> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            c.execute(
                "INSERT INTO exams (title, max_attempts) VALUES (?1, ?2)",
                rusqlite::params![exam.title, exam.max_attempts],
            )
            .context("Failed to insert exam")?;
            Ok(c.last_insert_rowid())
        })
        .await
        .context("spawn_blocking join error")?
    }

    pub async fn get_exam(&self, id: i64) -> anyhow::Result<Option<ExamRow>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let result = c.query_row(
                "SELECT id, title, max_attempts FROM exams WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(ExamRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        max_attempts: row.get(2)?,
                    })
                },
            );
            match result {
                Ok(exam) => Ok(Some(exam)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(anyhow!("Failed to get exam: {}", e)),
            }
        })
        .await
        .context("spawn_blocking join error")?
    }

    // ── Submissions ─────────────────────────────────────────────────────

    pub async fn insert_submission(&self, submission: NewSubmission) -> anyhow::Result<i64> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            c.execute(
                "INSERT INTO submissions \
                 (user_id, problem_id, exam_id, exam_problem_id, code, database_type, status, \
                  execution_ms, expected_output, actual_output, error_message, is_correct, \
                  attempt_number, submitted_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                rusqlite::params![
                    submission.user_id,
                    submission.problem_id,
                    submission.exam_id,
                    submission.exam_problem_id,
                    submission.code,
                    submission.database_type,
                    submission.status,
                    submission.execution_ms,
                    submission.expected_output,
                    submission.actual_output,
                    submission.error_message,
                    submission.is_correct as i32,
                    submission.attempt_number,
                    submission.submitted_at,
                ],
            )
            .context("Failed to insert submission")?;
            Ok(c.last_insert_rowid())
        })
        .await
        .context("spawn_blocking join error")?
    }

    pub async fn get_submission(&self, id: i64) -> anyhow::Result<Option<SubmissionRow>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let result = c.query_row(
                &format!("{} WHERE id = ?1", SELECT_SUBMISSION),
                rusqlite::params![id],
                map_submission_row,
            );
            match result {
                Ok(submission) => Ok(Some(submission)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(anyhow!("Failed to get submission: {}", e)),
            }
        })
        .await
        .context("spawn_blocking join error")?
    }

    pub async fn list_submissions_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<SubmissionRow>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let mut stmt = c
                .prepare(&format!(
                    "{} WHERE user_id = ?1 ORDER BY submitted_at DESC, id DESC \
                     LIMIT ?2 OFFSET ?3",
                    SELECT_SUBMISSION
                ))
                .context("Failed to prepare submissions query")?;

            let rows = stmt
                .query_map(rusqlite::params![user_id, limit, offset], map_submission_row)
                .context("Failed to query submissions")?
                .filter_map(|r| r.ok())
                .collect();

            Ok(rows)
        })
        .await
        .context("spawn_blocking join error")?
    }

    /// Stored attempt count for one `(exam, exam_problem, user)` tuple.
    pub async fn count_exam_attempts(
        &self,
        exam_id: i64,
        exam_problem_id: i64,
        user_id: i64,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let c = conn.lock().map_err(|e| anyhow!("Lock error: {}", e))?;
            let count = c
                .query_row(
                    "SELECT COUNT(*) FROM submissions \
                     WHERE exam_id = ?1 AND exam_problem_id = ?2 AND user_id = ?3",
                    rusqlite::params![exam_id, exam_problem_id, user_id],
                    |row| row.get(0),
                )
                .context("Failed to count attempts")?;
            Ok(count)
        })
        .await
        .context("spawn_blocking join error")?
    }
}

const SELECT_SUBMISSION: &str = "SELECT id, user_id, problem_id, exam_id, exam_problem_id, \
    code, database_type, status, execution_ms, expected_output, actual_output, error_message, \
    is_correct, attempt_number, submitted_at FROM submissions";

fn map_submission_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SubmissionRow> {
    let is_correct: i32 = row.get(12)?;
    Ok(SubmissionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        problem_id: row.get(2)?,
        exam_id: row.get(3)?,
        exam_problem_id: row.get(4)?,
        code: row.get(5)?,
        database_type: row.get(6)?,
        status: row.get(7)?,
        execution_ms: row.get(8)?,
        expected_output: row.get(9)?,
        actual_output: row.get(10)?,
        error_message: row.get(11)?,
        is_correct: is_correct != 0,
        attempt_number: row.get(13)?,
        submitted_at: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem() -> NewProblem {
        NewProblem {
            title: "Select everything".to_string(),
            init_script: "CREATE TABLE t(x INT); INSERT INTO t VALUES (1),(2),(3);".to_string(),
            solution_query: "SELECT x FROM t ORDER BY x".to_string(),
            order_matters: false,
            points: 100,
            supported_databases: vec!["postgresql".to_string(), "mysql".to_string()],
        }
    }

    fn submission(user_id: i64, exam: Option<(i64, i64)>, attempt_number: i64) -> NewSubmission {
        NewSubmission {
            user_id,
            problem_id: 1,
            exam_id: exam.map(|(e, _)| e),
            exam_problem_id: exam.map(|(_, p)| p),
            code: "SELECT x FROM t".to_string(),
            database_type: "postgresql".to_string(),
            status: "accepted".to_string(),
            execution_ms: 12,
            expected_output: "[[\"1\"],[\"2\"],[\"3\"]]".to_string(),
            actual_output: "[[\"1\"],[\"2\"],[\"3\"]]".to_string(),
            error_message: None,
            is_correct: true,
            attempt_number,
            submitted_at: "2024-06-01T10:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_problem_round_trip() {
        let store = MetaStore::open_in_memory().unwrap();
        let id = store.create_problem(problem()).await.unwrap();

        let loaded = store.get_problem(id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Select everything");
        assert_eq!(loaded.points, 100);
        assert!(!loaded.order_matters);
        assert_eq!(loaded.supported_databases, vec!["postgresql", "mysql"]);
    }

    #[tokio::test]
    async fn test_missing_problem_is_none() {
        let store = MetaStore::open_in_memory().unwrap();
        assert!(store.get_problem(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exam_round_trip() {
        let store = MetaStore::open_in_memory().unwrap();
        let id = store
            .create_exam(NewExam {
                title: "Midterm".to_string(),
                max_attempts: 3,
            })
            .await
            .unwrap();

        let loaded = store.get_exam(id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Midterm");
        assert_eq!(loaded.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_submission_round_trip() {
        let store = MetaStore::open_in_memory().unwrap();
        let id = store
            .insert_submission(submission(7, None, 1))
            .await
            .unwrap();

        let loaded = store.get_submission(id).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, 7);
        assert_eq!(loaded.status, "accepted");
        assert!(loaded.is_correct);
        assert!(loaded.exam_id.is_none());
        assert_eq!(loaded.expected_output, "[[\"1\"],[\"2\"],[\"3\"]]");
    }

    #[tokio::test]
    async fn test_list_submissions_by_user() {
        let store = MetaStore::open_in_memory().unwrap();
        for _ in 0..3 {
            store
                .insert_submission(submission(7, None, 1))
                .await
                .unwrap();
        }
        store
            .insert_submission(submission(8, None, 1))
            .await
            .unwrap();

        let mine = store.list_submissions_by_user(7, 10, 0).await.unwrap();
        assert_eq!(mine.len(), 3);
        assert!(mine.iter().all(|s| s.user_id == 7));

        let paged = store.list_submissions_by_user(7, 2, 2).await.unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[tokio::test]
    async fn test_count_exam_attempts_scoped_to_tuple() {
        let store = MetaStore::open_in_memory().unwrap();
        store
            .insert_submission(submission(7, Some((1, 10)), 1))
            .await
            .unwrap();
        store
            .insert_submission(submission(7, Some((1, 10)), 2))
            .await
            .unwrap();
        store
            .insert_submission(submission(7, Some((1, 11)), 1))
            .await
            .unwrap();
        store
            .insert_submission(submission(9, Some((1, 10)), 1))
            .await
            .unwrap();

        assert_eq!(store.count_exam_attempts(1, 10, 7).await.unwrap(), 2);
        assert_eq!(store.count_exam_attempts(1, 11, 7).await.unwrap(), 1);
        assert_eq!(store.count_exam_attempts(2, 10, 7).await.unwrap(), 0);
    }
}
