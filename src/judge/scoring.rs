use serde::{Deserialize, Serialize};

use super::compare::CompareResult;
use super::result::ErrorKind;

/// Terminal status of a persisted submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Accepted,
    WrongAnswer,
    Error,
    Timeout,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::WrongAnswer => "wrong_answer",
            SubmissionStatus::Error => "error",
            SubmissionStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the submission status from the judge verdict and the user
/// execution's error classification.
pub fn derive_status(verdict: &CompareResult, error_kind: ErrorKind) -> SubmissionStatus {
    match error_kind {
        ErrorKind::Timeout => SubmissionStatus::Timeout,
        ErrorKind::Validation
        | ErrorKind::Connection
        | ErrorKind::Setup
        | ErrorKind::Syntax
        | ErrorKind::Runtime => SubmissionStatus::Error,
        ErrorKind::None => {
            if verdict.is_correct {
                SubmissionStatus::Accepted
            } else {
                SubmissionStatus::WrongAnswer
            }
        }
    }
}

/// Points awarded for a submission: the problem's full points on accept,
/// zero otherwise.
pub fn score(status: SubmissionStatus, points: i64) -> i64 {
    match status {
        SubmissionStatus::Accepted => points,
        _ => 0,
    }
}

/// Error raised when an exam's attempt budget is already spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxAttemptsReached {
    pub attempts: i64,
    pub max_attempts: i64,
}

impl std::fmt::Display for MaxAttemptsReached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "maximum attempts reached ({} of {})",
            self.attempts, self.max_attempts
        )
    }
}

impl std::error::Error for MaxAttemptsReached {}

/// Gate an exam submission on its stored attempt count. Must be checked
/// before the engine runs so a rejected attempt never executes.
pub fn check_attempt_limit(attempts: i64, max_attempts: i64) -> Result<(), MaxAttemptsReached> {
    if attempts >= max_attempts {
        return Err(MaxAttemptsReached {
            attempts,
            max_attempts,
        });
    }
    Ok(())
}
