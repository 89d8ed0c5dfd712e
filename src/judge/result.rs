use serde::{Deserialize, Serialize};

/// A single cell of a result row. NULL is carried as the empty string;
/// comparison and storage never distinguish the two.
pub type Cell = String;

/// One result row.
pub type Row = Vec<Cell>;

/// Raw materialized output of a query, before the row cap is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    None,
    Validation,
    Connection,
    Setup,
    Timeout,
    Syntax,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::None => "none",
            ErrorKind::Validation => "validation",
            ErrorKind::Connection => "connection",
            ErrorKind::Setup => "setup",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Syntax => "syntax",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl Default for ErrorKind {
    fn default() -> Self {
        ErrorKind::None
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An engine failure carrying its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Setup, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

/// The canonical outcome of one query execution.
///
/// Invariants: `row_count == rows.len()` after the row cap; `error` is
/// non-empty exactly when `error_kind` is not `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_ms: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub error_kind: ErrorKind,
}

impl Default for QueryResult {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            execution_ms: 0,
            error: String::new(),
            error_kind: ErrorKind::None,
        }
    }
}

impl QueryResult {
    /// Build a successful result from a materialized set, applying the row
    /// cap. Truncation is silent; `row_count` reflects the capped length.
    pub fn from_result_set(mut set: ResultSet, execution_ms: i64, max_rows: usize) -> Self {
        if set.rows.len() > max_rows {
            set.rows.truncate(max_rows);
        }
        let row_count = set.rows.len();
        Self {
            columns: set.columns,
            rows: set.rows,
            row_count,
            execution_ms,
            error: String::new(),
            error_kind: ErrorKind::None,
        }
    }

    /// Build a failed result carrying the error and its classification.
    pub fn from_error(err: EngineError, execution_ms: i64) -> Self {
        Self {
            execution_ms,
            error: err.message,
            error_kind: err.kind,
            ..Self::default()
        }
    }

    /// Whether the execution produced rows rather than an error.
    pub fn succeeded(&self) -> bool {
        self.error_kind == ErrorKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(n: usize) -> ResultSet {
        ResultSet {
            columns: vec!["x".to_string()],
            rows: (0..n).map(|i| vec![i.to_string()]).collect(),
        }
    }

    #[test]
    fn test_row_cap_applied_silently() {
        let result = QueryResult::from_result_set(set_of(1500), 12, 1000);
        assert_eq!(result.rows.len(), 1000);
        assert_eq!(result.row_count, 1000);
        assert!(result.succeeded());
        assert!(result.error.is_empty());
    }

    #[test]
    fn test_row_cap_not_applied_below_limit() {
        let result = QueryResult::from_result_set(set_of(3), 5, 1000);
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows.len(), 3);
    }

    #[test]
    fn test_row_cap_exact_limit() {
        let result = QueryResult::from_result_set(set_of(1000), 5, 1000);
        assert_eq!(result.row_count, 1000);
    }

    #[test]
    fn test_from_error_populates_kind() {
        let result = QueryResult::from_error(EngineError::timeout("query execution timeout"), 2001);
        assert_eq!(result.error_kind, ErrorKind::Timeout);
        assert_eq!(result.error, "query execution timeout");
        assert_eq!(result.execution_ms, 2001);
        assert!(!result.succeeded());
        assert!(result.rows.is_empty());
    }

    #[test]
    fn test_error_kind_wire_form() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::Validation).unwrap(),
            "\"validation\""
        );
        assert_eq!(serde_json::to_string(&ErrorKind::None).unwrap(), "\"none\"");
    }

    #[test]
    fn test_query_result_wire_form() {
        let result = QueryResult::from_result_set(set_of(1), 7, 10);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"rowCount\":1"));
        assert!(json.contains("\"executionMs\":7"));
        // Successful results omit the error field entirely.
        assert!(!json.contains("\"error\":"));
    }
}
