use serde::{Deserialize, Serialize};

use super::result::{QueryResult, Row};

/// Verdict of comparing an actual result set against the expected one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompareResult {
    pub is_correct: bool,
    pub message: String,
    pub expected_rows: usize,
    pub actual_rows: usize,
    /// Index of the first differing row in the sorted sequences, -1 if none.
    pub mismatch_index: i64,
}

/// Decide whether two materialized result sets are equivalent.
///
/// The comparison is pure: inputs are never mutated. Rows are compared as
/// multisets — both sides are cloned and sorted by their printed tuple form
/// before the structural walk. The `order_matters` flag is accepted for
/// contract compatibility but not honored; callers get order-insensitive
/// semantics either way.
pub fn compare(
    expected: &QueryResult,
    actual: &QueryResult,
    _order_matters: bool,
) -> CompareResult {
    let mut result = CompareResult {
        is_correct: false,
        message: String::new(),
        expected_rows: expected.row_count,
        actual_rows: actual.row_count,
        mismatch_index: -1,
    };

    if !actual.error.is_empty() {
        result.message = format!("Query error: {}", actual.error);
        return result;
    }

    if expected.row_count != actual.row_count {
        result.message = format!(
            "Row count mismatch: expected {}, got {}",
            expected.row_count, actual.row_count
        );
        return result;
    }

    let mut expected_rows = expected.rows.clone();
    let mut actual_rows = actual.rows.clone();
    sort_rows(&mut expected_rows);
    sort_rows(&mut actual_rows);

    if expected_rows != actual_rows {
        result.message = "Result mismatch (values do not match)".to_string();
        for (i, expected_row) in expected_rows.iter().enumerate() {
            if actual_rows.get(i) != Some(expected_row) {
                result.mismatch_index = i as i64;
                break;
            }
        }
        return result;
    }

    result.is_correct = true;
    result.message = "Correct!".to_string();
    result
}

/// Sort rows by the lexicographic order of their printed tuple form.
fn sort_rows(rows: &mut [Row]) {
    rows.sort_by(|a, b| print_row(a).cmp(&print_row(b)));
}

fn print_row(row: &Row) -> String {
    format!("{:?}", row)
}
