//! Summarize stage
//!
//! Computes row and column counts plus per-column numeric statistics over
//! the transformed table. Failures here are rare and treated as fatal.

use serde::{Deserialize, Serialize};

use super::table::{parse_numeric, DataTable};
use super::{StageError, StageResult};

/// Summary metadata for a processed table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub row_count: usize,
    pub column_count: usize,
    pub columns: Vec<ColumnStats>,
}

/// Per-column statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    pub non_empty: usize,
    pub numeric: Option<NumericStats>,
}

/// Statistics over the numeric cells of a column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Summarize the transformed table
pub fn run(table: &DataTable) -> StageResult<TableSummary> {
    if table.column_count() == 0 {
        return Err(StageError::Internal("summarize on empty table".to_string()));
    }

    let mut columns = Vec::with_capacity(table.column_count());

    for (index, name) in table.columns.iter().enumerate() {
        let mut non_empty = 0;
        let mut values = Vec::new();

        for row in &table.rows {
            let cell = row[index].trim();
            if !cell.is_empty() {
                non_empty += 1;
                if let Some(value) = parse_numeric(cell) {
                    values.push(value);
                }
            }
        }

        // A column is numeric when every non-empty cell parses
        let numeric = if !values.is_empty() && values.len() == non_empty {
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            Some(NumericStats {
                count: values.len(),
                min,
                max,
                mean,
            })
        } else {
            None
        };

        columns.push(ColumnStats {
            name: name.clone(),
            non_empty,
            numeric,
        });
    }

    Ok(TableSummary {
        row_count: table.row_count(),
        column_count: table.column_count(),
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grades() -> DataTable {
        let mut table = DataTable::new(vec!["student_id".into(), "score".into()]);
        table.push_row(vec!["S1".into(), "90".into()]);
        table.push_row(vec!["S2".into(), "85".into()]);
        table.push_row(vec!["S3".into(), "70".into()]);
        table
    }

    #[test]
    fn test_counts() {
        let summary = run(&grades()).unwrap();
        assert_eq!(summary.row_count, 3);
        assert_eq!(summary.column_count, 2);
    }

    #[test]
    fn test_numeric_stats_for_numeric_column() {
        let summary = run(&grades()).unwrap();

        let score = &summary.columns[1];
        assert_eq!(score.name, "score");
        let stats = score.numeric.as_ref().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 70.0);
        assert_eq!(stats.max, 90.0);
        assert!((stats.mean - 81.666).abs() < 0.01);
    }

    #[test]
    fn test_text_column_has_no_numeric_stats() {
        let summary = run(&grades()).unwrap();
        assert!(summary.columns[0].numeric.is_none());
    }

    #[test]
    fn test_mixed_column_not_numeric() {
        let mut table = grades();
        table.rows[1][1] = "absent".into();

        let summary = run(&table).unwrap();
        assert!(summary.columns[1].numeric.is_none());
        assert_eq!(summary.columns[1].non_empty, 3);
    }

    #[test]
    fn test_empty_cells_ignored_in_stats() {
        let mut table = grades();
        table.rows[1][1] = "".into();

        let summary = run(&table).unwrap();
        let stats = summary.columns[1].numeric.as_ref().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(summary.columns[1].non_empty, 2);
    }
}
