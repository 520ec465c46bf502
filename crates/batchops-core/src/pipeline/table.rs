//! Normalised tabular form
//!
//! Every input format standardizes into the same shape: ordered column
//! names plus rows of string cells. Numeric interpretation happens on
//! demand; cells keep their textual form until a stage coerces them.

use serde::{Deserialize, Serialize};

/// Ordered columns and string rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl DataTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by exact name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Push a row, padding or truncating to the column count
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    /// Add a column with empty cells for existing rows
    pub fn add_column(&mut self, name: impl Into<String>) {
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(String::new());
        }
    }

    /// Trim every cell in place
    pub fn trim_cells(&mut self) {
        for row in &mut self.rows {
            for cell in row {
                let trimmed = cell.trim();
                if trimmed.len() != cell.len() {
                    *cell = trimmed.to_string();
                }
            }
        }
    }
}

/// Lower-snake normalisation for column names: trim, lowercase, collapse
/// non-alphanumeric runs into single underscores
pub fn normalize_column_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = true;

    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }

    while out.ends_with('_') {
        out.pop();
    }

    out
}

/// Parse a cell as a number when it looks like one
pub fn parse_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Canonical textual form for a numeric cell: integers lose the fraction,
/// everything else keeps its shortest round-trip form
pub fn format_numeric(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_column_name() {
        assert_eq!(normalize_column_name("Student ID "), "student_id");
        assert_eq!(normalize_column_name("  Score (%)"), "score");
        assert_eq!(normalize_column_name("Total--Points"), "total_points");
        assert_eq!(normalize_column_name("already_snake"), "already_snake");
        assert_eq!(normalize_column_name("CamelCase"), "camelcase");
    }

    #[test]
    fn test_push_row_pads_and_truncates() {
        let mut table = DataTable::new(vec!["a".into(), "b".into()]);
        table.push_row(vec!["1".into()]);
        table.push_row(vec!["1".into(), "2".into(), "3".into()]);

        assert_eq!(table.rows[0], vec!["1", ""]);
        assert_eq!(table.rows[1], vec!["1", "2"]);
    }

    #[test]
    fn test_add_column_backfills() {
        let mut table = DataTable::new(vec!["a".into()]);
        table.push_row(vec!["1".into()]);
        table.add_column("b");

        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows[0], vec!["1", ""]);
    }

    #[test]
    fn test_parse_numeric() {
        assert_eq!(parse_numeric(" 42 "), Some(42.0));
        assert_eq!(parse_numeric("3.5"), Some(3.5));
        assert_eq!(parse_numeric("-0.5"), Some(-0.5));
        assert_eq!(parse_numeric("S1"), None);
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("NaN"), None);
    }

    #[test]
    fn test_format_numeric() {
        assert_eq!(format_numeric(42.0), "42");
        assert_eq!(format_numeric(3.5), "3.5");
        assert_eq!(format_numeric(-7.0), "-7");
    }
}
