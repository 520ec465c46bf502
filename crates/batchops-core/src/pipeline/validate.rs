//! Validate stage
//!
//! Structural checks on the standardized table plus the configurable
//! contract from process_config: `required_columns` must exist and
//! `critical_fields` must be non-empty in every row.

use std::collections::HashSet;

use super::table::DataTable;
use super::{StageError, StageResult};

/// Validate the standardized table against its configured contract
pub fn run(table: &DataTable, config: &serde_json::Value) -> StageResult<()> {
    if table.column_count() == 0 {
        return Err(StageError::SchemaMismatch("table has no columns".to_string()));
    }
    if table.is_empty() {
        return Err(StageError::SchemaMismatch("table has no rows".to_string()));
    }

    let mut seen = HashSet::new();
    for column in &table.columns {
        if column.is_empty() {
            return Err(StageError::SchemaMismatch(
                "column name normalises to nothing".to_string(),
            ));
        }
        if !seen.insert(column.as_str()) {
            return Err(StageError::SchemaMismatch(format!(
                "duplicate column '{}'",
                column
            )));
        }
    }

    for row in &table.rows {
        if row.len() != table.column_count() {
            return Err(StageError::SchemaMismatch(format!(
                "row has {} cells, expected {}",
                row.len(),
                table.column_count()
            )));
        }
    }

    for required in string_list(config, "required_columns") {
        if table.column_index(&required).is_none() {
            return Err(StageError::MissingColumn(required));
        }
    }

    for field in string_list(config, "critical_fields") {
        let index = table
            .column_index(&field)
            .ok_or_else(|| StageError::MissingColumn(field.clone()))?;

        for (row_number, row) in table.rows.iter().enumerate() {
            if row[index].trim().is_empty() {
                return Err(StageError::EmptyCriticalField {
                    field,
                    // 1-indexed, matching how operators read the file
                    row: row_number + 1,
                });
            }
        }
    }

    Ok(())
}

fn string_list(config: &serde_json::Value, key: &str) -> Vec<String> {
    config
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grades() -> DataTable {
        let mut table = DataTable::new(vec!["student_id".into(), "score".into()]);
        table.push_row(vec!["S1".into(), "90".into()]);
        table.push_row(vec!["S2".into(), "85".into()]);
        table
    }

    #[test]
    fn test_valid_table_passes() {
        assert!(run(&grades(), &json!({})).is_ok());
    }

    #[test]
    fn test_empty_table_rejected() {
        let table = DataTable::new(vec!["a".into()]);
        assert!(matches!(
            run(&table, &json!({})),
            Err(StageError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let mut table = DataTable::new(vec!["score".into(), "score".into()]);
        table.push_row(vec!["1".into(), "2".into()]);
        assert!(matches!(
            run(&table, &json!({})),
            Err(StageError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_required_column_missing() {
        let config = json!({ "required_columns": ["student_id", "grade"] });
        assert!(matches!(
            run(&grades(), &config),
            Err(StageError::MissingColumn(c)) if c == "grade"
        ));
    }

    #[test]
    fn test_empty_critical_field() {
        let mut table = grades();
        table.rows[1][1] = "  ".into();
        let config = json!({ "critical_fields": ["score"] });

        match run(&table, &config) {
            Err(StageError::EmptyCriticalField { field, row }) => {
                assert_eq!(field, "score");
                assert_eq!(row, 2);
            }
            other => panic!("expected EmptyCriticalField, got {:?}", other),
        }
    }

    #[test]
    fn test_null_config_is_fine() {
        assert!(run(&grades(), &serde_json::Value::Null).is_ok());
    }
}
