//! Transform stage
//!
//! Applies the upload's process mode to the validated table. Returns an
//! optional note for the step log (custom mode records operator notes).

use serde_json::Value;

use super::table::{format_numeric, parse_numeric, DataTable};
use super::{StageError, StageResult};
use crate::models::ProcessMode;

/// Apply the configured transform mode in place
pub fn run(
    table: &mut DataTable,
    mode: ProcessMode,
    config: &Value,
) -> StageResult<Option<String>> {
    match mode {
        ProcessMode::Transform => {
            canonicalize(table);
            Ok(None)
        }
        ProcessMode::Append => {
            append_records(table, config)?;
            Ok(None)
        }
        ProcessMode::Delete => {
            let removed = delete_rows(table, config)?;
            Ok(Some(format!("deleted {} rows", removed)))
        }
        ProcessMode::Custom => {
            let notes = config
                .get("notes")
                .and_then(|n| n.as_str())
                .unwrap_or("no notes provided");
            Ok(Some(format!("custom mode: {}", notes)))
        }
    }
}

/// Trim strings and coerce numeric-looking cells into canonical form
fn canonicalize(table: &mut DataTable) {
    table.trim_cells();
    for row in &mut table.rows {
        for cell in row {
            if let Some(value) = parse_numeric(cell) {
                *cell = format_numeric(value);
            }
        }
    }
}

/// Append `config.records` as rows, taking the column union with the
/// existing table; missing fields become empty cells
fn append_records(table: &mut DataTable, config: &Value) -> StageResult<()> {
    let records = config
        .get("records")
        .ok_or_else(|| StageError::InvalidPlan("append requires a 'records' array".to_string()))?
        .as_array()
        .ok_or_else(|| StageError::InvalidPlan("'records' must be an array".to_string()))?;

    let objects: Vec<&serde_json::Map<String, Value>> = records
        .iter()
        .map(|r| {
            r.as_object().ok_or_else(|| {
                StageError::InvalidPlan("'records' entries must be objects".to_string())
            })
        })
        .collect::<StageResult<_>>()?;

    // Column union, preserving existing order then first-seen order of new
    // keys
    for object in &objects {
        for key in object.keys() {
            if table.column_index(key).is_none() {
                table.add_column(key.clone());
            }
        }
    }

    for object in objects {
        let row = table
            .columns
            .iter()
            .map(|column| object.get(column).map(cell_text).unwrap_or_default())
            .collect();
        table.push_row(row);
    }

    Ok(())
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// One rule: exact string equality after trim
struct DeleteRule {
    column_index: usize,
    value: String,
}

/// Delete rows where ALL rules hold. Accepts `{column, value}` or
/// `{rules: [{column, value}, ...]}`.
fn delete_rows(table: &mut DataTable, config: &Value) -> StageResult<usize> {
    let raw_rules: Vec<&Value> = if let Some(rules) = config.get("rules") {
        rules
            .as_array()
            .ok_or_else(|| StageError::InvalidPlan("'rules' must be an array".to_string()))?
            .iter()
            .collect()
    } else {
        vec![config]
    };

    if raw_rules.is_empty() {
        return Err(StageError::InvalidPlan("no delete rules given".to_string()));
    }

    let mut rules = Vec::with_capacity(raw_rules.len());
    for raw in raw_rules {
        let column = raw
            .get("column")
            .and_then(|c| c.as_str())
            .ok_or_else(|| StageError::InvalidPlan("rule missing 'column'".to_string()))?;
        let value = raw
            .get("value")
            .map(cell_text)
            .ok_or_else(|| StageError::InvalidPlan("rule missing 'value'".to_string()))?;

        let column_index = table.column_index(column).ok_or_else(|| {
            StageError::InvalidPlan(format!("unknown column '{}'", column))
        })?;

        rules.push(DeleteRule {
            column_index,
            value: value.trim().to_string(),
        });
    }

    let before = table.row_count();
    table.rows.retain(|row| {
        let all_match = rules
            .iter()
            .all(|rule| row[rule.column_index].trim() == rule.value);
        !all_match
    });

    Ok(before - table.row_count())
}
