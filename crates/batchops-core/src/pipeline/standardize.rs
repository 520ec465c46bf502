//! Standardize stage
//!
//! Reads the upload's source file (csv, xlsx, xls or pdf) into the
//! normalised tabular form: trimmed cells under trimmed, lower-snake
//! column names. Everything downstream sees the same shape regardless of
//! input format.

use calamine::{open_workbook_auto, Data, Reader};

use super::table::{normalize_column_name, DataTable};
use super::{StageError, StageResult};
use crate::models::Upload;
use crate::storage::FileStorage;

/// Read and normalise the upload's source file
pub fn run(upload: &Upload, storage: &FileStorage) -> StageResult<DataTable> {
    let extension = upload
        .extension()
        .ok_or_else(|| StageError::UnsupportedFormat("file has no extension".to_string()))?;

    let mut table = match extension.as_str() {
        "csv" => read_csv(upload, storage)?,
        "xlsx" | "xls" => read_spreadsheet(upload, storage)?,
        "pdf" => read_pdf(upload, storage)?,
        other => return Err(StageError::UnsupportedFormat(other.to_string())),
    };

    table.columns = table
        .columns
        .iter()
        .map(|c| normalize_column_name(c))
        .collect();
    table.trim_cells();

    Ok(table)
}

fn read_csv(upload: &Upload, storage: &FileStorage) -> StageResult<DataTable> {
    let bytes = storage
        .read_source(upload)
        .map_err(|e| StageError::Io(e.to_string()))?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes.as_slice());

    let headers = reader
        .headers()
        .map_err(|e| StageError::Parse(e.to_string()))?
        .clone();

    let mut table = DataTable::new(headers.iter().map(String::from).collect());

    for result in reader.records() {
        let record = result.map_err(|e| StageError::Parse(e.to_string()))?;
        table.push_row(record.iter().map(String::from).collect());
    }

    Ok(table)
}

fn read_spreadsheet(upload: &Upload, storage: &FileStorage) -> StageResult<DataTable> {
    let path = storage.source_path(upload);
    if !path.exists() {
        return Err(StageError::Io(format!("missing source file {}", path.display())));
    }

    let mut workbook =
        open_workbook_auto(&path).map_err(|e| StageError::Parse(e.to_string()))?;

    let sheet_names = workbook.sheet_names().to_owned();
    let first = sheet_names
        .first()
        .ok_or_else(|| StageError::Parse("workbook has no sheets".to_string()))?;

    let range = workbook
        .worksheet_range(first)
        .map_err(|e| StageError::Parse(e.to_string()))?;

    let mut rows = range.rows();
    let header_row = rows
        .next()
        .ok_or_else(|| StageError::Parse("sheet has no header row".to_string()))?;

    let mut table = DataTable::new(header_row.iter().map(cell_to_string).collect());
    for row in rows {
        table.push_row(row.iter().map(cell_to_string).collect());
    }

    Ok(table)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(n) => n.to_string(),
        Data::Float(n) => super::table::format_numeric(*n),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// PDF text extraction plus a line heuristic. The extraction itself is a
/// black box; the heuristic looks for a run of delimited lines with a
/// consistent field count and treats it as the table.
fn read_pdf(upload: &Upload, storage: &FileStorage) -> StageResult<DataTable> {
    let bytes = storage
        .read_source(upload)
        .map_err(|e| StageError::Io(e.to_string()))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .map_err(|e| StageError::Parse(format!("pdf extraction failed: {}", e)))?;

    table_from_text(&text).ok_or(StageError::NoTableInPdf)
}

/// Find the longest run of lines that split into the same number of
/// fields (two or more) and read it as header + rows. Fields are
/// separated by two-or-more spaces, tabs, or a vertical bar.
fn table_from_text(text: &str) -> Option<DataTable> {
    let candidate_rows: Vec<Vec<String>> = text
        .lines()
        .map(split_fields)
        .filter(|fields| fields.len() >= 2)
        .collect();

    // Longest run of rows with a consistent arity
    let mut best: Option<(usize, usize)> = None; // (start, len)
    let mut start = 0;
    while start < candidate_rows.len() {
        let arity = candidate_rows[start].len();
        let mut end = start;
        while end < candidate_rows.len() && candidate_rows[end].len() == arity {
            end += 1;
        }
        if best.map(|(_, len)| end - start > len).unwrap_or(true) {
            best = Some((start, end - start));
        }
        start = end;
    }

    let (start, len) = best?;
    // A table needs a header plus at least one data row
    if len < 2 {
        return None;
    }

    let mut table = DataTable::new(candidate_rows[start].clone());
    for row in &candidate_rows[start + 1..start + len] {
        table.push_row(row.clone());
    }
    Some(table)
}

fn split_fields(line: &str) -> Vec<String> {
    let line = line.trim();
    if line.contains('|') {
        return line
            .split('|')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect();
    }
    if line.contains('\t') {
        return line
            .split('\t')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(String::from)
            .collect();
    }

    // Two-or-more spaces separate columns in extracted text
    line.split("  ")
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect()
}
