//! Publish stage
//!
//! Renders the report artifacts and stores them: the CSV is the canonical
//! summary for transform mode and the processed dataset for append,
//! delete and custom modes; the PDF carries the summary either way. Both
//! land in the shared exports directory under names that embed the upload
//! id, and the upload row gets its report fields and published status.
//! All writes are overwrites, which keeps re-delivery idempotent.

use chrono::{DateTime, Utc};

use super::report;
use super::summarize::TableSummary;
use super::table::DataTable;
use super::{StageError, StageResult};
use crate::models::{ProcessMode, Upload, UploadStatus};
use crate::storage::FileStorage;

/// Render and store both artifacts, then mark the upload published
pub fn run(
    upload: &mut Upload,
    table: &DataTable,
    summary: &TableSummary,
    storage: &FileStorage,
    now: DateTime<Utc>,
) -> StageResult<()> {
    let csv_text = match upload.process_mode {
        ProcessMode::Transform => report::render_csv(&report::summary_table(summary))?,
        _ => report::render_csv(table)?,
    };

    let title = format!("{} - {}", upload.department, upload.filename);
    let pdf_bytes = report::render_pdf(&title, now, summary)?;

    storage
        .write_export(&storage.export_csv_path(upload), csv_text.as_bytes())
        .map_err(|e| StageError::Io(e.to_string()))?;
    storage
        .write_export(&storage.export_pdf_path(upload), &pdf_bytes)
        .map_err(|e| StageError::Io(e.to_string()))?;

    upload.report_csv = Some(csv_text);
    upload.report_pdf = Some(pdf_bytes);
    upload.report_generated_at = Some(now);
    upload.status = UploadStatus::Published;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::summarize;

    fn grades() -> DataTable {
        let mut table = DataTable::new(vec!["student_id".into(), "score".into()]);
        table.push_row(vec!["S1".into(), "90".into()]);
        table.push_row(vec!["S2".into(), "85".into()]);
        table.push_row(vec!["S3".into(), "70".into()]);
        table
    }

    #[test]
    fn test_transform_mode_publishes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let mut upload = Upload::new("grades.csv", "registrar", ProcessMode::Transform, Utc::now());

        let table = grades();
        let summary = summarize::run(&table).unwrap();
        run(&mut upload, &table, &summary, &storage, Utc::now()).unwrap();

        assert_eq!(upload.status, UploadStatus::Published);
        let csv = upload.report_csv.as_ref().unwrap();
        assert!(csv.starts_with("statistic,value\n"));
        assert!(csv.contains("row_count,3"));
        assert!(upload.report_pdf.as_ref().unwrap().starts_with(b"%PDF-"));
        assert!(upload.report_generated_at.is_some());

        assert!(storage.export_csv_path(&upload).exists());
        assert!(storage.export_pdf_path(&upload).exists());
    }

    #[test]
    fn test_append_mode_publishes_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());
        let mut upload = Upload::new("grades.csv", "registrar", ProcessMode::Append, Utc::now());

        let mut table = grades();
        table.push_row(vec!["S99".into(), "77".into()]);
        let summary = summarize::run(&table).unwrap();
        run(&mut upload, &table, &summary, &storage, Utc::now()).unwrap();

        let csv = upload.report_csv.as_ref().unwrap();
        assert!(csv.starts_with("student_id,score\n"));
        assert_eq!(csv.lines().count(), 5);
        assert!(csv.lines().last().unwrap().starts_with("S99"));
    }
}
