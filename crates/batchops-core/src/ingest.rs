//! Upload ingest generators
//!
//! Scheduled callables that synthesise fresh uploads from department
//! feeds: read the feed rows, write a CSV under the new upload's
//! directory, insert the upload in pending, and enqueue a pipeline
//! execution. The generator returns as soon as the enqueue succeeds; it
//! never waits on the pipeline.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::callable::{JobContext, PIPELINE_CALLABLE};
use crate::engine::EngineDeps;
use crate::models::{DepartmentRecord, ProcessMode, Upload};
use crate::queue::QueueEntry;
use crate::{Error, Result};

/// The `ingest.department_feed` callable. Kwargs: `source` (optional feed
/// filter), `department` (upload attribution, defaults to the source or
/// "general").
pub async fn department_feed(
    _args: Vec<Value>,
    kwargs: Map<String, Value>,
    _ctx: JobContext,
    deps: Arc<EngineDeps>,
) -> Result<Value> {
    let source = kwargs.get("source").and_then(|v| v.as_str());
    let department = kwargs
        .get("department")
        .and_then(|v| v.as_str())
        .or(source)
        .unwrap_or("general");

    let records = deps.repos.department_records.list(source).await?;
    if records.is_empty() {
        info!("Department feed {:?} has no records, skipping", source);
        return Ok(json!({ "skipped": true, "rows": 0 }));
    }

    let csv = feed_csv(&records)?;

    let now = deps.clock.now();
    let filename = format!("{}_feed_{}.csv", department, now.format("%Y%m%d_%H%M%S"));
    let upload = Upload::new(filename, department, ProcessMode::Transform, now);

    deps.storage.write_source(&upload, csv.as_bytes())?;
    deps.repos.uploads.create(&upload).await?;

    let pipeline_job = deps
        .repos
        .jobs
        .find_by_name(PIPELINE_CALLABLE)
        .await?
        .ok_or_else(|| Error::not_found(format!("job '{}'", PIPELINE_CALLABLE)))?;

    let entry = QueueEntry::new(
        pipeline_job.id,
        vec![json!(upload.id.to_string())],
        Map::new(),
        now,
    );
    deps.queue.enqueue(&entry).await?;

    info!(
        "Ingested {} feed rows into upload {} ({})",
        records.len(),
        upload.id,
        upload.filename
    );

    Ok(json!({ "upload_id": upload.id.to_string(), "rows": records.len() }))
}

/// Render feed rows as CSV. Columns are the union of payload keys (maps
/// iterate in key order, so the union is stable); missing fields become
/// empty cells.
fn feed_csv(records: &[DepartmentRecord]) -> Result<String> {
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for key in record.payload.0.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&columns)
        .map_err(|e| Error::Other(format!("feed csv: {}", e)))?;

    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| {
                record
                    .payload
                    .0
                    .get(column)
                    .map(|value| match value {
                        Value::Null => String::new(),
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default()
            })
            .collect();
        writer
            .write_record(&row)
            .map_err(|e| Error::Other(format!("feed csv: {}", e)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Other(format!("feed csv: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Other(format!("feed csv: {}", e)))
}
