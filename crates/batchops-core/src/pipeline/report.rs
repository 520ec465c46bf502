//! Report rendering
//!
//! CSV text via the csv writer; the PDF artifact is a single-page
//! document built directly with lopdf. Layout is deliberately plain: a
//! title, the generation timestamp and the summary lines.

use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use super::summarize::TableSummary;
use super::table::{format_numeric, DataTable};
use super::{StageError, StageResult};

/// The canonical summary rendered as a two-column table
pub fn summary_table(summary: &TableSummary) -> DataTable {
    let mut table = DataTable::new(vec!["statistic".to_string(), "value".to_string()]);
    table.push_row(vec!["row_count".to_string(), summary.row_count.to_string()]);
    table.push_row(vec![
        "column_count".to_string(),
        summary.column_count.to_string(),
    ]);

    for column in &summary.columns {
        table.push_row(vec![
            format!("{}_non_empty", column.name),
            column.non_empty.to_string(),
        ]);
        if let Some(stats) = &column.numeric {
            table.push_row(vec![
                format!("{}_count", column.name),
                stats.count.to_string(),
            ]);
            table.push_row(vec![format!("{}_min", column.name), format_numeric(stats.min)]);
            table.push_row(vec![format!("{}_max", column.name), format_numeric(stats.max)]);
            table.push_row(vec![
                format!("{}_mean", column.name),
                format!("{:.2}", stats.mean),
            ]);
        }
    }

    table
}

/// Render a table as CSV text
pub fn render_csv(table: &DataTable) -> StageResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    writer
        .write_record(&table.columns)
        .map_err(|e| StageError::Io(e.to_string()))?;
    for row in &table.rows {
        writer
            .write_record(row)
            .map_err(|e| StageError::Io(e.to_string()))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| StageError::Io(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| StageError::Internal(e.to_string()))
}

/// Render a one-page PDF report: title, timestamp, then one line per
/// summary row
pub fn render_pdf(
    title: &str,
    generated_at: DateTime<Utc>,
    summary: &TableSummary,
) -> StageResult<Vec<u8>> {
    let mut lines = vec![
        format!("Generated {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        String::new(),
    ];
    for row in &summary_table(summary).rows {
        lines.push(format!("{}: {}", row[0], row[1]));
    }

    build_pdf(title, &lines).map_err(|e| StageError::Internal(format!("pdf build: {}", e)))
}

fn build_pdf(title: &str, lines: &[String]) -> lopdf::Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 16.into()]),
        Operation::new("Td", vec![50.into(), 790.into()]),
        Operation::new("Tj", vec![Object::string_literal(title)]),
        Operation::new("Tf", vec!["F1".into(), 11.into()]),
        Operation::new("TL", vec![15.into()]),
        Operation::new("Td", vec![0.into(), (-30).into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
        operations.push(Operation::new("T*", vec![]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}
