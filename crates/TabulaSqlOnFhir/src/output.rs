//! Rendering a processed row set into the supported output formats.

use crate::error::SofError;
use crate::ProcessedResult;

/// Output formats for view results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    /// CSV without a header row.
    Csv,
    /// CSV with a header row (the default for `text/csv`).
    CsvWithHeader,
    /// A JSON array of row objects.
    Json,
    /// Newline-delimited JSON, one row object per line.
    NdJson,
}

impl ContentType {
    /// Parses a MIME type or short format name.
    pub fn from_string(s: &str) -> Result<Self, SofError> {
        match s.trim() {
            "csv" | "text/csv" | "text/csv;header=true" => Ok(ContentType::CsvWithHeader),
            "text/csv;header=false" => Ok(ContentType::Csv),
            "json" | "application/json" => Ok(ContentType::Json),
            "ndjson" | "application/ndjson" | "application/x-ndjson" => Ok(ContentType::NdJson),
            other => Err(SofError::UnsupportedContentType(other.to_string())),
        }
    }
}

/// Renders a result into bytes in the requested format.
pub fn format_output(result: &ProcessedResult, content_type: ContentType) -> Result<Vec<u8>, SofError> {
    match content_type {
        ContentType::Csv => write_csv(result, false),
        ContentType::CsvWithHeader => write_csv(result, true),
        ContentType::Json => {
            let rows: Vec<serde_json::Value> =
                result.rows.iter().map(|r| r.to_json_object()).collect();
            Ok(serde_json::to_vec_pretty(&rows)?)
        }
        ContentType::NdJson => {
            let mut out = Vec::new();
            for row in &result.rows {
                serde_json::to_writer(&mut out, &row.to_json_object())?;
                out.push(b'\n');
            }
            Ok(out)
        }
    }
}

fn write_csv(result: &ProcessedResult, with_header: bool) -> Result<Vec<u8>, SofError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if with_header {
        writer.write_record(result.schema.names())?;
    }
    for row in &result.rows {
        let record: Vec<String> = (0..result.schema.len()).map(|i| row.csv_field(i)).collect();
        writer.write_record(&record)?;
    }
    writer
        .into_inner()
        .map_err(|e| SofError::CsvWriterError(e.to_string()))
}
