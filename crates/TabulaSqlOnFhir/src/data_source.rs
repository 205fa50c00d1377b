//! Reading FHIR resources from the supported input shapes.
//!
//! Views run against plain JSON resources. Input files may hold a Bundle
//! (entries are unwrapped), a bare resource, a JSON array of resources, or
//! NDJSON with one resource per line. Content sniffing mirrors that order:
//! well-formed JSON wins, anything else falls back to NDJSON.

use std::io::BufRead;

use serde_json::Value;

use crate::error::SofError;

/// Resources parsed from an input, along with how many NDJSON lines were
/// skipped (always zero unless skipping was requested).
#[derive(Debug)]
pub struct LoadedResources {
    pub resources: Vec<Value>,
    pub skipped_lines: usize,
}

/// Parses file content into resources, auto-detecting the shape.
pub fn parse_fhir_content(content: &str) -> Result<LoadedResources, SofError> {
    match serde_json::from_str::<Value>(content) {
        Ok(value) => Ok(LoadedResources {
            resources: unwrap_json_value(value)?,
            skipped_lines: 0,
        }),
        Err(json_err) => {
            // Multi-line content that is not one JSON document is treated as
            // NDJSON; single-line garbage keeps the original error.
            if content.lines().filter(|l| !l.trim().is_empty()).count() > 1 {
                read_ndjson(content.as_bytes(), false)
            } else {
                Err(SofError::SerializationError(json_err))
            }
        }
    }
}

/// Unwraps one parsed JSON document into its resources.
fn unwrap_json_value(value: Value) -> Result<Vec<Value>, SofError> {
    match value {
        Value::Object(ref map) => {
            if map.get("resourceType").and_then(Value::as_str) == Some("Bundle") {
                let mut resources = Vec::new();
                if let Some(Value::Array(entries)) = map.get("entry") {
                    for entry in entries {
                        if let Some(resource) = entry.get("resource") {
                            resources.push(resource.clone());
                        }
                    }
                }
                Ok(resources)
            } else {
                Ok(vec![value])
            }
        }
        Value::Array(items) => Ok(items),
        other => Err(SofError::ParseError(format!(
            "Expected a FHIR resource, Bundle or array of resources, got {}",
            type_name_of(&other)
        ))),
    }
}

/// Reads NDJSON input, one resource per non-empty line.
///
/// With `skip_invalid`, unparsable lines are counted and dropped instead of
/// failing the whole read.
pub fn read_ndjson<R: BufRead>(reader: R, skip_invalid: bool) -> Result<LoadedResources, SofError> {
    let mut resources = Vec::new();
    let mut skipped = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ Value::Object(_)) => resources.push(value),
            Ok(_) if skip_invalid => skipped += 1,
            Ok(other) => {
                return Err(SofError::ParseError(format!(
                    "NDJSON line {} is not a resource object, got {}",
                    line_no + 1,
                    type_name_of(&other)
                )));
            }
            Err(_) if skip_invalid => skipped += 1,
            Err(e) => {
                return Err(SofError::ParseError(format!(
                    "Invalid JSON on NDJSON line {}: {}",
                    line_no + 1,
                    e
                )));
            }
        }
    }
    Ok(LoadedResources {
        resources,
        skipped_lines: skipped,
    })
}

fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
