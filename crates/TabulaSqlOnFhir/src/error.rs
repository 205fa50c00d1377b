//! Error taxonomy for ViewDefinition processing.

use thiserror::Error;

/// Failures surfaced by the parser/validator, the evaluator, and the row
/// generator.
///
/// Validation failures are fatal to the ViewDefinition: no partial view is
/// ever exposed. Evaluation failures are per-resource: the ViewDefinition
/// stays valid and the caller decides whether to skip the resource or abort.
/// Messages carry a breadcrumb (`select[1].column[0] 'code_sys'`) locating
/// the offending node where one exists.
#[derive(Debug, Error)]
pub enum SofError {
    /// Structural or logical validation failure: bad name, empty resource,
    /// malformed constant, undefined constant reference, repeated column,
    /// incompatible unionAll branches.
    #[error("Invalid ViewDefinition: {0}")]
    InvalidViewDefinition(String),

    /// Malformed FHIRPath expression in a path.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// FHIRPath runtime failure while processing a resource.
    #[error("FHIRPath evaluation error: {0}")]
    EvaluationError(String),

    /// A `fhirVersion` entry with an unrecognised version prefix.
    #[error("Unsupported FHIR version: {0}")]
    UnsupportedFhirVersion(String),

    /// Malformed JSON in a ViewDefinition or resource payload.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// File I/O failure while reading inputs or writing outputs.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// CSV output failure.
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    /// CSV writer internal failure while flushing output.
    #[error("CSV writer error: {0}")]
    CsvWriterError(String),

    /// Unknown output content type requested.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),
}

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, SofError>;
