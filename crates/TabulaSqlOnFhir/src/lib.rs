//! # Tabula SQL-on-FHIR
//!
//! An implementation of the [SQL-on-FHIR
//! v2](https://build.fhir.org/ig/FHIR/sql-on-fhir-v2/) ViewDefinition
//! engine: declarative JSON view definitions are validated once, then
//! applied to FHIR resources to produce flat, schema-ordered rows.
//!
//! ## Components
//!
//! - [`ViewDefinition`]: parsed, validated and constant-substituted view,
//!   with its ordered output [`schema`](ViewDefinition::schema)
//! - [`ViewDefinition::apply`]: the pure projection
//!   `(ViewDefinition, Resource) -> rows`
//! - [`run_view_definition`]: the multi-resource driver used for Bundles
//!   and NDJSON inputs
//! - [`output`]: CSV / JSON / NDJSON rendering of a row set
//! - [`SofError`]: the failure taxonomy shared by all of the above
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tabula_sql_on_fhir::ViewDefinition;
//!
//! let view = ViewDefinition::parse(r#"{
//!     "resourceType": "ViewDefinition",
//!     "name": "patient_flat",
//!     "status": "active",
//!     "resource": "Patient",
//!     "select": [{
//!         "column": [
//!             {"name": "id", "path": "id"},
//!             {"name": "family", "path": "name.first().family"}
//!         ]
//!     }]
//! }"#).unwrap();
//!
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "id": "example",
//!     "name": [{"family": "Doe", "given": ["John"]}]
//! });
//!
//! let rows = view.apply(&patient).unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0].get("family"), Some(&json!("Doe")));
//! ```
//!
//! The engine itself is single-threaded and deterministic per resource; a
//! validated `ViewDefinition` is immutable and can be shared freely across
//! threads, which is what `run_view_definition` does when fanning out over
//! a batch of resources.

pub mod data_source;
pub mod error;
pub mod fhir_version;
pub mod output;
pub mod runner;
pub mod schema;
pub mod traits;
pub mod view_definition;

use std::sync::Arc;

use rayon::prelude::*;

pub use error::SofError;
pub use fhir_version::FhirVersion;
pub use output::{format_output, ContentType};
pub use runner::Row;
pub use schema::{ColumnInfo, ViewSchema};
pub use traits::ResourceSource;
pub use view_definition::{ParseOptions, ViewDefinition};

/// The rows produced by running a view over a batch of resources, plus the
/// schema they conform to.
#[derive(Debug)]
pub struct ProcessedResult {
    pub schema: Arc<ViewSchema>,
    pub rows: Vec<Row>,
}

/// Runs a validated view over a batch of resources.
///
/// Resources are processed independently (in parallel for larger batches)
/// and their row sets concatenated in input order, so the output is
/// identical to a sequential run.
pub fn run_view_definition(
    view: &ViewDefinition,
    resources: &[serde_json::Value],
) -> Result<ProcessedResult, SofError> {
    let per_resource: Result<Vec<Vec<Row>>, SofError> = resources
        .par_iter()
        .map(|resource| view.apply(resource))
        .collect();

    Ok(ProcessedResult {
        schema: view.schema_arc(),
        rows: per_resource?.into_iter().flatten().collect(),
    })
}
