//! # Tabula FHIRPath
//!
//! Parser and evaluator for the restricted FHIRPath dialect used by
//! SQL-on-FHIR ViewDefinitions: path navigation, indexing, a fixed function
//! set (`exists`, `empty`, `first`, `last`, `count`, `where`, `select`,
//! `join`, `toString`, `not`, `ofType`), the SQL-on-FHIR extension functions
//! `getResourceKey()` / `getReferenceKey()`, and the comparison and boolean
//! operators needed by `where` predicates. The rest of FHIRPath (arithmetic,
//! unions, type operators, aggregates) is intentionally out of dialect and
//! fails at parse time.
//!
//! ## Usage
//!
//! ```rust
//! use tabula_fhirpath::{evaluate_expression, EvaluationContext};
//! use tabula_fhirpath_support::EvaluationResult;
//! use serde_json::json;
//!
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "id": "example",
//!     "name": [{"family": "Doe", "given": ["John", "Q"]}]
//! });
//! let context = EvaluationContext::from_json(&patient);
//!
//! let result = evaluate_expression("name.family", &context).unwrap();
//! assert_eq!(result, EvaluationResult::String("Doe".to_string(), None));
//! ```
//!
//! Expressions evaluated repeatedly should be parsed once with
//! [`parse_expression`] and run through [`evaluate`]; `evaluate_expression`
//! is the parse-and-run convenience for one-off use.

pub mod evaluator;
pub mod fhir_types;
pub mod parser;
pub mod polymorphic;
pub mod reference_key;

pub use evaluator::{evaluate, EvaluationContext};
pub use parser::{Expression, Invocation, Literal, Term};
pub use tabula_fhirpath_support::{EvaluationError, EvaluationResult};

/// Parses a dialect expression into its AST.
///
/// Returns a formatted message naming the offending expression on failure.
pub fn parse_expression(expression: &str) -> Result<Expression, String> {
    use chumsky::Parser;

    parser::parser()
        .parse(expression)
        .into_result()
        .map_err(|e| {
            format!(
                "Failed to parse FHIRPath expression '{}': {:?}",
                expression, e
            )
        })
}

/// Parses and evaluates an expression in one call.
pub fn evaluate_expression(
    expression: &str,
    context: &EvaluationContext,
) -> Result<EvaluationResult, String> {
    let parsed = parse_expression(expression)?;
    evaluate(&parsed, context, None).map_err(|e| {
        format!(
            "Failed to evaluate FHIRPath expression '{}': {}",
            expression, e
        )
    })
}
