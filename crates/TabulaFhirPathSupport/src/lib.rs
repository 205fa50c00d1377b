//! # Tabula FHIRPath Support
//!
//! Shared foundation types for FHIRPath evaluation over FHIR resources:
//!
//! - [`EvaluationResult`]: the universal value model produced by expression
//!   evaluation (primitives, collections, objects)
//! - [`EvaluationError`]: failure categories raised during evaluation
//! - [`TypeInfoResult`]: namespace/name type tags used by `ofType()`
//! - [`json`]: conversion from `serde_json::Value` trees into the value model
//!
//! This crate deliberately has no knowledge of FHIRPath syntax or of
//! ViewDefinitions; it only defines the data the evaluator and the row
//! generator exchange.

pub mod evaluation_error;
pub mod evaluation_result;
pub mod json;
pub mod type_info;

pub use evaluation_error::EvaluationError;
pub use evaluation_result::EvaluationResult;
pub use type_info::TypeInfoResult;
