//! Conversion from `serde_json::Value` trees into the evaluation value model.
//!
//! Resources arrive as plain JSON; the engine has no generated model structs.
//! JSON primitives map to untyped results here; FHIR-specific type tags are
//! attached later, during navigation, where the field context is known
//! (choice-element suffixes, declared column types).

use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::evaluation_result::EvaluationResult;

/// Converts a JSON value into an [`EvaluationResult`].
///
/// - `null` becomes `Empty`
/// - numbers become `Integer` when they fit an `i64` without a fraction,
///   `Decimal` otherwise
/// - arrays become ordered `Collection`s
/// - objects become `Object` maps
pub fn from_json(value: &Value) -> EvaluationResult {
    match value {
        Value::Null => EvaluationResult::Empty,
        Value::Bool(b) => EvaluationResult::Boolean(*b, None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                EvaluationResult::Integer(i, None)
            } else {
                // Parse through the lexical form so 0.1 stays 0.1 rather than
                // the nearest f64.
                match Decimal::from_str(&n.to_string()) {
                    Ok(d) => EvaluationResult::Decimal(d, None),
                    Err(_) => EvaluationResult::String(n.to_string(), None),
                }
            }
        }
        Value::String(s) => EvaluationResult::String(s.clone(), None),
        Value::Array(items) => EvaluationResult::Collection {
            items: items.iter().map(from_json).collect(),
            has_undefined_order: false,
            type_info: None,
        },
        Value::Object(map) => {
            let converted: HashMap<String, EvaluationResult> = map
                .iter()
                .map(|(k, v)| (k.clone(), from_json(v)))
                .collect();
            EvaluationResult::Object {
                map: converted,
                type_info: None,
            }
        }
    }
}

/// Reads the `resourceType` field of a resource object, if present.
pub fn resource_type_of(result: &EvaluationResult) -> Option<&str> {
    match result {
        EvaluationResult::Object { map, .. } => match map.get("resourceType") {
            Some(EvaluationResult::String(s, _)) => Some(s),
            _ => None,
        },
        _ => None,
    }
}
