//! SQL-on-FHIR extension functions for resource and reference keys.
//!
//! `getResourceKey()` yields a stable scalar identifier for the resource a
//! view row came from; `getReferenceKey(type?)` extracts the logical id from
//! a Reference, optionally requiring the referenced type to match. Both are
//! defined by the SQL-on-FHIR specification rather than FHIRPath proper.

use tabula_fhirpath_support::{EvaluationError, EvaluationResult};

/// `getResourceKey()`: the id of the invoking resource.
///
/// Returns `Empty` when the base is not a resource object or carries no id.
pub fn get_resource_key(
    invocation_base: &EvaluationResult,
) -> Result<EvaluationResult, EvaluationError> {
    match invocation_base {
        EvaluationResult::Object { map, .. } => {
            let resource_type = map.get("resourceType").and_then(|rt| match rt {
                EvaluationResult::String(s, _) => Some(s.clone()),
                _ => None,
            });
            let id = map.get("id").and_then(|id_val| match id_val {
                EvaluationResult::String(s, _) => Some(s.clone()),
                _ => None,
            });
            match (resource_type, id) {
                (Some(_rt), Some(id_str)) => Ok(EvaluationResult::string(id_str)),
                _ => Ok(EvaluationResult::Empty),
            }
        }
        _ => Ok(EvaluationResult::Empty),
    }
}

/// `getReferenceKey([type])`: the id portion of a Reference, e.g. `"p1"`
/// from `{"reference": "Patient/p1"}`.
///
/// With a type filter, a reference to a different resource type yields
/// `Empty`. Singleton collections are unwrapped; anything else that is not a
/// Reference object yields `Empty`.
pub fn get_reference_key(
    invocation_base: &EvaluationResult,
    type_filter: Option<&str>,
) -> Result<EvaluationResult, EvaluationError> {
    let base = match invocation_base {
        EvaluationResult::Collection { items, .. } if items.len() == 1 => &items[0],
        other => other,
    };

    match base {
        EvaluationResult::Object { map, .. } => match map.get("reference") {
            Some(EvaluationResult::String(ref_str, _)) => {
                if let Some((resource_type, id)) = parse_reference(ref_str) {
                    if let Some(filter_type) = type_filter {
                        if resource_type != filter_type {
                            return Ok(EvaluationResult::Empty);
                        }
                    }
                    Ok(EvaluationResult::string(id))
                } else {
                    Ok(EvaluationResult::Empty)
                }
            }
            _ => Ok(EvaluationResult::Empty),
        },
        _ => Ok(EvaluationResult::Empty),
    }
}

/// Splits a relative reference like `"Patient/123"` into (type, id).
fn parse_reference(reference: &str) -> Option<(String, String)> {
    let slash_pos = reference.find('/')?;
    let resource_type = reference[..slash_pos].to_string();
    let id = reference[slash_pos + 1..].to_string();
    if !resource_type.is_empty() && !id.is_empty() {
        Some((resource_type, id))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn reference(value: &str) -> EvaluationResult {
        let mut map = HashMap::new();
        map.insert(
            "reference".to_string(),
            EvaluationResult::String(value.to_string(), None),
        );
        EvaluationResult::object(map)
    }

    #[test]
    fn resource_key_returns_id() {
        let mut map = HashMap::new();
        map.insert(
            "resourceType".to_string(),
            EvaluationResult::String("Patient".to_string(), None),
        );
        map.insert(
            "id".to_string(),
            EvaluationResult::String("123".to_string(), None),
        );
        let resource = EvaluationResult::object(map);

        assert_eq!(
            get_resource_key(&resource).unwrap(),
            EvaluationResult::string("123".to_string())
        );
    }

    #[test]
    fn resource_key_empty_without_id() {
        let mut map = HashMap::new();
        map.insert(
            "resourceType".to_string(),
            EvaluationResult::String("Patient".to_string(), None),
        );
        assert_eq!(
            get_resource_key(&EvaluationResult::object(map)).unwrap(),
            EvaluationResult::Empty
        );
    }

    #[test]
    fn reference_key_without_filter() {
        assert_eq!(
            get_reference_key(&reference("Patient/456"), None).unwrap(),
            EvaluationResult::string("456".to_string())
        );
    }

    #[test]
    fn reference_key_with_filter() {
        assert_eq!(
            get_reference_key(&reference("Patient/456"), Some("Patient")).unwrap(),
            EvaluationResult::string("456".to_string())
        );
        assert_eq!(
            get_reference_key(&reference("Patient/456"), Some("Observation")).unwrap(),
            EvaluationResult::Empty
        );
    }

    #[test]
    fn malformed_references_yield_empty() {
        for bad in ["NoSlash", "/", "Patient/", "/123"] {
            assert_eq!(
                get_reference_key(&reference(bad), None).unwrap(),
                EvaluationResult::Empty,
                "reference {:?}",
                bad
            );
        }
    }
}
