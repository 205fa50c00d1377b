//! Choice-element (`value[x]`) resolution.
//!
//! FHIR choice elements are stored under type-suffixed names: a Condition's
//! `onset[x]` appears as `onsetDateTime`, `onsetPeriod`, `onsetAge`, and so
//! on. FHIRPath navigates them by base name, so `onset` must find whichever
//! concrete variant is present, and `ofType()` then filters on the concrete
//! type. This module resolves a base name against an object map and tags the
//! resolved value with its concrete FHIR type so the filter is a tag
//! comparison.

use std::collections::HashMap;

use tabula_fhirpath_support::{EvaluationResult, TypeInfoResult};

use crate::fhir_types::CHOICE_TYPE_SUFFIXES;

/// Resolves `base_name` against an object map, trying the concrete
/// type-suffixed spellings of a choice element.
///
/// Returns the value tagged with the FHIR type named by its suffix, or
/// `None` when no variant is present. Direct (non-choice) hits are the
/// caller's job; this is only the fallback.
pub fn access_choice_element(
    map: &HashMap<String, EvaluationResult>,
    base_name: &str,
) -> Option<EvaluationResult> {
    for (suffix, fhir_type) in CHOICE_TYPE_SUFFIXES {
        let key = format!("{}{}", base_name, suffix);
        if let Some(value) = map.get(&key) {
            return Some(tag_with_type(value.clone(), fhir_type));
        }
    }
    None
}

/// Attaches a FHIR type tag to a resolved choice value. Collections tag each
/// item; existing tags are preserved (a nested resolution already knows
/// better).
fn tag_with_type(value: EvaluationResult, fhir_type: &str) -> EvaluationResult {
    let tag = Some(TypeInfoResult::fhir(fhir_type));
    match value {
        EvaluationResult::Boolean(b, None) => EvaluationResult::Boolean(b, tag),
        EvaluationResult::String(s, None) => EvaluationResult::String(s, tag),
        EvaluationResult::Decimal(d, None) => EvaluationResult::Decimal(d, tag),
        EvaluationResult::Integer(i, None) => EvaluationResult::Integer(i, tag),
        EvaluationResult::Integer64(i, None) => EvaluationResult::Integer64(i, tag),
        EvaluationResult::Date(s, None) => EvaluationResult::Date(s, tag),
        EvaluationResult::DateTime(s, None) => EvaluationResult::DateTime(s, tag),
        EvaluationResult::Time(s, None) => EvaluationResult::Time(s, tag),
        EvaluationResult::Object {
            map,
            type_info: None,
        } => EvaluationResult::Object {
            map,
            type_info: tag,
        },
        EvaluationResult::Collection {
            items,
            has_undefined_order,
            type_info,
        } => EvaluationResult::Collection {
            items: items
                .into_iter()
                .map(|i| tag_with_type(i, fhir_type))
                .collect(),
            has_undefined_order,
            type_info,
        },
        already_tagged => already_tagged,
    }
}
