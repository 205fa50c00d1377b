//! FHIR type tables used by choice-element resolution and `ofType()`.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use tabula_fhirpath_support::EvaluationResult;

/// FHIR primitive type names, as they appear in `ofType()` arguments and
/// `Column.type` declarations.
static FHIR_PRIMITIVE_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "boolean",
        "string",
        "integer",
        "integer64",
        "decimal",
        "date",
        "dateTime",
        "time",
        "instant",
        "code",
        "id",
        "uri",
        "url",
        "canonical",
        "oid",
        "uuid",
        "markdown",
        "base64Binary",
        "positiveInt",
        "unsignedInt",
    ]
    .into_iter()
    .collect()
});

/// Choice-element type suffixes, capitalised as they appear in field names
/// (`onsetDateTime`, `valueQuantity`), paired with the FHIR type they denote.
/// Order matters only for determinism when scanning.
pub(crate) static CHOICE_TYPE_SUFFIXES: &[(&str, &str)] = &[
    // primitives
    ("Base64Binary", "base64Binary"),
    ("Boolean", "boolean"),
    ("Canonical", "canonical"),
    ("Code", "code"),
    ("DateTime", "dateTime"),
    ("Date", "date"),
    ("Decimal", "decimal"),
    ("Id", "id"),
    ("Instant", "instant"),
    ("Integer64", "integer64"),
    ("Integer", "integer"),
    ("Markdown", "markdown"),
    ("Oid", "oid"),
    ("PositiveInt", "positiveInt"),
    ("String", "string"),
    ("Time", "time"),
    ("UnsignedInt", "unsignedInt"),
    ("Uri", "uri"),
    ("Url", "url"),
    ("Uuid", "uuid"),
    // complex types seen in choice elements
    ("Address", "Address"),
    ("Age", "Age"),
    ("Annotation", "Annotation"),
    ("Attachment", "Attachment"),
    ("CodeableConcept", "CodeableConcept"),
    ("CodeableReference", "CodeableReference"),
    ("Coding", "Coding"),
    ("ContactPoint", "ContactPoint"),
    ("Count", "Count"),
    ("Distance", "Distance"),
    ("Duration", "Duration"),
    ("HumanName", "HumanName"),
    ("Identifier", "Identifier"),
    ("Money", "Money"),
    ("Period", "Period"),
    ("Quantity", "Quantity"),
    ("Range", "Range"),
    ("Ratio", "Ratio"),
    ("Reference", "Reference"),
    ("SampledData", "SampledData"),
    ("Signature", "Signature"),
    ("Timing", "Timing"),
];

pub fn is_fhir_primitive_type(type_name: &str) -> bool {
    FHIR_PRIMITIVE_TYPES.contains(type_name)
}

/// Tests whether a value matches a type name as used by `ofType()`.
///
/// Values tagged during navigation (choice-element resolution, literals)
/// match on their tag; untagged values fall back to the representation
/// variant. Name comparison ignores ASCII case so `ofType(dateTime)` matches
/// both a FHIR `dateTime` tag and a System `DateTime` literal.
pub fn matches_fhir_type(
    value: &EvaluationResult,
    namespace: Option<&str>,
    name: &str,
) -> bool {
    if let Some(info) = value.type_info() {
        if let Some(ns) = namespace {
            if ns != info.namespace {
                return false;
            }
        }
        return info.name.eq_ignore_ascii_case(name);
    }
    // Untagged values: match on the underlying representation, or on the
    // resourceType for untyped resource objects.
    let variant_type = match value {
        EvaluationResult::Boolean(_, _) => "boolean",
        EvaluationResult::String(_, _) => "string",
        EvaluationResult::Integer(_, _) => "integer",
        EvaluationResult::Integer64(_, _) => "integer64",
        EvaluationResult::Decimal(_, _) => "decimal",
        EvaluationResult::Date(_, _) => "date",
        EvaluationResult::DateTime(_, _) => "dateTime",
        EvaluationResult::Time(_, _) => "time",
        EvaluationResult::Object { map, .. } => {
            return match map.get("resourceType") {
                Some(EvaluationResult::String(rt, _)) => rt == name,
                _ => false,
            };
        }
        _ => return false,
    };
    variant_type.eq_ignore_ascii_case(name)
}
