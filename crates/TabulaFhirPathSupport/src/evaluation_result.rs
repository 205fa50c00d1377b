use std::collections::HashMap;

use rust_decimal::Decimal;

pub use crate::evaluation_error::EvaluationError;
use crate::type_info::TypeInfoResult;

/// Universal result type for FHIRPath expression evaluation.
///
/// Every FHIRPath expression evaluates to one of these variants. Primitives
/// carry an optional [`TypeInfoResult`] tag so type filters can distinguish
/// FHIR types that share a representation (a `code` and a `string` are both
/// `String` here, but carry different tags).
///
/// In FHIRPath all values are conceptually sequences: `Empty` is the empty
/// sequence, a primitive or object is a singleton, and `Collection` holds
/// everything else. Navigation never fails on absent fields; it produces
/// `Empty`.
#[derive(Debug, Clone)]
pub enum EvaluationResult {
    /// No value, FHIRPath's empty collection `{}`.
    Empty,
    /// Boolean value from a FHIR boolean field or a logical expression.
    Boolean(bool, Option<TypeInfoResult>),
    /// Text value. Covers FHIR string, code, id, uri, canonical and friends;
    /// the tag records which.
    String(String, Option<TypeInfoResult>),
    /// High-precision decimal; `rust_decimal` avoids floating-point drift.
    Decimal(Decimal, Option<TypeInfoResult>),
    /// Whole number (FHIR integer, positiveInt, unsignedInt).
    Integer(i64, Option<TypeInfoResult>),
    /// Explicit 64-bit integer (FHIR integer64).
    Integer64(i64, Option<TypeInfoResult>),
    /// Date stored as its lexical ISO form (YYYY, YYYY-MM or YYYY-MM-DD).
    Date(String, Option<TypeInfoResult>),
    /// DateTime stored as its lexical ISO 8601 form.
    DateTime(String, Option<TypeInfoResult>),
    /// Time stored as its lexical HH:MM:SS[.sss] form.
    Time(String, Option<TypeInfoResult>),
    /// Ordered collection of results. Always flat; evaluation flattens
    /// nested collections as FHIRPath requires.
    Collection {
        items: Vec<EvaluationResult>,
        /// Whether the original source order was undefined.
        has_undefined_order: bool,
        type_info: Option<TypeInfoResult>,
    },
    /// Key-value object for complex FHIR types, backbone elements and whole
    /// resources. Enables property access via dot navigation.
    Object {
        map: HashMap<String, EvaluationResult>,
        type_info: Option<TypeInfoResult>,
    },
}

/// Equality ignores type tags: a `code` "active" equals a `string` "active".
/// Decimals are normalized so 1.0 == 1.00.
impl PartialEq for EvaluationResult {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EvaluationResult::Empty, EvaluationResult::Empty) => true,
            (EvaluationResult::Boolean(a, _), EvaluationResult::Boolean(b, _)) => a == b,
            (EvaluationResult::String(a, _), EvaluationResult::String(b, _)) => a == b,
            (EvaluationResult::Decimal(a, _), EvaluationResult::Decimal(b, _)) => {
                a.normalize() == b.normalize()
            }
            (EvaluationResult::Integer(a, _), EvaluationResult::Integer(b, _)) => a == b,
            (EvaluationResult::Integer64(a, _), EvaluationResult::Integer64(b, _)) => a == b,
            (EvaluationResult::Date(a, _), EvaluationResult::Date(b, _)) => a == b,
            (EvaluationResult::DateTime(a, _), EvaluationResult::DateTime(b, _)) => a == b,
            (EvaluationResult::Time(a, _), EvaluationResult::Time(b, _)) => a == b,
            (
                EvaluationResult::Collection {
                    items: a_items,
                    has_undefined_order: a_undef,
                    ..
                },
                EvaluationResult::Collection {
                    items: b_items,
                    has_undefined_order: b_undef,
                    ..
                },
            ) => a_undef == b_undef && a_items == b_items,
            (EvaluationResult::Object { map: a, .. }, EvaluationResult::Object { map: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }
}

impl Eq for EvaluationResult {}

impl EvaluationResult {
    // === Constructors ===

    /// Boolean with System type.
    pub fn boolean(value: bool) -> Self {
        EvaluationResult::Boolean(value, Some(TypeInfoResult::system("Boolean")))
    }

    /// Boolean with FHIR type.
    pub fn fhir_boolean(value: bool) -> Self {
        EvaluationResult::Boolean(value, Some(TypeInfoResult::fhir("boolean")))
    }

    /// String with System type.
    pub fn string(value: String) -> Self {
        EvaluationResult::String(value, Some(TypeInfoResult::system("String")))
    }

    /// String carrying a specific FHIR type tag (`code`, `uri`, `id`, ...).
    pub fn fhir_string(value: String, fhir_type: &str) -> Self {
        EvaluationResult::String(value, Some(TypeInfoResult::fhir(fhir_type)))
    }

    pub fn integer(value: i64) -> Self {
        EvaluationResult::Integer(value, Some(TypeInfoResult::system("Integer")))
    }

    pub fn integer64(value: i64) -> Self {
        EvaluationResult::Integer64(value, Some(TypeInfoResult::fhir("integer64")))
    }

    pub fn decimal(value: Decimal) -> Self {
        EvaluationResult::Decimal(value, Some(TypeInfoResult::system("Decimal")))
    }

    pub fn date(value: String) -> Self {
        EvaluationResult::Date(value, Some(TypeInfoResult::system("Date")))
    }

    pub fn datetime(value: String) -> Self {
        EvaluationResult::DateTime(value, Some(TypeInfoResult::system("DateTime")))
    }

    pub fn time(value: String) -> Self {
        EvaluationResult::Time(value, Some(TypeInfoResult::system("Time")))
    }

    /// Ordered collection with defined order and no type tag.
    pub fn collection(items: Vec<EvaluationResult>) -> Self {
        EvaluationResult::Collection {
            items,
            has_undefined_order: false,
            type_info: None,
        }
    }

    pub fn object(map: HashMap<String, EvaluationResult>) -> Self {
        EvaluationResult::Object {
            map,
            type_info: None,
        }
    }

    pub fn typed_object(
        map: HashMap<String, EvaluationResult>,
        namespace: &str,
        name: &str,
    ) -> Self {
        EvaluationResult::Object {
            map,
            type_info: Some(TypeInfoResult::new(namespace, name)),
        }
    }

    // === Accessors ===

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            EvaluationResult::Boolean(b, _) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            EvaluationResult::String(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            EvaluationResult::Integer(i, _) | EvaluationResult::Integer64(i, _) => Some(*i),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            EvaluationResult::Decimal(d, _) => Some(*d),
            EvaluationResult::Integer(i, _) | EvaluationResult::Integer64(i, _) => {
                Some(Decimal::from(*i))
            }
            _ => None,
        }
    }

    /// The type tag, if the value carries one.
    pub fn type_info(&self) -> Option<&TypeInfoResult> {
        match self {
            EvaluationResult::Empty => None,
            EvaluationResult::Boolean(_, t)
            | EvaluationResult::String(_, t)
            | EvaluationResult::Decimal(_, t)
            | EvaluationResult::Integer(_, t)
            | EvaluationResult::Integer64(_, t)
            | EvaluationResult::Date(_, t)
            | EvaluationResult::DateTime(_, t)
            | EvaluationResult::Time(_, t) => t.as_ref(),
            EvaluationResult::Collection { type_info, .. }
            | EvaluationResult::Object { type_info, .. } => type_info.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            EvaluationResult::Empty => true,
            EvaluationResult::Collection { items, .. } => items.is_empty(),
            _ => false,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, EvaluationResult::Collection { .. })
    }

    /// Number of items when viewed as a sequence: 0 for `Empty`, the item
    /// count for collections, 1 for everything else.
    pub fn count(&self) -> usize {
        match self {
            EvaluationResult::Empty => 0,
            EvaluationResult::Collection { items, .. } => items.len(),
            _ => 1,
        }
    }

    /// Flattens this value into its sequence items, consuming it.
    pub fn into_items(self) -> Vec<EvaluationResult> {
        match self {
            EvaluationResult::Empty => Vec::new(),
            EvaluationResult::Collection { items, .. } => items,
            single => vec![single],
        }
    }

    /// Boolean coercion for logical operators and `where` predicates:
    /// empty stays empty, a single boolean keeps its value, anything else
    /// is a type error (FHIRPath singleton evaluation).
    pub fn to_boolean_for_logic(&self) -> Result<EvaluationResult, EvaluationError> {
        match self {
            EvaluationResult::Empty => Ok(EvaluationResult::Empty),
            EvaluationResult::Boolean(b, _) => Ok(EvaluationResult::boolean(*b)),
            EvaluationResult::Collection { items, .. } => match items.len() {
                0 => Ok(EvaluationResult::Empty),
                1 => items[0].to_boolean_for_logic(),
                n => Err(EvaluationError::SingletonEvaluationError(format!(
                    "Expected singleton boolean, found collection with {} items",
                    n
                ))),
            },
            other => Err(EvaluationError::TypeError(format!(
                "Expected Boolean, found {}",
                other.type_name()
            ))),
        }
    }

    /// Lexical rendering used by `toString()` and `join()`.
    pub fn to_string_value(&self) -> String {
        match self {
            EvaluationResult::Empty => String::new(),
            EvaluationResult::Boolean(b, _) => b.to_string(),
            EvaluationResult::String(s, _) => s.clone(),
            EvaluationResult::Decimal(d, _) => d.to_string(),
            EvaluationResult::Integer(i, _) | EvaluationResult::Integer64(i, _) => i.to_string(),
            EvaluationResult::Date(s, _)
            | EvaluationResult::DateTime(s, _)
            | EvaluationResult::Time(s, _) => s.clone(),
            EvaluationResult::Collection { items, .. } => items
                .iter()
                .map(|i| i.to_string_value())
                .collect::<Vec<_>>()
                .join(", "),
            EvaluationResult::Object { .. } => "[object]".to_string(),
        }
    }

    /// The variant name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            EvaluationResult::Empty => "Empty",
            EvaluationResult::Boolean(_, _) => "Boolean",
            EvaluationResult::String(_, _) => "String",
            EvaluationResult::Decimal(_, _) => "Decimal",
            EvaluationResult::Integer(_, _) => "Integer",
            EvaluationResult::Integer64(_, _) => "Integer64",
            EvaluationResult::Date(_, _) => "Date",
            EvaluationResult::DateTime(_, _) => "DateTime",
            EvaluationResult::Time(_, _) => "Time",
            EvaluationResult::Collection { .. } => "Collection",
            EvaluationResult::Object { .. } => "Object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_type_tags() {
        let code = EvaluationResult::fhir_string("active".to_string(), "code");
        let plain = EvaluationResult::string("active".to_string());
        assert_eq!(code, plain);
    }

    #[test]
    fn decimal_equality_normalizes() {
        let a = EvaluationResult::decimal(Decimal::new(100, 2)); // 1.00
        let b = EvaluationResult::decimal(Decimal::new(1, 0)); // 1
        assert_eq!(a, b);
    }

    #[test]
    fn boolean_coercion_rules() {
        assert_eq!(
            EvaluationResult::Empty.to_boolean_for_logic(),
            Ok(EvaluationResult::Empty)
        );
        assert_eq!(
            EvaluationResult::boolean(true).to_boolean_for_logic(),
            Ok(EvaluationResult::boolean(true))
        );
        assert!(EvaluationResult::integer(3).to_boolean_for_logic().is_err());
        let multi = EvaluationResult::collection(vec![
            EvaluationResult::boolean(true),
            EvaluationResult::boolean(false),
        ]);
        assert!(matches!(
            multi.to_boolean_for_logic(),
            Err(EvaluationError::SingletonEvaluationError(_))
        ));
    }

    #[test]
    fn count_views_values_as_sequences() {
        assert_eq!(EvaluationResult::Empty.count(), 0);
        assert_eq!(EvaluationResult::integer(1).count(), 1);
        let coll = EvaluationResult::collection(vec![
            EvaluationResult::integer(1),
            EvaluationResult::integer(2),
        ]);
        assert_eq!(coll.count(), 2);
    }
}
