//! Abstraction over resource inputs.
//!
//! The engine does not care how the host stores resources; it only needs a
//! `resourceType` tag and a conversion into the evaluation value model. The
//! blanket JSON implementation covers the common case; hosts with their own
//! resource representation implement [`ResourceSource`] once and pass their
//! type straight to [`crate::ViewDefinition::apply_resource`].

use serde_json::Value;
use tabula_fhirpath_support::{json, EvaluationResult};

/// A resource the engine can project through a view.
pub trait ResourceSource {
    /// The FHIR resource type, used to match against
    /// `ViewDefinition.resource`.
    fn resource_type(&self) -> Option<&str>;

    /// The resource as an evaluation value tree. Called once per
    /// projection; the engine does not retain the result past the call.
    fn to_evaluation_result(&self) -> EvaluationResult;
}

impl ResourceSource for Value {
    fn resource_type(&self) -> Option<&str> {
        self.get("resourceType").and_then(Value::as_str)
    }

    fn to_evaluation_result(&self) -> EvaluationResult {
        json::from_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_values_are_resource_sources() {
        let patient = json!({"resourceType": "Patient", "id": "p1"});
        assert_eq!(patient.resource_type(), Some("Patient"));
        assert!(matches!(
            patient.to_evaluation_result(),
            EvaluationResult::Object { .. }
        ));

        let not_a_resource = json!({"id": "p1"});
        assert_eq!(not_a_resource.resource_type(), None);
    }
}
