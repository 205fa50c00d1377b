use serde_json::json;
use tabula_fhirpath::{evaluate_expression, EvaluationContext, EvaluationResult};

fn condition_context() -> EvaluationContext {
    EvaluationContext::from_json(&json!({
        "resourceType": "Condition",
        "id": "c1",
        "subject": {"reference": "Patient/p1"},
        "onsetDateTime": "2020-01-01",
        "code": {
            "coding": [
                {"system": "s1", "code": "A", "display": "dA"},
                {"system": "s2", "code": "B", "display": "dB"}
            ]
        },
        "clinicalStatus": {"coding": [{"code": "active"}]},
        "verificationStatus": {"coding": []}
    }))
}

#[test]
fn navigates_nested_fields() {
    let ctx = condition_context();
    let result = evaluate_expression("code.coding.code", &ctx).unwrap();
    assert_eq!(
        result,
        EvaluationResult::collection(vec![
            EvaluationResult::String("A".to_string(), None),
            EvaluationResult::String("B".to_string(), None),
        ])
    );
}

#[test]
fn absent_fields_evaluate_to_empty() {
    let ctx = condition_context();
    let result = evaluate_expression("encounter.reference", &ctx).unwrap();
    assert_eq!(result, EvaluationResult::Empty);
}

#[test]
fn root_identifier_matching_resource_type_is_the_resource() {
    let ctx = condition_context();
    let via_root = evaluate_expression("Condition.id", &ctx).unwrap();
    let direct = evaluate_expression("id", &ctx).unwrap();
    assert_eq!(via_root, direct);
    assert_eq!(via_root, EvaluationResult::String("c1".to_string(), None));
}

#[test]
fn indexing_is_zero_based_and_out_of_bounds_is_empty() {
    let ctx = condition_context();
    let first = evaluate_expression("code.coding[0].code", &ctx).unwrap();
    assert_eq!(first, EvaluationResult::String("A".to_string(), None));
    let missing = evaluate_expression("code.coding[5].code", &ctx).unwrap();
    assert_eq!(missing, EvaluationResult::Empty);
}

#[test]
fn first_last_count() {
    let ctx = condition_context();
    assert_eq!(
        evaluate_expression("code.coding.first().code", &ctx).unwrap(),
        EvaluationResult::String("A".to_string(), None)
    );
    assert_eq!(
        evaluate_expression("code.coding.last().code", &ctx).unwrap(),
        EvaluationResult::String("B".to_string(), None)
    );
    assert_eq!(
        evaluate_expression("code.coding.count()", &ctx).unwrap(),
        EvaluationResult::integer(2)
    );
}

#[test]
fn exists_and_empty() {
    let ctx = condition_context();
    assert_eq!(
        evaluate_expression("code.coding.exists()", &ctx).unwrap(),
        EvaluationResult::boolean(true)
    );
    assert_eq!(
        evaluate_expression("verificationStatus.coding.exists()", &ctx).unwrap(),
        EvaluationResult::boolean(false)
    );
    assert_eq!(
        evaluate_expression("verificationStatus.coding.empty()", &ctx).unwrap(),
        EvaluationResult::boolean(true)
    );
}

#[test]
fn where_filters_by_predicate() {
    let ctx = condition_context();
    let result = evaluate_expression("code.coding.where(system = 's2').code", &ctx).unwrap();
    assert_eq!(result, EvaluationResult::String("B".to_string(), None));
}

#[test]
fn where_with_dollar_this() {
    let ctx = EvaluationContext::from_json(&json!({
        "resourceType": "Observation",
        "value": [1, 7, 3, 9]
    }));
    let result = evaluate_expression("value.where($this > 5)", &ctx).unwrap();
    assert_eq!(
        result,
        EvaluationResult::collection(vec![
            EvaluationResult::Integer(7, None),
            EvaluationResult::Integer(9, None),
        ])
    );
}

#[test]
fn select_projects_and_flattens() {
    let ctx = condition_context();
    let result = evaluate_expression("code.coding.select(code)", &ctx).unwrap();
    assert_eq!(result.count(), 2);
}

#[test]
fn join_concatenates_strings() {
    let ctx = condition_context();
    let result = evaluate_expression("code.coding.code.join(',')", &ctx).unwrap();
    assert_eq!(result, EvaluationResult::string("A,B".to_string()));
    let bare = evaluate_expression("code.coding.code.join()", &ctx).unwrap();
    assert_eq!(bare, EvaluationResult::string("AB".to_string()));
}

#[test]
fn of_type_picks_present_choice_variant() {
    let ctx = condition_context();
    let result = evaluate_expression("onset.ofType(dateTime)", &ctx).unwrap();
    assert_eq!(
        result.as_string(),
        Some("2020-01-01"),
        "expected the onsetDateTime variant"
    );
}

#[test]
fn of_type_on_mismatched_variant_is_empty() {
    let ctx = EvaluationContext::from_json(&json!({
        "resourceType": "Condition",
        "onsetPeriod": {"start": "2020"}
    }));
    let result = evaluate_expression("onset.ofType(dateTime)", &ctx).unwrap();
    assert_eq!(result, EvaluationResult::Empty);
    let period = evaluate_expression("onset.ofType(Period).start", &ctx).unwrap();
    assert_eq!(period, EvaluationResult::String("2020".to_string(), None));
}

#[test]
fn get_resource_key_returns_id() {
    let ctx = condition_context();
    let result = evaluate_expression("getResourceKey()", &ctx).unwrap();
    assert_eq!(result, EvaluationResult::string("c1".to_string()));
}

#[test]
fn get_reference_key_with_and_without_filter() {
    let ctx = condition_context();
    assert_eq!(
        evaluate_expression("subject.getReferenceKey()", &ctx).unwrap(),
        EvaluationResult::string("p1".to_string())
    );
    assert_eq!(
        evaluate_expression("subject.getReferenceKey(Patient)", &ctx).unwrap(),
        EvaluationResult::string("p1".to_string())
    );
    assert_eq!(
        evaluate_expression("subject.getReferenceKey(Encounter)", &ctx).unwrap(),
        EvaluationResult::Empty
    );
}

#[test]
fn equality_and_boolean_operators() {
    let ctx = condition_context();
    assert_eq!(
        evaluate_expression("id = 'c1'", &ctx).unwrap(),
        EvaluationResult::boolean(true)
    );
    assert_eq!(
        evaluate_expression("id != 'c1'", &ctx).unwrap(),
        EvaluationResult::boolean(false)
    );
    assert_eq!(
        evaluate_expression("id = 'c1' and code.coding.exists()", &ctx).unwrap(),
        EvaluationResult::boolean(true)
    );
    assert_eq!(
        evaluate_expression("id = 'zzz' or id = 'c1'", &ctx).unwrap(),
        EvaluationResult::boolean(true)
    );
}

#[test]
fn equality_against_empty_is_empty() {
    let ctx = condition_context();
    let result = evaluate_expression("encounter.reference = 'e1'", &ctx).unwrap();
    assert_eq!(result, EvaluationResult::Empty);
}

#[test]
fn date_literal_compares_lexically_with_field() {
    let ctx = condition_context();
    assert_eq!(
        evaluate_expression("onset.ofType(dateTime) = @2020-01-01", &ctx).unwrap(),
        EvaluationResult::boolean(true)
    );
    assert_eq!(
        evaluate_expression("onset.ofType(dateTime) < @2021-01-01", &ctx).unwrap(),
        EvaluationResult::boolean(true)
    );
}

#[test]
fn not_negates_boolean_coercion() {
    let ctx = condition_context();
    assert_eq!(
        evaluate_expression("verificationStatus.coding.exists().not()", &ctx).unwrap(),
        EvaluationResult::boolean(true)
    );
}

#[test]
fn unknown_function_is_an_error() {
    let ctx = condition_context();
    let err = evaluate_expression("code.coding.aggregate($this)", &ctx).unwrap_err();
    assert!(err.contains("aggregate"), "got: {}", err);
}

#[test]
fn undefined_variable_is_an_error() {
    let ctx = condition_context();
    let err = evaluate_expression("code.coding.where(code = %missing)", &ctx).unwrap_err();
    assert!(err.contains("%missing"), "got: {}", err);
}

#[test]
fn type_mismatch_in_comparison_is_an_error() {
    let ctx = condition_context();
    assert!(evaluate_expression("id = true", &ctx).is_err());
}

#[test]
fn evaluation_is_deterministic() {
    let ctx = condition_context();
    let a = evaluate_expression("code.coding.code", &ctx).unwrap();
    let b = evaluate_expression("code.coding.code", &ctx).unwrap();
    assert_eq!(a, b);
}
