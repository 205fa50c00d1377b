use serde_json::{json, Value};
use tabula_sql_on_fhir::{run_view_definition, SofError, ViewDefinition};

/// A flattening view over Condition resources exercising scalar columns,
/// reference keys, choice types, forEach and forEachOrNull together.
fn condition_flat() -> ViewDefinition {
    ViewDefinition::from_json(&json!({
        "resourceType": "ViewDefinition",
        "name": "condition_flat",
        "status": "active",
        "resource": "Condition",
        "select": [
            {"column": [
                {"name": "id", "path": "getResourceKey()"},
                {"name": "patient_id", "path": "subject.getReferenceKey(Patient)"},
                {"name": "encounter_id", "path": "encounter.getReferenceKey(Encounter)"},
                {"name": "onset_datetime", "path": "onset.ofType(dateTime)"}
            ]},
            {"forEach": "code.coding", "column": [
                {"name": "code_code", "path": "code"},
                {"name": "code_sys", "path": "system"},
                {"name": "code_display", "path": "display"}
            ]},
            {"forEach": "category.coding", "column": [
                {"name": "category", "path": "code"}
            ]},
            {"forEachOrNull": "clinicalStatus.coding", "column": [
                {"name": "clinical_status", "path": "code"}
            ]},
            {"forEachOrNull": "verificationStatus.coding", "column": [
                {"name": "verification_status", "path": "code"}
            ]}
        ]
    }))
    .unwrap()
}

fn condition_resource() -> Value {
    json!({
        "resourceType": "Condition",
        "id": "c1",
        "subject": {"reference": "Patient/p1"},
        "onsetDateTime": "2020-01-01",
        "code": {"coding": [{"system": "s1", "code": "A", "display": "dA"}]},
        "clinicalStatus": {"coding": [{"code": "active"}]},
        "verificationStatus": {"coding": []},
        "category": [{"coding": [{"code": "c"}]}]
    })
}

#[test]
fn scalar_projection_produces_one_row() {
    let view = condition_flat();
    let rows = view.apply(&condition_resource()).unwrap();

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.len(), view.schema().len());
    assert_eq!(row.get("id"), Some(&json!("c1")));
    assert_eq!(row.get("patient_id"), Some(&json!("p1")));
    assert_eq!(row.get("encounter_id"), None);
    assert_eq!(row.get("onset_datetime"), Some(&json!("2020-01-01")));
    assert_eq!(row.get("code_code"), Some(&json!("A")));
    assert_eq!(row.get("code_sys"), Some(&json!("s1")));
    assert_eq!(row.get("code_display"), Some(&json!("dA")));
    assert_eq!(row.get("category"), Some(&json!("c")));
    assert_eq!(row.get("clinical_status"), Some(&json!("active")));
    assert_eq!(row.get("verification_status"), None);
}

#[test]
fn sibling_iterators_multiply_rows() {
    let view = condition_flat();
    let mut resource = condition_resource();
    resource["code"]["coding"] = json!([{"code": "A"}, {"code": "B"}]);
    resource["category"] = json!([{"coding": [{"code": "x"}, {"code": "y"}]}]);

    let rows = view.apply(&resource).unwrap();
    assert_eq!(rows.len(), 4, "2 codes x 2 categories");

    let mut combos: Vec<(String, String)> = rows
        .iter()
        .map(|r| {
            (
                r.get("code_code").unwrap().as_str().unwrap().to_string(),
                r.get("category").unwrap().as_str().unwrap().to_string(),
            )
        })
        .collect();
    combos.sort();
    assert_eq!(
        combos,
        vec![
            ("A".to_string(), "x".to_string()),
            ("A".to_string(), "y".to_string()),
            ("B".to_string(), "x".to_string()),
            ("B".to_string(), "y".to_string()),
        ]
    );
}

#[test]
fn for_each_over_empty_sequence_drops_all_rows() {
    let view = condition_flat();
    let mut resource = condition_resource();
    resource["code"]["coding"] = json!([]);

    let rows = view.apply(&resource).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn for_each_or_null_over_empty_sequence_keeps_one_null_row() {
    let view = ViewDefinition::from_json(&json!({
        "name": "status_or_null",
        "resource": "Condition",
        "select": [
            {"column": [{"name": "id", "path": "id"}]},
            {"forEachOrNull": "verificationStatus.coding", "column": [
                {"name": "verification_status", "path": "code"}
            ]}
        ]
    }))
    .unwrap();

    let rows = view
        .apply(&json!({"resourceType": "Condition", "id": "c1"}))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&json!("c1")));
    assert_eq!(rows[0].get("verification_status"), None);
}

#[test]
fn for_each_or_null_nulls_nested_columns_too() {
    let view = ViewDefinition::from_json(&json!({
        "name": "nested_or_null",
        "resource": "Patient",
        "select": [
            {"column": [{"name": "id", "path": "id"}]},
            {"forEachOrNull": "contact", "select": [{
                "column": [{"name": "contact_family", "path": "name.family"}]
            }]}
        ]
    }))
    .unwrap();

    let rows = view
        .apply(&json!({"resourceType": "Patient", "id": "p1"}))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("contact_family"), None);
}

#[test]
fn constant_substitution_end_to_end() {
    let view = ViewDefinition::from_json(&json!({
        "name": "high_values",
        "resource": "Observation",
        "constant": [{"name": "threshold", "valueInteger": 5}],
        "select": [{
            "column": [{
                "name": "high",
                "path": "value.where($this > %threshold)",
                "collection": true
            }]
        }]
    }))
    .unwrap();

    let rows = view
        .apply(&json!({"resourceType": "Observation", "value": [3, 7, 9]}))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("high"), Some(&json!([7, 9])));
}

#[test]
fn of_type_polymorphism_picks_matching_variant_only() {
    let view = ViewDefinition::from_json(&json!({
        "name": "onset_view",
        "resource": "Condition",
        "select": [{
            "column": [{"name": "onset_datetime", "path": "onset.ofType(dateTime)"}]
        }]
    }))
    .unwrap();

    // onsetPeriod present: the dateTime column is null.
    let rows = view
        .apply(&json!({
            "resourceType": "Condition",
            "onsetPeriod": {"start": "2020"}
        }))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("onset_datetime"), None);

    // onsetDateTime present: the value comes through.
    let rows = view
        .apply(&json!({
            "resourceType": "Condition",
            "onsetDateTime": "2020-05-01"
        }))
        .unwrap();
    assert_eq!(rows[0].get("onset_datetime"), Some(&json!("2020-05-01")));
}

#[test]
fn union_all_appends_rows_in_branch_order() {
    let view = ViewDefinition::from_json(&json!({
        "name": "patient_contacts",
        "resource": "Patient",
        "select": [{
            "column": [{"name": "id", "path": "id"}],
            "unionAll": [
                {"forEach": "telecom", "column": [{"name": "value", "path": "value"}]},
                {"forEach": "address", "column": [{"name": "value", "path": "text"}]}
            ]
        }]
    }))
    .unwrap();

    let rows = view
        .apply(&json!({
            "resourceType": "Patient",
            "id": "p1",
            "telecom": [{"value": "t1"}, {"value": "t2"}],
            "address": [{"text": "a1"}]
        }))
        .unwrap();

    let values: Vec<&Value> = rows.iter().map(|r| r.get("value").unwrap()).collect();
    assert_eq!(values, vec![&json!("t1"), &json!("t2"), &json!("a1")]);
    for row in &rows {
        assert_eq!(row.get("id"), Some(&json!("p1")));
    }
}

#[test]
fn union_schema_conflict_fails_validation() {
    let result = ViewDefinition::from_json(&json!({
        "name": "bad_union",
        "resource": "Patient",
        "select": [{
            "unionAll": [
                {"column": [
                    {"name": "a", "path": "id"},
                    {"name": "b", "path": "gender"}
                ]},
                {"column": [
                    {"name": "b", "path": "gender"},
                    {"name": "a", "path": "id"}
                ]}
            ]
        }]
    }));
    assert!(matches!(result, Err(SofError::InvalidViewDefinition(_))));
}

#[test]
fn where_clause_filters_resources() {
    let view = ViewDefinition::from_json(&json!({
        "name": "active_patients",
        "resource": "Patient",
        "where": [{"path": "active = true"}],
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    }))
    .unwrap();

    let active = json!({"resourceType": "Patient", "id": "p1", "active": true});
    let inactive = json!({"resourceType": "Patient", "id": "p2", "active": false});
    let missing = json!({"resourceType": "Patient", "id": "p3"});

    assert_eq!(view.apply(&active).unwrap().len(), 1);
    assert_eq!(view.apply(&inactive).unwrap().len(), 0);
    assert_eq!(view.apply(&missing).unwrap().len(), 0);
}

#[test]
fn all_true_where_clauses_match_absence_of_where() {
    let with_where = ViewDefinition::from_json(&json!({
        "name": "v1",
        "resource": "Patient",
        "where": [{"path": "id.exists()"}, {"path": "true"}],
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    }))
    .unwrap();
    let without_where = ViewDefinition::from_json(&json!({
        "name": "v2",
        "resource": "Patient",
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    }))
    .unwrap();

    let patient = json!({"resourceType": "Patient", "id": "p1"});
    let a = with_where.apply(&patient).unwrap();
    let b = without_where.apply(&patient).unwrap();
    assert_eq!(a.len(), b.len());
    assert_eq!(a[0].get("id"), b[0].get("id"));
}

#[test]
fn non_boolean_where_clause_is_an_error() {
    let view = ViewDefinition::from_json(&json!({
        "name": "bad_where",
        "resource": "Patient",
        "where": [{"path": "gender"}],
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    }))
    .unwrap();

    let err = view
        .apply(&json!({"resourceType": "Patient", "id": "p1", "gender": "female"}))
        .unwrap_err();
    assert!(matches!(err, SofError::InvalidViewDefinition(_)));
}

#[test]
fn resource_type_mismatch_yields_no_rows() {
    let view = condition_flat();
    let rows = view
        .apply(&json!({"resourceType": "Patient", "id": "p1"}))
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn collection_column_holds_full_sequence() {
    let view = ViewDefinition::from_json(&json!({
        "name": "patient_names",
        "resource": "Patient",
        "select": [{
            "forEach": "name",
            "column": [
                {"name": "family", "path": "family"},
                {"name": "given", "path": "given", "collection": true}
            ]
        }]
    }))
    .unwrap();

    let rows = view
        .apply(&json!({
            "resourceType": "Patient",
            "name": [
                {"family": "Doe", "given": ["John", "Q"]},
                {"family": "Roe"}
            ]
        }))
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("given"), Some(&json!(["John", "Q"])));
    assert_eq!(rows[1].get("given"), Some(&json!([])));
}

#[test]
fn scalar_column_takes_first_of_many_without_error() {
    let view = ViewDefinition::from_json(&json!({
        "name": "first_given",
        "resource": "Patient",
        "select": [{"column": [{"name": "given", "path": "name.given"}]}]
    }))
    .unwrap();

    let rows = view
        .apply(&json!({
            "resourceType": "Patient",
            "name": [{"given": ["John", "Q"]}]
        }))
        .unwrap();
    assert_eq!(rows[0].get("given"), Some(&json!("John")));
}

#[test]
fn nested_select_under_for_each_multiplies_within_each_item() {
    let view = ViewDefinition::from_json(&json!({
        "name": "name_parts",
        "resource": "Patient",
        "select": [{
            "forEach": "name",
            "column": [{"name": "family", "path": "family"}],
            "select": [{
                "forEach": "given",
                "column": [{"name": "given", "path": "$this"}]
            }]
        }]
    }))
    .unwrap();

    let rows = view
        .apply(&json!({
            "resourceType": "Patient",
            "name": [
                {"family": "Doe", "given": ["John", "Q"]},
                {"family": "Roe", "given": ["Jane"]}
            ]
        }))
        .unwrap();

    let pairs: Vec<(String, String)> = rows
        .iter()
        .map(|r| {
            (
                r.get("family").unwrap().as_str().unwrap().to_string(),
                r.get("given").unwrap().as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("Doe".to_string(), "John".to_string()),
            ("Doe".to_string(), "Q".to_string()),
            ("Roe".to_string(), "Jane".to_string()),
        ]
    );
}

#[test]
fn apply_is_deterministic() {
    let view = condition_flat();
    let resource = condition_resource();
    let first: Vec<Value> = view
        .apply(&resource)
        .unwrap()
        .iter()
        .map(|r| r.to_json_object())
        .collect();
    let second: Vec<Value> = view
        .apply(&resource)
        .unwrap()
        .iter()
        .map(|r| r.to_json_object())
        .collect();
    assert_eq!(first, second);
}

#[test]
fn run_view_definition_concatenates_in_input_order() {
    let view = ViewDefinition::from_json(&json!({
        "name": "ids",
        "resource": "Patient",
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    }))
    .unwrap();

    let resources: Vec<Value> = (0..20)
        .map(|i| json!({"resourceType": "Patient", "id": format!("p{}", i)}))
        .collect();
    let result = run_view_definition(&view, &resources).unwrap();
    assert_eq!(result.rows.len(), 20);
    for (i, row) in result.rows.iter().enumerate() {
        assert_eq!(row.get("id"), Some(&json!(format!("p{}", i))));
    }
}

#[test]
fn schema_reports_names_types_and_collection_flags() {
    let view = condition_flat();
    let schema = view.schema();
    assert!(!schema.is_empty());
    assert_eq!(
        schema.names().collect::<Vec<_>>(),
        vec![
            "id",
            "patient_id",
            "encounter_id",
            "onset_datetime",
            "code_code",
            "code_sys",
            "code_display",
            "category",
            "clinical_status",
            "verification_status"
        ]
    );
    let onset = &schema.columns[3];
    assert_eq!(onset.fhir_type, "dateTime");
    assert!(!onset.collection);
    for row in view.apply(&condition_resource()).unwrap() {
        assert_eq!(row.len(), schema.len());
    }
}
