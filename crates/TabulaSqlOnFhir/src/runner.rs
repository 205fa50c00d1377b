//! Row generation: projecting one resource through a validated view.
//!
//! The generator walks the select tree carrying a set of partial rows
//! (`RowCombination`s), each a vector of cells indexed by schema position:
//!
//! - a select's own columns fill cells in every current partial row,
//! - sibling selects combine as a cross product (each contributes disjoint
//!   columns),
//! - `forEach` multiplies the current rows by its iteration items and
//!   `forEachOrNull` additionally keeps one all-null row for an empty
//!   iteration,
//! - `unionAll` evaluates each branch against the same context and
//!   concatenates the branch outputs vertically.
//!
//! Row and column order are fully deterministic: iteration items in source
//! order, union branches in declaration order, cells in schema order.

use std::sync::Arc;

use serde_json::Value;
use tabula_fhirpath::evaluator::{evaluate, EvaluationContext};
use tabula_fhirpath_support::{EvaluationError, EvaluationResult};

use crate::error::SofError;
use crate::schema::ViewSchema;
use crate::traits::ResourceSource;
use crate::view_definition::{Select, ViewDefinition};

/// One output row of a view, with cells in schema order. Cells are `None`
/// when the path produced nothing (or the row came from an empty
/// `forEachOrNull` branch).
#[derive(Debug, Clone)]
pub struct Row {
    schema: Arc<ViewSchema>,
    values: Vec<Option<Value>>,
}

impl Row {
    /// The cell under a column name; `None` for a null cell or an unknown
    /// column.
    pub fn get(&self, column_name: &str) -> Option<&Value> {
        let idx = self.schema.index_of(column_name)?;
        self.values[idx].as_ref()
    }

    /// The cell at a schema position.
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(|v| v.as_ref())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn schema(&self) -> &ViewSchema {
        &self.schema
    }

    /// The row as a JSON object keyed by column name, nulls included.
    pub fn to_json_object(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (column, value) in self.schema.columns.iter().zip(self.values.iter()) {
            map.insert(
                column.name.clone(),
                value.clone().unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }

    /// Cell rendering for CSV output: nulls are empty, strings are bare,
    /// everything else is its JSON text.
    pub fn csv_field(&self, index: usize) -> String {
        match self.values.get(index).and_then(|v| v.as_ref()) {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// The evaluation focus while walking a select tree: the resource root, or
/// an iteration item produced by `forEach`.
#[derive(Clone, Copy)]
enum Focus<'a> {
    Root,
    Node(&'a EvaluationResult),
}

#[derive(Debug, Clone)]
struct RowCombination {
    values: Vec<Option<Value>>,
}

/// Projects a resource through a validated view.
///
/// A resource whose `resourceType` differs from the view's `resource`, or
/// that fails a `where` predicate, contributes no rows; neither case is an
/// error.
pub(crate) fn apply_view<R>(view: &ViewDefinition, resource: &R) -> Result<Vec<Row>, SofError>
where
    R: ResourceSource + ?Sized,
{
    if resource.resource_type() != Some(view.resource()) {
        return Ok(Vec::new());
    }
    let context = EvaluationContext::new(resource.to_evaluation_result());

    for (i, clause) in view.where_clauses().iter().enumerate() {
        let expr = clause.expr.as_ref().expect("validated where clause");
        let result = evaluate(expr, &context, None).map_err(|e| {
            SofError::EvaluationError(format!(
                "Error evaluating where clause '{}': {}",
                clause.path().unwrap_or_default(),
                e
            ))
        })?;
        if !can_be_coerced_to_boolean(&result) {
            return Err(SofError::InvalidViewDefinition(format!(
                "Where clause where[{}] '{}' returns type '{}' which cannot be used as a \
                 boolean condition",
                i,
                clause.path().unwrap_or_default(),
                result.type_name()
            )));
        }
        if !is_truthy(&result) {
            return Ok(Vec::new());
        }
    }

    let schema = view.schema_arc();
    let mut combinations = vec![RowCombination {
        values: vec![None; schema.len()],
    }];
    for select in view.selects() {
        combinations = expand_select(&context, Focus::Root, select, &combinations, &schema)?;
    }

    Ok(combinations
        .into_iter()
        .map(|combo| Row {
            schema: Arc::clone(&schema),
            values: combo.values,
        })
        .collect())
}

/// Whether a where-clause result is usable as a condition. Booleans, empty,
/// and collections qualify; strings, numbers and objects do not.
fn can_be_coerced_to_boolean(result: &EvaluationResult) -> bool {
    matches!(
        result,
        EvaluationResult::Boolean(_, _)
            | EvaluationResult::Empty
            | EvaluationResult::Collection { .. }
    )
}

fn is_truthy(result: &EvaluationResult) -> bool {
    match result {
        EvaluationResult::Empty => false,
        EvaluationResult::Boolean(b, _) => *b,
        EvaluationResult::Collection { items, .. } => !items.is_empty(),
        _ => true,
    }
}

fn eval_at(
    context: &EvaluationContext,
    focus: Focus<'_>,
    expr: &tabula_fhirpath::Expression,
) -> Result<EvaluationResult, EvaluationError> {
    match focus {
        Focus::Root => evaluate(expr, context, None),
        Focus::Node(item) => evaluate(expr, context, Some(item)),
    }
}

/// Expands one select against the current partial rows, honouring its
/// iteration mode.
fn expand_select(
    context: &EvaluationContext,
    focus: Focus<'_>,
    select: &Select,
    combinations: &[RowCombination],
    schema: &ViewSchema,
) -> Result<Vec<RowCombination>, SofError> {
    let (iteration_expr, allow_null) = match (&select.for_each_expr, &select.for_each_or_null_expr)
    {
        (Some(expr), _) => (Some(expr), false),
        (None, Some(expr)) => (Some(expr), true),
        (None, None) => (None, false),
    };

    let Some(expr) = iteration_expr else {
        return expand_in_focus(context, focus, select, combinations, schema);
    };

    let iteration = eval_at(context, focus, expr).map_err(|e| {
        SofError::EvaluationError(format!(
            "Error evaluating forEach expression '{}': {}",
            select
                .for_each
                .as_deref()
                .or(select.for_each_or_null.as_deref())
                .unwrap_or_default(),
            e
        ))
    })?;
    let items = iteration.into_items();

    if items.is_empty() {
        if allow_null {
            // forEachOrNull over nothing: one row per existing combination,
            // with every column under this subtree left null.
            return Ok(combinations.to_vec());
        }
        // forEach over nothing: this select contributes no rows at all.
        return Ok(Vec::new());
    }

    let mut expanded = Vec::new();
    for item in &items {
        expanded.extend(expand_in_focus(
            context,
            Focus::Node(item),
            select,
            combinations,
            schema,
        )?);
    }
    Ok(expanded)
}

/// Expands a select's columns, nested selects and unionAll branches with a
/// fixed evaluation focus.
fn expand_in_focus(
    context: &EvaluationContext,
    focus: Focus<'_>,
    select: &Select,
    combinations: &[RowCombination],
    schema: &ViewSchema,
) -> Result<Vec<RowCombination>, SofError> {
    let mut out = Vec::new();
    for combination in combinations {
        let mut base = combination.clone();

        if let Some(columns) = &select.column {
            for column in columns {
                let name = column.name().expect("validated column");
                let idx = schema.index_of(name).expect("column is in the schema");
                let expr = column.expr.as_ref().expect("validated column");
                let result = eval_at(context, focus, expr).map_err(|e| {
                    SofError::EvaluationError(format!(
                        "Error evaluating column '{}' with path '{}': {}",
                        name,
                        column.path().unwrap_or_default(),
                        e
                    ))
                })?;
                base.values[idx] = if column.collection.unwrap_or(false) {
                    value_to_json_collection(result)
                } else {
                    value_to_json(result)
                };
            }
        }

        let mut current = vec![base];
        if let Some(nested) = &select.select {
            for child in nested {
                current = expand_select(context, focus, child, &current, schema)?;
            }
        }

        if let Some(branches) = &select.union_all {
            let mut union_rows = Vec::new();
            for branch in branches {
                union_rows.extend(expand_select(context, focus, branch, &current, schema)?);
            }
            current = union_rows;
        }

        out.extend(current);
    }
    Ok(out)
}

/// Converts a scalar cell. A path yielding several values fills the cell
/// with the first one; the declared single-value contract is the view
/// author's responsibility, and the engine never raises for it.
fn value_to_json(result: EvaluationResult) -> Option<Value> {
    match result {
        EvaluationResult::Empty => None,
        EvaluationResult::Boolean(b, _) => Some(Value::Bool(b)),
        EvaluationResult::Integer(i, _) | EvaluationResult::Integer64(i, _) => {
            Some(Value::Number(serde_json::Number::from(i)))
        }
        EvaluationResult::Decimal(d, _) => Some(decimal_to_json(d)),
        EvaluationResult::String(s, _)
        | EvaluationResult::Date(s, _)
        | EvaluationResult::DateTime(s, _)
        | EvaluationResult::Time(s, _) => Some(Value::String(s)),
        EvaluationResult::Collection { items, .. } => {
            items.into_iter().next().and_then(value_to_json)
        }
        EvaluationResult::Object { map, .. } => {
            let mut json_map = serde_json::Map::new();
            for (k, v) in map {
                if let Some(json_value) = value_to_json(v) {
                    json_map.insert(k, json_value);
                }
            }
            Some(Value::Object(json_map))
        }
    }
}

/// Converts a collection cell: always an array, empty included.
fn value_to_json_collection(result: EvaluationResult) -> Option<Value> {
    let values: Vec<Value> = result
        .into_items()
        .into_iter()
        .filter_map(value_to_json)
        .collect();
    Some(Value::Array(values))
}

/// Whole-number decimals render as integers, everything else keeps its
/// decimal representation (falling back to a string for values f64 cannot
/// hold).
fn decimal_to_json(d: rust_decimal::Decimal) -> Value {
    use std::str::FromStr;

    if d.fract().is_zero() {
        if let Ok(i) = i64::from_str(&d.normalize().to_string()) {
            return Value::Number(serde_json::Number::from(i));
        }
    }
    match f64::from_str(&d.to_string()) {
        Ok(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(d.to_string())),
        Err(_) => Value::String(d.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn scalar_conversion_takes_first_of_many() {
        let many = EvaluationResult::collection(vec![
            EvaluationResult::string("a".to_string()),
            EvaluationResult::string("b".to_string()),
        ]);
        assert_eq!(value_to_json(many), Some(Value::String("a".to_string())));
    }

    #[test]
    fn collection_conversion_always_yields_an_array() {
        assert_eq!(
            value_to_json_collection(EvaluationResult::Empty),
            Some(Value::Array(vec![]))
        );
        assert_eq!(
            value_to_json_collection(EvaluationResult::string("x".to_string())),
            Some(Value::Array(vec![Value::String("x".to_string())]))
        );
    }

    #[test]
    fn whole_decimals_render_as_integers() {
        assert_eq!(
            decimal_to_json(Decimal::new(500, 2)), // 5.00
            Value::Number(serde_json::Number::from(5))
        );
        assert_eq!(
            decimal_to_json(Decimal::new(55, 1)), // 5.5
            serde_json::json!(5.5)
        );
    }

    #[test]
    fn truthiness_rules() {
        assert!(!is_truthy(&EvaluationResult::Empty));
        assert!(!is_truthy(&EvaluationResult::boolean(false)));
        assert!(is_truthy(&EvaluationResult::boolean(true)));
        assert!(is_truthy(&EvaluationResult::collection(vec![
            EvaluationResult::integer(1)
        ])));
        assert!(!is_truthy(&EvaluationResult::collection(vec![])));
    }

    #[test]
    fn where_coercion_accepts_booleans_and_collections_only() {
        assert!(can_be_coerced_to_boolean(&EvaluationResult::boolean(true)));
        assert!(can_be_coerced_to_boolean(&EvaluationResult::Empty));
        assert!(can_be_coerced_to_boolean(&EvaluationResult::collection(
            vec![]
        )));
        assert!(!can_be_coerced_to_boolean(&EvaluationResult::string(
            "active".to_string()
        )));
        assert!(!can_be_coerced_to_boolean(&EvaluationResult::integer(1)));
    }
}
