//! Recursive evaluator for the SQL-on-FHIR FHIRPath dialect.
//!
//! Takes a parsed [`Expression`] and walks it against a resource, producing
//! an [`EvaluationResult`]. The evaluator is pure and reentrant: the current
//! focus item is threaded through as an explicit parameter, never ambient
//! state, so a single context can serve any number of concurrent
//! evaluations.
//!
//! Semantics follow the SQL-on-FHIR evaluation profile:
//!
//! - every value is a sequence; absent fields evaluate to `Empty`, never an
//!   error
//! - navigation on a collection applies element-wise and flattens
//! - choice elements (`onset[x]`) resolve by base name and carry their
//!   concrete type, so `ofType(dateTime)` picks the `onsetDateTime` variant
//! - boolean coercion: empty is false, a single boolean is itself, anything
//!   else is a type error

use std::collections::HashMap;

use tabula_fhirpath_support::{json, EvaluationError, EvaluationResult};

use crate::fhir_types::matches_fhir_type;
use crate::parser::{Expression, Invocation, Literal, Term};
use crate::polymorphic::access_choice_element;
use crate::reference_key;

/// Evaluation environment for FHIRPath expressions.
///
/// Holds the resource under evaluation and any environment variables
/// (`%name` references). The focus item for iteration functions is passed to
/// [`evaluate`] directly, keeping the context immutable during a walk.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// The resource being evaluated.
    pub resource: EvaluationResult,
    /// Environment variables available as `%name`.
    pub variables: HashMap<String, EvaluationResult>,
    /// Overrides the root focus when set; used by callers that evaluate
    /// sub-expressions against an interior node.
    pub this: Option<EvaluationResult>,
}

impl EvaluationContext {
    pub fn new(resource: EvaluationResult) -> Self {
        Self {
            resource,
            variables: HashMap::new(),
            this: None,
        }
    }

    /// Context over a resource given as plain JSON.
    pub fn from_json(resource: &serde_json::Value) -> Self {
        Self::new(json::from_json(resource))
    }

    pub fn new_empty() -> Self {
        Self::new(EvaluationResult::Empty)
    }

    pub fn set_variable_result(&mut self, name: &str, value: EvaluationResult) {
        self.variables.insert(name.to_string(), value);
    }
}

/// Evaluates an expression against a context.
///
/// `current_item` is the focus for iteration bodies (`where`, `select`);
/// when `None` the focus is the context's `this` override or the resource
/// itself.
pub fn evaluate(
    expr: &Expression,
    context: &EvaluationContext,
    current_item: Option<&EvaluationResult>,
) -> Result<EvaluationResult, EvaluationError> {
    // A root identifier that names the context's resource type resolves to
    // the resource itself, so `Condition.code` and `code` are equivalent at
    // the top of a path.
    if current_item.is_none() {
        if let Expression::Term(Term::Invocation(Invocation::Member(initial_name))) = expr {
            let root = root_focus(context);
            if let EvaluationResult::Object { map, .. } = &root {
                if let Some(EvaluationResult::String(ctx_type, _)) = map.get("resourceType") {
                    if initial_name.eq_ignore_ascii_case(ctx_type) {
                        return Ok(root);
                    }
                }
            }
        }
    }

    match expr {
        Expression::Term(term) => evaluate_term(term, context, current_item),
        Expression::Invocation(left_expr, invocation) => {
            let left_result = evaluate(left_expr, context, current_item)?;
            evaluate_invocation(&left_result, invocation, context, current_item)
        }
        Expression::Indexer(left, index) => {
            let left_result = evaluate(left, context, current_item)?;
            let index_result = evaluate(index, context, None)?;
            evaluate_indexer(&left_result, &index_result)
        }
        Expression::Inequality(left, op, right) => {
            let left_result = evaluate(left, context, current_item)?;
            let right_result = evaluate(right, context, current_item)?;
            compare_inequality(&left_result, op, &right_result)
        }
        Expression::Equality(left, op, right) => {
            let left_result = evaluate(left, context, current_item)?;
            let right_result = evaluate(right, context, current_item)?;
            compare_equality(&left_result, op, &right_result)
        }
        Expression::And(left, right) => {
            let lb = truth_of(&evaluate(left, context, current_item)?)?;
            if !lb {
                return Ok(EvaluationResult::boolean(false));
            }
            let rb = truth_of(&evaluate(right, context, current_item)?)?;
            Ok(EvaluationResult::boolean(rb))
        }
        Expression::Or(left, right) => {
            let lb = truth_of(&evaluate(left, context, current_item)?)?;
            if lb {
                return Ok(EvaluationResult::boolean(true));
            }
            let rb = truth_of(&evaluate(right, context, current_item)?)?;
            Ok(EvaluationResult::boolean(rb))
        }
    }
}

/// The focus when no current item is set.
fn root_focus(context: &EvaluationContext) -> EvaluationResult {
    if let Some(this) = &context.this {
        this.clone()
    } else {
        context.resource.clone()
    }
}

fn evaluate_term(
    term: &Term,
    context: &EvaluationContext,
    current_item: Option<&EvaluationResult>,
) -> Result<EvaluationResult, EvaluationError> {
    match term {
        Term::Literal(literal) => Ok(literal_to_result(literal)),
        Term::ExternalConstant(name) => context
            .variables
            .get(name)
            .cloned()
            .ok_or_else(|| EvaluationError::UndefinedVariable(format!("%{}", name))),
        Term::Parenthesized(expr) => evaluate(expr, context, current_item),
        Term::Invocation(invocation) => {
            let base = match current_item {
                Some(item) => item.clone(),
                None => root_focus(context),
            };
            evaluate_invocation(&base, invocation, context, current_item)
        }
    }
}

fn literal_to_result(literal: &Literal) -> EvaluationResult {
    match literal {
        Literal::Null => EvaluationResult::Empty,
        Literal::Boolean(b) => EvaluationResult::boolean(*b),
        Literal::String(s) => EvaluationResult::string(s.clone()),
        Literal::Number(d) => EvaluationResult::decimal(*d),
        Literal::Integer(i) => EvaluationResult::integer(*i),
        Literal::Date(s) => EvaluationResult::date(s.clone()),
        Literal::DateTime(s) => EvaluationResult::datetime(s.clone()),
        Literal::Time(s) => EvaluationResult::time(s.clone()),
    }
}

fn evaluate_invocation(
    invocation_base: &EvaluationResult,
    invocation: &Invocation,
    context: &EvaluationContext,
    current_item: Option<&EvaluationResult>,
) -> Result<EvaluationResult, EvaluationError> {
    match invocation {
        Invocation::This => Ok(match current_item {
            Some(item) => item.clone(),
            None => root_focus(context),
        }),
        Invocation::Member(name) => Ok(navigate_member(invocation_base, name)),
        Invocation::Function(name, args) => {
            call_function(invocation_base, name, args, context, current_item)
        }
    }
}

/// Field navigation. Applies element-wise over collections and flattens;
/// absent fields produce `Empty`. Misses on an object fall back to
/// choice-element resolution.
fn navigate_member(base: &EvaluationResult, name: &str) -> EvaluationResult {
    match base {
        EvaluationResult::Object { map, .. } => {
            if let Some(value) = map.get(name) {
                value.clone()
            } else {
                access_choice_element(map, name).unwrap_or(EvaluationResult::Empty)
            }
        }
        EvaluationResult::Collection { items, .. } => {
            let mut results = Vec::new();
            for item in items {
                match navigate_member(item, name) {
                    EvaluationResult::Empty => {}
                    EvaluationResult::Collection { items: nested, .. } => results.extend(nested),
                    single => results.push(single),
                }
            }
            flatten_items(results)
        }
        _ => EvaluationResult::Empty,
    }
}

/// 0 items is `Empty`, 1 item is the item, more is a collection.
fn flatten_items(items: Vec<EvaluationResult>) -> EvaluationResult {
    match items.len() {
        0 => EvaluationResult::Empty,
        1 => items.into_iter().next().unwrap(),
        _ => EvaluationResult::collection(items),
    }
}

fn require_no_args(name: &str, args: &[Expression]) -> Result<(), EvaluationError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(EvaluationError::InvalidArity(format!(
            "Function '{}' expects no arguments",
            name
        )))
    }
}

fn call_function(
    invocation_base: &EvaluationResult,
    name: &str,
    args: &[Expression],
    context: &EvaluationContext,
    current_item: Option<&EvaluationResult>,
) -> Result<EvaluationResult, EvaluationError> {
    match name {
        "exists" => {
            require_no_args(name, args)?;
            Ok(EvaluationResult::boolean(invocation_base.count() > 0))
        }
        "empty" => {
            require_no_args(name, args)?;
            Ok(EvaluationResult::boolean(invocation_base.count() == 0))
        }
        "count" => {
            require_no_args(name, args)?;
            Ok(EvaluationResult::integer(invocation_base.count() as i64))
        }
        "first" => {
            require_no_args(name, args)?;
            Ok(match invocation_base {
                EvaluationResult::Collection { items, .. } => {
                    items.first().cloned().unwrap_or(EvaluationResult::Empty)
                }
                EvaluationResult::Empty => EvaluationResult::Empty,
                single => single.clone(),
            })
        }
        "last" => {
            require_no_args(name, args)?;
            Ok(match invocation_base {
                EvaluationResult::Collection { items, .. } => {
                    items.last().cloned().unwrap_or(EvaluationResult::Empty)
                }
                EvaluationResult::Empty => EvaluationResult::Empty,
                single => single.clone(),
            })
        }
        "not" => {
            require_no_args(name, args)?;
            match invocation_base.to_boolean_for_logic()? {
                EvaluationResult::Empty => Ok(EvaluationResult::Empty),
                EvaluationResult::Boolean(b, _) => Ok(EvaluationResult::boolean(!b)),
                _ => unreachable!("to_boolean_for_logic yields Empty or Boolean"),
            }
        }
        "where" => {
            if args.len() != 1 {
                return Err(EvaluationError::InvalidArity(
                    "Function 'where' expects exactly 1 argument (criteria)".to_string(),
                ));
            }
            let mut kept = Vec::new();
            for item in invocation_base.clone().into_items() {
                let verdict = evaluate(&args[0], context, Some(&item))?;
                match verdict.to_boolean_for_logic()? {
                    EvaluationResult::Boolean(true, _) => kept.push(item),
                    _ => {}
                }
            }
            Ok(flatten_items(kept))
        }
        "select" => {
            if args.len() != 1 {
                return Err(EvaluationError::InvalidArity(
                    "Function 'select' expects exactly 1 argument (projection)".to_string(),
                ));
            }
            let mut projected = Vec::new();
            for item in invocation_base.clone().into_items() {
                let result = evaluate(&args[0], context, Some(&item))?;
                projected.extend(result.into_items());
            }
            Ok(flatten_items(projected))
        }
        "join" => {
            if args.len() > 1 {
                return Err(EvaluationError::InvalidArity(
                    "Function 'join' expects 0 or 1 argument (separator)".to_string(),
                ));
            }
            let separator = if args.is_empty() {
                String::new()
            } else {
                match evaluate(&args[0], context, current_item)? {
                    EvaluationResult::String(sep, _) => sep,
                    EvaluationResult::Empty => return Ok(EvaluationResult::Empty),
                    other => {
                        return Err(EvaluationError::TypeError(format!(
                            "join separator must be a string, found {}",
                            other.type_name()
                        )));
                    }
                }
            };
            let mut parts = Vec::new();
            for item in invocation_base.clone().into_items() {
                match item {
                    EvaluationResult::Object { .. } => {
                        return Err(EvaluationError::TypeError(
                            "join requires a collection of primitive values".to_string(),
                        ));
                    }
                    EvaluationResult::Empty => {}
                    primitive => parts.push(primitive.to_string_value()),
                }
            }
            Ok(EvaluationResult::string(parts.join(&separator)))
        }
        "toString" => {
            require_no_args(name, args)?;
            match invocation_base {
                EvaluationResult::Empty => Ok(EvaluationResult::Empty),
                EvaluationResult::Collection { items, .. } => match items.len() {
                    0 => Ok(EvaluationResult::Empty),
                    1 => call_function(&items[0], name, args, context, current_item),
                    n => Err(EvaluationError::SingletonEvaluationError(format!(
                        "toString requires a singleton, found collection with {} items",
                        n
                    ))),
                },
                EvaluationResult::Object { .. } => Err(EvaluationError::TypeError(
                    "toString cannot render a complex value".to_string(),
                )),
                primitive => Ok(EvaluationResult::string(primitive.to_string_value())),
            }
        }
        "ofType" => {
            if args.len() != 1 {
                return Err(EvaluationError::InvalidArity(
                    "Function 'ofType' expects exactly 1 argument (type)".to_string(),
                ));
            }
            let (namespace, type_name) = extract_type_specifier(&args[0]).ok_or_else(|| {
                EvaluationError::InvalidTypeSpecifier(format!(
                    "Invalid type specifier argument for ofType: {:?}",
                    args[0]
                ))
            })?;
            let kept: Vec<EvaluationResult> = invocation_base
                .clone()
                .into_items()
                .into_iter()
                .filter(|item| matches_fhir_type(item, namespace.as_deref(), &type_name))
                .collect();
            Ok(flatten_items(kept))
        }
        "getResourceKey" => {
            require_no_args(name, args)?;
            reference_key::get_resource_key(invocation_base)
        }
        "getReferenceKey" => {
            if args.len() > 1 {
                return Err(EvaluationError::InvalidArity(
                    "Function 'getReferenceKey' expects 0 or 1 argument (type filter)".to_string(),
                ));
            }
            let type_filter = match args.first() {
                None => None,
                Some(arg) => match extract_type_specifier(arg) {
                    Some((_, type_name)) => Some(type_name),
                    // A quoted type name is also accepted.
                    None => match evaluate(arg, context, current_item)? {
                        EvaluationResult::String(s, _) => Some(s),
                        EvaluationResult::Empty => None,
                        other => {
                            return Err(EvaluationError::InvalidTypeSpecifier(format!(
                                "getReferenceKey type filter must be a type or string, found {}",
                                other.type_name()
                            )));
                        }
                    },
                },
            };
            reference_key::get_reference_key(invocation_base, type_filter.as_deref())
        }
        other => Err(EvaluationError::UnsupportedFunction(format!(
            "Function '{}' is not part of the view dialect",
            other
        ))),
    }
}

/// Reads a type specifier from an argument expression: a bare identifier
/// (`dateTime`) or a namespace-qualified one (`FHIR.dateTime`).
fn extract_type_specifier(expr: &Expression) -> Option<(Option<String>, String)> {
    match expr {
        Expression::Term(Term::Invocation(Invocation::Member(name))) => {
            Some((None, name.clone()))
        }
        Expression::Invocation(left, Invocation::Member(name)) => match left.as_ref() {
            Expression::Term(Term::Invocation(Invocation::Member(ns))) => {
                Some((Some(ns.clone()), name.clone()))
            }
            _ => None,
        },
        _ => None,
    }
}

fn evaluate_indexer(
    base: &EvaluationResult,
    index: &EvaluationResult,
) -> Result<EvaluationResult, EvaluationError> {
    let idx = match index {
        EvaluationResult::Integer(i, _) | EvaluationResult::Integer64(i, _) => *i,
        EvaluationResult::Collection { items, .. } if items.len() == 1 => match &items[0] {
            EvaluationResult::Integer(i, _) | EvaluationResult::Integer64(i, _) => *i,
            other => {
                return Err(EvaluationError::InvalidIndex(format!(
                    "Index must be an integer, found {}",
                    other.type_name()
                )));
            }
        },
        other => {
            return Err(EvaluationError::InvalidIndex(format!(
                "Index must be a singleton integer, found {}",
                other.type_name()
            )));
        }
    };
    if idx < 0 {
        return Ok(EvaluationResult::Empty);
    }
    let idx = idx as usize;
    Ok(match base {
        EvaluationResult::Collection { items, .. } => {
            items.get(idx).cloned().unwrap_or(EvaluationResult::Empty)
        }
        EvaluationResult::Empty => EvaluationResult::Empty,
        single => {
            if idx == 0 {
                single.clone()
            } else {
                EvaluationResult::Empty
            }
        }
    })
}

/// Boolean coercion for `and`/`or` and `where` verdicts: empty is false.
fn truth_of(result: &EvaluationResult) -> Result<bool, EvaluationError> {
    match result.to_boolean_for_logic()? {
        EvaluationResult::Empty => Ok(false),
        EvaluationResult::Boolean(b, _) => Ok(b),
        _ => unreachable!("to_boolean_for_logic yields Empty or Boolean"),
    }
}

fn compare_equality(
    left: &EvaluationResult,
    op: &str,
    right: &EvaluationResult,
) -> Result<EvaluationResult, EvaluationError> {
    if left.is_empty() || right.is_empty() {
        return Ok(EvaluationResult::Empty);
    }
    let left_items = left.clone().into_items();
    let right_items = right.clone().into_items();

    let equal = if left_items.len() != right_items.len() {
        false
    } else {
        let mut all = true;
        for (l, r) in left_items.iter().zip(right_items.iter()) {
            if !eq_scalar(l, r)? {
                all = false;
                break;
            }
        }
        all
    };
    Ok(EvaluationResult::boolean(if op == "!=" {
        !equal
    } else {
        equal
    }))
}

/// Scalar equality with numeric promotion and lexical date/time comparison.
/// Navigated values are untagged strings while literals are typed, so any
/// two textual values compare by their lexical form.
fn eq_scalar(a: &EvaluationResult, b: &EvaluationResult) -> Result<bool, EvaluationError> {
    if let (Some(da), Some(db)) = (a.as_decimal(), b.as_decimal()) {
        return Ok(da.normalize() == db.normalize());
    }
    if let (Some(ba), Some(bb)) = (a.as_boolean(), b.as_boolean()) {
        return Ok(ba == bb);
    }
    match (textual_of(a), textual_of(b)) {
        (Some(ta), Some(tb)) => return Ok(ta == tb),
        (None, None) => {}
        _ => {
            return Err(EvaluationError::TypeError(format!(
                "Operator '=' cannot compare {} and {}",
                a.type_name(),
                b.type_name()
            )));
        }
    }
    match (a, b) {
        (EvaluationResult::Object { .. }, EvaluationResult::Object { .. }) => Ok(a == b),
        _ => Err(EvaluationError::TypeError(format!(
            "Operator '=' cannot compare {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// The lexical form of string-like values (strings, dates, datetimes,
/// times), which all compare textually in this dialect.
fn textual_of(value: &EvaluationResult) -> Option<&str> {
    match value {
        EvaluationResult::String(s, _)
        | EvaluationResult::Date(s, _)
        | EvaluationResult::DateTime(s, _)
        | EvaluationResult::Time(s, _) => Some(s),
        _ => None,
    }
}

fn compare_inequality(
    left: &EvaluationResult,
    op: &str,
    right: &EvaluationResult,
) -> Result<EvaluationResult, EvaluationError> {
    if left.is_empty() || right.is_empty() {
        return Ok(EvaluationResult::Empty);
    }
    if left.count() > 1 || right.count() > 1 {
        return Err(EvaluationError::SingletonEvaluationError(format!(
            "Operator '{}' requires singleton operands",
            op
        )));
    }
    let l = match left {
        EvaluationResult::Collection { items, .. } => &items[0],
        other => other,
    };
    let r = match right {
        EvaluationResult::Collection { items, .. } => &items[0],
        other => other,
    };

    let ordering = if let (Some(dl), Some(dr)) = (l.as_decimal(), r.as_decimal()) {
        dl.cmp(&dr)
    } else if let (Some(tl), Some(tr)) = (textual_of(l), textual_of(r)) {
        tl.cmp(tr)
    } else {
        return Err(EvaluationError::TypeError(format!(
            "Operator '{}' cannot compare {} and {}",
            op,
            l.type_name(),
            r.type_name()
        )));
    };

    let verdict = match op {
        "<" => ordering.is_lt(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        ">=" => ordering.is_ge(),
        _ => {
            return Err(EvaluationError::Other(format!(
                "Unknown comparison operator: {}",
                op
            )));
        }
    };
    Ok(EvaluationResult::boolean(verdict))
}
