//! ViewDefinition parsing, validation and setup.
//!
//! A ViewDefinition arrives as JSON, is deserialised into the structs below,
//! and then goes through validation and setup, which:
//!
//! 1. checks `resource` and (in production) the view `name`,
//! 2. builds the constant table and substitutes `%name` references into
//!    every FHIRPath under `where`, `column`, `forEach`, `forEachOrNull`
//!    and all nested selects,
//! 3. parses each substituted path once into an AST stored on the node, and
//! 4. computes the ordered output schema, rejecting duplicate column names
//!    and unionAll branches whose schemas disagree.
//!
//! After setup the definition is immutable: the same validated view can be
//! applied to any number of resources, from any number of threads, without
//! re-parsing anything.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tabula_fhirpath::{parse_expression, Expression};

use crate::error::SofError;
use crate::fhir_version::FhirVersion;
use crate::runner;
use crate::schema::{infer_column_type, ColumnInfo, ViewSchema};

static SQL_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z][A-Za-z0-9_]*$").expect("static pattern"));
static CONSTANT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("%[A-Za-z][A-Za-z0-9_]*").expect("static pattern"));

/// Options for [`ViewDefinition::parse_with_options`].
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Whether to require a valid sql-name view name. Always true in
    /// production; tests working with anonymous fixtures turn it off.
    pub check_name: bool,
    /// Overrides the definition's `fhirVersion` list with a single version
    /// string before validation.
    pub fhir_version: Option<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            check_name: true,
            fhir_version: None,
        }
    }
}

/// A SQL-on-FHIR ViewDefinition: the declarative description of how one
/// FHIR resource type is projected into flat rows.
///
/// Instances are only obtainable through the `parse*` constructors, which
/// validate and freeze the definition. `resourceType`, `status` and other
/// profile fields that do not affect evaluation are ignored on input, as are
/// unknown fields (forward compatibility).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewDefinition {
    name: Option<String>,
    resource: Option<String>,
    fhir_version: Option<Vec<String>>,
    constant: Option<Vec<Constant>>,
    select: Option<Vec<Select>>,
    #[serde(rename = "where")]
    where_: Option<Vec<Where>>,
    #[serde(skip)]
    schema: Option<Arc<ViewSchema>>,
}

/// A select node: columns plus nested selects, with optional row-multiplying
/// iteration (`forEach` / `forEachOrNull`) and vertical union (`unionAll`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Select {
    pub(crate) column: Option<Vec<Column>>,
    pub(crate) select: Option<Vec<Select>>,
    pub(crate) for_each: Option<String>,
    pub(crate) for_each_or_null: Option<String>,
    pub(crate) union_all: Option<Vec<Select>>,
    #[serde(skip)]
    pub(crate) for_each_expr: Option<Expression>,
    #[serde(skip)]
    pub(crate) for_each_or_null_expr: Option<Expression>,
}

/// A single output column: a FHIRPath and the name its value lands under.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Column {
    pub(crate) path: Option<String>,
    pub(crate) name: Option<String>,
    #[serde(rename = "type")]
    pub(crate) type_: Option<String>,
    pub(crate) collection: Option<bool>,
    pub(crate) description: Option<String>,
    #[serde(skip)]
    pub(crate) expr: Option<Expression>,
}

/// A boolean FHIRPath predicate filtering which resources produce rows.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Where {
    pub(crate) path: Option<String>,
    pub(crate) description: Option<String>,
    #[serde(skip)]
    pub(crate) expr: Option<Expression>,
}

impl Column {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl Where {
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// A named constant, referenced as `%name` in paths. Exactly one `value[x]`
/// member must be set; the value is rendered to a FHIRPath literal and
/// substituted textually during setup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Constant {
    pub(crate) name: Option<String>,
    pub(crate) value_base64_binary: Option<String>,
    pub(crate) value_boolean: Option<bool>,
    pub(crate) value_canonical: Option<String>,
    pub(crate) value_code: Option<String>,
    pub(crate) value_date: Option<String>,
    pub(crate) value_date_time: Option<String>,
    pub(crate) value_decimal: Option<serde_json::Number>,
    pub(crate) value_id: Option<String>,
    pub(crate) value_instant: Option<String>,
    pub(crate) value_integer: Option<i64>,
    pub(crate) value_integer64: Option<i64>,
    pub(crate) value_oid: Option<String>,
    pub(crate) value_string: Option<String>,
    pub(crate) value_positive_int: Option<i64>,
    pub(crate) value_time: Option<String>,
    pub(crate) value_unsigned_int: Option<i64>,
    pub(crate) value_uri: Option<String>,
    pub(crate) value_url: Option<String>,
    pub(crate) value_uuid: Option<String>,
}

impl Constant {
    /// Renders this constant as the FHIRPath literal that replaces `%name`.
    ///
    /// String-like values are quoted, date/time values get the `@` prefix,
    /// decimals are carried verbatim, booleans and integers use their
    /// textual form. Zero or more than one `value[x]` member is an error.
    pub(crate) fn convert_value_to_string(&self) -> Result<String, SofError> {
        fn quote(s: &str) -> String {
            format!("'{}'", s)
        }

        let mut count = 0;
        let mut literal = None;

        let quoted = [
            &self.value_base64_binary,
            &self.value_canonical,
            &self.value_code,
            &self.value_id,
            &self.value_instant,
            &self.value_oid,
            &self.value_string,
            &self.value_uri,
            &self.value_url,
            &self.value_uuid,
        ];
        for value in quoted.into_iter().flatten() {
            literal = Some(quote(value));
            count += 1;
        }

        let dated = [&self.value_date, &self.value_date_time];
        for value in dated.into_iter().flatten() {
            literal = Some(format!("@{}", value));
            count += 1;
        }
        if let Some(value) = &self.value_time {
            literal = Some(format!("@T{}", value));
            count += 1;
        }

        if let Some(value) = &self.value_decimal {
            literal = Some(value.to_string());
            count += 1;
        }
        if let Some(value) = &self.value_boolean {
            literal = Some(value.to_string());
            count += 1;
        }
        let integers = [
            &self.value_integer,
            &self.value_integer64,
            &self.value_positive_int,
            &self.value_unsigned_int,
        ];
        for value in integers.into_iter().flatten() {
            literal = Some(value.to_string());
            count += 1;
        }

        match (literal, count) {
            (None, _) => Err(SofError::InvalidViewDefinition(
                "None of the value[x] elements are set!".to_string(),
            )),
            (Some(_), c) if c > 1 => Err(SofError::InvalidViewDefinition(format!(
                "Exactly one of the value[x] elements should be set; got {}",
                c
            ))),
            (Some(value), _) => Ok(value),
        }
    }
}

impl ViewDefinition {
    /// Parses and validates a ViewDefinition from JSON text.
    pub fn parse(json: &str) -> Result<Self, SofError> {
        Self::parse_with_options(json, ParseOptions::default())
    }

    /// Parses with explicit options (name checking, version override).
    pub fn parse_with_options(json: &str, options: ParseOptions) -> Result<Self, SofError> {
        let mut view: ViewDefinition = serde_json::from_str(json)?;
        view.validate_and_set_up(options)?;
        Ok(view)
    }

    /// Parses and validates a ViewDefinition from an already-deserialised
    /// JSON value.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, SofError> {
        let mut view: ViewDefinition = serde_json::from_value(value.clone())?;
        view.validate_and_set_up(ParseOptions::default())?;
        Ok(view)
    }

    /// Reads and parses a ViewDefinition from a file.
    pub fn from_file(path: &Path) -> Result<Self, SofError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The FHIR resource type this view applies to.
    pub fn resource(&self) -> &str {
        self.resource.as_deref().unwrap_or_default()
    }

    /// The declared FHIR versions, mapped to releases.
    pub fn fhir_versions(&self) -> Vec<FhirVersion> {
        self.fhir_version
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|v| FhirVersion::from_version_string(v).ok())
            .collect()
    }

    /// The ordered output schema. Available on every validated instance.
    pub fn schema(&self) -> &ViewSchema {
        self.schema
            .as_deref()
            .expect("ViewDefinition is only constructible through validation")
    }

    pub(crate) fn schema_arc(&self) -> Arc<ViewSchema> {
        Arc::clone(self.schema.as_ref().expect("validated"))
    }

    pub(crate) fn selects(&self) -> &[Select] {
        self.select.as_deref().unwrap_or_default()
    }

    pub(crate) fn where_clauses(&self) -> &[Where] {
        self.where_.as_deref().unwrap_or_default()
    }

    /// Projects a resource (as JSON) into rows. A resource whose
    /// `resourceType` does not match [`Self::resource`] contributes no rows.
    pub fn apply(&self, resource: &serde_json::Value) -> Result<Vec<runner::Row>, SofError> {
        self.apply_resource(resource)
    }

    /// [`apply`](Self::apply) for any resource representation implementing
    /// [`ResourceSource`](crate::traits::ResourceSource).
    pub fn apply_resource<R>(&self, resource: &R) -> Result<Vec<runner::Row>, SofError>
    where
        R: crate::traits::ResourceSource + ?Sized,
    {
        runner::apply_view(self, resource)
    }

    /// Validation and one-time setup; see the module docs for the steps.
    fn validate_and_set_up(&mut self, options: ParseOptions) -> Result<(), SofError> {
        if self.resource.as_deref().unwrap_or_default().is_empty() {
            return Err(SofError::InvalidViewDefinition(
                "The resource field of a view should be a valid FHIR resource type.".to_string(),
            ));
        }
        if let Some(version) = options.fhir_version {
            self.fhir_version = Some(vec![version]);
        }
        for version in self.fhir_version.as_deref().unwrap_or_default() {
            FhirVersion::from_version_string(version)?;
        }
        if options.check_name {
            let name = self.name.as_deref().unwrap_or_default();
            if name.is_empty() || !SQL_NAME_PATTERN.is_match(name) {
                return Err(SofError::InvalidViewDefinition(format!(
                    "The name is not a valid 'sql-name': {}",
                    name
                )));
            }
        }

        let mut const_map: HashMap<String, String> = HashMap::new();
        for constant in self.constant.as_deref().unwrap_or_default() {
            let name = constant.name.as_deref().unwrap_or_default();
            if !SQL_NAME_PATTERN.is_match(name) {
                return Err(SofError::InvalidViewDefinition(format!(
                    "Constant name {} does not match 'sql-name' pattern!",
                    name
                )));
            }
            if const_map.contains_key(name) {
                return Err(SofError::InvalidViewDefinition(format!(
                    "Repeated constant name {}",
                    name
                )));
            }
            const_map.insert(name.to_string(), constant.convert_value_to_string()?);
        }

        // Constants are replaced here, once, so applying the paths to many
        // resources later needs no substitution.
        if let Some(wheres) = self.where_.as_mut() {
            for (i, w) in wheres.iter_mut().enumerate() {
                let crumb = format!("where[{}]", i);
                let path = w.path.as_deref().ok_or_else(|| {
                    SofError::InvalidViewDefinition(format!(
                        "The `path` of `where` cannot be null! ({})",
                        crumb
                    ))
                })?;
                let substituted = substitute_constants(path, &const_map)?;
                w.expr = Some(parse_path(&substituted, &crumb)?);
                w.path = Some(substituted);
            }
        }

        if self.select.as_deref().unwrap_or_default().is_empty() {
            return Err(SofError::InvalidViewDefinition(
                "ViewDefinition must have at least one select".to_string(),
            ));
        }
        let empty = HashSet::new();
        let columns = validate_selects(
            self.select.as_mut().unwrap(),
            &empty,
            &const_map,
            "select",
        )?;
        if columns.is_empty() {
            return Err(SofError::InvalidViewDefinition(
                "ViewDefinition defines no columns".to_string(),
            ));
        }
        self.schema = Some(Arc::new(ViewSchema { columns }));
        Ok(())
    }
}

fn parse_path(path: &str, crumb: &str) -> Result<Expression, SofError> {
    parse_expression(path).map_err(|e| SofError::ParseError(format!("{}: {}", crumb, e)))
}

/// Replaces every `%name` token with the constant's literal. Unknown
/// constants are an error; a path without tokens comes back unchanged, which
/// also makes substitution idempotent (literals never contain `%`).
fn substitute_constants(
    path: &str,
    const_map: &HashMap<String, String>,
) -> Result<String, SofError> {
    let mut out = String::new();
    let mut last = 0;
    for m in CONSTANT_PATTERN.find_iter(path) {
        out.push_str(&path[last..m.start()]);
        let const_name = &m.as_str()[1..]; // drops the initial '%'
        match const_map.get(const_name) {
            Some(literal) => out.push_str(literal),
            None => {
                return Err(SofError::InvalidViewDefinition(format!(
                    "Constant not defined: {}",
                    const_name
                )));
            }
        }
        last = m.end();
    }
    out.push_str(&path[last..]);
    Ok(out)
}

/// Validates a list of sibling selects, appending each sibling's columns.
/// `current` holds every column name visible from enclosing scopes; the
/// return value is the ordered columns this subtree adds.
fn validate_selects(
    selects: &mut [Select],
    current: &HashSet<String>,
    const_map: &HashMap<String, String>,
    crumb: &str,
) -> Result<Vec<ColumnInfo>, SofError> {
    let mut new_cols: Vec<ColumnInfo> = Vec::new();
    for (i, select) in selects.iter_mut().enumerate() {
        let mut visible = current.clone();
        visible.extend(new_cols.iter().map(|c| c.name.clone()));
        let child_crumb = format!("{}[{}]", crumb, i);
        new_cols.extend(validate_one_select(
            select,
            &visible,
            const_map,
            &child_crumb,
        )?);
    }
    Ok(new_cols)
}

fn validate_one_select(
    select: &mut Select,
    current: &HashSet<String>,
    const_map: &HashMap<String, String>,
    crumb: &str,
) -> Result<Vec<ColumnInfo>, SofError> {
    let mut new_cols: Vec<ColumnInfo> = Vec::new();

    if let Some(columns) = select.column.as_mut() {
        for (i, column) in columns.iter_mut().enumerate() {
            let col_crumb = format!("{}.column[{}]", crumb, i);
            let name = column.name.clone().unwrap_or_default();
            if name.is_empty() {
                return Err(SofError::InvalidViewDefinition(format!(
                    "Column name cannot be empty! ({})",
                    col_crumb
                )));
            }
            if !SQL_NAME_PATTERN.is_match(&name) {
                return Err(SofError::InvalidViewDefinition(format!(
                    "Column name {} does not match 'sql-name' pattern! ({})",
                    name, col_crumb
                )));
            }
            if column.path.as_deref().unwrap_or_default().is_empty() {
                return Err(SofError::InvalidViewDefinition(format!(
                    "Column path cannot be empty for {} ({})",
                    name, col_crumb
                )));
            }
            if current.contains(&name) || new_cols.iter().any(|c| c.name == name) {
                return Err(SofError::InvalidViewDefinition(format!(
                    "Repeated column name {} ({})",
                    name, col_crumb
                )));
            }
            let substituted = substitute_constants(column.path.as_deref().unwrap(), const_map)?;
            let expr = parse_path(&substituted, &format!("{} '{}'", col_crumb, name))?;
            let fhir_type = column
                .type_
                .clone()
                .unwrap_or_else(|| infer_column_type(&expr));
            new_cols.push(ColumnInfo {
                name,
                fhir_type,
                collection: column.collection.unwrap_or(false),
            });
            column.path = Some(substituted);
            column.expr = Some(expr);
        }
    }

    if select.for_each.is_some() && select.for_each_or_null.is_some() {
        return Err(SofError::InvalidViewDefinition(format!(
            "A select cannot have both forEach and forEachOrNull ({})",
            crumb
        )));
    }
    if let Some(path) = select.for_each.as_deref() {
        let substituted = substitute_constants(path, const_map)?;
        select.for_each_expr = Some(parse_path(&substituted, &format!("{}.forEach", crumb))?);
        select.for_each = Some(substituted);
    }
    if let Some(path) = select.for_each_or_null.as_deref() {
        let substituted = substitute_constants(path, const_map)?;
        select.for_each_or_null_expr = Some(parse_path(
            &substituted,
            &format!("{}.forEachOrNull", crumb),
        )?);
        select.for_each_or_null = Some(substituted);
    }

    if let Some(nested) = select.select.as_mut() {
        let mut visible = current.clone();
        visible.extend(new_cols.iter().map(|c| c.name.clone()));
        new_cols.extend(validate_selects(
            nested,
            &visible,
            const_map,
            &format!("{}.select", crumb),
        )?);
    }

    // Union branches are validated against the enclosing scope but not
    // against each other: they are required to share the same columns.
    let mut union_cols: Option<Vec<ColumnInfo>> = None;
    if let Some(branches) = select.union_all.as_mut() {
        for (i, branch) in branches.iter_mut().enumerate() {
            let mut visible = current.clone();
            visible.extend(new_cols.iter().map(|c| c.name.clone()));
            let branch_cols = validate_one_select(
                branch,
                &visible,
                const_map,
                &format!("{}.unionAll[{}]", crumb, i),
            )?;
            match &union_cols {
                None => union_cols = Some(branch_cols),
                Some(first) => {
                    if !compatible_columns(first, &branch_cols) {
                        return Err(SofError::InvalidViewDefinition(format!(
                            "Union columns are not consistent at {}.unionAll[{}]: {:?} vs {:?}",
                            crumb,
                            i,
                            branch_cols
                                .iter()
                                .map(|c| c.name.as_str())
                                .collect::<Vec<_>>(),
                            first.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
                        )));
                    }
                }
            }
        }
    }
    if let Some(cols) = union_cols {
        new_cols.extend(cols);
    }

    Ok(new_cols)
}

/// Union branches must agree on column names in the same order, on type and
/// on the collection flag; descriptions and paths may differ.
fn compatible_columns(first: &[ColumnInfo], other: &[ColumnInfo]) -> bool {
    first.len() == other.len()
        && first.iter().zip(other.iter()).all(|(a, b)| {
            a.name == b.name && a.fhir_type == b.fhir_type && a.collection == b.collection
        })
}
