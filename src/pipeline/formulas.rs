//! # Formula Applier
//!
//! Evaluates every non-hierarchy formula field, depth-first, and writes
//! the result into the attribute child tagged with the field. Within one
//! metric node, fields are visited input-mode first, then formula-mode,
//! each group in declaration order; a formula may therefore reference a
//! formula completed earlier on the same node through the scratch map.

use std::collections::HashMap;

use crate::config::EvalLimits;
use crate::entry::{AttributeEntry, AttributeValue, Entry, ResolvedEntry, ScalarValue};
use crate::error::{PipelineError, PipelineResult};
use crate::formula::{eval_entry_formula, EntryBindings, EvalValue, Scalar};
use crate::schema::{Datatype, Field, FieldId, SchemaCatalog};

use super::{hierarchy, HierarchyVector, HierarchyVectors, IdAllocator};

/// Apply all formula fields in the tree. Returns the number of formulas
/// evaluated.
pub fn apply(
    root: &mut ResolvedEntry,
    catalog: &SchemaCatalog,
    vectors: &HierarchyVectors,
    ids: &mut IdAllocator,
    limits: &EvalLimits,
) -> PipelineResult<usize> {
    // Metric-node positions are stable across this stage: it only appends
    // attribute children, never metric nodes.
    let mut paths = Vec::new();
    collect_metric_paths(root, &mut Vec::new(), &mut paths);

    let division = vectors.render(HierarchyVector::Division);
    let subdivision = vectors.render(HierarchyVector::Subdivision);
    let path_str = vectors.render(HierarchyVector::Path);

    let mut applied = 0;
    for node_path in &paths {
        let definition = node_at(root, node_path).entry.definition;
        let ordered = ordered_fields(catalog, definition);
        let mut field_values: HashMap<String, Scalar> = HashMap::new();

        for field_id in ordered {
            let Some(field) = catalog.field(field_id) else {
                continue;
            };
            let Some(formula) = field.formula.as_deref().filter(|_| field.is_formula()) else {
                continue;
            };
            // hierarchy-only forms were materialized earlier
            if hierarchy::hierarchy_form(formula).is_some() {
                continue;
            }

            let datatype = catalog
                .definition(field.base_definition)
                .and_then(|base| base.datatype())
                .ok_or_else(|| {
                    PipelineError::formula_in(
                        field.id,
                        field.name.clone(),
                        formula,
                        "formula field must target an attribute",
                    )
                })?;

            let scalar = {
                let current = node_at(root, node_path);
                let parent = if node_path.is_empty() {
                    None
                } else {
                    Some(node_at(root, &node_path[..node_path.len() - 1]))
                };
                let bindings = EntryBindings {
                    current,
                    parent,
                    root,
                    path: path_str.clone(),
                    division: division.clone(),
                    subdivision: subdivision.clone(),
                    field_values: &field_values,
                };
                let value = eval_entry_formula(formula, catalog, &bindings, limits)
                    .map_err(|message| {
                        PipelineError::formula_in(field.id, field.name.clone(), formula, message)
                    })?;
                require_scalar(field, formula, &value)?
            };

            let column_value = scalar_for_datatype(field, formula, datatype, &scalar)?;
            field_values.insert(field.name.clone(), scalar);

            write_result(node_at_mut(root, node_path), field, datatype, column_value, ids)?;
            applied += 1;
        }
    }
    Ok(applied)
}

fn collect_metric_paths(
    node: &ResolvedEntry,
    prefix: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    if node.is_metric() {
        out.push(prefix.clone());
    }
    for (index, child) in node.children.iter().enumerate() {
        prefix.push(index);
        collect_metric_paths(child, prefix, out);
        prefix.pop();
    }
}

fn node_at<'a>(root: &'a ResolvedEntry, path: &[usize]) -> &'a ResolvedEntry {
    let mut node = root;
    for &index in path {
        node = &node.children[index];
    }
    node
}

fn node_at_mut<'a>(root: &'a mut ResolvedEntry, path: &[usize]) -> &'a mut ResolvedEntry {
    let mut node = root;
    for &index in path {
        node = &mut node.children[index];
    }
    node
}

/// Stable partition: input-mode fields first, then formula-mode, each in
/// declaration order.
fn ordered_fields(catalog: &SchemaCatalog, metric: i64) -> Vec<FieldId> {
    let declared = catalog.fields_of_metric(metric);
    let mut ordered: Vec<FieldId> = declared
        .iter()
        .filter(|id| catalog.field(**id).is_some_and(|f| !f.is_formula()))
        .copied()
        .collect();
    ordered.extend(
        declared
            .iter()
            .filter(|id| catalog.field(**id).is_some_and(Field::is_formula))
            .copied(),
    );
    ordered
}

/// Formula results must be single non-null scalars.
fn require_scalar(
    field: &Field,
    formula: &str,
    value: &EvalValue<'_>,
) -> PipelineResult<Scalar> {
    if matches!(value, EvalValue::Null) {
        return Err(PipelineError::formula_in(
            field.id,
            field.name.clone(),
            formula,
            "formula evaluated to null",
        ));
    }
    Scalar::from_value(value).ok_or_else(|| {
        PipelineError::formula_in(
            field.id,
            field.name.clone(),
            formula,
            "formula must produce a single value",
        )
    })
}

/// Fit the scalar into the target attribute column.
fn scalar_for_datatype(
    field: &Field,
    formula: &str,
    datatype: Datatype,
    scalar: &Scalar,
) -> PipelineResult<ScalarValue> {
    let mismatch = |detail: String| {
        PipelineError::formula_in(field.id, field.name.clone(), formula, detail)
    };
    match (datatype, scalar) {
        (Datatype::Int, Scalar::Num(n)) => {
            if n.fract() == 0.0 {
                Ok(ScalarValue::Int(*n as i64))
            } else {
                Err(mismatch(format!(
                    "formula produced non-integer value {} for int field",
                    n
                )))
            }
        }
        (Datatype::Float, Scalar::Num(n)) => Ok(ScalarValue::Float(*n)),
        (Datatype::String, Scalar::Str(s)) => Ok(ScalarValue::Str(s.clone())),
        (Datatype::HierarchyString, Scalar::Str(s)) => Ok(ScalarValue::Hierarchy(s.clone())),
        (Datatype::Bool, Scalar::Bool(b)) => Ok(ScalarValue::Bool(*b)),
        (Datatype::Timestamp, Scalar::Num(n)) => {
            if n.fract() != 0.0 {
                return Err(mismatch(format!(
                    "formula produced fractional timestamp {}",
                    n
                )));
            }
            chrono::DateTime::from_timestamp(*n as i64, 0)
                .map(|dt| ScalarValue::Timestamp(dt.naive_utc()))
                .ok_or_else(|| mismatch(format!("timestamp {} out of range", n)))
        }
        (dt, s) => Err(mismatch(format!(
            "formula produced {} for {} field",
            scalar_kind(s),
            dt
        ))),
    }
}

fn scalar_kind(scalar: &Scalar) -> &'static str {
    match scalar {
        Scalar::Num(_) => "a number",
        Scalar::Str(_) => "a string",
        Scalar::Bool(_) => "a boolean",
    }
}

/// Write into the attribute child tagged with the field, synthesizing one
/// with a formula-applier id when absent.
fn write_result(
    node: &mut ResolvedEntry,
    field: &Field,
    datatype: Datatype,
    value: ScalarValue,
    ids: &mut IdAllocator,
) -> PipelineResult<()> {
    if let Some(child) = node
        .children
        .iter_mut()
        .find(|c| c.field == Some(field.id) && c.attribute.is_some())
    {
        if let Some(attribute) = child.attribute.as_mut() {
            attribute.value.set(datatype, value).map_err(|message| {
                PipelineError::formula_in(field.id, field.name.clone(), "", message)
            })?;
        }
        return Ok(());
    }
    let mut attribute_value = AttributeValue::default();
    attribute_value.set(datatype, value).map_err(|message| {
        PipelineError::formula_in(field.id, field.name.clone(), "", message)
    })?;
    let child_id = ids.formula_id();
    node.children.push(ResolvedEntry {
        entry: Entry {
            id: child_id,
            definition: field.base_definition,
            parent_entry: Some(node.entry.id),
            timestamp: node.entry.timestamp,
            subdivision: node.entry.subdivision.clone(),
            comments: None,
        },
        metric: None,
        attribute: Some(AttributeEntry {
            entry: child_id,
            field: field.id,
            value: attribute_value,
        }),
        field: Some(field.id),
        children: Vec::new(),
    });
    Ok(())
}
