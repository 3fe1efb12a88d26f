//! # Hierarchy Populator
//!
//! Pre-materializes formula fields whose body is exactly `subdivision[N]`,
//! `division[N]` or `path[N]`. These run before instance resolution
//! because a string produced this way may still need to be resolved
//! against existing metric instances (metric-based fields get a
//! placeholder; attribute-based fields get the typed value directly).

use regex::Regex;
use std::sync::OnceLock;

use crate::entry::{AttributeEntry, AttributeValue, Entry, ResolvedEntry};
use crate::error::{PipelineError, PipelineResult};
use crate::schema::{Datatype, Field, SchemaCatalog};

use super::{HierarchyVector, HierarchyVectors, IdAllocator};

fn hierarchy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(subdivision|division|path)\[(\d+)\]\s*$").expect("valid regex")
    })
}

/// Recognize a hierarchy-only formula body. Anything else (including
/// arithmetic around an indexing expression) belongs to the formula
/// applier.
pub fn hierarchy_form(formula: &str) -> Option<(HierarchyVector, usize)> {
    let caps = hierarchy_re().captures(formula)?;
    let vector = match &caps[1] {
        "subdivision" => HierarchyVector::Subdivision,
        "division" => HierarchyVector::Division,
        _ => HierarchyVector::Path,
    };
    let index = caps[2].parse().ok()?;
    Some((vector, index))
}

/// Populate every hierarchy-only formula field in the tree, depth-first.
/// Returns the number of values written.
pub fn populate(
    root: &mut ResolvedEntry,
    catalog: &SchemaCatalog,
    vectors: &HierarchyVectors,
    ids: &mut IdAllocator,
) -> PipelineResult<usize> {
    let mut written = 0;
    populate_node(root, catalog, vectors, ids, &mut written)?;
    Ok(written)
}

fn populate_node(
    node: &mut ResolvedEntry,
    catalog: &SchemaCatalog,
    vectors: &HierarchyVectors,
    ids: &mut IdAllocator,
    written: &mut usize,
) -> PipelineResult<()> {
    if node.is_metric() {
        let field_ids = catalog.fields_of_metric(node.entry.definition).to_vec();
        for field_id in field_ids {
            let Some(field) = catalog.field(field_id) else {
                continue;
            };
            let Some(formula) = field.formula.as_deref().filter(|_| field.is_formula()) else {
                continue;
            };
            let Some((vector, index)) = hierarchy_form(formula) else {
                continue;
            };
            let token = vectors.get(vector, index).ok_or_else(|| {
                PipelineError::Subdivision {
                    field: field.id,
                    field_name: field.name.clone(),
                    formula: formula.to_string(),
                    message: format!(
                        "index {} out of range for {} of length {}",
                        index,
                        vector.name(),
                        vectors.vector(vector).len()
                    ),
                }
            })?;
            let value = materialize(catalog, field, formula, token)?;
            write_value(node, field, value, ids);
            *written += 1;
        }
    }
    for child in &mut node.children {
        populate_node(child, catalog, vectors, ids, written)?;
    }
    Ok(())
}

/// Convert the extracted token for the field's base: attribute bases take
/// the typed value, metric bases take a string placeholder for the
/// instance resolver.
fn materialize(
    catalog: &SchemaCatalog,
    field: &Field,
    formula: &str,
    token: &str,
) -> PipelineResult<AttributeValue> {
    let subdivision_error = |message: String| PipelineError::Subdivision {
        field: field.id,
        field_name: field.name.clone(),
        formula: formula.to_string(),
        message,
    };
    let base = catalog
        .definition(field.base_definition)
        .ok_or_else(|| subdivision_error(format!("unknown base definition {}", field.base_definition)))?;
    let Some(datatype) = base.datatype() else {
        // metric base: placeholder for the resolver
        return Ok(AttributeValue::string(token));
    };
    match datatype {
        Datatype::Int => token
            .parse::<i64>()
            .map(AttributeValue::int)
            .map_err(|_| subdivision_error(format!("token '{}' is not an int", token))),
        Datatype::Float => token
            .parse::<f64>()
            .map(AttributeValue::float)
            .map_err(|_| subdivision_error(format!("token '{}' is not a float", token))),
        Datatype::String => Ok(AttributeValue::string(token)),
        Datatype::Bool => token
            .parse::<bool>()
            .map(AttributeValue::bool)
            .map_err(|_| subdivision_error(format!("token '{}' is not a bool", token))),
        Datatype::Timestamp => Err(subdivision_error(
            "hierarchy token cannot populate a timestamp field".to_string(),
        )),
        Datatype::HierarchyString => Ok(AttributeValue::hierarchy(token)),
    }
}

/// Overwrite an existing attribute child tagged with the field, or
/// synthesize a new one with a hierarchy-populator id.
fn write_value(
    node: &mut ResolvedEntry,
    field: &Field,
    value: AttributeValue,
    ids: &mut IdAllocator,
) {
    if let Some(child) = node
        .children
        .iter_mut()
        .find(|c| c.field == Some(field.id) && c.attribute.is_some())
    {
        if let Some(attribute) = child.attribute.as_mut() {
            attribute.value = value;
        }
        return;
    }
    let child_id = ids.hierarchy_id();
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
            value,
        }),
        field: Some(field.id),
        children: Vec::new(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_hierarchy_forms() {
        assert_eq!(
            hierarchy_form("subdivision[0]"),
            Some((HierarchyVector::Subdivision, 0))
        );
        assert_eq!(
            hierarchy_form("  path[12]  "),
            Some((HierarchyVector::Path, 12))
        );
        assert_eq!(
            hierarchy_form("division[3]"),
            Some((HierarchyVector::Division, 3))
        );
    }

    #[test]
    fn rejects_non_hierarchy_forms() {
        assert_eq!(hierarchy_form("subdivision[0] + 1"), None);
        assert_eq!(hierarchy_form("subdivision[x]"), None);
        assert_eq!(hierarchy_form("self.duration"), None);
        assert_eq!(hierarchy_form("subdivision"), None);
    }
}
