//! # Instance Resolver
//!
//! Replaces metric-reference placeholder children with the referenced
//! existing entry tree, looked up by the base metric's primary-identifier
//! value against the oracle. Exactly one match splices; zero or several
//! reject the input.
//!
//! Lookups happen left-to-right, depth-first, so an oracle that suspends
//! (an async adapter at the boundary) sees a deterministic lookup order.

use crate::entry::ResolvedEntry;
use crate::error::{PipelineError, PipelineResult};
use crate::schema::SchemaCatalog;

use super::oracle::{ExistingEntries, IdentifierValue};

/// Resolve every placeholder in the tree. Returns the number of spliced
/// instances.
pub fn resolve(
    root: &mut ResolvedEntry,
    catalog: &SchemaCatalog,
    oracle: &dyn ExistingEntries,
) -> PipelineResult<usize> {
    let mut resolved = 0;
    resolve_node(root, catalog, oracle, &mut resolved)?;
    Ok(resolved)
}

fn resolve_node(
    node: &mut ResolvedEntry,
    catalog: &SchemaCatalog,
    oracle: &dyn ExistingEntries,
    resolved: &mut usize,
) -> PipelineResult<()> {
    let parent_id = node.entry.id;
    for index in 0..node.children.len() {
        if let Some((field_id, identifier)) = placeholder_lookup(catalog, &node.children[index])? {
            let field = catalog
                .field(field_id)
                .ok_or_else(|| PipelineError::formula(format!("unknown field {}", field_id)))?;
            let base = catalog.definition(field.base_definition).ok_or_else(|| {
                PipelineError::formula(format!(
                    "unknown base definition {} of field '{}'",
                    field.base_definition, field.name
                ))
            })?;

            let matches = oracle.find_by_primary_identifier(base, &identifier);
            let match_count = matches.len();
            let Some(mut instance) = matches.into_iter().next().filter(|_| match_count == 1)
            else {
                return Err(PipelineError::InstanceResolution {
                    field: field.id,
                    field_name: field.name.clone(),
                    metric_definition: base.id,
                    metric_code: base.code.clone(),
                    identifier: identifier.to_string(),
                    match_count,
                });
            };

            tracing::debug!(
                field = %field.name,
                metric = %base.code,
                identifier = %identifier,
                "instance_resolved"
            );

            // keep the field slot; take entry, marker and children from the
            // resolved instance; re-point the adopted root at this parent
            instance.entry.parent_entry = Some(parent_id);
            let slot = node.children[index].field;
            node.children[index] = ResolvedEntry {
                entry: instance.entry,
                metric: instance.metric,
                attribute: None,
                field: slot,
                children: instance.children,
            };
            *resolved += 1;
        }
        resolve_node(&mut node.children[index], catalog, oracle, resolved)?;
    }
    Ok(())
}

/// Whether a child is a metric-reference placeholder to resolve: tagged
/// with a field whose base is a metric carrying a primary identifier
/// field, and itself an attribute holding the scalar identifier. Inline
/// metric subtrees pass through untouched.
fn placeholder_lookup(
    catalog: &SchemaCatalog,
    child: &ResolvedEntry,
) -> PipelineResult<Option<(i64, IdentifierValue)>> {
    let Some(field_id) = child.field else {
        return Ok(None);
    };
    if child.metric.is_some() {
        return Ok(None);
    }
    let Some(attribute) = child.attribute.as_ref() else {
        return Ok(None);
    };
    let Some(field) = catalog.field(field_id) else {
        return Ok(None);
    };
    let Some(base) = catalog.definition(field.base_definition) else {
        return Ok(None);
    };
    if !base.is_metric() || base.primary_identifier_field().is_none() {
        return Ok(None);
    }
    let identifier = if let Some(v) = attribute.value.value_int {
        IdentifierValue::Int(v)
    } else if let Some(v) = &attribute.value.value_string {
        IdentifierValue::Str(v.clone())
    } else {
        return Err(PipelineError::formula_in(
            field.id,
            &field.name,
            "",
            "metric reference placeholder carries no int or string identifier",
        ));
    };
    Ok(Some((field_id, identifier)))
}
