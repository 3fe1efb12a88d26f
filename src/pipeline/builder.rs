//! # Tree Builder
//!
//! Turns a [`MetricEntryInput`] into a [`ResolvedEntry`] tree with
//! provisional ids assigned left-to-right depth-first, timestamps
//! normalized to start-of-day, and metric references left as placeholder
//! attribute children for the instance resolver.

use crate::entry::{
    start_of_day, AttributeEntry, AttributeValue, AttributeValueInput, Entry, EntryId,
    MetricEntry, MetricEntryInput, ResolvedEntry,
};
use crate::error::{PipelineError, PipelineResult};
use crate::schema::{Definition, Field, SchemaCatalog};

use super::IdAllocator;

/// Build the working tree for one input. Schema lookups that fail reject
/// the input (`Formula` kind; the taxonomy reuses it for construction).
pub fn build(
    catalog: &SchemaCatalog,
    input: &MetricEntryInput,
    ids: &mut IdAllocator,
) -> PipelineResult<ResolvedEntry> {
    let definition = lookup_metric(catalog, &input.definition)?;
    let timestamp = start_of_day(input.timestamp);
    build_metric(catalog, input, definition, timestamp, None, None, ids)
}

fn lookup_metric<'a>(
    catalog: &'a SchemaCatalog,
    code: &str,
) -> PipelineResult<&'a Definition> {
    let definition = catalog
        .definition_by_code(code)
        .ok_or_else(|| PipelineError::formula(format!("unknown definition '{}'", code)))?;
    if !definition.is_metric() {
        return Err(PipelineError::formula(format!(
            "definition '{}' is not a metric",
            code
        )));
    }
    Ok(definition)
}

fn build_metric(
    catalog: &SchemaCatalog,
    input: &MetricEntryInput,
    definition: &Definition,
    timestamp: chrono::NaiveDateTime,
    parent: Option<EntryId>,
    field_slot: Option<i64>,
    ids: &mut IdAllocator,
) -> PipelineResult<ResolvedEntry> {
    let id = ids.builder_id();
    let mut node = ResolvedEntry {
        entry: Entry {
            id,
            definition: definition.id,
            parent_entry: parent,
            timestamp,
            subdivision: input.subdivision.clone(),
            comments: input.comments.clone(),
        },
        metric: Some(MetricEntry { entry: id }),
        attribute: None,
        field: field_slot,
        children: Vec::new(),
    };

    for field_input in &input.fields {
        let field = catalog
            .field_of_metric_by_name(definition.id, &field_input.field)
            .ok_or_else(|| {
                PipelineError::formula(format!(
                    "unknown field '{}' on metric '{}'",
                    field_input.field, definition.code
                ))
            })?;
        let base = catalog.definition(field.base_definition).ok_or_else(|| {
            PipelineError::formula(format!(
                "unknown base definition {} of field '{}'",
                field.base_definition, field.name
            ))
        })?;

        for value in &field_input.values {
            let child = if base.is_attribute() {
                build_attribute_child(field, base, value, &node, timestamp, ids)?
            } else if let Some(nested) = &value.nested {
                if nested.definition != base.code {
                    return Err(PipelineError::formula(format!(
                        "field '{}' expects metric '{}', inline input is '{}'",
                        field.name, base.code, nested.definition
                    )));
                }
                build_metric(
                    catalog,
                    nested,
                    base,
                    timestamp,
                    Some(id),
                    Some(field.id),
                    ids,
                )?
            } else {
                build_placeholder_child(field, base, value, &node, timestamp, ids)?
            };
            node.children.push(child);
        }
    }

    // legacy top-level children: additional metric subtrees with no field
    // slot
    for legacy in &input.children {
        let child_definition = lookup_metric(catalog, &legacy.definition)?;
        let child = build_metric(
            catalog,
            legacy,
            child_definition,
            timestamp,
            Some(id),
            None,
            ids,
        )?;
        node.children.push(child);
    }

    Ok(node)
}

/// Attribute child: the first present typed column of the value input is
/// taken, in the fixed priority order.
fn build_attribute_child(
    field: &Field,
    base: &Definition,
    value: &AttributeValueInput,
    parent: &ResolvedEntry,
    timestamp: chrono::NaiveDateTime,
    ids: &mut IdAllocator,
) -> PipelineResult<ResolvedEntry> {
    if value.nested.is_some() {
        return Err(PipelineError::formula(format!(
            "inline metric input on attribute field '{}'",
            field.name
        )));
    }
    let attribute_value = attribute_value_from_input(value).ok_or_else(|| {
        PipelineError::formula(format!(
            "value for field '{}' has no populated column",
            field.name
        ))
    })?;
    Ok(attribute_node(
        field,
        base,
        value,
        parent,
        timestamp,
        attribute_value,
        ids,
    ))
}

/// Metric-reference placeholder: an attribute child whose int or string
/// column holds the identifier; replaced by the instance resolver.
fn build_placeholder_child(
    field: &Field,
    base: &Definition,
    value: &AttributeValueInput,
    parent: &ResolvedEntry,
    timestamp: chrono::NaiveDateTime,
    ids: &mut IdAllocator,
) -> PipelineResult<ResolvedEntry> {
    let attribute_value = if let Some(v) = value.value_int {
        AttributeValue::int(v)
    } else if let Some(v) = &value.value_string {
        AttributeValue::string(v.clone())
    } else {
        return Err(PipelineError::formula(format!(
            "metric reference on field '{}' requires an int or string identifier",
            field.name
        )));
    };
    Ok(attribute_node(
        field,
        base,
        value,
        parent,
        timestamp,
        attribute_value,
        ids,
    ))
}

fn attribute_node(
    field: &Field,
    base: &Definition,
    value: &AttributeValueInput,
    parent: &ResolvedEntry,
    timestamp: chrono::NaiveDateTime,
    attribute_value: AttributeValue,
    ids: &mut IdAllocator,
) -> ResolvedEntry {
    let child_id = ids.builder_id();
    ResolvedEntry {
        entry: Entry {
            id: child_id,
            definition: base.id,
            parent_entry: Some(parent.entry.id),
            timestamp,
            subdivision: value
                .subdivision
                .clone()
                .or_else(|| parent.entry.subdivision.clone()),
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
    }
}

/// First present typed column wins, in the priority
/// `int, float, string, bool, timestamp, hierarchy`.
fn attribute_value_from_input(value: &AttributeValueInput) -> Option<AttributeValue> {
    if let Some(v) = value.value_int {
        return Some(AttributeValue::int(v));
    }
    if let Some(v) = value.value_float {
        return Some(AttributeValue::float(v));
    }
    if let Some(v) = &value.value_string {
        return Some(AttributeValue::string(v.clone()));
    }
    if let Some(v) = value.value_bool {
        return Some(AttributeValue::bool(v));
    }
    if let Some(v) = value.value_timestamp {
        return Some(AttributeValue::timestamp(v));
    }
    if let Some(v) = &value.value_hierarchy {
        return Some(AttributeValue::hierarchy(v.clone()));
    }
    None
}
