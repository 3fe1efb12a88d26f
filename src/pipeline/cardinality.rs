//! # Cardinality Validator
//!
//! Enforces `[min_instances, max_instances]` per field per metric entry,
//! depth-first. The first violation aborts the run.

use crate::entry::ResolvedEntry;
use crate::error::{PipelineError, PipelineResult};
use crate::schema::SchemaCatalog;

/// Validate the whole tree.
pub fn validate(node: &ResolvedEntry, catalog: &SchemaCatalog) -> PipelineResult<()> {
    if node.is_metric() {
        for field_id in catalog.fields_of_metric(node.entry.definition) {
            let Some(field) = catalog.field(*field_id) else {
                continue;
            };
            let actual = node.children_of_field(*field_id).count();
            if !field.cardinality.accepts(actual) {
                return Err(PipelineError::Cardinality {
                    field: field.id,
                    field_name: field.name.clone(),
                    min: field.cardinality.min,
                    max: field.cardinality.max,
                    actual,
                });
            }
        }
    }
    for child in &node.children {
        validate(child, catalog)?;
    }
    Ok(())
}
