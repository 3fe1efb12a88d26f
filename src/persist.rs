//! # Persist-Ready Flattening
//!
//! Flattens a validated [`ResolvedEntry`] tree into the row shapes of the
//! logical persistence contract: one row per node in the `entries` table,
//! plus a `metric_entries` or `attribute_entries` row per marker or
//! specialization. Depth-first insertion order captures child order;
//! parent pointers preserve the tree. Mapping provisional ids to physical
//! ids, and transactional atomicity, belong to the persistence layer.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::entry::{EntryId, ResolvedEntry, UserId};
use crate::schema::{DefinitionId, FieldId};

/// Row of the logical `entries` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRow {
    pub id: EntryId,
    pub user_id: UserId,
    pub definition: DefinitionId,
    pub parent_entry: Option<EntryId>,
    pub timestamp: NaiveDateTime,
    pub subdivision: Option<String>,
    pub comments: Option<String>,
}

/// Row of the logical `metric_entries` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEntryRow {
    pub entry: EntryId,
}

/// Row of the logical `attribute_entries` table (typed columns preserved
/// exactly as the persistence contract)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeEntryRow {
    pub entry: EntryId,
    pub field: FieldId,
    pub value_int: Option<i64>,
    pub value_float: Option<f64>,
    pub value_string: Option<String>,
    pub value_bool: Option<bool>,
    pub value_timestamp: Option<NaiveDateTime>,
    pub value_hierarchy: Option<String>,
}

/// All rows of one pipeline run, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistBatch {
    pub entries: Vec<EntryRow>,
    pub metric_entries: Vec<MetricEntryRow>,
    pub attribute_entries: Vec<AttributeEntryRow>,
}

/// Flatten a validated tree into persist-ready rows.
pub fn flatten(root: &ResolvedEntry, user_id: UserId) -> PersistBatch {
    let mut batch = PersistBatch::default();
    flatten_node(root, user_id, &mut batch);
    batch
}

fn flatten_node(node: &ResolvedEntry, user_id: UserId, batch: &mut PersistBatch) {
    batch.entries.push(EntryRow {
        id: node.entry.id,
        user_id,
        definition: node.entry.definition,
        parent_entry: node.entry.parent_entry,
        timestamp: node.entry.timestamp,
        subdivision: node.entry.subdivision.clone(),
        comments: node.entry.comments.clone(),
    });
    if let Some(metric) = &node.metric {
        batch.metric_entries.push(MetricEntryRow {
            entry: metric.entry,
        });
    }
    if let Some(attribute) = &node.attribute {
        batch.attribute_entries.push(AttributeEntryRow {
            entry: attribute.entry,
            field: attribute.field,
            value_int: attribute.value.value_int,
            value_float: attribute.value.value_float,
            value_string: attribute.value.value_string.clone(),
            value_bool: attribute.value.value_bool,
            value_timestamp: attribute.value.value_timestamp,
            value_hierarchy: attribute.value.value_hierarchy.clone(),
        });
    }
    for child in &node.children {
        flatten_node(child, user_id, batch);
    }
}
