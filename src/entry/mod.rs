//! # Entry Model
//!
//! The persist-shaped entry entities and the pipeline's working tree:
//! - [`Entry`]: the base row (definition, parent, day-normalized timestamp)
//! - [`MetricEntry`]: marker present when the entry is a metric instance
//! - [`AttributeEntry`]: specialization carrying exactly one typed value
//! - [`ResolvedEntry`]: tree node bundling the above with its field slot
//!   and ordered children
//!
//! Attribute values live in six optional typed columns of which exactly one
//! is populated; reads resolve in the fixed priority
//! `int, float, string, bool, timestamp, hierarchy` (the persistence
//! contract).

pub mod input;

pub use input::{AttributeValueInput, FieldInput, MetricEntryInput};

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::schema::{Datatype, DefinitionId, FieldId};

/// Entry identity. Provisional (pipeline-allocated) during a run, replaced
/// by the persistence layer at insert time.
pub type EntryId = i64;

/// Owning user identity
pub type UserId = i64;

/// Normalize a timestamp to start-of-day (local midnight)
pub fn start_of_day(ts: NaiveDateTime) -> NaiveDateTime {
    NaiveDateTime::new(ts.date(), NaiveTime::MIN)
}

/// Base entry row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub definition: DefinitionId,
    pub parent_entry: Option<EntryId>,
    /// Always normalized to start-of-day
    pub timestamp: NaiveDateTime,
    pub subdivision: Option<String>,
    pub comments: Option<String>,
}

/// Marker present when the entry represents a metric instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    pub entry: EntryId,
}

/// Specialization carrying the field reference and one typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeEntry {
    pub entry: EntryId,
    pub field: FieldId,
    pub value: AttributeValue,
}

/// A scalar as stored in one attribute column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Hierarchy(String),
}

impl ScalarValue {
    /// Numeric coercion used at the widget surface: ints and floats
    /// coerce, numeric strings parse, everything else drops.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(v) => Some(*v as f64),
            ScalarValue::Float(v) => Some(*v),
            ScalarValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Str(v) => write!(f, "{}", v),
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Timestamp(v) => write!(f, "{}", v),
            ScalarValue::Hierarchy(v) => write!(f, "{}", v),
        }
    }
}

/// The six typed columns of an attribute entry. Exactly one is populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub value_int: Option<i64>,
    pub value_float: Option<f64>,
    pub value_string: Option<String>,
    pub value_bool: Option<bool>,
    pub value_timestamp: Option<NaiveDateTime>,
    pub value_hierarchy: Option<String>,
}

impl AttributeValue {
    pub fn int(v: i64) -> Self {
        AttributeValue {
            value_int: Some(v),
            ..Default::default()
        }
    }

    pub fn float(v: f64) -> Self {
        AttributeValue {
            value_float: Some(v),
            ..Default::default()
        }
    }

    pub fn string(v: impl Into<String>) -> Self {
        AttributeValue {
            value_string: Some(v.into()),
            ..Default::default()
        }
    }

    pub fn bool(v: bool) -> Self {
        AttributeValue {
            value_bool: Some(v),
            ..Default::default()
        }
    }

    pub fn timestamp(v: NaiveDateTime) -> Self {
        AttributeValue {
            value_timestamp: Some(v),
            ..Default::default()
        }
    }

    pub fn hierarchy(v: impl Into<String>) -> Self {
        AttributeValue {
            value_hierarchy: Some(v.into()),
            ..Default::default()
        }
    }

    /// Whichever single column is populated, in the fixed priority
    /// `int, float, string, bool, timestamp, hierarchy`.
    pub fn get(&self) -> Option<ScalarValue> {
        if let Some(v) = self.value_int {
            return Some(ScalarValue::Int(v));
        }
        if let Some(v) = self.value_float {
            return Some(ScalarValue::Float(v));
        }
        if let Some(v) = &self.value_string {
            return Some(ScalarValue::Str(v.clone()));
        }
        if let Some(v) = self.value_bool {
            return Some(ScalarValue::Bool(v));
        }
        if let Some(v) = self.value_timestamp {
            return Some(ScalarValue::Timestamp(v));
        }
        if let Some(v) = &self.value_hierarchy {
            return Some(ScalarValue::Hierarchy(v.clone()));
        }
        None
    }

    /// Overwrite with a scalar targeting the column of `datatype`.
    /// All other columns are cleared. Returns an error message when the
    /// scalar does not fit the column.
    pub fn set(&mut self, datatype: Datatype, value: ScalarValue) -> Result<(), String> {
        let replacement = match (datatype, value) {
            (Datatype::Int, ScalarValue::Int(v)) => AttributeValue::int(v),
            (Datatype::Float, ScalarValue::Float(v)) => AttributeValue::float(v),
            (Datatype::Float, ScalarValue::Int(v)) => AttributeValue::float(v as f64),
            (Datatype::String, ScalarValue::Str(v)) => AttributeValue::string(v),
            (Datatype::String, ScalarValue::Hierarchy(v)) => AttributeValue::string(v),
            (Datatype::Bool, ScalarValue::Bool(v)) => AttributeValue::bool(v),
            (Datatype::Timestamp, ScalarValue::Timestamp(v)) => AttributeValue::timestamp(v),
            (Datatype::HierarchyString, ScalarValue::Str(v)) => AttributeValue::hierarchy(v),
            (Datatype::HierarchyString, ScalarValue::Hierarchy(v)) => AttributeValue::hierarchy(v),
            (dt, v) => {
                return Err(format!("value '{}' does not fit {} column", v, dt));
            }
        };
        *self = replacement;
        Ok(())
    }

    /// Count of populated columns (invariant: exactly one)
    pub fn populated_columns(&self) -> usize {
        usize::from(self.value_int.is_some())
            + usize::from(self.value_float.is_some())
            + usize::from(self.value_string.is_some())
            + usize::from(self.value_bool.is_some())
            + usize::from(self.value_timestamp.is_some())
            + usize::from(self.value_hierarchy.is_some())
    }
}

/// The working tree node of the entry pipeline.
///
/// Invariants during a run:
/// 1. at most one of `metric` / `attribute` is present;
/// 2. `field` is set iff the node occupies a field slot of its parent;
/// 3. `entry.parent_entry` matches the actual parent node;
/// 4. all descendants share the root's normalized timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntry {
    pub entry: Entry,
    pub metric: Option<MetricEntry>,
    pub attribute: Option<AttributeEntry>,
    /// The field under which this node appears in its parent; `None` for
    /// the root and for legacy child subtrees.
    pub field: Option<FieldId>,
    pub children: Vec<ResolvedEntry>,
}

impl ResolvedEntry {
    pub fn is_metric(&self) -> bool {
        self.metric.is_some()
    }

    pub fn is_attribute(&self) -> bool {
        self.attribute.is_some()
    }

    /// Children occupying the slot of `field`, in tree order
    pub fn children_of_field(&self, field: FieldId) -> impl Iterator<Item = &ResolvedEntry> {
        self.children
            .iter()
            .filter(move |c| c.field == Some(field))
    }

    /// Total node count of the subtree rooted here
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(ResolvedEntry::node_count).sum::<usize>()
    }

    /// Whether `subdivision` equals `prefix` or starts with `prefix + "/"`
    pub fn subdivision_matches(&self, prefix: &str) -> bool {
        match &self.entry.subdivision {
            Some(s) => s == prefix || s.starts_with(&format!("{}/", prefix)),
            None => false,
        }
    }
}
