//! # Input Shapes
//!
//! The user-facing recursive input record consumed by the tree builder.
//! Adapters (single-line and timing-block parsers) produce these; embedders
//! may also construct or deserialize them directly.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Recursive user-facing input for one metric entry.
///
/// `definition` and field names are resolved against the catalog by the
/// tree builder; nothing here carries stable ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntryInput {
    /// Definition code of the metric
    pub definition: String,
    /// Normalized to start-of-day by the builder
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdivision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Ordered field inputs
    #[serde(default)]
    pub fields: Vec<FieldInput>,
    /// Legacy top-level child subtrees (no field slot); parsers should
    /// prefer field-inlined metric children
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<MetricEntryInput>,
}

impl MetricEntryInput {
    pub fn new(definition: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        MetricEntryInput {
            definition: definition.into(),
            timestamp,
            subdivision: None,
            comments: None,
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_subdivision(mut self, subdivision: impl Into<String>) -> Self {
        self.subdivision = Some(subdivision.into());
        self
    }

    pub fn with_field(mut self, field: FieldInput) -> Self {
        self.fields.push(field);
        self
    }
}

/// One field of the input with its ordered values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInput {
    /// Field name within the metric
    pub field: String,
    pub values: Vec<AttributeValueInput>,
}

impl FieldInput {
    pub fn new(field: impl Into<String>, values: Vec<AttributeValueInput>) -> Self {
        FieldInput {
            field: field.into(),
            values,
        }
    }

    /// Single-valued field input
    pub fn single(field: impl Into<String>, value: AttributeValueInput) -> Self {
        FieldInput::new(field, vec![value])
    }
}

/// One value of a field input: either typed scalar columns (the first
/// present column wins, in the priority `int, float, string, bool,
/// timestamp, hierarchy`), or an inline nested metric input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeValueInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_float: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_bool: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_timestamp: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_hierarchy: Option<String>,
    /// Per-value subdivision; falls back to the parent entry's subdivision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdivision: Option<String>,
    /// Inline nested metric input (for metric-based fields)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<MetricEntryInput>>,
}

impl AttributeValueInput {
    pub fn int(v: i64) -> Self {
        AttributeValueInput {
            value_int: Some(v),
            ..Default::default()
        }
    }

    pub fn float(v: f64) -> Self {
        AttributeValueInput {
            value_float: Some(v),
            ..Default::default()
        }
    }

    pub fn string(v: impl Into<String>) -> Self {
        AttributeValueInput {
            value_string: Some(v.into()),
            ..Default::default()
        }
    }

    pub fn bool(v: bool) -> Self {
        AttributeValueInput {
            value_bool: Some(v),
            ..Default::default()
        }
    }

    pub fn timestamp(v: NaiveDateTime) -> Self {
        AttributeValueInput {
            value_timestamp: Some(v),
            ..Default::default()
        }
    }

    pub fn hierarchy(v: impl Into<String>) -> Self {
        AttributeValueInput {
            value_hierarchy: Some(v.into()),
            ..Default::default()
        }
    }

    pub fn nested(input: MetricEntryInput) -> Self {
        AttributeValueInput {
            nested: Some(Box::new(input)),
            ..Default::default()
        }
    }

    pub fn with_subdivision(mut self, subdivision: impl Into<String>) -> Self {
        self.subdivision = Some(subdivision.into());
        self
    }
}
