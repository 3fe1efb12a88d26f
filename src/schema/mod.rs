//! # Schema Model
//!
//! Typed descriptions of the user-defined metric vocabulary:
//! - [`Definition`]: a metric (with fields) or an attribute (with a datatype)
//! - [`Field`]: a slot within a metric definition referencing another
//!   definition as its base, with cardinality and input mode
//! - [`SchemaCatalog`]: lookup indices consumed by the entry pipeline
//!
//! Definitions form a schema-level chain through `parent_definition`; the
//! chain of codes (outermost first, ending with the definition's own code)
//! is the `division` vector seen by hierarchy formulas.

pub mod catalog;

pub use catalog::{SchemaCatalog, SchemaError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a definition
pub type DefinitionId = i64;

/// Stable identity of a field
pub type FieldId = i64;

/// Datatypes an attribute definition can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    Int,
    Float,
    String,
    Bool,
    Timestamp,
    HierarchyString,
}

impl Datatype {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "int" | "integer" => Some(Datatype::Int),
            "float" | "double" | "number" => Some(Datatype::Float),
            "string" | "str" | "text" => Some(Datatype::String),
            "bool" | "boolean" => Some(Datatype::Bool),
            "timestamp" | "datetime" => Some(Datatype::Timestamp),
            "hierarchy" | "hierarchy_string" => Some(Datatype::HierarchyString),
            _ => None,
        }
    }

    /// Whether this datatype may key a primary-identifier field
    pub fn is_scalar_identifier(&self) -> bool {
        matches!(self, Datatype::Int | Datatype::String)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Int => write!(f, "int"),
            Datatype::Float => write!(f, "float"),
            Datatype::String => write!(f, "string"),
            Datatype::Bool => write!(f, "bool"),
            Datatype::Timestamp => write!(f, "timestamp"),
            Datatype::HierarchyString => write!(f, "hierarchy_string"),
        }
    }
}

/// Variant kind of a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    /// Leaf value carrier with a fixed datatype
    Attribute { datatype: Datatype },
    /// Composite with fields; may designate a scalar field used to resolve
    /// textual references to existing entries
    Metric {
        primary_identifier_field: Option<FieldId>,
    },
}

/// Schema object describing either a metric or an attribute.
///
/// `code` is the human-readable handle used by inputs and formulas; `id` is
/// the stable identity everything else references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub id: DefinitionId,
    pub code: String,
    pub display_name: String,
    /// Forms the schema-level chain producing the `division` vector
    pub parent_definition: Option<DefinitionId>,
    pub kind: DefinitionKind,
}

impl Definition {
    /// Shorthand constructor for an attribute definition
    pub fn attribute(id: DefinitionId, code: impl Into<String>, datatype: Datatype) -> Self {
        let code = code.into();
        Definition {
            id,
            display_name: code.clone(),
            code,
            parent_definition: None,
            kind: DefinitionKind::Attribute { datatype },
        }
    }

    /// Shorthand constructor for a metric definition
    pub fn metric(id: DefinitionId, code: impl Into<String>) -> Self {
        let code = code.into();
        Definition {
            id,
            display_name: code.clone(),
            code,
            parent_definition: None,
            kind: DefinitionKind::Metric {
                primary_identifier_field: None,
            },
        }
    }

    /// Set the parent definition (builder style)
    pub fn with_parent(mut self, parent: DefinitionId) -> Self {
        self.parent_definition = Some(parent);
        self
    }

    /// Set the primary identifier field; panics if called on an attribute
    /// (programming error, not input error).
    pub fn with_primary_identifier(mut self, field: FieldId) -> Self {
        match &mut self.kind {
            DefinitionKind::Metric {
                primary_identifier_field,
            } => *primary_identifier_field = Some(field),
            DefinitionKind::Attribute { .. } => {
                panic!("primary identifier on attribute definition")
            }
        }
        self
    }

    pub fn is_metric(&self) -> bool {
        matches!(self.kind, DefinitionKind::Metric { .. })
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self.kind, DefinitionKind::Attribute { .. })
    }

    /// Datatype if this is an attribute definition
    pub fn datatype(&self) -> Option<Datatype> {
        match self.kind {
            DefinitionKind::Attribute { datatype } => Some(datatype),
            DefinitionKind::Metric { .. } => None,
        }
    }

    /// Primary identifier field if this is a metric definition
    pub fn primary_identifier_field(&self) -> Option<FieldId> {
        match self.kind {
            DefinitionKind::Metric {
                primary_identifier_field,
            } => primary_identifier_field,
            DefinitionKind::Attribute { .. } => None,
        }
    }
}

/// Instance-count bounds for a field: `[min, max]` with `None` = unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub min: u32,
    pub max: Option<u32>,
}

impl Cardinality {
    /// Exactly one instance
    pub const ONE: Cardinality = Cardinality {
        min: 1,
        max: Some(1),
    };

    /// Zero or one instance
    pub const OPTIONAL: Cardinality = Cardinality {
        min: 0,
        max: Some(1),
    };

    /// At least `min`, unbounded above
    pub fn at_least(min: u32) -> Self {
        Cardinality { min, max: None }
    }

    /// Closed range
    pub fn between(min: u32, max: u32) -> Self {
        Cardinality {
            min,
            max: Some(max),
        }
    }

    /// Whether an observed instance count satisfies the bounds
    pub fn accepts(&self, actual: usize) -> bool {
        if actual < self.min as usize {
            return false;
        }
        match self.max {
            Some(max) => actual <= max as usize,
            None => true,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, inf]", self.min),
        }
    }
}

/// How a field's instances come into being
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Populated from user input
    Input,
    /// Computed by the formula engine (or the hierarchy populator)
    Formula,
}

/// A slot within a metric definition.
///
/// The `base_definition` is the field's semantic type: an attribute base
/// makes the field carry typed values, a metric base makes it carry nested
/// or referenced metric entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: FieldId,
    /// Owning metric definition
    pub metric: DefinitionId,
    /// Unique within the owning metric
    pub name: String,
    pub base_definition: DefinitionId,
    pub cardinality: Cardinality,
    pub input_mode: InputMode,
    pub formula: Option<String>,
}

impl Field {
    /// Input-mode field
    pub fn input(
        id: FieldId,
        metric: DefinitionId,
        name: impl Into<String>,
        base: DefinitionId,
        cardinality: Cardinality,
    ) -> Self {
        Field {
            id,
            metric,
            name: name.into(),
            base_definition: base,
            cardinality,
            input_mode: InputMode::Input,
            formula: None,
        }
    }

    /// Formula-mode field; cardinality is pinned to exactly-one by the
    /// schema invariant.
    pub fn formula(
        id: FieldId,
        metric: DefinitionId,
        name: impl Into<String>,
        base: DefinitionId,
        formula: impl Into<String>,
    ) -> Self {
        Field {
            id,
            metric,
            name: name.into(),
            base_definition: base,
            cardinality: Cardinality::ONE,
            input_mode: InputMode::Formula,
            formula: Some(formula.into()),
        }
    }

    pub fn is_formula(&self) -> bool {
        self.input_mode == InputMode::Formula
    }
}
