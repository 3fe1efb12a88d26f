//! # Schema Catalog
//!
//! Lookup tables over the schema model as consumed by the entry pipeline:
//! definitions by id and code, fields by id, and the `fields_by_metric`
//! index preserving field declaration order.
//!
//! Registration validates the schema invariants; the pipeline assumes a
//! validated catalog and treats it as immutable for the duration of a run.

use super::{Cardinality, Definition, DefinitionId, Field, FieldId, InputMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Error types for catalog registration and validation
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SchemaError {
    /// Definition id already registered
    #[error("definition id {0} already registered")]
    DuplicateDefinition(DefinitionId),
    /// Definition code already registered
    #[error("definition code '{0}' already registered")]
    DuplicateDefinitionCode(String),
    /// Field id already registered
    #[error("field id {0} already registered")]
    DuplicateField(FieldId),
    /// Field name already used within the owning metric
    #[error("field name '{name}' already used in metric '{metric_code}'")]
    DuplicateFieldName { metric_code: String, name: String },
    /// Referenced definition is not in the catalog
    #[error("unknown definition {0}")]
    UnknownDefinition(DefinitionId),
    /// Field's owning definition is not a metric
    #[error("field '{field_name}' declared on non-metric definition '{code}'")]
    FieldOnAttribute { field_name: String, code: String },
    /// Formula fields must be single-instance and carry a body
    #[error("formula field '{field_name}' must have cardinality [_, 1] and a formula body")]
    InvalidFormulaField { field_name: String },
    /// Primary identifier field violates its invariants
    #[error("invalid primary identifier field on metric '{metric_code}': {reason}")]
    InvalidPrimaryIdentifier { metric_code: String, reason: String },
}

/// Catalog of definitions and fields with the indices the pipeline needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCatalog {
    definitions: HashMap<DefinitionId, Definition>,
    definitions_by_code: HashMap<String, DefinitionId>,
    fields: HashMap<FieldId, Field>,
    /// Field ids per metric, in declaration order
    fields_by_metric: HashMap<DefinitionId, Vec<FieldId>>,
}

impl SchemaCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        SchemaCatalog::default()
    }

    /// Register a definition. Codes and ids must be unique.
    pub fn register_definition(&mut self, definition: Definition) -> Result<(), SchemaError> {
        if self.definitions.contains_key(&definition.id) {
            return Err(SchemaError::DuplicateDefinition(definition.id));
        }
        if self.definitions_by_code.contains_key(&definition.code) {
            return Err(SchemaError::DuplicateDefinitionCode(definition.code));
        }
        self.definitions_by_code
            .insert(definition.code.clone(), definition.id);
        self.definitions.insert(definition.id, definition);
        Ok(())
    }

    /// Register a field under its owning metric, preserving declaration
    /// order. The owning metric and the base definition must already be
    /// registered.
    pub fn register_field(&mut self, field: Field) -> Result<(), SchemaError> {
        if self.fields.contains_key(&field.id) {
            return Err(SchemaError::DuplicateField(field.id));
        }
        let owner = self
            .definitions
            .get(&field.metric)
            .ok_or(SchemaError::UnknownDefinition(field.metric))?;
        if !owner.is_metric() {
            return Err(SchemaError::FieldOnAttribute {
                field_name: field.name.clone(),
                code: owner.code.clone(),
            });
        }
        if !self.definitions.contains_key(&field.base_definition) {
            return Err(SchemaError::UnknownDefinition(field.base_definition));
        }
        let siblings = self.fields_by_metric.entry(field.metric).or_default();
        if siblings
            .iter()
            .any(|id| self.fields[id].name == field.name)
        {
            return Err(SchemaError::DuplicateFieldName {
                metric_code: owner.code.clone(),
                name: field.name.clone(),
            });
        }
        if field.input_mode == InputMode::Formula
            && (field.cardinality.max != Some(1) || field.formula.is_none())
        {
            return Err(SchemaError::InvalidFormulaField {
                field_name: field.name.clone(),
            });
        }
        siblings.push(field.id);
        self.fields.insert(field.id, field);
        Ok(())
    }

    /// Validate cross-references that can only be checked once both sides
    /// are registered: every metric's primary identifier field must exist,
    /// belong to that metric, be input-mode, scalar-typed and exactly-one.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for definition in self.definitions.values() {
            let Some(pid) = definition.primary_identifier_field() else {
                continue;
            };
            let invalid = |reason: &str| SchemaError::InvalidPrimaryIdentifier {
                metric_code: definition.code.clone(),
                reason: reason.to_string(),
            };
            let field = self.fields.get(&pid).ok_or_else(|| invalid("no such field"))?;
            if field.metric != definition.id {
                return Err(invalid("field belongs to another metric"));
            }
            if field.input_mode != InputMode::Input {
                return Err(invalid("must be input-mode"));
            }
            if field.cardinality != Cardinality::ONE {
                return Err(invalid("must have cardinality [1, 1]"));
            }
            let base = self
                .definitions
                .get(&field.base_definition)
                .ok_or_else(|| invalid("base definition missing"))?;
            match base.datatype() {
                Some(dt) if dt.is_scalar_identifier() => {}
                _ => return Err(invalid("base must be a scalar attribute (int or string)")),
            }
        }
        Ok(())
    }

    /// Look up a definition by id
    pub fn definition(&self, id: DefinitionId) -> Option<&Definition> {
        self.definitions.get(&id)
    }

    /// Look up a definition by code
    pub fn definition_by_code(&self, code: &str) -> Option<&Definition> {
        self.definitions_by_code
            .get(code)
            .and_then(|id| self.definitions.get(id))
    }

    /// Look up a field by id
    pub fn field(&self, id: FieldId) -> Option<&Field> {
        self.fields.get(&id)
    }

    /// Field ids of a metric, in declaration order (empty for unknown or
    /// attribute definitions)
    pub fn fields_of_metric(&self, metric: DefinitionId) -> &[FieldId] {
        self.fields_by_metric
            .get(&metric)
            .map_or(&[], Vec::as_slice)
    }

    /// Find a metric's field by name
    pub fn field_of_metric_by_name(&self, metric: DefinitionId, name: &str) -> Option<&Field> {
        self.fields_of_metric(metric)
            .iter()
            .map(|id| &self.fields[id])
            .find(|f| f.name == name)
    }

    /// Whether a metric has at least one field whose base is `base`
    pub fn metric_has_field_with_base(&self, metric: DefinitionId, base: DefinitionId) -> bool {
        self.fields_of_metric(metric)
            .iter()
            .any(|id| self.fields[id].base_definition == base)
    }

    /// First field of a metric whose base is `base`, in declaration order
    pub fn first_field_with_base(&self, metric: DefinitionId, base: DefinitionId) -> Option<&Field> {
        self.fields_of_metric(metric)
            .iter()
            .map(|id| &self.fields[id])
            .find(|f| f.base_definition == base)
    }

    /// Codes along the parent-definition chain of `definition`, outermost
    /// first and ending with the definition's own code. A repeated id stops
    /// the walk (the chain is acyclic by construction; this guards against
    /// a malformed catalog looping forever).
    pub fn division_chain(&self, definition: DefinitionId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut cursor = Some(definition);
        while let Some(id) = cursor {
            if !seen.insert(id) {
                break;
            }
            let Some(def) = self.definitions.get(&id) else {
                break;
            };
            chain.push(def.code.clone());
            cursor = def.parent_definition;
        }
        chain.reverse();
        chain
    }
}
