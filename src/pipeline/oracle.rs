//! # Existing-Entries Oracle
//!
//! The consumed read interface the instance resolver looks existing metric
//! trees up through. Pure reads: the oracle never observes or mutates the
//! working tree, and the resolver never mutates what the oracle returns
//! (trees come back owned).

use std::fmt;

use crate::entry::{ResolvedEntry, ScalarValue};
use crate::schema::Definition;

/// Scalar identifier of a metric reference (the primary-identifier-field
/// value). Int and string placeholders are distinguished by which value
/// column was populated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for IdentifierValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierValue::Int(v) => write!(f, "{}", v),
            IdentifierValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Read-only lookup of persisted metric-entry trees by primary identifier.
pub trait ExistingEntries {
    /// Exact-equality lookup; returns the possibly-empty list of matching
    /// trees, owned by the caller.
    fn find_by_primary_identifier(
        &self,
        metric: &Definition,
        value: &IdentifierValue,
    ) -> Vec<ResolvedEntry>;
}

/// Oracle with no persisted entries (every lookup misses)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExistingEntries;

impl ExistingEntries for NoExistingEntries {
    fn find_by_primary_identifier(
        &self,
        _metric: &Definition,
        _value: &IdentifierValue,
    ) -> Vec<ResolvedEntry> {
        Vec::new()
    }
}

/// Reference oracle over an in-memory list of trees; matches by root
/// definition and the value of the child tagged with the metric's primary
/// identifier field.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExistingEntries {
    trees: Vec<ResolvedEntry>,
}

impl InMemoryExistingEntries {
    pub fn new() -> Self {
        InMemoryExistingEntries::default()
    }

    pub fn with_tree(mut self, tree: ResolvedEntry) -> Self {
        self.trees.push(tree);
        self
    }

    pub fn push(&mut self, tree: ResolvedEntry) {
        self.trees.push(tree);
    }
}

impl ExistingEntries for InMemoryExistingEntries {
    fn find_by_primary_identifier(
        &self,
        metric: &Definition,
        value: &IdentifierValue,
    ) -> Vec<ResolvedEntry> {
        let Some(pid_field) = metric.primary_identifier_field() else {
            return Vec::new();
        };
        self.trees
            .iter()
            .filter(|tree| tree.entry.definition == metric.id)
            .filter(|tree| {
                tree.children_of_field(pid_field)
                    .filter_map(|c| c.attribute.as_ref())
                    .filter_map(|a| a.value.get())
                    .any(|stored| identifier_matches(&stored, value))
            })
            .cloned()
            .collect()
    }
}

fn identifier_matches(stored: &ScalarValue, wanted: &IdentifierValue) -> bool {
    match (stored, wanted) {
        (ScalarValue::Int(a), IdentifierValue::Int(b)) => a == b,
        (ScalarValue::Str(a), IdentifierValue::Str(b)) => a == b,
        _ => false,
    }
}
