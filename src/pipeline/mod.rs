//! # Entry Creation Pipeline
//!
//! The deterministic, atomic, tree-shaped transformation from user input
//! to a validated, persist-ready tree of typed entries.
//!
//! ## Stages
//!
//! ```text
//! MetricEntryInput
//!     |
//! [builder]     -> ResolvedEntry tree, provisional ids, normalized timestamps
//!     |
//! [hierarchy]   -> subdivision[i] / division[i] / path[i] formula fields
//!     |
//! [resolver]    -> placeholder children replaced by existing entry trees
//!     |
//! [formulas]    -> remaining formula fields evaluated and written
//!     |
//! [cardinality] -> [min, max] instance counts enforced
//!     |
//! validated ResolvedEntry (persist boundary)
//! ```
//!
//! Any stage's first error aborts the run; callers see either the tree or
//! the error, never both. A run is a pure function of the input, the
//! immutable [`SchemaCatalog`] and the read-only [`ExistingEntries`]
//! oracle; ordering within a run is fully deterministic (children in tree
//! order, fields in declaration order, oracle lookups left-to-right
//! depth-first).

pub mod builder;
pub mod cardinality;
pub mod formulas;
pub mod hierarchy;
pub mod oracle;
pub mod resolver;
pub mod trace;

pub use oracle::{ExistingEntries, IdentifierValue, InMemoryExistingEntries, NoExistingEntries};
pub use trace::PipelineTrace;

use crate::config::EvalLimits;
use crate::entry::{MetricEntryInput, ResolvedEntry};
use crate::error::PipelineResult;
use crate::schema::SchemaCatalog;

/// Provisional entry ids come from three disjoint monotonic counters so
/// provenance is observable in traces and collisions cannot occur:
/// builder ids count up from 1, hierarchy-populator ids down from -1000,
/// formula-applier ids down from -2000. The persistence layer replaces
/// all of them at insert time.
#[derive(Debug)]
pub struct IdAllocator {
    next_builder: i64,
    next_hierarchy: i64,
    next_formula: i64,
}

impl IdAllocator {
    pub fn new() -> Self {
        IdAllocator {
            next_builder: 1,
            next_hierarchy: -1000,
            next_formula: -2000,
        }
    }

    pub fn builder_id(&mut self) -> i64 {
        let id = self.next_builder;
        self.next_builder += 1;
        id
    }

    pub fn hierarchy_id(&mut self) -> i64 {
        let id = self.next_hierarchy;
        self.next_hierarchy -= 1;
        id
    }

    pub fn formula_id(&mut self) -> i64 {
        let id = self.next_formula;
        self.next_formula -= 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        IdAllocator::new()
    }
}

/// Which hierarchy vector a formula indexes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyVector {
    Division,
    Subdivision,
    Path,
}

impl HierarchyVector {
    pub fn name(&self) -> &'static str {
        match self {
            HierarchyVector::Division => "division",
            HierarchyVector::Subdivision => "subdivision",
            HierarchyVector::Path => "path",
        }
    }
}

/// The three read-only token vectors of a pipeline run: `division` from
/// the root definition's parent chain (outermost first), `subdivision`
/// from the root entry's subdivision, and their concatenation `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyVectors {
    pub division: Vec<String>,
    pub subdivision: Vec<String>,
    pub path: Vec<String>,
}

impl HierarchyVectors {
    /// Compute the vectors from the built root.
    pub fn compute(catalog: &SchemaCatalog, root: &ResolvedEntry) -> Self {
        let division = catalog.division_chain(root.entry.definition);
        let subdivision = split_subdivision(root.entry.subdivision.as_deref());
        let mut path = division.clone();
        path.extend(subdivision.iter().cloned());
        HierarchyVectors {
            division,
            subdivision,
            path,
        }
    }

    pub fn vector(&self, which: HierarchyVector) -> &[String] {
        match which {
            HierarchyVector::Division => &self.division,
            HierarchyVector::Subdivision => &self.subdivision,
            HierarchyVector::Path => &self.path,
        }
    }

    /// Indexed token of a vector
    pub fn get(&self, which: HierarchyVector, index: usize) -> Option<&str> {
        self.vector(which).get(index).map(String::as_str)
    }

    /// A vector rendered as a single `/`-joined string (the form formulas
    /// bind and index)
    pub fn render(&self, which: HierarchyVector) -> String {
        self.vector(which).join("/")
    }
}

/// Split a subdivision string on `/`, dropping empty tokens only at the
/// tail.
fn split_subdivision(subdivision: Option<&str>) -> Vec<String> {
    let Some(s) = subdivision else {
        return Vec::new();
    };
    let mut tokens: Vec<String> = s.split('/').map(str::to_string).collect();
    while tokens.last().is_some_and(|t| t.is_empty()) {
        tokens.pop();
    }
    tokens
}

/// One configured pipeline over an immutable catalog and oracle.
pub struct Pipeline<'a> {
    catalog: &'a SchemaCatalog,
    oracle: &'a dyn ExistingEntries,
    limits: EvalLimits,
}

impl<'a> Pipeline<'a> {
    pub fn new(catalog: &'a SchemaCatalog, oracle: &'a dyn ExistingEntries) -> Self {
        Pipeline {
            catalog,
            oracle,
            limits: EvalLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run the full pipeline for one input.
    pub fn run(&self, input: &MetricEntryInput) -> PipelineResult<ResolvedEntry> {
        let mut trace = PipelineTrace::default();
        self.run_traced(input, &mut trace)
    }

    /// Run the full pipeline, recording per-stage observations.
    pub fn run_traced(
        &self,
        input: &MetricEntryInput,
        trace: &mut PipelineTrace,
    ) -> PipelineResult<ResolvedEntry> {
        let mut ids = IdAllocator::new();

        let mut root = builder::build(self.catalog, input, &mut ids)?;
        trace.record_built(root.node_count());
        tracing::debug!(definition = %input.definition, nodes = root.node_count(), "tree_built");

        let vectors = HierarchyVectors::compute(self.catalog, &root);

        let populated = hierarchy::populate(&mut root, self.catalog, &vectors, &mut ids)?;
        trace.record_hierarchy(populated);

        let resolved = resolver::resolve(&mut root, self.catalog, self.oracle)?;
        trace.record_resolved(resolved);

        let applied = formulas::apply(&mut root, self.catalog, &vectors, &mut ids, &self.limits)?;
        trace.record_formulas(applied);

        cardinality::validate(&root, self.catalog)?;
        trace.record_validated(root.node_count());
        tracing::debug!(nodes = root.node_count(), "pipeline_complete");

        Ok(root)
    }
}
