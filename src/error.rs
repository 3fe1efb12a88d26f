//! # Pipeline Error Types
//!
//! The closed error taxonomy for the entry pipeline and the two DSLs.
//! Every pipeline stage reports through [`PipelineError`]; the first error
//! aborts the run and no partial tree is exposed to callers.

use thiserror::Error;

use crate::schema::FieldId;

/// Errors surfaced by the entry pipeline, the input adapters and the
/// widget parser.
///
/// Each variant carries the domain fields a caller needs for diagnostics:
/// the failing field where one exists, the offending formula or fragment,
/// and the counts that explain the rejection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A hierarchy-only formula (`subdivision[i]`, `division[i]`, `path[i]`)
    /// could not be materialized.
    #[error("subdivision error on field '{field_name}': {message}")]
    Subdivision {
        field: FieldId,
        field_name: String,
        formula: String,
        message: String,
    },

    /// A metric-reference placeholder matched zero or several existing
    /// entries.
    #[error(
        "could not resolve '{identifier}' against metric '{metric_code}' \
         for field '{field_name}': {match_count} matches"
    )]
    InstanceResolution {
        field: FieldId,
        field_name: String,
        metric_definition: i64,
        metric_code: String,
        identifier: String,
        match_count: usize,
    },

    /// Formula evaluation failed, or a schema lookup failed during tree
    /// construction (the builder reuses this kind).
    #[error("formula error: {message}")]
    Formula {
        field: Option<FieldId>,
        field_name: Option<String>,
        formula: Option<String>,
        message: String,
    },

    /// A field's instance count fell outside its declared cardinality.
    #[error(
        "cardinality violation on field '{field_name}': expected [{min}, {}], found {actual}",
        .max.map_or_else(|| "inf".to_string(), |m| m.to_string())
    )]
    Cardinality {
        field: FieldId,
        field_name: String,
        min: u32,
        max: Option<u32>,
        actual: usize,
    },

    /// The timing-block or widget parser rejected a line.
    #[error("parse error at line {line}: {message} ('{fragment}')")]
    Parse {
        line: usize,
        message: String,
        fragment: String,
    },
}

impl PipelineError {
    /// Formula error with no field context (schema lookups during
    /// construction).
    pub fn formula(message: impl Into<String>) -> Self {
        PipelineError::Formula {
            field: None,
            field_name: None,
            formula: None,
            message: message.into(),
        }
    }

    /// Formula error attributed to a field and its formula body.
    pub fn formula_in(
        field: FieldId,
        field_name: impl Into<String>,
        formula: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        PipelineError::Formula {
            field: Some(field),
            field_name: Some(field_name.into()),
            formula: Some(formula.into()),
            message: message.into(),
        }
    }

    /// Parse error helper; `fragment` is the offending slice of input.
    pub fn parse(line: usize, message: impl Into<String>, fragment: impl Into<String>) -> Self {
        PipelineError::Parse {
            line,
            message: message.into(),
            fragment: fragment.into(),
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;
