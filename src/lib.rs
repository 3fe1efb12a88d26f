//! # Metrica
//!
//! Core of a user-customizable metrics platform: a deterministic, atomic,
//! tree-shaped transformation from loosely structured user input to a
//! validated, persist-ready tree of typed entries, plus two embedded
//! expression languages — entry formulas (evaluated per-entry during
//! creation) and widget expressions (evaluated over collections for
//! read-only dashboards).
//!
//! ## Pipeline Architecture
//!
//! ```text
//! raw text
//!     |
//! [adapter]        -> MetricEntryInput (single-line or timing-block parser)
//!     |
//! [tree builder]   -> ResolvedEntry tree, provisional ids, normalized dates
//!     |
//! [hierarchy]      -> subdivision[i] / division[i] / path[i] fields
//!     |
//! [resolver]       -> metric references spliced from existing entries
//!     |
//! [formulas]       -> remaining formula fields evaluated
//!     |
//! [cardinality]    -> [min, max] instance counts enforced
//!     |
//! persist-ready tree (persist::flatten -> rows)
//! ```
//!
//! Any step's failure rejects the entire input; callers see the tree or
//! the error, never both.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metrica::adapter;
//! use metrica::pipeline::{NoExistingEntries, Pipeline};
//!
//! let inputs = adapter::parse_input(&catalog, source, date, &limits)?;
//! let pipeline = Pipeline::new(&catalog, &NoExistingEntries);
//! for input in &inputs {
//!     let tree = pipeline.run(input)?;
//!     let batch = metrica::persist::flatten(&tree, user_id);
//!     // hand `batch` to the persistence layer
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `schema` | Definitions, fields, cardinalities, catalog indices |
//! | `entry` | Entry entities, typed attribute columns, the working tree |
//! | `adapter` | Single-line and timing-block input parsers |
//! | `pipeline` | The five pipeline stages and the oracle surface |
//! | `formula` | Shared tokenizer and evaluator of both DSLs |
//! | `widget` | `WIDGET … END` parser, loader surface, evaluation |
//! | `persist` | Flattening into persist-ready rows |
//! | `config` | Layered configuration and logging init |

pub mod adapter;
pub mod config;
pub mod entry;
pub mod error;
pub mod formula;
pub mod persist;
pub mod pipeline;
pub mod schema;
pub mod widget;

// Re-export the shapes embedders touch most
pub use config::{Config, EvalLimits, LogFormat, LoggingConfig};
pub use entry::{
    AttributeEntry, AttributeValue, AttributeValueInput, Entry, FieldInput, MetricEntry,
    MetricEntryInput, ResolvedEntry, ScalarValue,
};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{ExistingEntries, IdentifierValue, Pipeline, PipelineTrace};
pub use schema::{
    Cardinality, Datatype, Definition, DefinitionKind, Field, InputMode, SchemaCatalog,
};
pub use widget::{LoadQuery, LoadedEntry, Period, WidgetDef, WidgetLoader, WidgetOutput};
