//! # Formula Engine
//!
//! The shared expression engine behind the two embedded DSLs:
//! - **entry formulas**, evaluated per-entry during pipeline runs with
//!   `self` / `parent` / `root` and the hierarchy vectors bound;
//! - **widget expressions**, evaluated over loaded entry collections with
//!   the dataset alias bound.
//!
//! One tokenizer and one recursive-descent evaluator serve both; the only
//! difference is the set of bindings and two collection-specific rules
//! (empty aggregations yield 0, and arithmetic on collection-shaped
//! operands is rejected).
//!
//! ## Pipeline
//!
//! ```text
//! formula text
//!     |
//! [lexer]     -> Vec<Token>
//!     |
//! [evaluator] -> EvalValue (direct evaluation, no intermediate AST)
//! ```

pub mod eval;
pub mod lexer;
pub mod value;

pub use eval::{
    eval_entry_formula, eval_widget_expr, EntryBindings, EvalMode, WidgetBindings,
};
pub use lexer::{tokenize, Token};
pub use value::{ArithOp, EvalValue, Scalar};
