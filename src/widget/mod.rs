//! # Widget DSL
//!
//! Read-only dashboard summaries computed from loaded entry collections:
//! - [`parser`]: the line-oriented `WIDGET … END` definition language
//! - [`loader`]: the external-loader surface (`LoadedEntry`, periods)
//! - [`eval`]: per-field isolated evaluation using the shared formula
//!   engine in widget mode
//!
//! ```text
//! WIDGET "Productivity"
//! tims = TIM
//! "productivity": float = sum(tims.time("t")) / sum(tims.duration)
//! "productive_time": int = sum(tims.time("t"))
//! END
//! ```

pub mod eval;
pub mod loader;
pub mod parser;

pub use eval::{evaluate_widget, run_widget, run_widgets, WidgetOutput};
pub use loader::{InMemoryWidgetLoader, LoadQuery, LoadedEntry, Period, WidgetLoader};
pub use parser::{parse_widgets, WidgetDef, WidgetField, WidgetFieldType};
