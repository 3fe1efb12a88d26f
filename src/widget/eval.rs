//! # Widget Evaluation
//!
//! Evaluates a widget's computed fields against a loaded collection using
//! the shared formula engine in widget mode. Each field is isolated: a
//! failing field reports its error while siblings still evaluate; a run of
//! several widgets isolates the widgets likewise.

use crate::config::EvalLimits;
use crate::formula::{eval_widget_expr, EvalValue, WidgetBindings};

use super::loader::{LoadQuery, LoadedEntry, WidgetLoader};
use super::parser::{WidgetDef, WidgetFieldType};

/// The flat numeric output of one widget, field order preserved
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetOutput {
    pub name: String,
    /// `label -> number` in field-declaration order; a field may fail in
    /// isolation
    pub fields: Vec<(String, Result<f64, String>)>,
}

impl WidgetOutput {
    /// Look up a computed field by label
    pub fn get(&self, label: &str) -> Option<&Result<f64, String>> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v)
    }
}

/// Evaluate one widget against an already-loaded collection.
pub fn evaluate_widget(
    def: &WidgetDef,
    entries: &[LoadedEntry],
    limits: &EvalLimits,
) -> WidgetOutput {
    let bindings = WidgetBindings {
        alias: &def.alias,
        entries,
    };
    let fields = def
        .fields
        .iter()
        .map(|field| {
            let value = match eval_widget_expr(&field.expr, &bindings, limits) {
                Ok(EvalValue::Num(n)) => match field.ty {
                    WidgetFieldType::Int => Ok(n.floor()),
                    WidgetFieldType::Float => Ok(n),
                },
                Ok(other) => Err(format!(
                    "expression produced {}, expected a number",
                    other.kind()
                )),
                Err(e) => Err(e),
            };
            if let Err(e) = &value {
                tracing::warn!(widget = %def.name, label = %field.label, error = %e, "widget_field_failed");
            }
            (field.label.clone(), value)
        })
        .collect();
    WidgetOutput {
        name: def.name.clone(),
        fields,
    }
}

/// Load the widget's dataset and evaluate it.
pub fn run_widget(
    def: &WidgetDef,
    loader: &dyn WidgetLoader,
    query: &LoadQuery,
    limits: &EvalLimits,
) -> WidgetOutput {
    let entries = loader.load_entries_for_widget(&def.definition_code, query);
    tracing::debug!(
        widget = %def.name,
        definition = %def.definition_code,
        loaded = entries.len(),
        "widget_dataset_loaded"
    );
    evaluate_widget(def, &entries, limits)
}

/// Run several widgets; each is isolated from its siblings.
pub fn run_widgets(
    defs: &[WidgetDef],
    loader: &dyn WidgetLoader,
    query: &LoadQuery,
    limits: &EvalLimits,
) -> Vec<WidgetOutput> {
    defs.iter()
        .map(|def| run_widget(def, loader, query, limits))
        .collect()
}
