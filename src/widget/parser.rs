//! # Widget Definition Parser
//!
//! Line-oriented parser for `WIDGET … END` blocks:
//!
//! ```text
//! WIDGET "name"
//! alias = DEF_CODE
//! "label": (int|float) = expression
//! ...
//! END
//! ```
//!
//! Blank lines and `#` comments are ignored. The dataset line accepts and
//! ignores a trailing `FROM PERIOD` (backward compatibility; the effective
//! period always comes from the caller's configuration). Parse errors
//! carry the offending line number.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{PipelineError, PipelineResult};

/// Result type of a computed field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetFieldType {
    /// Floor the computed number to an integer
    Int,
    Float,
}

/// One computed field of a widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetField {
    pub label: String,
    pub ty: WidgetFieldType,
    pub expr: String,
}

/// A parsed widget definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetDef {
    pub name: String,
    /// Identifier the expressions use for the dataset
    pub alias: String,
    /// Definition code the loader resolves
    pub definition_code: String,
    pub fields: Vec<WidgetField>,
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^WIDGET\s+"([^"]*)"\s*$"#).expect("valid regex"))
}

fn dataset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\w+)\s*=\s*(\w+)(?:\s+FROM\s+(\w+))?\s*$").expect("valid regex")
    })
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^"([^"]+)"\s*:\s*(int|float)\s*=\s*(.+)$"#).expect("valid regex")
    })
}

enum ParserState {
    /// Between widgets
    Idle,
    /// Saw the WIDGET header, expecting the dataset line
    AfterHeader { name: String, line: usize },
    /// Collecting computed fields until END
    Fields { def: WidgetDef, line: usize },
}

/// Parse every `WIDGET … END` block in the source, in order.
pub fn parse_widgets(source: &str) -> PipelineResult<Vec<WidgetDef>> {
    let mut widgets = Vec::new();
    let mut state = ParserState::Idle;

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        state = match state {
            ParserState::Idle => {
                let Some(caps) = header_re().captures(line) else {
                    return Err(PipelineError::parse(line_no, "expected WIDGET header", line));
                };
                ParserState::AfterHeader {
                    name: caps[1].to_string(),
                    line: line_no,
                }
            }
            ParserState::AfterHeader { name, .. } => {
                let Some(caps) = dataset_re().captures(line) else {
                    return Err(PipelineError::parse(
                        line_no,
                        "expected dataset line 'alias = DEF_CODE'",
                        line,
                    ));
                };
                if let Some(period) = caps.get(3) {
                    tracing::debug!(
                        widget = %name,
                        period = period.as_str(),
                        "ignoring FROM period on dataset line"
                    );
                }
                ParserState::Fields {
                    def: WidgetDef {
                        name,
                        alias: caps[1].to_string(),
                        definition_code: caps[2].to_string(),
                        fields: Vec::new(),
                    },
                    line: line_no,
                }
            }
            ParserState::Fields { mut def, .. } => {
                if line == "END" {
                    if def.fields.is_empty() {
                        return Err(PipelineError::parse(
                            line_no,
                            "widget has no computed fields",
                            line,
                        ));
                    }
                    widgets.push(def);
                    ParserState::Idle
                } else {
                    let Some(caps) = field_re().captures(line) else {
                        return Err(PipelineError::parse(
                            line_no,
                            "expected computed field '\"label\": (int|float) = expr' or END",
                            line,
                        ));
                    };
                    let ty = if &caps[2] == "int" {
                        WidgetFieldType::Int
                    } else {
                        WidgetFieldType::Float
                    };
                    def.fields.push(WidgetField {
                        label: caps[1].to_string(),
                        ty,
                        expr: caps[3].trim().to_string(),
                    });
                    ParserState::Fields { def, line: line_no }
                }
            }
        };
    }

    match state {
        ParserState::Idle => Ok(widgets),
        ParserState::AfterHeader { line, .. } | ParserState::Fields { line, .. } => Err(
            PipelineError::parse(line, "widget definition missing END", ""),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
WIDGET "Productivity"
tims = TIM
"productivity": float = sum(tims.time("t")) / sum(tims.duration)
"productive_time": int = sum(tims.time("t"))
END
"#;

    #[test]
    fn parses_widget_block() {
        let widgets = parse_widgets(SOURCE).unwrap();
        assert_eq!(widgets.len(), 1);
        let w = &widgets[0];
        assert_eq!(w.name, "Productivity");
        assert_eq!(w.alias, "tims");
        assert_eq!(w.definition_code, "TIM");
        assert_eq!(w.fields.len(), 2);
        assert_eq!(w.fields[0].label, "productivity");
        assert_eq!(w.fields[0].ty, WidgetFieldType::Float);
        assert_eq!(w.fields[1].ty, WidgetFieldType::Int);
    }

    #[test]
    fn accepts_and_ignores_from_period() {
        let source = "WIDGET \"W\"\ntims = TIM FROM WEEK\n\"n\": int = count(tims)\nEND\n";
        let widgets = parse_widgets(source).unwrap();
        assert_eq!(widgets[0].definition_code, "TIM");
    }

    #[test]
    fn missing_end_reports_line() {
        let source = "WIDGET \"W\"\ntims = TIM\n\"n\": int = count(tims)\n";
        let err = parse_widgets(source).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn widget_without_fields_rejected() {
        let source = "WIDGET \"W\"\ntims = TIM\nEND\n";
        let err = parse_widgets(source).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { line: 3, .. }));
    }

    #[test]
    fn malformed_dataset_line_reports_line() {
        let source = "WIDGET \"W\"\n= TIM\n\"n\": int = 1\nEND\n";
        let err = parse_widgets(source).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { line: 2, .. }));
    }

    #[test]
    fn multiple_widgets_in_one_source() {
        let source = format!("{}\nWIDGET \"Second\"\nests = EST\n\"n\": int = count(ests)\nEND\n", SOURCE);
        let widgets = parse_widgets(&source).unwrap();
        assert_eq!(widgets.len(), 2);
        assert_eq!(widgets[1].name, "Second");
    }
}
