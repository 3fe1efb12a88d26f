//! # Input Adapters
//!
//! Parsers turning raw user text into [`MetricEntryInput`]s ahead of the
//! pipeline. A registry selects the parser: a block with more than one
//! non-blank non-comment line whose header definition is *timing-capable*
//! (has at least one field whose base is the `TIM` metric) routes to the
//! timing-block parser; everything else is handled by the single-line
//! parser.
//!
//! Shared header grammar:
//!
//! ```text
//! DEF_CODE[":" SUBDIV] ";" attr_pairs [";" tag_pairs]
//! ```
//!
//! `attr_pairs` is a comma-separated list of `key:value`; keys that match
//! no field of the metric are skipped with a warning. Tag pairs are
//! validated for shape and ignored.

pub mod single_line;
pub mod timing;

pub use timing::TIM_CODE;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

use crate::config::EvalLimits;
use crate::entry::{AttributeValueInput, MetricEntryInput};
use crate::error::{PipelineError, PipelineResult};
use crate::schema::{Datatype, Definition, Field, SchemaCatalog};

/// Parse one raw input block into pipeline inputs. Atomic: any failure
/// rejects the block and nothing is emitted.
pub fn parse_input(
    catalog: &SchemaCatalog,
    source: &str,
    date: NaiveDate,
    limits: &EvalLimits,
) -> PipelineResult<Vec<MetricEntryInput>> {
    let content: Vec<(usize, &str)> = source
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .collect();

    if content.is_empty() {
        return Err(PipelineError::parse(1, "empty input", source.trim()));
    }
    if content.len() > limits.max_block_lines {
        return Err(PipelineError::parse(
            1,
            format!("input exceeds {} lines", limits.max_block_lines),
            "",
        ));
    }

    let (header_no, header_line) = content[0];
    let code = header_code(header_line);

    if content.len() > 1 {
        let definition = catalog
            .definition_by_code(code)
            .filter(|d| d.is_metric())
            .ok_or_else(|| {
                PipelineError::parse(
                    header_no,
                    format!("unknown definition '{}'", code),
                    header_line,
                )
            })?;
        let timing_capable = catalog
            .definition_by_code(TIM_CODE)
            .is_some_and(|tim| catalog.metric_has_field_with_base(definition.id, tim.id));
        if !timing_capable {
            return Err(PipelineError::parse(
                content[1].0,
                format!(
                    "multi-line input requires a timing-capable definition, '{}' is not",
                    code
                ),
                content[1].1,
            ));
        }
        return timing::parse_block(catalog, &content, date);
    }

    single_line::parse_line(catalog, header_line, header_no, date).map(|input| vec![input])
}

/// Definition code of a header line (first segment, before any subdivision)
fn header_code(line: &str) -> &str {
    let first = line.split(';').next().unwrap_or(line);
    first.split(':').next().unwrap_or(first).trim()
}

fn header_def_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\w+)(?::([\w/]+))?$").expect("valid regex"))
}

/// Parsed header line: the metric, its subdivision, and typed attribute
/// pairs keyed by field name.
#[derive(Debug, Clone)]
pub(crate) struct HeaderSpec<'a> {
    pub definition: &'a Definition,
    pub subdivision: Option<String>,
    pub attrs: Vec<(String, AttributeValueInput)>,
}

pub(crate) fn parse_header<'a>(
    catalog: &'a SchemaCatalog,
    line: &str,
    line_no: usize,
) -> PipelineResult<HeaderSpec<'a>> {
    let segments: Vec<&str> = line.split(';').map(str::trim).collect();
    if segments.len() > 3 {
        return Err(PipelineError::parse(
            line_no,
            "too many ';' segments in header",
            line,
        ));
    }
    let caps = header_def_re().captures(segments[0]).ok_or_else(|| {
        PipelineError::parse(
            line_no,
            "malformed header (expected DEF_CODE[:SUBDIV])",
            segments[0],
        )
    })?;
    let code = &caps[1];
    let definition = catalog
        .definition_by_code(code)
        .filter(|d| d.is_metric())
        .ok_or_else(|| {
            PipelineError::parse(line_no, format!("unknown definition '{}'", code), segments[0])
        })?;
    let subdivision = caps.get(2).map(|m| m.as_str().to_string());

    let attrs = match segments.get(1) {
        Some(segment) if !segment.is_empty() => {
            parse_attr_pairs(catalog, definition, segment, line_no)?
        }
        _ => Vec::new(),
    };
    if let Some(tags) = segments.get(2) {
        parse_tag_pairs(tags, line_no)?;
    }

    Ok(HeaderSpec {
        definition,
        subdivision,
        attrs,
    })
}

/// Parse comma-separated `key:value` attribute pairs. Keys matching no
/// field of the metric are skipped with a warning; values type themselves
/// by the field's base definition.
pub(crate) fn parse_attr_pairs(
    catalog: &SchemaCatalog,
    metric: &Definition,
    segment: &str,
    line_no: usize,
) -> PipelineResult<Vec<(String, AttributeValueInput)>> {
    let mut attrs = Vec::new();
    for pair in segment.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, raw) = pair.split_once(':').ok_or_else(|| {
            PipelineError::parse(line_no, "malformed attribute pair (expected key:value)", pair)
        })?;
        let key = key.trim();
        let raw = raw.trim();
        let Some(field) = catalog.field_of_metric_by_name(metric.id, key) else {
            tracing::warn!(metric = %metric.code, key, "skipped_unknown_header_key");
            continue;
        };
        attrs.push((key.to_string(), typed_value(catalog, field, raw, line_no)?));
    }
    Ok(attrs)
}

/// Tag pairs share the `key:value` shape; they are accepted and ignored.
pub(crate) fn parse_tag_pairs(segment: &str, line_no: usize) -> PipelineResult<()> {
    for pair in segment.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if !pair.contains(':') {
            return Err(PipelineError::parse(
                line_no,
                "malformed tag pair (expected key:value)",
                pair,
            ));
        }
        tracing::debug!(tag = pair, "ignoring_tag_pair");
    }
    Ok(())
}

/// Type a raw attribute value by the field's base definition: attribute
/// bases parse into their datatype, metric bases become scalar identifiers
/// (int if the value parses as one, else string) for the instance
/// resolver.
fn typed_value(
    catalog: &SchemaCatalog,
    field: &Field,
    raw: &str,
    line_no: usize,
) -> PipelineResult<AttributeValueInput> {
    let base = catalog.definition(field.base_definition).ok_or_else(|| {
        PipelineError::parse(
            line_no,
            format!("unknown base definition of field '{}'", field.name),
            raw,
        )
    })?;
    let Some(datatype) = base.datatype() else {
        return Ok(match raw.parse::<i64>() {
            Ok(v) => AttributeValueInput::int(v),
            Err(_) => AttributeValueInput::string(raw),
        });
    };
    let mismatch = |expected: &str| {
        PipelineError::parse(
            line_no,
            format!("expected {} for field '{}'", expected, field.name),
            raw,
        )
    };
    match datatype {
        Datatype::Int => raw
            .parse::<i64>()
            .map(AttributeValueInput::int)
            .map_err(|_| mismatch("an int")),
        Datatype::Float => raw
            .parse::<f64>()
            .map(AttributeValueInput::float)
            .map_err(|_| mismatch("a float")),
        Datatype::String => Ok(AttributeValueInput::string(raw)),
        Datatype::Bool => raw
            .parse::<bool>()
            .map(AttributeValueInput::bool)
            .map_err(|_| mismatch("a bool")),
        Datatype::Timestamp => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(|d| AttributeValueInput::timestamp(NaiveDateTime::new(d, NaiveTime::MIN)))
            .map_err(|_| mismatch("a date (YYYY-MM-DD)")),
        Datatype::HierarchyString => Ok(AttributeValueInput::hierarchy(raw)),
    }
}
