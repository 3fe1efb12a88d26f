//! # Timing-Block Parser
//!
//! Transforms a multi-line timing block into one parent
//! [`MetricEntryInput`] per timing line, each containing a nested TIM
//! sub-input:
//!
//! ```text
//! EST:TFG/research;adv:7,project:paper
//! 1400-1500 t30m/thk15m5n10
//! 1500-1620 t60 | project:slides
//! ```
//!
//! Time values are minutes since the day's midnight (`60*HH + MM`); hours
//! may exceed 23 to encode next-day crossings. Lines must be ordered and
//! non-overlapping. The token stream is a run of `key digits` pairs where
//! a key is letters, optionally extended by `/`-separated letter groups
//! (`m/thk`); slashes after a value separate tokens. Repeated keys
//! accumulate, the sum must not exceed the line's duration, and any other
//! residue rejects the block.
//!
//! Atomic: the first failing line rejects the whole block.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::sync::OnceLock;

use crate::entry::{AttributeValueInput, FieldInput, MetricEntryInput};
use crate::error::{PipelineError, PipelineResult};
use crate::schema::{Definition, SchemaCatalog};

use super::{parse_attr_pairs, parse_header, parse_tag_pairs};

/// Code of the conventional timing metric
pub const TIM_CODE: &str = "TIM";

fn timing_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{2})(\d{2})-(\d{2})(\d{2})\s+(.+)$").expect("valid regex"))
}

/// Parse a timing block (pre-filtered numbered content lines, header
/// first) into one parent input per timing line.
pub(crate) fn parse_block(
    catalog: &SchemaCatalog,
    lines: &[(usize, &str)],
    date: NaiveDate,
) -> PipelineResult<Vec<MetricEntryInput>> {
    let (header_no, header_line) = lines[0];
    let header = parse_header(catalog, header_line, header_no)?;

    let tim = catalog.definition_by_code(TIM_CODE).ok_or_else(|| {
        PipelineError::parse(header_no, "unknown TIM definition", TIM_CODE)
    })?;
    let tim_field = catalog
        .first_field_with_base(header.definition.id, tim.id)
        .ok_or_else(|| {
            PipelineError::parse(
                header_no,
                format!("metric '{}' has no TIM field", header.definition.code),
                header_line,
            )
        })?;

    let timestamp = NaiveDateTime::new(date, NaiveTime::MIN);
    let mut inputs = Vec::new();
    let mut prev_end: Option<i64> = None;

    for &(line_no, line) in &lines[1..] {
        let timing = parse_timing_line(catalog, header.definition, line, line_no)?;
        if let Some(prev) = prev_end {
            if timing.time_init < prev {
                return Err(PipelineError::parse(
                    line_no,
                    format!(
                        "line starts at {} before the previous line ends at {}",
                        timing.time_init, prev
                    ),
                    line,
                ));
            }
        }
        prev_end = Some(timing.time_end);

        // line-level overrides replace header values by field identity
        let mut attrs = header.attrs.clone();
        for (name, value) in timing.overrides {
            if let Some(slot) = attrs.iter_mut().find(|(n, _)| *n == name) {
                slot.1 = value;
            } else {
                attrs.push((name, value));
            }
        }

        let mut tim_input = MetricEntryInput::new(TIM_CODE, timestamp);
        for (name, value) in [
            ("time_init", timing.time_init),
            ("time_end", timing.time_end),
            ("duration", timing.duration),
        ] {
            if catalog.field_of_metric_by_name(tim.id, name).is_some() {
                tim_input
                    .fields
                    .push(FieldInput::single(name, AttributeValueInput::int(value)));
            }
        }
        tim_input.fields.push(FieldInput::new(
            "time_type",
            timing
                .tokens
                .iter()
                .map(|(key, sum)| AttributeValueInput::int(*sum).with_subdivision(key.clone()))
                .collect(),
        ));

        let mut parent = MetricEntryInput::new(&header.definition.code, timestamp);
        parent.subdivision = header.subdivision.clone();
        for (name, value) in attrs {
            parent.fields.push(FieldInput::single(name, value));
        }
        parent.fields.push(FieldInput::single(
            &tim_field.name,
            AttributeValueInput::nested(tim_input),
        ));
        inputs.push(parent);
    }

    if inputs.is_empty() {
        return Err(PipelineError::parse(
            header_no,
            "timing block has no timing lines",
            header_line,
        ));
    }
    Ok(inputs)
}

#[derive(Debug)]
struct TimingLine {
    time_init: i64,
    time_end: i64,
    duration: i64,
    /// Distinct keys in first-appearance order, values accumulated
    tokens: Vec<(String, i64)>,
    overrides: Vec<(String, AttributeValueInput)>,
}

fn parse_timing_line(
    catalog: &SchemaCatalog,
    metric: &Definition,
    line: &str,
    line_no: usize,
) -> PipelineResult<TimingLine> {
    let caps = timing_line_re().captures(line).ok_or_else(|| {
        PipelineError::parse(
            line_no,
            "malformed timing line (expected HHMM-HHMM tokens)",
            line,
        )
    })?;
    let h1: i64 = caps[1].parse().map_err(|_| bad_number(line_no, &caps[1]))?;
    let m1: i64 = caps[2].parse().map_err(|_| bad_number(line_no, &caps[2]))?;
    let h2: i64 = caps[3].parse().map_err(|_| bad_number(line_no, &caps[3]))?;
    let m2: i64 = caps[4].parse().map_err(|_| bad_number(line_no, &caps[4]))?;
    if m1 >= 60 || m2 >= 60 {
        return Err(PipelineError::parse(line_no, "minutes must be below 60", line));
    }
    let time_init = 60 * h1 + m1;
    let time_end = 60 * h2 + m2;
    let duration = time_end - time_init;
    if duration <= 0 {
        return Err(PipelineError::parse(
            line_no,
            format!("duration must be positive ({} - {})", time_end, time_init),
            line,
        ));
    }

    let segments: Vec<&str> = caps[5].split('|').map(str::trim).collect();
    if segments.len() > 3 {
        return Err(PipelineError::parse(
            line_no,
            "too many '|' segments in timing line",
            line,
        ));
    }

    let tokens = scan_tokens(segments[0], line_no)?;
    let total: i64 = tokens.iter().map(|(_, v)| v).sum();
    if total > duration {
        return Err(PipelineError::parse(
            line_no,
            format!("token sum {} exceeds duration {}", total, duration),
            segments[0],
        ));
    }

    let overrides = match segments.get(1) {
        Some(segment) if !segment.is_empty() => {
            parse_attr_pairs(catalog, metric, segment, line_no)?
        }
        _ => Vec::new(),
    };
    if let Some(tags) = segments.get(2) {
        parse_tag_pairs(tags, line_no)?;
    }

    Ok(TimingLine {
        time_init,
        time_end,
        duration,
        tokens,
        overrides,
    })
}

fn bad_number(line_no: usize, fragment: &str) -> PipelineError {
    PipelineError::parse(line_no, "malformed number", fragment)
}

/// Scan a token stream: `key digits` pairs with optional `/` separators
/// between tokens. A `/` inside the key part (before any digits) extends
/// the key into a hierarchical one (`m/thk`); a `/` after a value
/// separates tokens. Keys are lowercased; repeated keys accumulate; any
/// other residue is rejected.
fn scan_tokens(stream: &str, line_no: usize) -> PipelineResult<Vec<(String, i64)>> {
    let chars: Vec<char> = stream.chars().collect();
    let mut tokens: Vec<(String, i64)> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        // separator slashes between tokens
        while i < chars.len() && chars[i] == '/' {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        if !chars[i].is_ascii_alphabetic() {
            return Err(PipelineError::parse(
                line_no,
                format!("unexpected character '{}' in token stream", chars[i]),
                stream,
            ));
        }

        let mut key = String::new();
        loop {
            while i < chars.len() && chars[i].is_ascii_alphabetic() {
                key.extend(chars[i].to_lowercase());
                i += 1;
            }
            // a slash directly followed by letters extends the key
            if i < chars.len()
                && chars[i] == '/'
                && chars.get(i + 1).is_some_and(char::is_ascii_alphabetic)
            {
                key.push('/');
                i += 1;
                continue;
            }
            break;
        }

        let digits_start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        if digits_start == i {
            return Err(PipelineError::parse(
                line_no,
                format!("token '{}' has no value", key),
                stream,
            ));
        }
        let text: String = chars[digits_start..i].iter().collect();
        let value: i64 = text.parse().map_err(|_| {
            PipelineError::parse(line_no, format!("token value '{}' too large", text), stream)
        })?;

        match tokens.iter_mut().find(|(k, _)| *k == key) {
            Some((_, sum)) => *sum += value,
            None => tokens.push((key, value)),
        }
    }

    if tokens.is_empty() {
        return Err(PipelineError::parse(line_no, "no tokens found", stream));
    }
    Ok(tokens)
}
