//! # Single-Line Parser
//!
//! The registry's fallback adapter: one header line becomes one
//! [`MetricEntryInput`] with single-valued field inputs. Metric-based
//! fields become scalar identifiers the instance resolver looks up.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::entry::{FieldInput, MetricEntryInput};
use crate::error::PipelineResult;
use crate::schema::SchemaCatalog;

use super::parse_header;

/// Parse a single header line into one input anchored on `date`.
pub fn parse_line(
    catalog: &SchemaCatalog,
    line: &str,
    line_no: usize,
    date: NaiveDate,
) -> PipelineResult<MetricEntryInput> {
    let header = parse_header(catalog, line, line_no)?;
    let timestamp = NaiveDateTime::new(date, NaiveTime::MIN);
    let mut input = MetricEntryInput::new(&header.definition.code, timestamp);
    input.subdivision = header.subdivision;
    for (name, value) in header.attrs {
        input.fields.push(FieldInput::single(name, value));
    }
    Ok(input)
}
