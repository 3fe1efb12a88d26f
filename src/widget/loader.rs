//! # Widget Loader Surface
//!
//! The consumed interface that feeds widget evaluation: a loader returns
//! flattened [`LoadedEntry`]s for a definition code and a calendar period
//! anchored on a date. Production loaders live behind the persistence
//! boundary; [`InMemoryWidgetLoader`] is the reference implementation used
//! by tests and embedders.

use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entry::{ScalarValue, UserId};

/// Calendar period selecting the loaded date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    /// Parse a period tag (case-insensitive); `TODAY` is an alias of `DAY`
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_uppercase().as_str() {
            "DAY" | "TODAY" => Some(Period::Day),
            "WEEK" => Some(Period::Week),
            "MONTH" => Some(Period::Month),
            "YEAR" => Some(Period::Year),
            _ => None,
        }
    }

    /// Half-open date range `[start, end)` in the anchor's local calendar.
    /// Weeks start on the Monday containing the anchor.
    pub fn range(self, anchor: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let midnight = |d: NaiveDate| NaiveDateTime::new(d, NaiveTime::MIN);
        match self {
            Period::Day => (midnight(anchor), midnight(anchor + Days::new(1))),
            Period::Week => {
                let monday =
                    anchor - Days::new(u64::from(anchor.weekday().num_days_from_monday()));
                (midnight(monday), midnight(monday + Days::new(7)))
            }
            Period::Month => {
                let first = anchor - Days::new(u64::from(anchor.day0()));
                (midnight(first), midnight(first + Months::new(1)))
            }
            Period::Year => {
                let jan1 = anchor - Days::new(u64::from(anchor.ordinal0()));
                (midnight(jan1), midnight(jan1 + Months::new(12)))
            }
        }
    }
}

/// Parameters of one widget load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadQuery {
    pub user: UserId,
    pub anchor: NaiveDate,
    pub period: Period,
}

/// Flattened form of a persisted entry as consumed by widget expressions:
/// a flat attribute map plus, for TIM entries, the per-subdivision summed
/// time allocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedEntry {
    pub id: i64,
    pub definition_code: String,
    pub timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdivision: Option<String>,
    /// Field name to scalar value
    #[serde(default)]
    pub attributes: HashMap<String, ScalarValue>,
    /// Subdivision prefix to summed `value_int`
    #[serde(default)]
    pub time_values: HashMap<String, i64>,
}

impl LoadedEntry {
    pub fn new(id: i64, definition_code: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        LoadedEntry {
            id,
            definition_code: definition_code.into(),
            timestamp,
            subdivision: None,
            attributes: HashMap::new(),
            time_values: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: ScalarValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_time_value(mut self, key: impl Into<String>, value: i64) -> Self {
        self.time_values.insert(key.into(), value);
        self
    }

    /// Summed time allocation for a base: keys equal to the base or under
    /// it (`base + "/"`) contribute.
    pub fn time_sum(&self, base: &str) -> f64 {
        let prefix = format!("{}/", base);
        self.time_values
            .iter()
            .filter(|(k, _)| k.as_str() == base || k.starts_with(&prefix))
            .map(|(_, v)| *v)
            .sum::<i64>() as f64
    }
}

/// External loader feeding widget evaluation
pub trait WidgetLoader {
    fn load_entries_for_widget(&self, definition_code: &str, query: &LoadQuery)
        -> Vec<LoadedEntry>;
}

/// Reference loader over an in-memory collection, filtering by definition
/// code and the query's period range.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWidgetLoader {
    entries: Vec<LoadedEntry>,
}

impl InMemoryWidgetLoader {
    pub fn new(entries: Vec<LoadedEntry>) -> Self {
        InMemoryWidgetLoader { entries }
    }

    pub fn push(&mut self, entry: LoadedEntry) {
        self.entries.push(entry);
    }
}

impl WidgetLoader for InMemoryWidgetLoader {
    fn load_entries_for_widget(
        &self,
        definition_code: &str,
        query: &LoadQuery,
    ) -> Vec<LoadedEntry> {
        let (start, end) = query.period.range(query.anchor);
        self.entries
            .iter()
            .filter(|e| e.definition_code == definition_code)
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_range_is_one_day() {
        let (start, end) = Period::Day.range(date(2024, 3, 9));
        assert_eq!(start.date(), date(2024, 3, 9));
        assert_eq!(end.date(), date(2024, 3, 10));
    }

    #[test]
    fn week_starts_on_monday() {
        // 2024-03-09 is a Saturday
        let (start, end) = Period::Week.range(date(2024, 3, 9));
        assert_eq!(start.date(), date(2024, 3, 4));
        assert_eq!(end.date(), date(2024, 3, 11));
        // Monday anchors to itself
        let (start, _) = Period::Week.range(date(2024, 3, 4));
        assert_eq!(start.date(), date(2024, 3, 4));
    }

    #[test]
    fn month_range_handles_year_wrap() {
        let (start, end) = Period::Month.range(date(2023, 12, 15));
        assert_eq!(start.date(), date(2023, 12, 1));
        assert_eq!(end.date(), date(2024, 1, 1));
    }

    #[test]
    fn year_range() {
        let (start, end) = Period::Year.range(date(2024, 7, 20));
        assert_eq!(start.date(), date(2024, 1, 1));
        assert_eq!(end.date(), date(2025, 1, 1));
    }

    #[test]
    fn period_tags_parse() {
        assert_eq!(Period::parse("day"), Some(Period::Day));
        assert_eq!(Period::parse("TODAY"), Some(Period::Day));
        assert_eq!(Period::parse("Week"), Some(Period::Week));
        assert_eq!(Period::parse("decade"), None);
    }

    #[test]
    fn time_sum_matches_base_and_nested_keys() {
        let entry = LoadedEntry::new(1, "TIM", NaiveDateTime::default())
            .with_time_value("t", 30)
            .with_time_value("m", 5)
            .with_time_value("m/thk", 15);
        assert_eq!(entry.time_sum("t"), 30.0);
        assert_eq!(entry.time_sum("m"), 20.0);
        assert_eq!(entry.time_sum("p"), 0.0);
    }

    #[test]
    fn in_memory_loader_filters_by_code_and_range() {
        let mk = |id, code: &str, d: NaiveDate| {
            LoadedEntry::new(id, code, NaiveDateTime::new(d, chrono::NaiveTime::MIN))
        };
        let loader = InMemoryWidgetLoader::new(vec![
            mk(1, "TIM", date(2024, 3, 9)),
            mk(2, "TIM", date(2024, 3, 20)),
            mk(3, "EST", date(2024, 3, 9)),
        ]);
        let query = LoadQuery {
            user: 1,
            anchor: date(2024, 3, 9),
            period: Period::Week,
        };
        let loaded = loader.load_entries_for_widget("TIM", &query);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, 1);
    }
}
