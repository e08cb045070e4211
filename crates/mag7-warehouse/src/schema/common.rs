use anyhow::{anyhow, bail};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap as Map;
use tracing::error;

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// SimFin "compact" tables
//
////////////////////////////////////////////////////////////////////////////////////////////////////

// {
//      "columns": ["Date", "Dividend Paid", "Common Shares Outstanding", "Last Closing Price", ...],
//      "data": [
//          ["2024-01-02", null, 15552752000, 185.64, ...],
//          ...
//      ]
// }
#[derive(Deserialize, Debug, Default)]
pub struct Compact {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Vec<Vec<Value>>,
}

/// Column name -> position lookup over a [`Compact`] header.
///
/// Names are matched case-insensitively, ignoring surrounding whitespace.
#[derive(Debug)]
pub struct Columns(Map<String, usize>);

impl Columns {
    pub fn new(columns: &[String]) -> Self {
        let mut map = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            // first occurrence wins
            map.entry(normalise(name)).or_insert(i);
        }
        Self(map)
    }

    /// Position of `name`, or an error naming the missing column.
    pub fn index(&self, name: &str) -> anyhow::Result<usize> {
        self.0
            .get(&normalise(name))
            .copied()
            .ok_or_else(|| anyhow!("missing expected column \"{name}\""))
    }
}

fn normalise(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Records that can be read out of a SimFin [`Compact`] table.
pub trait FromCompact: Sized {
    /// Human-readable dataset name, used in logs.
    const DATASET: &'static str;

    fn from_table(ticker: &str, table: &Compact) -> anyhow::Result<Vec<Self>>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//
// Cell readers
//
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Read a numeric cell; SimFin sends numbers, numeric strings & `null` interchangeably.
/// Cells past the end of a short row read as `None`.
pub fn cell_f64(row: &[Value], idx: usize) -> anyhow::Result<Option<f64>> {
    match row.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(num)) => Ok(num.as_f64()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| anyhow!("non-numeric cell \"{s}\": {e}")),
        Some(other) => bail!("unexpected cell type: {other}"),
    }
}

pub fn cell_i32(row: &[Value], idx: usize) -> anyhow::Result<Option<i32>> {
    Ok(cell_f64(row, idx)?.map(|val| val as i32))
}

pub fn cell_str(row: &[Value], idx: usize) -> Option<String> {
    match row.get(idx) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(num)) => Some(num.to_string()),
        _ => None,
    }
}

/// Read a required date cell.
pub fn cell_date(row: &[Value], idx: usize) -> anyhow::Result<NaiveDate> {
    match row.get(idx) {
        Some(Value::String(s)) => convert_date_type(s),
        other => bail!("expected a date string, found {other:?}"),
    }
}

/// Convert a &str to a chrono::NaiveDate. Timestamps such as `2024-01-02T00:00:00`
/// are cut down to their date part.
pub fn convert_date_type(str_date: &str) -> anyhow::Result<NaiveDate> {
    let trimmed = str_date.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| {
        error!("failed to parse date string; expected form YYYY-MM-DD - received: {str_date}");
        e
    })?;
    Ok(date)
}
