//! Measurement table model.
//!
//! Mirrors the flattened instrument export: one row per solution, metadata
//! columns by well-known name, and one numeric column per element carrying the
//! corrected concentration (the per-element `Corr Con` values of the raw
//! export, keyed by element name after flattening). Every non-metadata column
//! is treated as such a concentration. Numeric cells tolerate both JSON
//! numbers and numeric strings, since exports are stringly-typed.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::ProcessingError;

/// Well-known column names from the export format.
pub mod columns {
    pub const SOLUTION_LABEL: &str = "Solution Label";
    pub const SAMPLE_TYPE: &str = "Type";
    pub const ACT_WGT: &str = "Act Wgt";
    pub const ACT_VOL: &str = "Act Vol";
    pub const DF: &str = "DF";

    /// `Type` value marking sample rows; everything else is blanks, standards
    /// and rinses.
    pub const SAMPLE: &str = "Samp";

    pub const METADATA: &[&str] = &[SOLUTION_LABEL, SAMPLE_TYPE, ACT_WGT, ACT_VOL, DF];
}

pub type Row = serde_json::Map<String, JsonValue>;

/// A parsed measurement table. This is the snapshot payload: `Table` round-
/// trips through `serde_json::Value` unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Column order as encountered in the source, for stable rendering.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn from_value(value: JsonValue) -> Result<Self, ProcessingError> {
        serde_json::from_value(value)
            .map_err(|e| ProcessingError::bad_data(format!("snapshot payload is not a table: {e}")))
    }

    pub fn into_value(self) -> JsonValue {
        // A struct of Vec and Map cannot fail to serialize.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Columns holding element concentrations (everything non-metadata).
    pub fn element_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !columns::METADATA.contains(&c.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Whether the row is a sample row (`Type == "Samp"`).
pub fn is_sample(row: &Row) -> bool {
    str_cell(row, columns::SAMPLE_TYPE) == Some(columns::SAMPLE)
}

pub fn solution_label(row: &Row) -> Option<&str> {
    str_cell(row, columns::SOLUTION_LABEL)
}

pub fn str_cell<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(JsonValue::as_str)
}

/// Numeric cell, accepting numbers and numeric strings. Empty strings and
/// nulls read as `None`.
pub fn num_cell(row: &Row, column: &str) -> Option<f64> {
    match row.get(column)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn set_num(row: &mut Row, column: &str, value: f64) {
    if let Some(n) = serde_json::Number::from_f64(value) {
        row.insert(column.to_string(), JsonValue::Number(n));
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use serde_json::json;

    /// A small run: standards bracketing two samples, one rinse.
    pub fn run() -> Table {
        let rows = [
            json!({"Solution Label": "STD 1", "Type": "Std", "Act Wgt": 1.0, "Act Vol": 100.0, "DF": 1.0, "Cu": 50.0, "Zn": 20.0}),
            json!({"Solution Label": "S-001", "Type": "Samp", "Act Wgt": 0.5, "Act Vol": 100.0, "DF": 2.0, "Cu": 12.5, "Zn": 7.5}),
            json!({"Solution Label": "S-002", "Type": "Samp", "Act Wgt": 0.5, "Act Vol": 100.0, "DF": 2.0, "Cu": 30.0, "Zn": 4.0}),
            json!({"Solution Label": "RINSE", "Type": "Rinse", "Act Wgt": null, "Act Vol": null, "DF": null, "Cu": null, "Zn": null}),
            json!({"Solution Label": "STD 2", "Type": "Std", "Act Wgt": 1.0, "Act Vol": 100.0, "DF": 1.0, "Cu": 55.0, "Zn": 20.0}),
        ];
        Table::new(
            vec![
                "Solution Label".into(),
                "Type".into(),
                "Act Wgt".into(),
                "Act Vol".into(),
                "DF".into(),
                "Cu".into(),
                "Zn".into(),
            ],
            rows.into_iter()
                .map(|v| match v {
                    JsonValue::Object(m) => m,
                    _ => unreachable!(),
                })
                .collect(),
        )
    }
}
