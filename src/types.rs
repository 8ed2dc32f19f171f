use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tabled::Tabled;

use crate::util::parse_f64_safe;

/// A single CSV cell after type detection.
///
/// Numbers read from a file keep their cell text in `raw`, so "07" and "7"
/// stay distinct when used as group keys or labels. Computed numbers have
/// no raw text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number { value: f64, raw: Option<String> },
    Text(String),
    Missing,
}

impl Value {
    /// Classify a raw cell. Empty cells are `Missing`, anything that passes
    /// the forgiving numeric parse is a `Number`, the rest is `Text`.
    pub fn parse(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Missing;
        }
        match parse_f64_safe(Some(trimmed)) {
            Some(value) => Value::Number {
                value,
                raw: Some(trimmed.to_string()),
            },
            None => Value::Text(trimmed.to_string()),
        }
    }

    /// A computed number.
    pub fn number(value: f64) -> Value {
        Value::Number { value, raw: None }
    }

    /// Numeric view; NaN counts as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number { value, .. } if !value.is_nan() => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number { raw: Some(raw), .. } => f.write_str(raw),
            Value::Number { value, raw: None } => write!(f, "{}", value),
            Value::Text(s) => f.write_str(s),
            Value::Missing => Ok(()),
        }
    }
}

// Cells serialize as plain JSON scalars: number, string or null.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Number { value, .. } => serializer.serialize_f64(*value),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Missing => serializer.serialize_none(),
        }
    }
}

/// One vehicle/configuration row. `row` is the 1-based data row in the
/// source file, used to name records in warnings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleRecord {
    pub row: usize,
    fields: BTreeMap<String, Value>,
}

impl VehicleRecord {
    pub fn new(row: usize) -> Self {
        VehicleRecord {
            row,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style insert, used when assembling records from CSV rows and
    /// in tests.
    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_string(), value);
        self
    }

    pub fn with_number(self, field: &str, value: f64) -> Self {
        self.with(field, Value::number(value))
    }

    pub fn with_text(self, field: &str, value: &str) -> Self {
        self.with(field, Value::Text(value.to_string()))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    /// Cell text of a non-missing value, used for group keys and labels.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.get(field) {
            None | Some(Value::Missing) => None,
            Some(v) => Some(v.to_string()),
        }
    }

    /// Copy of this record with one extra (or replaced) field.
    pub fn with_field(&self, field: &str, value: Value) -> Self {
        self.clone().with(field, value)
    }

    fn renamed(&self, from: &str, to: &str) -> Self {
        let mut out = self.clone();
        if let Some(v) = out.fields.remove(from) {
            out.fields.insert(to.to_string(), v);
        }
        out
    }
}

/// An immutable, loaded dataset. Transforms return new datasets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub name: String,
    pub columns: Vec<String>,
    pub records: Vec<VehicleRecord>,
}

impl Dataset {
    pub fn new(name: &str, columns: Vec<String>, records: Vec<VehicleRecord>) -> Self {
        Dataset {
            name: name.to_string(),
            columns,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn missing_columns(&self, expected: &[&str]) -> Vec<String> {
        expected
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Columns holding at least one number and no text, in header order.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| {
                let mut any_number = false;
                for r in &self.records {
                    match r.get(c) {
                        Some(Value::Text(_)) => return false,
                        Some(Value::Number { .. }) => any_number = true,
                        _ => {}
                    }
                }
                any_number
            })
            .cloned()
            .collect()
    }

    pub fn filter<F>(&self, name: &str, keep: F) -> Dataset
    where
        F: Fn(&VehicleRecord) -> bool,
    {
        Dataset {
            name: name.to_string(),
            columns: self.columns.clone(),
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    pub fn filter_eq(&self, name: &str, field: &str, value: &str) -> Dataset {
        self.filter(name, |r| r.text(field).as_deref() == Some(value))
    }

    /// Case-insensitive substring match on a text field.
    pub fn filter_contains(&self, name: &str, field: &str, needle: &str) -> Dataset {
        let needle = needle.to_lowercase();
        self.filter(name, |r| {
            r.text(field)
                .map(|v| v.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
    }

    pub fn rename_column(&self, from: &str, to: &str) -> Dataset {
        Dataset {
            name: self.name.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| if c == from { to.to_string() } else { c.clone() })
                .collect(),
            records: self.records.iter().map(|r| r.renamed(from, to)).collect(),
        }
    }
}

/// A rendered table: what the presentation side prints or exports.
#[derive(Debug, Clone, Serialize)]
pub struct ReportTable {
    pub id: String,
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn new(id: &str, title: &str, headers: &[&str]) -> Self {
        ReportTable {
            id: id.to_string(),
            title: title.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct Finding {
    #[serde(rename = "Finding")]
    #[tabled(rename = "Finding")]
    pub label: String,
    #[serde(rename = "Value")]
    #[tabled(rename = "Value")]
    pub value: String,
}

impl Finding {
    pub fn new(label: &str, value: String) -> Self {
        Finding {
            label: label.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum DatasetStatus {
    Available,
    Unavailable(String),
}

/// Result of one dataset's report, whatever happened while loading it.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub dataset: String,
    pub status: DatasetStatus,
    pub rows: usize,
    pub missing_columns: Vec<String>,
    pub tables: Vec<ReportTable>,
    pub findings: Vec<Finding>,
    pub warnings: Vec<String>,
}

impl Report {
    pub fn new(dataset: &str, rows: usize) -> Self {
        Report {
            dataset: dataset.to_string(),
            status: DatasetStatus::Available,
            rows,
            missing_columns: Vec::new(),
            tables: Vec::new(),
            findings: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn unavailable(dataset: &str, reason: String) -> Self {
        Report {
            status: DatasetStatus::Unavailable(reason),
            ..Report::new(dataset, 0)
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, DatasetStatus::Available)
    }
}

#[derive(Debug, Serialize, Tabled, Clone)]
pub struct DatasetStatusRow {
    #[serde(rename = "Dataset")]
    #[tabled(rename = "Dataset")]
    pub dataset: String,
    #[serde(rename = "Status")]
    #[tabled(rename = "Status")]
    pub status: String,
    #[serde(rename = "Rows")]
    #[tabled(rename = "Rows")]
    pub rows: String,
    #[serde(rename = "Tables")]
    #[tabled(rename = "Tables")]
    pub tables: usize,
    #[serde(rename = "Warnings")]
    #[tabled(rename = "Warnings")]
    pub warnings: usize,
}

#[derive(Debug, Serialize)]
pub struct SummaryStats {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub datasets_available: usize,
    pub datasets_unavailable: usize,
    pub total_rows: usize,
    pub reports: Vec<Report>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let records = vec![
            VehicleRecord::new(1)
                .with_text("Motorizacion", "Eléctricos puros")
                .with_number("kwh", 18.0),
            VehicleRecord::new(2)
                .with_text("Motorizacion", "Híbridos enchufables")
                .with_number("kwh", 5.0),
            VehicleRecord::new(3)
                .with_text("Motorizacion", "Otros híbridos")
                .with("kwh", Value::Missing),
        ];
        Dataset::new(
            "autos",
            vec!["Motorizacion".to_string(), "kwh".to_string()],
            records,
        )
    }

    #[test]
    fn value_parse_classifies_cells() {
        assert_eq!(Value::parse(" 12.5 ").as_f64(), Some(12.5));
        assert_eq!(Value::parse("1,250").as_f64(), Some(1250.0));
        assert_eq!(Value::parse(""), Value::Missing);
        assert_eq!(Value::parse("Diesel"), Value::Text("Diesel".to_string()));
    }

    #[test]
    fn numeric_cells_keep_their_text() {
        let r = VehicleRecord::new(1)
            .with("model", Value::parse("0700"))
            .with("payload", Value::parse(" 1,500 "));
        assert_eq!(r.text("model").as_deref(), Some("0700"));
        assert_eq!(r.text("payload").as_deref(), Some("1,500"));
        assert_eq!(r.number("payload"), Some(1500.0));
        assert_eq!(Value::number(2.5).to_string(), "2.5");
        assert_eq!(
            serde_json::to_string(&r).unwrap(),
            r#"{"row":1,"fields":{"model":700.0,"payload":1500.0}}"#
        );
    }

    #[test]
    fn filter_contains_is_case_insensitive() {
        let ds = sample();
        let hybrids = ds.filter_contains("hibridos", "Motorizacion", "HÍBRIDOS");
        assert_eq!(hybrids.len(), 2);
        let pure = ds.filter_eq("electricos", "Motorizacion", "Eléctricos puros");
        assert_eq!(pure.len(), 1);
        // source untouched
        assert_eq!(ds.len(), 3);
    }

    #[test]
    fn rename_column_returns_new_dataset() {
        let ds = sample();
        let renamed = ds.rename_column("kwh", "kwh_100km");
        assert!(renamed.has_column("kwh_100km"));
        assert!(!renamed.has_column("kwh"));
        assert_eq!(renamed.records[0].number("kwh_100km"), Some(18.0));
        assert_eq!(ds.records[0].number("kwh"), Some(18.0));
    }

    #[test]
    fn numeric_columns_skip_text() {
        let ds = sample();
        assert_eq!(ds.numeric_columns(), vec!["kwh".to_string()]);
        assert_eq!(ds.missing_columns(&["kwh", "MTMA_Kg"]), vec!["MTMA_Kg"]);
    }
}
