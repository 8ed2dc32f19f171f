use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong while loading fleet data or aggregating it.
///
/// Per-metric and per-group problems are collected as warnings next to a
/// partial result; file-level problems make the whole dataset unavailable.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("missing field '{field}'{}", row_suffix(.row))]
    MissingField { row: Option<usize>, field: String },

    #[error("field '{field}' is not numeric at row {row}: '{value}'")]
    NonNumeric {
        row: usize,
        field: String,
        value: String,
    },

    #[error("insufficient data for {what}: need {needed}, found {found}")]
    InsufficientData {
        what: String,
        needed: usize,
        found: usize,
    },

    #[error("field '{field}' has zero variance")]
    ZeroVariance { field: String },

    #[error("no records in group {key}")]
    EmptyGroup { key: String },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn row_suffix(row: &Option<usize>) -> String {
    match row {
        Some(r) => format!(" at row {}", r),
        None => " in dataset".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
