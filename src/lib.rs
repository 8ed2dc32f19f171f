//! Fleet dataset analytics: load vehicle fleet CSVs, group and rank them,
//! and turn the results into tables and findings.
pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod output;
pub mod reports;
pub mod types;
pub mod util;

pub use config::{Config, DatasetKind};
pub use engine::{
    compute_derived_metric, correlate, filter_outliers, group_and_summarize, rank, Formula,
    GroupKey, GroupSummary, Order, Ranked, Summary,
};
pub use error::{FleetError, Result};
pub use types::{Dataset, Report, Value, VehicleRecord};
