//! Grouping, ranking and statistics over fleet records.
//!
//! Every function takes records by shared reference and returns new
//! collections, so a cached dataset can be reused by any number of reports.
use log::debug;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use crate::error::{FleetError, Result};
use crate::types::{Value, VehicleRecord};
use crate::util::{average, median, pearson, quantile, std_dev};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct GroupKey(pub Vec<String>);

impl GroupKey {
    pub fn part(&self, i: usize) -> &str {
        self.0.get(i).map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" / "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSummary {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Every record whose value equals `min`, in input order.
    pub min_records: Vec<VehicleRecord>,
    pub max_records: Vec<VehicleRecord>,
}

impl MetricSummary {
    /// Labels of the tying extremal records joined by ", ".
    pub fn min_labels(&self, field: &str) -> String {
        join_labels(&self.min_records, field)
    }

    pub fn max_labels(&self, field: &str) -> String {
        join_labels(&self.max_records, field)
    }
}

fn join_labels(records: &[VehicleRecord], field: &str) -> String {
    records
        .iter()
        .map(|r| r.text(field).unwrap_or_else(|| format!("row {}", r.row)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricStats {
    Available(MetricSummary),
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub key: GroupKey,
    pub count: usize,
    pub rows: Vec<usize>,
    pub metrics: Vec<(String, MetricStats)>,
}

impl GroupSummary {
    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find_map(|(n, s)| match s {
            MetricStats::Available(m) if n == name => Some(m),
            _ => None,
        })
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        self.metric(name).map(|m| m.mean)
    }
}

/// Grouped statistics plus everything that degraded along the way.
#[derive(Debug)]
pub struct Summary {
    pub groups: Vec<GroupSummary>,
    pub warnings: Vec<FleetError>,
}

impl Summary {
    pub fn get(&self, key: &GroupKey) -> Option<&GroupSummary> {
        self.groups.iter().find(|g| &g.key == key)
    }

    /// Like `get`, but an absent key is an `EmptyGroup` error.
    pub fn group(&self, key: &GroupKey) -> Result<&GroupSummary> {
        self.get(key).ok_or_else(|| FleetError::EmptyGroup {
            key: key.to_string(),
        })
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.to_string()).collect()
    }
}

pub fn group_and_summarize(
    records: &[VehicleRecord],
    group_by: &[&str],
    metrics: &[&str],
) -> Result<Summary> {
    if records.is_empty() {
        return Err(FleetError::InsufficientData {
            what: "grouping".to_string(),
            needed: 1,
            found: 0,
        });
    }

    let mut warnings = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut members: Vec<(GroupKey, Vec<&VehicleRecord>)> = Vec::new();

    'records: for r in records {
        let mut parts = Vec::with_capacity(group_by.len());
        for field in group_by {
            match r.text(field) {
                Some(v) => parts.push(v),
                None => {
                    warnings.push(FleetError::MissingField {
                        row: Some(r.row),
                        field: field.to_string(),
                    });
                    continue 'records;
                }
            }
        }
        let key = GroupKey(parts);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            members.push((key, Vec::new()));
            members.len() - 1
        });
        members[slot].1.push(r);
    }

    for metric in metrics {
        if records.iter().all(|r| r.get(metric).is_none()) {
            warnings.push(FleetError::MissingField {
                row: None,
                field: metric.to_string(),
            });
        }
    }

    let mut groups = Vec::with_capacity(members.len());
    for (key, recs) in members {
        let mut stats = Vec::with_capacity(metrics.len());
        for metric in metrics {
            let s = summarize_metric(&recs, metric);
            if s == MetricStats::Unavailable {
                warnings.push(FleetError::InsufficientData {
                    what: format!("'{}' in group {}", metric, key),
                    needed: 1,
                    found: 0,
                });
            }
            stats.push((metric.to_string(), s));
        }
        groups.push(GroupSummary {
            count: recs.len(),
            rows: recs.iter().map(|r| r.row).collect(),
            key,
            metrics: stats,
        });
    }

    debug!(
        "grouped {} records by {:?} into {} groups ({} warnings)",
        records.len(),
        group_by,
        groups.len(),
        warnings.len()
    );
    Ok(Summary { groups, warnings })
}

fn summarize_metric(recs: &[&VehicleRecord], metric: &str) -> MetricStats {
    let values: Vec<(f64, &VehicleRecord)> = recs
        .iter()
        .filter_map(|r| r.number(metric).map(|v| (v, *r)))
        .collect();
    if values.is_empty() {
        return MetricStats::Unavailable;
    }
    let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
    for (v, _) in &values {
        min = min.min(*v);
        max = max.max(*v);
        sum += v;
    }
    let pick = |target: f64| {
        values
            .iter()
            .filter(|(v, _)| *v == target)
            .map(|(_, r)| (*r).clone())
            .collect::<Vec<_>>()
    };
    MetricStats::Available(MetricSummary {
        count: values.len(),
        sum,
        mean: sum / values.len() as f64,
        min,
        max,
        min_records: pick(min),
        max_records: pick(max),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    /// 1-based position after sorting.
    pub rank: usize,
    pub value: Option<f64>,
    pub item: T,
}

/// Anything that can be ranked by a named metric.
pub trait Rankable {
    fn rank_value(&self, metric: &str) -> Option<f64>;
}

impl Rankable for VehicleRecord {
    fn rank_value(&self, metric: &str) -> Option<f64> {
        self.number(metric)
    }
}

impl Rankable for GroupSummary {
    fn rank_value(&self, metric: &str) -> Option<f64> {
        self.mean(metric)
    }
}

pub fn rank<T>(items: &[T], metric: &str, order: Order, top_n: Option<usize>) -> Vec<Ranked<T>>
where
    T: Rankable + Clone,
{
    rank_by(items, |i| i.rank_value(metric), order, top_n)
}

/// Stable sort by an extracted value. Items without a value go last in both
/// directions. Truncation keeps the first `top_n` in sorted order, so ties at
/// the boundary are cut in input order.
pub fn rank_by<T, F>(items: &[T], value: F, order: Order, top_n: Option<usize>) -> Vec<Ranked<T>>
where
    T: Clone,
    F: Fn(&T) -> Option<f64>,
{
    let mut keyed: Vec<(Option<f64>, &T)> = items
        .iter()
        .map(|i| (value(i).filter(|v| !v.is_nan()), i))
        .collect();
    keyed.sort_by(|a, b| match (a.0, b.0) {
        (Some(x), Some(y)) => match order {
            Order::Ascending => x.total_cmp(&y),
            Order::Descending => y.total_cmp(&x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    keyed
        .into_iter()
        .take(top_n.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, (v, item))| Ranked {
            rank: i + 1,
            value: v,
            item: item.clone(),
        })
        .collect()
}

/// First entry of each partition in a ranked sequence, in order of the
/// partition's first appearance. Items without a partition value are skipped.
pub fn best_per_partition<T, F>(ranked: &[Ranked<T>], partition: F) -> Vec<(String, Ranked<T>)>
where
    T: Clone,
    F: Fn(&T) -> Option<String>,
{
    let mut seen: Vec<(String, Ranked<T>)> = Vec::new();
    for r in ranked {
        let Some(p) = partition(&r.item) else { continue };
        if !seen.iter().any(|(k, _)| *k == p) {
            seen.push((p, r.clone()));
        }
    }
    seen
}

#[derive(Debug, Clone, PartialEq)]
pub enum Formula {
    /// `source × factor`
    Scale { source: String, factor: f64 },
    /// Arithmetic mean of the sources.
    Mean { sources: Vec<String> },
    Product { sources: Vec<String> },
}

impl Formula {
    pub fn scale(source: &str, factor: f64) -> Self {
        Formula::Scale {
            source: source.to_string(),
            factor,
        }
    }

    pub fn mean(sources: &[&str]) -> Self {
        Formula::Mean {
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn product(sources: &[&str]) -> Self {
        Formula::Product {
            sources: sources.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn sources(&self) -> Vec<&str> {
        match self {
            Formula::Scale { source, .. } => vec![source.as_str()],
            Formula::Mean { sources } | Formula::Product { sources } => {
                sources.iter().map(String::as_str).collect()
            }
        }
    }

    fn apply(&self, inputs: &[f64]) -> f64 {
        match self {
            Formula::Scale { factor, .. } => inputs[0] * factor,
            Formula::Mean { .. } => inputs.iter().sum::<f64>() / inputs.len() as f64,
            Formula::Product { .. } => inputs.iter().product(),
        }
    }
}

/// New records with `output` computed from `formula`. Stops at the first
/// record lacking a usable input.
pub fn compute_derived_metric(
    records: &[VehicleRecord],
    output: &str,
    formula: &Formula,
) -> Result<Vec<VehicleRecord>> {
    let sources = formula.sources();
    if sources.is_empty() {
        return Err(FleetError::InsufficientData {
            what: format!("inputs for derived metric '{}'", output),
            needed: 1,
            found: 0,
        });
    }
    let mut out = Vec::with_capacity(records.len());
    for r in records {
        let mut inputs = Vec::with_capacity(sources.len());
        for field in &sources {
            match r.get(field) {
                None | Some(Value::Missing) => {
                    return Err(FleetError::MissingField {
                        row: Some(r.row),
                        field: field.to_string(),
                    })
                }
                Some(v) => match v.as_f64() {
                    Some(n) => inputs.push(n),
                    None => {
                        return Err(FleetError::NonNumeric {
                            row: r.row,
                            field: field.to_string(),
                            value: v.to_string(),
                        })
                    }
                },
            }
        }
        out.push(r.with_field(output, Value::number(formula.apply(&inputs))));
    }
    Ok(out)
}

/// Keep records whose standard score on `field` lies in `[z_low, z_high]`.
///
/// Uses the population standard deviation. With fewer than two values or
/// zero variance nothing is filtered. Records lacking the field are kept.
pub fn filter_outliers(
    records: &[VehicleRecord],
    field: &str,
    z_low: f64,
    z_high: f64,
) -> Vec<VehicleRecord> {
    let values: Vec<f64> = records.iter().filter_map(|r| r.number(field)).collect();
    let (Some(mean), Some(sd)) = (average(&values), std_dev(&values, 0)) else {
        debug!("outlier filter on '{}' skipped: {} values", field, values.len());
        return records.to_vec();
    };
    if values.len() < 2 || sd == 0.0 {
        debug!("outlier filter on '{}' skipped: zero variance", field);
        return records.to_vec();
    }
    let kept: Vec<VehicleRecord> = records
        .iter()
        .filter(|r| match r.number(field) {
            Some(v) => {
                let z = (v - mean) / sd;
                z >= z_low && z <= z_high
            }
            None => true,
        })
        .cloned()
        .collect();
    debug!(
        "outlier filter on '{}' removed {} of {} records",
        field,
        records.len() - kept.len(),
        records.len()
    );
    kept
}

pub fn correlate(records: &[VehicleRecord], field_a: &str, field_b: &str) -> Result<f64> {
    let pairs: Vec<(f64, f64)> = records
        .iter()
        .filter_map(|r| Some((r.number(field_a)?, r.number(field_b)?)))
        .collect();
    if pairs.len() < 2 {
        return Err(FleetError::InsufficientData {
            what: format!("correlation of '{}' and '{}'", field_a, field_b),
            needed: 2,
            found: pairs.len(),
        });
    }
    pearson(&pairs).ok_or_else(|| {
        let constant = if pairs.windows(2).all(|w| w[0].0 == w[1].0) {
            field_a
        } else {
            field_b
        };
        FleetError::ZeroVariance {
            field: constant.to_string(),
        }
    })
}

/// Pairwise correlations; cells that cannot be computed are `None`.
pub fn correlation_matrix(records: &[VehicleRecord], fields: &[&str]) -> Vec<Vec<Option<f64>>> {
    fields
        .iter()
        .map(|a| {
            fields
                .iter()
                .map(|b| correlate(records, a, b).ok())
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Description {
    pub field: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub median: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
}

/// Count, mean, sample std, min, quartiles and max per field.
pub fn describe(records: &[VehicleRecord], fields: &[&str]) -> Vec<Description> {
    fields
        .iter()
        .map(|f| {
            let v: Vec<f64> = records.iter().filter_map(|r| r.number(f)).collect();
            Description {
                field: f.to_string(),
                count: v.len(),
                mean: average(&v),
                std: std_dev(&v, 1),
                min: quantile(v.clone(), 0.0),
                q25: quantile(v.clone(), 0.25),
                median: median(v.clone()),
                q75: quantile(v.clone(), 0.75),
                max: quantile(v, 1.0),
            }
        })
        .collect()
}

/// Frequency of each value of `field`, most frequent first. Equal counts
/// keep first-seen order.
pub fn value_counts(records: &[VehicleRecord], field: &str) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for r in records {
        let Some(v) = r.text(field) else { continue };
        match index.get(&v) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(v.clone(), counts.len());
                counts.push((v, 1));
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}
