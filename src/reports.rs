use crate::config::{Config, DatasetKind};
use crate::engine::{
    best_per_partition, compute_derived_metric, correlate, correlation_matrix, describe,
    filter_outliers, group_and_summarize, rank, rank_by, value_counts, Formula, GroupSummary,
    Order, Ranked, Summary,
};
use crate::error::{FleetError, Result};
use crate::loader;
use crate::types::{Dataset, Finding, Report, ReportTable, SummaryStats, Value, VehicleRecord};
use crate::util::{average, format_int, format_number, format_opt};
use log::{info, warn};

const MAKE: &str = "OEM_Make";
const MODEL: &str = "OEM_Model";
const CATEGORY: &str = "MS_VehicleCategoryCode";
const FUEL_TYPE: &str = "MS_FuelType";

pub const URBAN_COLUMNS: &[&str] = &[
    MAKE,
    "R_Payload_kg",
    "R_CO2_gkm",
    "L_CO2_gkm",
    "Cs_R_Gal_km_Ton",
    "Cs_L_Gal_km_Ton",
    "R_FuelConsumption_Gal_km",
    "L_FuelConsumption_Gal_km",
    "precio_total_COP_Gal_km",
];

pub const REGIONAL_COLUMNS: &[&str] = &[
    MAKE,
    MODEL,
    "Mission",
    FUEL_TYPE,
    CATEGORY,
    "Emision_CO2_avg",
    "L_CO2_gkm",
    "R_CO2_gkm",
    "L_Payload_kg",
    "Consumo_avg",
];

pub const LONG_HAUL_COLUMNS: &[&str] = &[
    MAKE,
    MODEL,
    CATEGORY,
    FUEL_TYPE,
    "LHL_CO2_gkm",
    "LHR_CO2_gkm",
    "LHL_FuelConsumption_l100km",
    "LHR_FuelConsumption_l100km",
];

pub const ELECTRIC_COLUMNS: &[&str] = &[
    "Motorizacion",
    "Categoria",
    "Modelo",
    "Consumo_electrico_kWh/10km",
    "MTMA_Kg",
    "Autonomia_electrica_km",
    "Consumo Máximo",
    "Consumo Mínimo",
    "Emisiones Mínimo",
    "Emisiones Máximo",
];

pub fn expected_columns(kind: DatasetKind) -> &'static [&'static str] {
    match kind {
        DatasetKind::Urban => URBAN_COLUMNS,
        DatasetKind::Regional => REGIONAL_COLUMNS,
        DatasetKind::LongHaul => LONG_HAUL_COLUMNS,
        DatasetKind::Electric => ELECTRIC_COLUMNS,
    }
}

/// Load one dataset (through the cache) and build its report. Load failures
/// come back as an unavailable report rather than an error.
pub fn run(kind: DatasetKind, cfg: &Config) -> Report {
    let path = cfg.dataset_path(kind);
    let loaded = loader::load_cached(kind.name(), &path, cfg.source(kind), expected_columns(kind));
    let (dataset, load_report) = match loaded {
        Ok(v) => v,
        Err(e) => {
            warn!("{} dataset unavailable: {}", kind.name(), e);
            return Report::unavailable(kind.name(), e.to_string());
        }
    };
    if dataset.is_empty() {
        return Report::unavailable(kind.name(), format!("{} has no data rows", path.display()));
    }
    let mut report = build(kind, &dataset, cfg);
    report.missing_columns = load_report.missing_columns;
    if load_report.parse_errors > 0 {
        report.warnings.push(format!(
            "{} rows skipped due to parse errors",
            format_int(load_report.parse_errors)
        ));
    }
    info!(
        "{}: {} tables, {} findings, {} warnings",
        kind.name(),
        report.tables.len(),
        report.findings.len(),
        report.warnings.len()
    );
    report
}

pub fn build(kind: DatasetKind, dataset: &Dataset, cfg: &Config) -> Report {
    match kind {
        DatasetKind::Urban => urban_report(dataset),
        DatasetKind::Regional => regional_report(dataset, cfg),
        DatasetKind::LongHaul => long_haul_report(dataset, cfg),
        DatasetKind::Electric => electric_report(dataset, cfg),
    }
}

pub fn run_all(kinds: &[DatasetKind], cfg: &Config) -> Vec<Report> {
    kinds.iter().map(|k| run(*k, cfg)).collect()
}

pub fn generate_summary(reports: &[Report]) -> SummaryStats {
    let available = reports.iter().filter(|r| r.is_available()).count();
    SummaryStats {
        generated_at: chrono::Utc::now(),
        datasets_available: available,
        datasets_unavailable: reports.len() - available,
        total_rows: reports.iter().map(|r| r.rows).sum(),
        reports: reports.to_vec(),
    }
}

// ---------------------------------------------------------------------------
// Shared building blocks
// ---------------------------------------------------------------------------

/// Run one report section; a failure degrades to a warning so the other
/// sections still render.
fn section<F>(report: &mut Report, name: &str, f: F)
where
    F: FnOnce(&mut Report) -> Result<()>,
{
    if let Err(e) = f(report) {
        warn!("{}: section '{}' unavailable: {}", report.dataset, name, e);
        report.warnings.push(format!("{}: {}", name, e));
    }
}

fn absorb(report: &mut Report, summary: &Summary) {
    report.warnings.extend(summary.warning_messages());
}

#[derive(Debug, Clone, Copy)]
enum Stat {
    Mean,
    Max,
    Sum,
}

fn stat(g: &GroupSummary, metric: &str, s: Stat) -> Option<f64> {
    let m = g.metric(metric)?;
    Some(match s {
        Stat::Mean => m.mean,
        Stat::Max => m.max,
        Stat::Sum => m.sum,
    })
}

/// A column of a grouped table: header, source metric, statistic.
type Column<'a> = (&'a str, &'a str, Stat);

fn group_table<'a, I>(
    id: &str,
    title: &str,
    key_headers: &[&str],
    columns: &[Column],
    rows: I,
) -> ReportTable
where
    I: IntoIterator<Item = (Option<usize>, &'a GroupSummary)>,
{
    let rows: Vec<(Option<usize>, &GroupSummary)> = rows.into_iter().collect();
    let ranked = rows.iter().any(|(r, _)| r.is_some());
    let mut headers: Vec<&str> = Vec::new();
    if ranked {
        headers.push("Rank");
    }
    headers.extend_from_slice(key_headers);
    headers.extend(columns.iter().map(|c| c.0));
    let mut table = ReportTable::new(id, title, &headers);
    for (rank, g) in rows {
        let mut row = Vec::new();
        if ranked {
            row.push(rank.map(|r| r.to_string()).unwrap_or_default());
        }
        row.extend(g.key.0.iter().cloned());
        for (_, metric, s) in columns {
            row.push(format_opt(stat(g, metric, *s), 2));
        }
        table.push(row);
    }
    table
}

fn plain(groups: &[GroupSummary]) -> impl Iterator<Item = (Option<usize>, &GroupSummary)> {
    groups.iter().map(|g| (None, g))
}

fn ranked(items: &[Ranked<GroupSummary>]) -> impl Iterator<Item = (Option<usize>, &GroupSummary)> {
    items.iter().map(|r| (Some(r.rank), &r.item))
}

/// Group means turned back into records, so they can be grouped, ranked or
/// correlated again (mean of means, correlation across makes).
fn group_records(summary: &Summary, key_fields: &[&str], metrics: &[&str]) -> Vec<VehicleRecord> {
    summary
        .groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let mut r = VehicleRecord::new(i + 1);
            for (j, f) in key_fields.iter().enumerate() {
                r = r.with_text(f, g.key.part(j));
            }
            for m in metrics {
                let v = g.mean(m).map(Value::number).unwrap_or(Value::Missing);
                r = r.with(m, v);
            }
            r
        })
        .collect()
}

/// Stable sort of group summaries by one key part, with `metric` ascending
/// inside each partition. Returns (rank within partition, group).
fn rank_within(groups: &[GroupSummary], partition: usize, metric: &str) -> Vec<Ranked<GroupSummary>> {
    let mut items: Vec<GroupSummary> = rank(groups, metric, Order::Ascending, None)
        .into_iter()
        .map(|r| r.item)
        .collect();
    items.sort_by(|a, b| a.key.part(partition).cmp(b.key.part(partition)));
    let mut out: Vec<Ranked<GroupSummary>> = Vec::with_capacity(items.len());
    for g in items {
        let pos = match out.last() {
            Some(prev) if prev.item.key.part(partition) == g.key.part(partition) => prev.rank + 1,
            _ => 1,
        };
        out.push(Ranked {
            rank: pos,
            value: g.mean(metric),
            item: g,
        });
    }
    out
}

/// Apply `formula` to the records that have every input, leaving the rest
/// unchanged. Returns the new records and how many lacked an input.
fn derive_where_present(
    records: &[VehicleRecord],
    output: &str,
    inputs: &[&str],
    formula: &Formula,
) -> Result<(Vec<VehicleRecord>, usize)> {
    let mut skipped = 0;
    let mut out = Vec::with_capacity(records.len());
    for r in records {
        if inputs.iter().all(|f| r.number(f).is_some()) {
            out.extend(compute_derived_metric(std::slice::from_ref(r), output, formula)?);
        } else {
            skipped += 1;
            out.push(r.clone());
        }
    }
    Ok((out, skipped))
}

fn counts_table(id: &str, title: &str, header: &str, records: &[VehicleRecord], field: &str) -> ReportTable {
    let mut table = ReportTable::new(id, title, &[header, "Count"]);
    for (value, count) in value_counts(records, field) {
        table.push(vec![value, count.to_string()]);
    }
    table
}

fn describe_table(id: &str, title: &str, dataset: &Dataset) -> ReportTable {
    let columns = dataset.numeric_columns();
    let fields: Vec<&str> = columns.iter().map(String::as_str).collect();
    let mut table = ReportTable::new(
        id,
        title,
        &["Field", "Count", "Mean", "Std", "Min", "25%", "50%", "75%", "Max"],
    );
    for d in describe(&dataset.records, &fields) {
        table.push(vec![
            d.field,
            d.count.to_string(),
            format_opt(d.mean, 2),
            format_opt(d.std, 2),
            format_opt(d.min, 2),
            format_opt(d.q25, 2),
            format_opt(d.median, 2),
            format_opt(d.q75, 2),
            format_opt(d.max, 2),
        ]);
    }
    table
}

fn correlation_table(id: &str, title: &str, records: &[VehicleRecord], fields: &[&str]) -> ReportTable {
    let mut headers = vec![""];
    headers.extend_from_slice(fields);
    let mut table = ReportTable::new(id, title, &headers);
    for (field, row) in fields.iter().zip(correlation_matrix(records, fields)) {
        let mut cells = vec![field.to_string()];
        cells.extend(row.into_iter().map(|c| format_opt(c, 2)));
        table.push(cells);
    }
    table
}

/// Highest and lowest `metric` per category, listing every tying model.
fn extremes_table(
    id: &str,
    title: &str,
    records: &[VehicleRecord],
    category: &str,
    label: &str,
    metric: &str,
    unit: &str,
    report: &mut Report,
) -> Result<ReportTable> {
    let summary = group_and_summarize(records, &[category], &[metric])?;
    absorb(report, &summary);
    let highest = format!("Highest ({})", unit);
    let lowest = format!("Lowest ({})", unit);
    let mut table = ReportTable::new(
        id,
        title,
        &["Category", "Highest", highest.as_str(), "Lowest", lowest.as_str()],
    );
    for g in &summary.groups {
        let Some(m) = g.metric(metric) else { continue };
        table.push(vec![
            g.key.to_string(),
            m.max_labels(label),
            format_number(m.max, 2),
            m.min_labels(label),
            format_number(m.min, 2),
        ]);
    }
    Ok(table)
}

// ---------------------------------------------------------------------------
// Urban
// ---------------------------------------------------------------------------

pub fn urban_report(dataset: &Dataset) -> Report {
    let records = &dataset.records;
    let mut report = Report::new("urban", dataset.len());

    section(&mut report, "maxima_by_make", |rep| {
        let metrics = ["R_Payload_kg", "R_CO2_gkm", "Cs_R_Gal_km_Ton", "precio_total_COP_Gal_km"];
        let s = group_and_summarize(records, &[MAKE], &metrics)?;
        absorb(rep, &s);
        rep.tables.push(group_table(
            "maxima_by_make",
            "Fleet maxima by make",
            &["Make"],
            &[
                ("Payload (kg)", "R_Payload_kg", Stat::Max),
                ("CO2 (g/km)", "R_CO2_gkm", Stat::Max),
                ("Specific consumption (Gal/km·Ton)", "Cs_R_Gal_km_Ton", Stat::Max),
                ("Fuel cost (COP/Gal/km)", "precio_total_COP_Gal_km", Stat::Max),
            ],
            plain(&s.groups),
        ));
        Ok(())
    });

    section(&mut report, "fuel_cost_by_make", |rep| {
        let metric = "precio_total_COP_Gal_km";
        let s = group_and_summarize(records, &[MAKE], &[metric])?;
        absorb(rep, &s);
        let ranked_groups = rank(&s.groups, metric, Order::Ascending, None);
        rep.tables.push(group_table(
            "fuel_cost_by_make",
            "Average fuel cost by make",
            &["Make"],
            &[("Fuel cost (COP/Gal/km)", metric, Stat::Mean)],
            ranked(&ranked_groups),
        ));
        let means: Vec<f64> = ranked_groups.iter().filter_map(|r| r.value).collect();
        if let (Some(best), Some(avg)) = (ranked_groups.first(), average(&means)) {
            if let Some(cost) = best.value {
                rep.findings.push(Finding::new(
                    "Cheapest make to fuel",
                    format!("{} ({} COP/Gal/km)", best.item.key, format_number(cost, 2)),
                ));
                if avg > 0.0 {
                    rep.findings.push(Finding::new(
                        "Cheapest make vs average make cost",
                        format!("{}% below", format_number((avg - cost) / avg * 100.0, 2)),
                    ));
                }
            }
        }
        Ok(())
    });

    section(&mut report, "specific_consumption_by_make", |rep| {
        let s = group_and_summarize(records, &[MAKE], &["Cs_L_Gal_km_Ton", "Cs_R_Gal_km_Ton"])?;
        absorb(rep, &s);
        let r = rank(&s.groups, "Cs_R_Gal_km_Ton", Order::Ascending, None);
        rep.tables.push(group_table(
            "specific_consumption_by_make",
            "Specific consumption by make",
            &["Make"],
            &[
                ("Unloaded (Gal/km·Ton)", "Cs_L_Gal_km_Ton", Stat::Mean),
                ("Loaded (Gal/km·Ton)", "Cs_R_Gal_km_Ton", Stat::Mean),
            ],
            ranked(&r),
        ));
        Ok(())
    });

    for (prefix, state) in [("R", "loaded"), ("L", "unloaded")] {
        let id = format!("{}_efficiency_by_make", state);
        section(&mut report, &id, |rep| {
            let fuel = format!("{}_FuelConsumption_Gal_km", prefix);
            let co2 = format!("{}_CO2_gkm", prefix);
            let s = group_and_summarize(records, &[MAKE], &[fuel.as_str(), co2.as_str()])?;
            absorb(rep, &s);
            let r = rank(&s.groups, &fuel, Order::Ascending, None);
            rep.tables.push(group_table(
                &id,
                &format!("Fuel consumption vs CO2 by make ({})", state),
                &["Make"],
                &[
                    ("Fuel (Gal/km)", fuel.as_str(), Stat::Mean),
                    ("CO2 (g/km)", co2.as_str(), Stat::Mean),
                ],
                ranked(&r),
            ));
            Ok(())
        });
    }

    section(&mut report, "co2_cost_by_make", |rep| {
        let metrics = ["R_CO2_gkm", "precio_total_COP_Gal_km", "Cs_R_Gal_km_Ton"];
        let s = group_and_summarize(records, &[MAKE], &metrics)?;
        absorb(rep, &s);
        rep.tables.push(group_table(
            "co2_cost_by_make",
            "Loaded CO2, fuel cost and specific consumption by make",
            &["Make"],
            &[
                ("CO2 (g/km)", "R_CO2_gkm", Stat::Mean),
                ("Fuel cost (COP/Gal/km)", "precio_total_COP_Gal_km", Stat::Mean),
                ("Specific consumption (Gal/km·Ton)", "Cs_R_Gal_km_Ton", Stat::Mean),
            ],
            plain(&s.groups),
        ));
        let per_make = group_records(&s, &[MAKE], &metrics);
        let r = correlate(&per_make, "R_CO2_gkm", "precio_total_COP_Gal_km")?;
        rep.findings.push(Finding::new(
            "Correlation of CO2 and fuel cost across makes",
            format_number(r, 2),
        ));
        Ok(())
    });

    report
}

// ---------------------------------------------------------------------------
// Regional
// ---------------------------------------------------------------------------

pub fn regional_report(dataset: &Dataset, cfg: &Config) -> Report {
    let records = &dataset.records;
    let scenario = &cfg.regional;
    let mut report = Report::new("regional", dataset.len());
    let emission = scenario.emission_column.column();

    section(&mut report, "emissions_by_make", |rep| {
        let by_mission = group_and_summarize(records, &[MAKE, "Mission"], &[emission])?;
        absorb(rep, &by_mission);
        rep.tables.push(group_table(
            "emissions_by_make_mission",
            &format!("Mean {} by make and mission", emission),
            &["Make", "Mission"],
            &[("CO2 (g/km)", emission, Stat::Mean)],
            plain(&by_mission.groups),
        ));

        let means = group_records(&by_mission, &[MAKE, "Mission"], &[emission]);
        let by_make = group_and_summarize(&means, &[MAKE], &[emission])?;
        absorb(rep, &by_make);
        let r = rank(&by_make.groups, emission, Order::Ascending, None);
        rep.tables.push(group_table(
            "emissions_by_make",
            "Mean emission by make (average over missions)",
            &["Make"],
            &[("CO2 (g/km)", emission, Stat::Mean)],
            ranked(&r),
        ));
        let all: Vec<f64> = r.iter().filter_map(|x| x.value).collect();
        if let (Some(best), Some(avg)) = (r.first(), average(&all)) {
            if let Some(v) = best.value {
                rep.findings.push(Finding::new(
                    "Lowest-emitting make",
                    format!(
                        "{} ({} g/km, {} g/km vs average)",
                        best.item.key,
                        format_number(v, 2),
                        format_number(v - avg, 2)
                    ),
                ));
            }
        }
        Ok(())
    });

    section(&mut report, "emissions_by_category", |rep| {
        let metric = "Emision_CO2_avg";
        let s = group_and_summarize(records, &[CATEGORY], &[metric])?;
        absorb(rep, &s);
        let r = rank_by(&s.groups, |g| stat(g, metric, Stat::Sum), Order::Descending, None);
        rep.tables.push(group_table(
            "emissions_by_category",
            "Total CO2 by vehicle category",
            &["Category"],
            &[("Total CO2 (g/km)", metric, Stat::Sum)],
            ranked(&r),
        ));
        let total: f64 = r.iter().filter_map(|x| x.value).sum();
        if let Some(top) = r.first() {
            if let (Some(v), true) = (top.value, total > 0.0) {
                rep.findings.push(Finding::new(
                    "Highest-emitting category",
                    format!("{} ({}% of total)", top.item.key, format_number(v / total * 100.0, 2)),
                ));
            }
        }
        Ok(())
    });

    section(&mut report, "by_fuel_type", |rep| {
        let s = group_and_summarize(records, &[FUEL_TYPE], &["Consumo_avg", "Emision_CO2_avg"])?;
        absorb(rep, &s);
        rep.tables.push(group_table(
            "by_fuel_type",
            "Consumption and CO2 by fuel type",
            &["Fuel type"],
            &[
                ("Consumption (L/100km)", "Consumo_avg", Stat::Mean),
                ("CO2 (g/km)", "Emision_CO2_avg", Stat::Mean),
            ],
            plain(&s.groups),
        ));
        if let Ok(r) = correlate(records, "L_Payload_kg", "Consumo_avg") {
            rep.findings.push(Finding::new(
                "Correlation of payload and consumption",
                format_number(r, 2),
            ));
        }
        Ok(())
    });

    section(&mut report, "fleet_scenario", |rep| fleet_scenario(rep, records, cfg));

    report
}

/// Least-emitting references of one make and what a fleet of them would
/// emit per day. The make is chosen here, before anything is computed from it.
fn fleet_scenario(rep: &mut Report, records: &[VehicleRecord], cfg: &Config) -> Result<()> {
    let scenario = &cfg.regional;
    let metric = "Emision_CO2_avg";
    let counts = value_counts(records, MAKE);
    let mut top = ReportTable::new("top_makes", "Most represented makes", &["Make", "Count"]);
    for (make, n) in counts.iter().take(cfg.top_n) {
        top.push(vec![make.clone(), n.to_string()]);
    }
    rep.tables.push(top);

    let make = match &scenario.make {
        Some(m) => m.clone(),
        None => counts
            .first()
            .map(|(m, _)| m.clone())
            .ok_or_else(|| FleetError::EmptyGroup {
                key: MAKE.to_string(),
            })?,
    };
    let of_make: Vec<VehicleRecord> = records
        .iter()
        .filter(|r| r.text(MAKE).as_deref() == Some(make.as_str()))
        .cloned()
        .collect();
    if of_make.is_empty() {
        return Err(FleetError::EmptyGroup { key: make });
    }

    let s = group_and_summarize(&of_make, &[MODEL], &[metric])?;
    absorb(rep, &s);
    // Models without an emission value are not candidates.
    let best: Vec<Ranked<GroupSummary>> = rank(&s.groups, metric, Order::Ascending, None)
        .into_iter()
        .filter(|r| r.value.is_some())
        .take(cfg.top_n)
        .collect();
    let fleet = f64::from(scenario.fleet_size);
    let mut table = ReportTable::new(
        "lowest_emission_references",
        &format!("Top {} references with lowest emission: {}", cfg.top_n, make),
        &["Rank", "Model", "Mean CO2 (g/km)", "Fleet CO2 (g/km)"],
    );
    for r in &best {
        table.push(vec![
            r.rank.to_string(),
            r.item.key.to_string(),
            format_opt(r.value, 2),
            format_opt(r.value.map(|v| v * fleet), 2),
        ]);
    }
    rep.tables.push(table);

    let values: Vec<f64> = best.iter().filter_map(|r| r.value).collect();
    let (Some(low), Some(high), Some(avg)) = (best.first(), best.last(), average(&values)) else {
        return Err(FleetError::InsufficientData {
            what: format!("emission references for {}", make),
            needed: 1,
            found: 0,
        });
    };
    rep.findings.push(Finding::new("Selected make", make.clone()));
    rep.findings.push(Finding::new(
        "Reference with lowest emission",
        format!("{} ({} g/km)", low.item.key, format_opt(low.value, 2)),
    ));
    if let (Some(lo), Some(hi)) = (low.value, high.value) {
        rep.findings.push(Finding::new(
            "Average of selected references",
            format!(
                "{} g/km ({} g/km below {})",
                format_number(avg, 2),
                format_number(hi - lo, 2),
                high.item.key
            ),
        ));
    }
    let tonnes = avg * fleet * scenario.daily_km / 1_000_000.0;
    let share = tonnes / scenario.city_emissions_tonnes * 100.0;
    rep.findings.push(Finding::new(
        "Daily fleet emissions",
        format!(
            "{} t CO2 for {} vehicles at {} km/day ({}% of {} t city total)",
            format_number(tonnes, 2),
            scenario.fleet_size,
            format_number(scenario.daily_km, 0),
            format_number(share, 2),
            format_number(scenario.city_emissions_tonnes, 0)
        ),
    ));
    Ok(())
}

// ---------------------------------------------------------------------------
// Long haul
// ---------------------------------------------------------------------------

pub fn long_haul_report(dataset: &Dataset, cfg: &Config) -> Report {
    let records = &dataset.records;
    let mut report = Report::new("long_haul", dataset.len());

    report
        .tables
        .push(describe_table("statistics", "Descriptive statistics", dataset));

    let views = [
        ("co2", "CO2 (g/km)", "LHL_CO2_gkm", "LHR_CO2_gkm"),
        (
            "fuel",
            "Fuel (L/100km)",
            "LHL_FuelConsumption_l100km",
            "LHR_FuelConsumption_l100km",
        ),
    ];
    for (id, unit, lhl, lhr) in views {
        let table_id = format!("{}_by_category_make", id);
        section(&mut report, &table_id, |rep| {
            let s = group_and_summarize(records, &[CATEGORY, MAKE], &[lhl, lhr])?;
            absorb(rep, &s);
            let r = rank_within(&s.groups, 0, lhl);
            let lhl_header = format!("LHL {}", unit);
            let lhr_header = format!("LHR {}", unit);
            rep.tables.push(group_table(
                &table_id,
                &format!("{} ranking by make within each vehicle category", unit),
                &["Category", "Make"],
                &[
                    (lhl_header.as_str(), lhl, Stat::Mean),
                    (lhr_header.as_str(), lhr, Stat::Mean),
                ],
                ranked(&r),
            ));
            Ok(())
        });
    }

    for scenario in ["LHL", "LHR"] {
        let fuel = format!("{}_FuelConsumption_l100km", scenario);
        let co2 = format!("{}_CO2_gkm", scenario);
        let label = format!("Correlation of fuel consumption and CO2 ({})", scenario);
        match correlate(records, &fuel, &co2) {
            Ok(r) => report.findings.push(Finding::new(&label, format_number(r, 2))),
            Err(e) => {
                report.findings.push(Finding::new(&label, "n/a".to_string()));
                report.warnings.push(format!("{}: {}", label, e));
            }
        }

        let id = format!("efficiency_{}", scenario.to_lowercase());
        section(&mut report, &id, |rep| {
            let s = group_and_summarize(records, &[MAKE], &[fuel.as_str(), co2.as_str()])?;
            absorb(rep, &s);
            let r = rank(&s.groups, &fuel, Order::Ascending, None);
            rep.tables.push(group_table(
                &id,
                &format!("Most fuel-efficient makes ({})", scenario),
                &["Make"],
                &[
                    ("Fuel (L/100km)", fuel.as_str(), Stat::Mean),
                    ("CO2 (g/km)", co2.as_str(), Stat::Mean),
                ],
                ranked(&r),
            ));
            Ok(())
        });
    }

    section(&mut report, "diesel_cost", |rep| diesel_cost(rep, dataset, cfg));

    report
}

/// Cost per km of diesel vehicles and the cheapest make in each category.
fn diesel_cost(rep: &mut Report, dataset: &Dataset, cfg: &Config) -> Result<()> {
    let diesel = dataset.filter_eq("long_haul_diesel", FUEL_TYPE, "Diesel");
    if diesel.is_empty() {
        return Err(FleetError::EmptyGroup {
            key: format!("{} = Diesel", FUEL_TYPE),
        });
    }
    // l/100km -> gallons/km -> COP/km
    let factor = cfg.prices.diesel_per_gallon / (cfg.prices.litres_per_gallon * 100.0);
    let mut records = diesel.records.clone();
    for scenario in ["LHL", "LHR"] {
        let source = format!("{}_FuelConsumption_l100km", scenario);
        let output = format!("cost_per_km_{}", scenario);
        let (derived, skipped) =
            derive_where_present(&records, &output, &[source.as_str()], &Formula::scale(&source, factor))?;
        if skipped > 0 {
            rep.warnings.push(format!(
                "{}: {} diesel records lack {}",
                output, skipped, source
            ));
        }
        records = derived;
    }

    let metrics = ["cost_per_km_LHL", "cost_per_km_LHR"];
    let s = group_and_summarize(&records, &[MAKE, CATEGORY], &metrics)?;
    absorb(rep, &s);
    rep.tables.push(group_table(
        "diesel_cost_by_make_category",
        "Average diesel cost per km by make and category",
        &["Make", "Category"],
        &[
            ("LHL cost (COP/km)", "cost_per_km_LHL", Stat::Mean),
            ("LHR cost (COP/km)", "cost_per_km_LHR", Stat::Mean),
        ],
        plain(&s.groups),
    ));

    let by_category = |g: &GroupSummary| Some(g.key.part(1).to_string());
    let best_lhl = best_per_partition(&rank(&s.groups, metrics[0], Order::Ascending, None), by_category);
    let best_lhr = best_per_partition(&rank(&s.groups, metrics[1], Order::Ascending, None), by_category);
    let mut table = ReportTable::new(
        "best_make_per_category",
        "Cheapest make per category (cost per km)",
        &["Category", "Make LHL", "Cost LHL (COP/km)", "Make LHR", "Cost LHR (COP/km)"],
    );
    let mut categories: Vec<&String> = best_lhl.iter().map(|(c, _)| c).collect();
    categories.sort();
    for cat in categories {
        let lhl = best_lhl.iter().find(|(c, _)| c == cat).map(|(_, r)| r);
        let lhr = best_lhr.iter().find(|(c, _)| c == cat).map(|(_, r)| r);
        table.push(vec![
            cat.clone(),
            lhl.map(|r| r.item.key.part(0).to_string()).unwrap_or_default(),
            format_opt(lhl.and_then(|r| r.value), 2),
            lhr.map(|r| r.item.key.part(0).to_string()).unwrap_or_default(),
            format_opt(lhr.and_then(|r| r.value), 2),
        ]);
    }
    rep.tables.push(table);
    Ok(())
}

// ---------------------------------------------------------------------------
// Electric and hybrid
// ---------------------------------------------------------------------------

const POWERTRAIN: &str = "Motorizacion";
const CATEGORIA: &str = "Categoria";
const MODELO: &str = "Modelo";
const RAW_CONSUMPTION: &str = "Consumo_electrico_kWh/10km";
const KWH_100KM: &str = "Consumo_electrico_kWh/100km";
const KWH_KM: &str = "Consumo_electrico_kWh/km";
const FUEL_L_100KM: &str = "Consumo_combustible_l/100km";
const AUTONOMY: &str = "Autonomia_electrica_km";
const MASS: &str = "MTMA_Kg";

pub fn electric_report(dataset: &Dataset, cfg: &Config) -> Report {
    let mut report = Report::new("electric", dataset.len());
    report
        .tables
        .push(describe_table("statistics", "Descriptive statistics", dataset));
    report.tables.push(counts_table(
        "powertrain_counts",
        "Vehicles by powertrain",
        "Powertrain",
        &dataset.records,
        POWERTRAIN,
    ));

    section(&mut report, "electric", |rep| electric_section(rep, dataset, cfg));
    section(&mut report, "electric_trucks", |rep| {
        let mut table = ReportTable::new(
            "electric_trucks",
            "Electricity cost of reference electric trucks",
            &[
                "Truck",
                "Payload (kg)",
                "Battery (kWh)",
                "Range (km)",
                "Consumption (kWh/km)",
                "Charge time (h)",
                "Price per kWh (COP)",
                "Cost per km (COP)",
            ],
        );
        for t in &cfg.trucks {
            table.push(vec![
                t.name.clone(),
                format_number(t.payload_kg, 0),
                format_number(t.battery_kwh, 0),
                format_number(t.range_km, 0),
                format_number(t.kwh_per_km, 2),
                format_number(t.charge_hours, 2),
                format_number(cfg.prices.electricity_per_kwh, 0),
                format_number(t.kwh_per_km * cfg.prices.electricity_per_kwh, 2),
            ]);
        }
        rep.tables.push(table);
        Ok(())
    });
    section(&mut report, "hybrid", |rep| hybrid_section(rep, dataset, cfg));

    report
}

fn electric_section(rep: &mut Report, dataset: &Dataset, cfg: &Config) -> Result<()> {
    let electric = dataset
        .filter_eq("electric_pure", POWERTRAIN, "Eléctricos puros")
        .rename_column(RAW_CONSUMPTION, KWH_100KM);
    if electric.is_empty() {
        return Err(FleetError::EmptyGroup {
            key: format!("{} = Eléctricos puros", POWERTRAIN),
        });
    }
    rep.tables.push(counts_table(
        "electric_categories",
        "Pure electric vehicles by category",
        "Category",
        &electric.records,
        CATEGORIA,
    ));

    let (records, skipped) = derive_where_present(
        &electric.records,
        KWH_KM,
        &[KWH_100KM],
        &Formula::scale(KWH_100KM, 0.01),
    )?;
    if skipped > 0 {
        rep.warnings
            .push(format!("{}: {} records lack {}", KWH_KM, skipped, KWH_100KM));
    }
    let table = extremes_table(
        "electric_consumption_extremes",
        "Highest and lowest consumption per category (electric)",
        &records,
        CATEGORIA,
        MODELO,
        KWH_KM,
        "kWh/km",
        rep,
    )?;
    rep.tables.push(table);
    rep.tables.push(correlation_table(
        "electric_correlation",
        "Correlation of mass, consumption and autonomy (electric)",
        &records,
        &[MASS, KWH_KM, AUTONOMY],
    ));
    if let Ok(r) = correlate(&records, MASS, KWH_KM) {
        rep.findings.push(Finding::new(
            "Correlation of mass and consumption (electric)",
            format_number(r, 2),
        ));
    }

    let kept = filter_outliers(&records, KWH_KM, cfg.z_low, cfg.z_high);
    rep.findings.push(Finding::new(
        "Electric records within z-score bounds",
        format!("{} of {}", kept.len(), records.len()),
    ));
    Ok(())
}

fn hybrid_section(rep: &mut Report, dataset: &Dataset, cfg: &Config) -> Result<()> {
    let hybrids = dataset
        .filter_contains("hybrid", POWERTRAIN, "híbridos")
        .rename_column(RAW_CONSUMPTION, FUEL_L_100KM);
    if hybrids.is_empty() {
        return Err(FleetError::EmptyGroup {
            key: format!("{} contains híbridos", POWERTRAIN),
        });
    }
    rep.tables.push(counts_table(
        "hybrid_categories",
        "Hybrid vehicles by category",
        "Category",
        &hybrids.records,
        CATEGORIA,
    ));
    let table = extremes_table(
        "hybrid_consumption_extremes",
        "Highest and lowest fuel consumption per category (hybrid)",
        &hybrids.records,
        CATEGORIA,
        MODELO,
        FUEL_L_100KM,
        "L/100km",
        rep,
    )?;
    rep.tables.push(table);

    let kept = filter_outliers(&hybrids.records, FUEL_L_100KM, cfg.z_low, cfg.z_high);
    rep.findings.push(Finding::new(
        "Hybrid records within z-score bounds",
        format!("{} of {}", kept.len(), hybrids.len()),
    ));
    let table = extremes_table(
        "hybrid_autonomy_extremes",
        "Highest and lowest electric autonomy per category (hybrid)",
        &kept,
        CATEGORIA,
        MODELO,
        AUTONOMY,
        "km",
        rep,
    )?;
    rep.tables.push(table);

    let mut records = kept;
    let derived = [
        ("Consumo promedio", ["Consumo Máximo", "Consumo Mínimo"]),
        ("Emisiones promedio", ["Emisiones Mínimo", "Emisiones Máximo"]),
    ];
    let mut columns = Vec::new();
    for (output, inputs) in derived {
        if let Some(missing) = inputs.iter().find(|c| !hybrids.has_column(c)) {
            rep.warnings.push(format!(
                "{}: {}",
                output,
                FleetError::MissingField {
                    row: None,
                    field: missing.to_string()
                }
            ));
            continue;
        }
        let (out, _) = derive_where_present(&records, output, &inputs, &Formula::mean(&inputs))?;
        records = out;
        columns.push(output);
    }

    let key_variables = ["Consumo promedio", AUTONOMY, "Emisiones promedio"];
    let missing: Vec<&str> = key_variables
        .iter()
        .copied()
        .filter(|v| !columns.contains(v) && !hybrids.has_column(v))
        .collect();
    if !missing.is_empty() {
        rep.findings.push(Finding::new(
            "Key variables missing",
            missing.join(", "),
        ));
        return Ok(());
    }
    rep.tables.push(correlation_table(
        "hybrid_correlation",
        "Correlation of consumption, autonomy and emissions (hybrid)",
        &records,
        &key_variables,
    ));
    if let Ok(r) = correlate(&records, "Consumo promedio", "Emisiones promedio") {
        rep.findings.push(Finding::new(
            "Correlation of average consumption and emissions (hybrid)",
            format_number(r, 2),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(row: usize, cat: &str, make: &str, v: Option<f64>) -> VehicleRecord {
        let r = VehicleRecord::new(row).with_text(CATEGORY, cat).with_text(MAKE, make);
        match v {
            Some(v) => r.with_number("x", v),
            None => r.with("x", Value::Missing),
        }
    }

    #[test]
    fn rank_within_restarts_per_partition() {
        let records = vec![
            rec(1, "N3", "Scania", Some(3.0)),
            rec(2, "M3", "Volvo", Some(2.0)),
            rec(3, "N3", "IVECO", Some(1.0)),
        ];
        let s = group_and_summarize(&records, &[CATEGORY, MAKE], &["x"]).unwrap();
        let r = rank_within(&s.groups, 0, "x");
        let got: Vec<(usize, String)> = r.iter().map(|x| (x.rank, x.item.key.to_string())).collect();
        assert_eq!(
            got,
            vec![
                (1, "M3 / Volvo".to_string()),
                (1, "N3 / IVECO".to_string()),
                (2, "N3 / Scania".to_string()),
            ]
        );
    }

    #[test]
    fn derive_where_present_skips_incomplete_records() {
        let records = vec![rec(1, "N3", "A", Some(10.0)), rec(2, "N3", "B", None)];
        let (out, skipped) = derive_where_present(&records, "y", &["x"], &Formula::scale("x", 2.0)).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(out[0].number("y"), Some(20.0));
        assert_eq!(out[1].get("y"), None);
    }

    #[test]
    fn failing_section_becomes_warning() {
        let mut report = Report::new("urban", 0);
        section(&mut report, "broken", |_| {
            Err(FleetError::ZeroVariance {
                field: "x".to_string(),
            })
        });
        section(&mut report, "ok", |rep| {
            rep.findings.push(Finding::new("a", "b".to_string()));
            Ok(())
        });
        assert_eq!(report.warnings, vec!["broken: field 'x' has zero variance"]);
        assert_eq!(report.findings.len(), 1);
    }

    #[test]
    fn urban_report_without_cost_column_keeps_other_sections() {
        let ds = Dataset::new(
            "urban",
            vec![MAKE.to_string(), "R_Payload_kg".to_string()],
            vec![
                VehicleRecord::new(1).with_text(MAKE, "Isuzu").with_number("R_Payload_kg", 3000.0),
                VehicleRecord::new(2).with_text(MAKE, "Volvo").with_number("R_Payload_kg", 9000.0),
            ],
        );
        let report = urban_report(&ds);
        let maxima = report.tables.iter().find(|t| t.id == "maxima_by_make").unwrap();
        assert_eq!(maxima.rows[1][1], "9,000.00");
        assert_eq!(maxima.rows[1][4], "n/a");
        let cost = report.tables.iter().find(|t| t.id == "fuel_cost_by_make").unwrap();
        assert!(cost.rows.iter().all(|r| r[2] == "n/a"));
        assert!(report.findings.iter().all(|f| f.label != "Cheapest make to fuel"));
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("precio_total_COP_Gal_km")));
    }

    #[test]
    fn fleet_scenario_ignores_models_without_emissions() {
        let row = |i: usize, model: &str, co2: Option<f64>| {
            let r = VehicleRecord::new(i).with_text(MAKE, "MAN").with_text(MODEL, model);
            match co2 {
                Some(v) => r.with_number("Emision_CO2_avg", v),
                None => r.with("Emision_CO2_avg", Value::Missing),
            }
        };
        let ds = Dataset::new(
            "regional",
            vec![MAKE.to_string(), MODEL.to_string(), "Emision_CO2_avg".to_string()],
            vec![row(1, "TGX", None), row(2, "TGL", Some(500.0)), row(3, "TGM", Some(400.0))],
        );
        let report = regional_report(&ds, &Config::default());
        let refs = report
            .tables
            .iter()
            .find(|t| t.id == "lowest_emission_references")
            .unwrap();
        let models: Vec<&str> = refs.rows.iter().map(|r| r[1].as_str()).collect();
        assert_eq!(models, vec!["TGM", "TGL"]);
        let avg = report
            .findings
            .iter()
            .find(|f| f.label == "Average of selected references")
            .unwrap();
        assert_eq!(avg.value, "450.00 g/km (100.00 g/km below TGL)");
    }
}
